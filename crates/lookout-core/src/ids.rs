//! Branded ID newtypes for type safety.
//!
//! Actor IDs and node tokens travel over the wire as plain strings, but they
//! are never interchangeable: a node token addresses a node inside one walker,
//! an actor ID addresses a request target on the connection.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Address of an actor on a connection, e.g. `conn0.domwalker3`.
    ActorId
}

branded_id! {
    /// Identity of an observed tree node, e.g. `conn0.domwalker3.12`.
    NodeToken
}

impl ActorId {
    /// The well-known ID of the connection's root actor.
    pub const ROOT: &'static str = "root";

    /// Build an ID from a connection prefix, an actor prefix and a counter.
    #[must_use]
    pub fn compose(connection_prefix: &str, actor_prefix: &str, serial: u64) -> Self {
        Self(format!("{connection_prefix}.{actor_prefix}{serial}"))
    }

    /// Whether this is the root actor's ID.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }
}

impl NodeToken {
    /// Build a token scoped to a walker actor.
    #[must_use]
    pub fn compose(walker: &ActorId, serial: u64) -> Self {
        Self(format!("{walker}.{serial}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_id_compose() {
        let id = ActorId::compose("conn0", "inspector", 4);
        assert_eq!(id.as_str(), "conn0.inspector4");
    }

    #[test]
    fn node_token_is_scoped_to_walker() {
        let walker = ActorId::from("conn1.domwalker2");
        let token = NodeToken::compose(&walker, 0);
        assert_eq!(token.as_str(), "conn1.domwalker2.0");
        assert!(token.starts_with(walker.as_str()));
    }

    #[test]
    fn root_id() {
        assert!(ActorId::from(ActorId::ROOT).is_root());
        assert!(!ActorId::from("conn0.tab1").is_root());
    }

    #[test]
    fn serializes_transparently() {
        let id = ActorId::from("conn0.tab1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"conn0.tab1\"");
        let back: NodeToken = serde_json::from_str("\"conn0.domwalker1.3\"").unwrap();
        assert_eq!(back.as_str(), "conn0.domwalker1.3");
    }

    #[test]
    fn display_and_deref() {
        let token = NodeToken::from("a.b.1");
        assert_eq!(format!("{token}"), "a.b.1");
        assert!(token.ends_with(".1"));
        let s: String = token.into();
        assert_eq!(s, "a.b.1");
    }
}
