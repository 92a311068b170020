//! Wire-visible protocol error names and error type.

use crate::ids::{ActorId, NodeToken};
use crate::packet::Packet;

// ── Error name constants ────────────────────────────────────────────

/// Inbound text is not a well-formed request object.
pub const NOT_PARSEABLE: &str = "notParseable";
/// The `to` field does not resolve to a live actor.
pub const NO_SUCH_ACTOR: &str = "noSuchActor";
/// The addressed actor has no handler for the request type.
pub const UNRECOGNIZED_PACKET_TYPE: &str = "unrecognizedPacketType";
/// A required request field is absent.
pub const MISSING_PARAMETER: &str = "missingParameter";
/// A request field is present with the wrong shape.
pub const BAD_PARAMETER_TYPE: &str = "badParameterType";
/// A node token is unknown or has expired.
pub const NO_SUCH_NODE: &str = "noSuchNode";
/// The tree engine rejected an operation.
pub const INSPECTOR_ERROR: &str = "inspectorError";
/// The inspected target exposes no content window.
pub const NO_BROWSING_CONTEXT: &str = "noBrowsingContext";
/// The addressed actor is being torn down.
pub const ACTOR_DISCONNECTED: &str = "actorDisconnected";

/// Error reported to the client as `{from, error, message}`.
///
/// None of these close the connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Inbound packet could not be parsed.
    #[error("{message}")]
    NotParseable {
        /// Parser diagnostic.
        message: String,
    },

    /// No registered pool holds the addressed actor.
    #[error("No such actor for ID: {actor}")]
    NoSuchActor {
        /// The unresolved address.
        actor: ActorId,
    },

    /// The actor does not handle this request type.
    #[error("Actor {actor} does not recognize the packet type '{request_type}'")]
    UnrecognizedPacketType {
        /// The addressed actor.
        actor: ActorId,
        /// The unknown request type.
        request_type: String,
    },

    /// Required field absent.
    #[error("Missing required parameter: {name}")]
    MissingParameter {
        /// Field name.
        name: String,
    },

    /// Field has the wrong JSON type.
    #[error("Parameter '{name}' must be {expected}")]
    BadParameterType {
        /// Field name.
        name: String,
        /// Human-readable expected shape.
        expected: &'static str,
    },

    /// Node token unknown to the walker's node pool.
    #[error("No such node: {token}")]
    NoSuchNode {
        /// The stale or foreign token.
        token: NodeToken,
    },

    /// Tree engine failure, already rendered for the client.
    #[error("{message}")]
    Inspector {
        /// Client-facing description.
        message: String,
    },

    /// Inspector target lacks a browsing context.
    #[error("{message}")]
    NoBrowsingContext {
        /// Description.
        message: String,
    },

    /// The actor was disconnected while the request was pending.
    #[error("Actor {actor} has been disconnected")]
    ActorDisconnected {
        /// The torn-down actor.
        actor: ActorId,
    },
}

impl ProtocolError {
    /// Wire error name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotParseable { .. } => NOT_PARSEABLE,
            Self::NoSuchActor { .. } => NO_SUCH_ACTOR,
            Self::UnrecognizedPacketType { .. } => UNRECOGNIZED_PACKET_TYPE,
            Self::MissingParameter { .. } => MISSING_PARAMETER,
            Self::BadParameterType { .. } => BAD_PARAMETER_TYPE,
            Self::NoSuchNode { .. } => NO_SUCH_NODE,
            Self::Inspector { .. } => INSPECTOR_ERROR,
            Self::NoBrowsingContext { .. } => NO_BROWSING_CONTEXT,
            Self::ActorDisconnected { .. } => ACTOR_DISCONNECTED,
        }
    }

    /// Shorthand for a missing field.
    pub fn missing(name: &str) -> Self {
        Self::MissingParameter { name: name.to_owned() }
    }

    /// Shorthand for a field of the wrong type.
    pub fn bad_type(name: &str, expected: &'static str) -> Self {
        Self::BadParameterType {
            name: name.to_owned(),
            expected,
        }
    }

    /// Render as an error packet sent on behalf of `from`.
    pub fn to_packet(&self, from: &ActorId) -> Packet {
        Packet::error(from.clone(), self.name(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_wire_vocabulary() {
        assert_eq!(
            ProtocolError::NotParseable { message: "x".into() }.name(),
            "notParseable"
        );
        assert_eq!(
            ProtocolError::NoSuchActor { actor: "conn0.x1".into() }.name(),
            "noSuchActor"
        );
        assert_eq!(ProtocolError::missing("node").name(), "missingParameter");
        assert_eq!(
            ProtocolError::bad_type("maxNodes", "an unsigned integer").name(),
            "badParameterType"
        );
        assert_eq!(
            ProtocolError::Inspector { message: "m".into() }.name(),
            "inspectorError"
        );
    }

    #[test]
    fn messages_name_the_subject() {
        let err = ProtocolError::UnrecognizedPacketType {
            actor: "conn0.domwalker1".into(),
            request_type: "explode".into(),
        };
        let text = err.to_string();
        assert!(text.contains("conn0.domwalker1"));
        assert!(text.contains("explode"));

        let err = ProtocolError::bad_type("maxNodes", "an unsigned integer");
        assert_eq!(err.to_string(), "Parameter 'maxNodes' must be an unsigned integer");
    }

    #[test]
    fn to_packet_shape() {
        let err = ProtocolError::NoSuchNode {
            token: "conn0.domwalker1.9".into(),
        };
        let value = serde_json::to_value(err.to_packet(&"conn0.domwalker1".into())).unwrap();
        assert_eq!(value["from"], "conn0.domwalker1");
        assert_eq!(value["error"], "noSuchNode");
        assert!(value["message"].as_str().unwrap().contains("conn0.domwalker1.9"));
    }
}
