//! Tree-engine and inspector construction errors.

use lookout_core::ProtocolError;

/// Prefix put in front of every engine failure sent to the client.
pub const WALKER_ERROR_PREFIX: &str = "DOM walker error: ";

/// Failure reported by a [`crate::Walker`] or the in-memory document.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WalkerError {
    /// The walker was destroyed; every later call fails.
    #[error("walker has been destroyed")]
    Destroyed,

    /// The node does not belong to this walker's document.
    #[error("node {key} is not part of this document")]
    UnknownNode {
        /// Engine key of the node.
        key: u64,
    },

    /// The operation needs an element.
    #[error("{node_name} is not an element")]
    NotAnElement {
        /// `nodeName` of the offending node.
        node_name: String,
    },

    /// The operation needs text or comment data.
    #[error("{node_name} has no character data")]
    NotCharacterData {
        /// `nodeName` of the offending node.
        node_name: String,
    },

    /// A node passed as a child of `parent` is not one.
    #[error("node {child} is not a child of node {parent}")]
    NotAChild {
        /// Parent key.
        parent: u64,
        /// Child key.
        child: u64,
    },

    /// Appending would make a node its own ancestor.
    #[error("node {key} cannot be inserted below itself")]
    HierarchyRequest {
        /// Key of the node being inserted.
        key: u64,
    },

    /// Only `hover`, `active` and `focus` can be locked.
    #[error("unsupported pseudo-class '{pseudo}'")]
    InvalidPseudoClass {
        /// The rejected value.
        pseudo: String,
    },
}

impl From<WalkerError> for ProtocolError {
    fn from(err: WalkerError) -> Self {
        Self::Inspector {
            message: format!("{WALKER_ERROR_PREFIX}{err}"),
        }
    }
}

/// Failure creating an [`crate::InspectorActor`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InspectorError {
    /// The target is neither a window nor a frame with a content window.
    #[error("target {target} has no browsing context")]
    NoBrowsingContext {
        /// Description of the target.
        target: String,
    },
}

impl From<InspectorError> for ProtocolError {
    fn from(err: InspectorError) -> Self {
        Self::NoBrowsingContext {
            message: err.to_string(),
        }
    }
}
