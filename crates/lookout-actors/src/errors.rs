//! Programmer errors: lifecycle and ownership violations.
//!
//! These are defects in the calling code, not protocol events. Callers log
//! them at error level and abort the offending operation.

use lookout_core::ActorId;

/// Ownership violation reported by [`crate::ActorPool`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The actor is already registered in a pool.
    #[error("actor {actor} already belongs to pool {owner}")]
    AlreadyOwned {
        /// The actor's ID.
        actor: ActorId,
        /// Serial of the owning pool.
        owner: u64,
    },

    /// The actor has been disconnected and cannot be registered again.
    #[error("cannot register disconnected actor {actor}")]
    Disconnected {
        /// The actor's ID, or its prefix if it never had one.
        actor: String,
    },
}

/// Lifecycle violation reported by an actor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// `disconnect` was called twice.
    #[error("actor {actor} is already disconnected")]
    AlreadyDisconnected {
        /// The actor's ID, or its prefix if it never had one.
        actor: String,
    },
}
