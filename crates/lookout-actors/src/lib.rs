//! # lookout-actors
//!
//! The actor registry and RPC dispatch engine:
//! - [`Actor`]: addressable server-side object with a static request table
//! - [`ActorPool`]: ownership scope that allocates IDs and tears actors down
//! - [`Connection`]: resolves `to`, dispatches by `type`, queues outbound packets
//! - [`Scheduler`]: drives every handler and event task of one connection on
//!   a single tokio task

#![deny(unsafe_code)]

pub mod actor;
pub mod connection;
pub mod errors;
pub mod pool;

pub use actor::{Actor, ActorCell, HandlerFuture, RequestHandler, RequestTypes};
pub use connection::{Connection, Scheduler};
pub use errors::{ActorError, PoolError};
pub use pool::{ActorIdAllocator, ActorPool};
