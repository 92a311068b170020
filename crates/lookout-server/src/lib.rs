//! # lookout-server
//!
//! Serves the inspector protocol over WebSocket:
//! - [`RootActor`]: fixed `root` address, greeting and `listTabs`
//! - [`TabActor`]: one inspectable document, owning its inspector actor
//! - [`session`]: per-socket lifecycle bridging frames and a [`lookout_actors::Connection`]
//! - [`LookoutServer`]: axum router with `/ws` and `/health`

#![deny(unsafe_code)]

pub mod health;
pub mod root;
pub mod server;
pub mod session;
pub mod tab;

pub use root::RootActor;
pub use server::{AppState, LookoutServer};
pub use tab::{TabActor, TabForm};
