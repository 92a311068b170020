//! # lookout-core
//!
//! Foundation types shared by every Lookout crate:
//! - Branded [`ActorId`] and [`NodeToken`] newtypes
//! - Wire packets ([`Request`], [`Packet`], [`Grip`])
//! - The wire-visible [`ProtocolError`] and its error names
//! - `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod packet;

pub use errors::ProtocolError;
pub use ids::{ActorId, NodeToken};
pub use packet::{Grip, Packet, Request};
