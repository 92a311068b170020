//! # lookout-inspector
//!
//! The remote tree-walking protocol built on `lookout-actors`:
//! - [`Walker`]: async tree-engine contract (traversal, pseudo-class locks,
//!   mutation stream)
//! - [`NodePool`]: per-walker node tokens and [`NodeForm`] serialization
//! - [`InspectorActor`]: per-target entry point that hands out walkers
//! - [`DomWalkerActor`]: serves traversal requests and streams mutations
//! - [`memory`]: an in-memory document and walker implementing the contract

#![deny(unsafe_code)]

pub mod dom_walker;
pub mod errors;
pub mod inspector;
pub mod memory;
pub mod node_pool;
pub mod walker;

pub use dom_walker::DomWalkerActor;
pub use errors::{InspectorError, WalkerError};
pub use inspector::{
    BrowsingContext, ContentWindow, FrameElement, InspectorActor, InspectorOptions,
};
pub use node_pool::{AttrForm, NodeActor, NodeForm, NodePool};
pub use walker::{
    ChildrenOptions, ClearLocksOptions, DomNode, Mutation, MutationKind, NodeRef, NodeWindow,
    ParentsOptions, PseudoLockOptions, SiblingOptions, Walker, WalkerOptions,
};
