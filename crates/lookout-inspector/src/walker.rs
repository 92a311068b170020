//! The tree-engine contract consumed by [`crate::DomWalkerActor`].
//!
//! A walker is built over one document and hands out [`NodeRef`] handles.
//! Handles are cheap to clone and always read the live node; two handles
//! denote the same node when their [`DomNode::key`] is equal.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::WalkerError;

/// DOM `nodeType` values.
pub mod node_type {
    /// `<tag>`
    pub const ELEMENT: u16 = 1;
    /// Character data.
    pub const TEXT: u16 = 3;
    /// `<!-- -->`
    pub const COMMENT: u16 = 8;
    /// The document itself.
    pub const DOCUMENT: u16 = 9;
    /// `<!DOCTYPE>`
    pub const DOCUMENT_TYPE: u16 = 10;
}

/// `NodeFilter.SHOW_*` masks accepted as `whatToShow`.
pub mod node_filter {
    /// Every node type.
    pub const SHOW_ALL: u32 = 0xFFFF_FFFF;
    /// Elements.
    pub const SHOW_ELEMENT: u32 = 0x1;
    /// Attribute nodes.
    pub const SHOW_ATTRIBUTE: u32 = 0x2;
    /// Text nodes.
    pub const SHOW_TEXT: u32 = 0x4;
    /// CDATA sections.
    pub const SHOW_CDATA_SECTION: u32 = 0x8;
    /// Processing instructions.
    pub const SHOW_PROCESSING_INSTRUCTION: u32 = 0x40;
    /// Comments.
    pub const SHOW_COMMENT: u32 = 0x80;
    /// Document nodes.
    pub const SHOW_DOCUMENT: u32 = 0x100;
    /// Doctypes.
    pub const SHOW_DOCUMENT_TYPE: u32 = 0x200;
    /// Document fragments.
    pub const SHOW_DOCUMENT_FRAGMENT: u32 = 0x400;

    /// Whether `mask` lets a node of `node_type` through.
    pub fn accepts(mask: u32, node_type: u16) -> bool {
        match node_type {
            1..=32 => mask & (1 << (node_type - 1)) != 0,
            _ => false,
        }
    }
}

/// Live, read-only view of one tree node.
pub trait DomNode: Send + Sync + fmt::Debug {
    /// Engine-wide stable identity.
    fn key(&self) -> u64;
    /// DOM `nodeType`.
    fn node_type(&self) -> u16;
    /// DOM `nodeName`.
    fn node_name(&self) -> String;
    /// Character data for text and comments.
    fn node_value(&self) -> Option<String>;
    /// Upper-cased tag (elements only).
    fn tag_name(&self) -> Option<String>;
    /// Element namespace.
    fn namespace_uri(&self) -> Option<String>;
    /// `id` attribute (elements only).
    fn id(&self) -> Option<String>;
    /// `class` attribute (elements only).
    fn class_name(&self) -> Option<String>;
    /// Number of child nodes.
    fn num_children(&self) -> usize;
    /// Doctype name.
    fn name(&self) -> Option<String>;
    /// Doctype public identifier.
    fn public_id(&self) -> Option<String>;
    /// Doctype system identifier.
    fn system_id(&self) -> Option<String>;
    /// Attributes in document order; `None` for non-elements.
    fn attributes(&self) -> Option<Vec<(String, String)>>;
    /// Current value of attribute `name`.
    fn get_attribute(&self, name: &str) -> Option<String>;
    /// Locked pseudo-classes, in lock order.
    fn pseudo_class_locks(&self) -> Vec<String>;
    /// The document's top-level element.
    fn is_document_element(&self) -> bool;
    /// Attached to its document.
    fn is_connected(&self) -> bool;
    /// The node the walker was rooted at.
    fn is_walker_root(&self) -> bool;
    /// Engine-specific downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a live node.
pub type NodeRef = Arc<dyn DomNode>;

/// Walker construction options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkerOptions {
    /// Only report mutations whose target was returned by this walker.
    pub watch_visited: bool,
}

impl Default for WalkerOptions {
    fn default() -> Self {
        Self { watch_visited: true }
    }
}

/// `children` options.
#[derive(Clone, Debug)]
pub struct ChildrenOptions {
    /// Child the window must contain.
    pub include: Option<NodeRef>,
    /// Window size; `None` returns every child.
    pub max_nodes: Option<usize>,
    /// `NodeFilter` mask.
    pub what_to_show: u32,
}

impl Default for ChildrenOptions {
    fn default() -> Self {
        Self {
            include: None,
            max_nodes: None,
            what_to_show: node_filter::SHOW_ALL,
        }
    }
}

/// `parents` options.
#[derive(Clone, Copy, Debug)]
pub struct ParentsOptions {
    /// `NodeFilter` mask.
    pub what_to_show: u32,
}

impl Default for ParentsOptions {
    fn default() -> Self {
        Self {
            what_to_show: node_filter::SHOW_ALL,
        }
    }
}

/// `siblings` options.
#[derive(Clone, Copy, Debug)]
pub struct SiblingOptions {
    /// Window size; `None` returns every sibling.
    pub max_nodes: Option<usize>,
    /// `NodeFilter` mask.
    pub what_to_show: u32,
}

impl Default for SiblingOptions {
    fn default() -> Self {
        Self {
            max_nodes: None,
            what_to_show: node_filter::SHOW_ALL,
        }
    }
}

/// `addPseudoClassLock` / `removePseudoClassLock` options.
#[derive(Clone, Copy, Debug, Default)]
pub struct PseudoLockOptions {
    /// Apply to every element ancestor as well.
    pub parents: bool,
}

/// `clearPseudoClassLocks` options.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearLocksOptions {
    /// Clear across the whole document.
    pub all: bool,
}

/// A contiguous run of children.
#[derive(Clone, Debug)]
pub struct NodeWindow {
    /// The window starts at the first matching child.
    pub has_first: bool,
    /// The window ends at the last matching child.
    pub has_last: bool,
    /// Nodes in document order.
    pub nodes: Vec<NodeRef>,
}

/// What changed on a mutation target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationKind {
    /// Children added or removed.
    ChildList,
    /// An attribute was set or removed.
    Attributes {
        /// Attribute name.
        name: String,
        /// Attribute namespace.
        namespace: Option<String>,
        /// Value before the change.
        old_value: Option<String>,
    },
    /// Text or comment data changed.
    CharacterData,
}

/// One change reported by the engine.
#[derive(Clone, Debug)]
pub struct Mutation {
    /// The changed node.
    pub target: NodeRef,
    /// What changed.
    pub kind: MutationKind,
}

/// Async tree engine bound to one document.
#[async_trait]
pub trait Walker: Send + Sync {
    /// The document node.
    async fn root(&self) -> Result<NodeRef, WalkerError>;

    /// A window over `node`'s children.
    async fn children(
        &self,
        node: NodeRef,
        options: ChildrenOptions,
    ) -> Result<NodeWindow, WalkerError>;

    /// Ancestors of `node`, immediate parent first.
    async fn parents(
        &self,
        node: NodeRef,
        options: ParentsOptions,
    ) -> Result<Vec<NodeRef>, WalkerError>;

    /// A window over `node`'s siblings (including `node`).
    async fn siblings(
        &self,
        node: NodeRef,
        options: SiblingOptions,
    ) -> Result<NodeWindow, WalkerError>;

    /// Lock `pseudo` on; returns the nodes whose state changed.
    async fn add_pseudo_class_lock(
        &self,
        node: NodeRef,
        pseudo: String,
        options: PseudoLockOptions,
    ) -> Result<Vec<NodeRef>, WalkerError>;

    /// Lock `pseudo` off; returns the nodes whose state changed.
    async fn remove_pseudo_class_lock(
        &self,
        node: NodeRef,
        pseudo: String,
        options: PseudoLockOptions,
    ) -> Result<Vec<NodeRef>, WalkerError>;

    /// Drop `pseudo` (or every lock) from `node` or the whole document.
    async fn clear_pseudo_class_locks(
        &self,
        node: Option<NodeRef>,
        pseudo: Option<String>,
        options: ClearLocksOptions,
    ) -> Result<Vec<NodeRef>, WalkerError>;

    /// Mutation batches. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<Mutation>>;

    /// Release engine resources.
    fn destroy(&self);
}
