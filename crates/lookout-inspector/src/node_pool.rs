//! Per-walker node tokens and node forms.
//!
//! A node gets a token the first time it is sent to the client and keeps it
//! for as long as the pool lives. The counter is never rewound, so a token
//! that went stale through [`NodePool::cleanup`] can never resolve to a
//! different node later.
//!
//! Every live token is also registered as a [`NodeActor`], so a packet
//! addressed to it is routed by the connection like any other actor.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use lookout_actors::{Actor, ActorCell, ActorError, ActorPool, HandlerFuture, RequestTypes};
use lookout_core::{ActorId, NodeToken, Request};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::walker::{DomNode, NodeRef};

static NODE_REQUESTS: LazyLock<RequestTypes<NodeActor>> = LazyLock::new(RequestTypes::new);

/// The actor behind a node token.
///
/// Nodes take no requests of their own; walker requests name them through
/// parameters instead.
pub struct NodeActor {
    cell: ActorCell,
}

impl NodeActor {
    fn new(token: &NodeToken) -> Arc<Self> {
        Arc::new(Self {
            cell: ActorCell::with_id(ActorId::from(token.as_str())),
        })
    }
}

impl Actor for NodeActor {
    fn prefix(&self) -> &'static str {
        "node"
    }

    fn cell(&self) -> &ActorCell {
        &self.cell
    }

    fn dispatch(self: Arc<Self>, request: Request) -> Option<HandlerFuture> {
        NODE_REQUESTS.dispatch(self, request)
    }

    fn disconnect(&self) -> Result<(), ActorError> {
        self.cell.mark_disconnected(self.prefix())
    }
}

/// Token ↔ node mapping owned by one [`crate::DomWalkerActor`].
pub struct NodePool {
    walker: ActorId,
    actors: Arc<ActorPool>,
    next: u64,
    by_key: HashMap<u64, NodeToken>,
    by_token: HashMap<NodeToken, NodeRef>,
}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("walker", &self.walker)
            .field("next", &self.next)
            .field("live", &self.by_token.len())
            .finish_non_exhaustive()
    }
}

impl NodePool {
    /// Empty pool issuing tokens under `walker` and registering their actors
    /// in `actors`.
    pub fn new(walker: ActorId, actors: Arc<ActorPool>) -> Self {
        Self {
            walker,
            actors,
            next: 0,
            by_key: HashMap::new(),
            by_token: HashMap::new(),
        }
    }

    /// Token for `node`, assigning the next one on first sight.
    #[allow(clippy::wrong_self_convention)]
    pub fn from_node(&mut self, node: &NodeRef) -> NodeToken {
        if let Some(token) = self.by_key.get(&node.key()) {
            return token.clone();
        }
        let token = NodeToken::compose(&self.walker, self.next);
        self.next += 1;
        if let Err(err) = self.actors.add_actor(NodeActor::new(&token)) {
            warn!(token = %token, error = %err, "node actor not registered");
        }
        let _ = self.by_key.insert(node.key(), token.clone());
        let _ = self.by_token.insert(token.clone(), node.clone());
        token
    }

    /// Token for a node reached outside a traversal reply (e.g. an ancestor
    /// touched by a pseudo-class lock). Assigns one if needed.
    pub fn node_actor(&mut self, node: &NodeRef) -> NodeToken {
        self.from_node(node)
    }

    /// Existing token for `node`, without assigning.
    pub fn token_of(&self, node: &dyn DomNode) -> Option<NodeToken> {
        self.by_key.get(&node.key()).cloned()
    }

    /// Resolve a client token.
    pub fn node(&self, token: &NodeToken) -> Option<NodeRef> {
        self.by_token.get(token).cloned()
    }

    /// Whether `token` resolves.
    pub fn has(&self, token: &NodeToken) -> bool {
        self.by_token.contains_key(token)
    }

    /// Whether no node has a live token.
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Invalidate every token and disconnect its actor. The counter keeps
    /// going.
    pub fn cleanup(&mut self) {
        self.actors.destroy();
        self.by_key.clear();
        self.by_token.clear();
    }

    /// Serialize `node`, tokenizing it if needed.
    pub fn form(&mut self, node: &NodeRef) -> NodeForm {
        let actor = self.from_node(node);
        NodeForm::read(actor, node.as_ref())
    }

    /// Forms for `nodes`, in order.
    pub fn forms(&mut self, nodes: &[NodeRef]) -> Vec<NodeForm> {
        nodes.iter().map(|node| self.form(node)).collect()
    }
}

/// `{name, value}` attribute entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrForm {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: String,
}

/// Wire representation of a node, read fresh from the live node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeForm {
    /// Node token.
    pub actor: NodeToken,
    /// `id` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `class` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Child count, unfiltered.
    pub num_children: usize,
    /// DOM `nodeType`.
    pub node_type: u16,
    /// Element namespace.
    #[serde(rename = "namespaceURI", skip_serializing_if = "Option::is_none")]
    pub namespace_uri: Option<String>,
    /// Element tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    /// DOM `nodeName`.
    pub node_name: String,
    /// Character data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_value: Option<String>,
    /// Doctype name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Doctype public identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    /// Doctype system identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    /// Locked pseudo-classes.
    pub pseudo_class_locks: Vec<String>,
    /// Top-level element of its document.
    pub is_document_element: bool,
    /// Always `true`.
    pub is_node: bool,
    /// Attached to its document.
    pub is_connected: bool,
    /// Present for elements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Vec<AttrForm>>,
    /// Only ever `Some(true)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_walker_root: Option<bool>,
}

impl NodeForm {
    /// Snapshot `node` under token `actor`.
    pub fn read(actor: NodeToken, node: &dyn DomNode) -> Self {
        Self {
            actor,
            id: node.id(),
            class_name: node.class_name(),
            num_children: node.num_children(),
            node_type: node.node_type(),
            namespace_uri: node.namespace_uri(),
            tag_name: node.tag_name(),
            node_name: node.node_name(),
            node_value: node.node_value(),
            name: node.name(),
            public_id: node.public_id(),
            system_id: node.system_id(),
            pseudo_class_locks: node.pseudo_class_locks(),
            is_document_element: node.is_document_element(),
            is_node: true,
            is_connected: node.is_connected(),
            attrs: node.attributes().map(|attrs| {
                attrs
                    .into_iter()
                    .map(|(name, value)| AttrForm { name, value })
                    .collect()
            }),
            is_walker_root: node.is_walker_root().then_some(true),
        }
    }
}
