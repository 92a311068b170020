//! The DOM walker actor: traversal requests, pseudo-class locks, and the
//! mutation event stream.

use std::sync::{Arc, LazyLock, Weak};

use futures::FutureExt;
use lookout_actors::{
    Actor, ActorCell, ActorError, ActorPool, Connection, HandlerFuture, RequestTypes,
};
use lookout_core::{ActorId, NodeToken, Packet, ProtocolError, Request};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::inspector::InspectorActor;
use crate::node_pool::{NodeForm, NodePool};
use crate::walker::{
    ChildrenOptions, ClearLocksOptions, Mutation, MutationKind, NodeRef, NodeWindow,
    ParentsOptions, PseudoLockOptions, SiblingOptions, Walker, node_filter,
};

static WALKER_REQUESTS: LazyLock<RequestTypes<DomWalkerActor>> = LazyLock::new(|| {
    RequestTypes::new()
        .with("root", DomWalkerActor::on_root)
        .with("children", DomWalkerActor::on_children)
        .with("parents", DomWalkerActor::on_parents)
        .with("siblings", DomWalkerActor::on_siblings)
        .with("addPseudoClassLock", DomWalkerActor::on_add_pseudo_class_lock)
        .with("removePseudoClassLock", DomWalkerActor::on_remove_pseudo_class_lock)
        .with("clearPseudoClassLocks", DomWalkerActor::on_clear_pseudo_class_locks)
});

#[derive(Serialize)]
struct RootReply {
    root: NodeForm,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowReply {
    has_first: bool,
    has_last: bool,
    nodes: Vec<NodeForm>,
}

#[derive(Serialize)]
struct NodesReply<T> {
    nodes: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LockForm {
    actor: NodeToken,
    pseudo_class_locks: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum MutationRecord {
    ChildList {
        target: NodeToken,
    },
    Attributes {
        target: NodeToken,
        attribute_name: String,
        attribute_namespace: Option<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    },
}

fn body<T: Serialize>(reply: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(reply).map_err(|err| ProtocolError::Inspector {
        message: format!("failed to encode reply: {err}"),
    })
}

/// Serves one walker to the client.
///
/// Owns the walker, a [`NodePool`] naming every node the client has seen,
/// and the actor pool those node tokens are registered in.
pub struct DomWalkerActor {
    cell: ActorCell,
    conn: Arc<Connection>,
    parent: Mutex<Option<Weak<InspectorActor>>>,
    walker: Arc<dyn Walker>,
    nodes: Mutex<NodePool>,
    pool: Arc<ActorPool>,
    mutations: CancellationToken,
    default_max_nodes: Option<usize>,
}

impl DomWalkerActor {
    /// Wrap `walker`, reserve an ID, and start forwarding its mutations.
    pub fn new(
        conn: &Arc<Connection>,
        parent: &Arc<InspectorActor>,
        walker: Arc<dyn Walker>,
        default_max_nodes: Option<usize>,
    ) -> Arc<Self> {
        let id = conn.next_actor_id("domwalker");
        let pool = conn.new_pool();
        conn.add_actor_pool(pool.clone());
        let batches = walker.subscribe();
        let actor = Arc::new(Self {
            cell: ActorCell::with_id(id.clone()),
            conn: conn.clone(),
            parent: Mutex::new(Some(Arc::downgrade(parent))),
            walker,
            nodes: Mutex::new(NodePool::new(id, pool.clone())),
            pool,
            mutations: CancellationToken::new(),
            default_max_nodes,
        });
        actor.forward_mutations(batches);
        actor
    }

    /// Live node tokens.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Resolve a token previously sent to the client.
    pub fn node(&self, token: &NodeToken) -> Option<NodeRef> {
        self.nodes.lock().node(token)
    }

    fn id_or_prefix(&self) -> ActorId {
        self.actor_id().unwrap_or_else(|| self.prefix().into())
    }

    /// Fails once the actor has been disconnected. Called after every await.
    fn ensure_live(&self) -> Result<(), ProtocolError> {
        if self.cell.is_live() {
            Ok(())
        } else {
            Err(ProtocolError::ActorDisconnected {
                actor: self.id_or_prefix(),
            })
        }
    }

    fn lookup(&self, token: &str) -> Result<NodeRef, ProtocolError> {
        let token = NodeToken::from(token);
        self.nodes
            .lock()
            .node(&token)
            .ok_or(ProtocolError::NoSuchNode { token })
    }

    fn node_param(&self, request: &Request, name: &str) -> Result<NodeRef, ProtocolError> {
        self.lookup(request.require_str(name)?)
    }

    fn opt_node_param(&self, request: &Request, name: &str) -> Result<Option<NodeRef>, ProtocolError> {
        request.opt_str(name)?.map(|token| self.lookup(token)).transpose()
    }

    fn max_nodes(&self, request: &Request) -> Result<Option<usize>, ProtocolError> {
        let requested = request
            .opt_u64("maxNodes")?
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
        Ok(requested.or(self.default_max_nodes))
    }

    fn what_to_show(request: &Request) -> Result<u32, ProtocolError> {
        Ok(request.opt_u32("whatToShow")?.unwrap_or(node_filter::SHOW_ALL))
    }

    fn window_reply(&self, window: NodeWindow) -> Result<Value, ProtocolError> {
        let nodes = self.nodes.lock().forms(&window.nodes);
        body(&WindowReply {
            has_first: window.has_first,
            has_last: window.has_last,
            nodes,
        })
    }

    fn locks_reply(&self, modified: &[NodeRef]) -> Result<Value, ProtocolError> {
        let mut pool = self.nodes.lock();
        let nodes: Vec<LockForm> = modified
            .iter()
            .map(|node| LockForm {
                actor: pool.node_actor(node),
                pseudo_class_locks: node.pseudo_class_locks(),
            })
            .collect();
        drop(pool);
        body(&NodesReply { nodes })
    }

    // ── Request handlers ────────────────────────────────────────────

    fn on_root(actor: Arc<Self>, _request: Request) -> HandlerFuture {
        async move {
            let root = actor.walker.root().await?;
            actor.ensure_live()?;
            let root = actor.nodes.lock().form(&root);
            body(&RootReply { root })
        }
        .boxed()
    }

    fn on_children(actor: Arc<Self>, request: Request) -> HandlerFuture {
        async move {
            let node = actor.node_param(&request, "node")?;
            let options = ChildrenOptions {
                include: actor.opt_node_param(&request, "include")?,
                max_nodes: actor.max_nodes(&request)?,
                what_to_show: Self::what_to_show(&request)?,
            };
            let window = actor.walker.children(node, options).await?;
            actor.ensure_live()?;
            actor.window_reply(window)
        }
        .boxed()
    }

    fn on_parents(actor: Arc<Self>, request: Request) -> HandlerFuture {
        async move {
            let node = actor.node_param(&request, "node")?;
            let options = ParentsOptions {
                what_to_show: Self::what_to_show(&request)?,
            };
            let parents = actor.walker.parents(node, options).await?;
            actor.ensure_live()?;
            let nodes = actor.nodes.lock().forms(&parents);
            body(&NodesReply { nodes })
        }
        .boxed()
    }

    fn on_siblings(actor: Arc<Self>, request: Request) -> HandlerFuture {
        async move {
            let node = actor.node_param(&request, "node")?;
            let options = SiblingOptions {
                max_nodes: actor.max_nodes(&request)?,
                what_to_show: Self::what_to_show(&request)?,
            };
            let window = actor.walker.siblings(node, options).await?;
            actor.ensure_live()?;
            actor.window_reply(window)
        }
        .boxed()
    }

    fn on_add_pseudo_class_lock(actor: Arc<Self>, request: Request) -> HandlerFuture {
        async move {
            let node = actor.node_param(&request, "node")?;
            let pseudo = request.require_str("pseudo")?.to_owned();
            let options = PseudoLockOptions {
                parents: request.opt_bool("parents")?.unwrap_or(false),
            };
            let modified = actor.walker.add_pseudo_class_lock(node, pseudo, options).await?;
            actor.ensure_live()?;
            actor.locks_reply(&modified)
        }
        .boxed()
    }

    fn on_remove_pseudo_class_lock(actor: Arc<Self>, request: Request) -> HandlerFuture {
        async move {
            let node = actor.node_param(&request, "node")?;
            let pseudo = request.require_str("pseudo")?.to_owned();
            let options = PseudoLockOptions {
                parents: request.opt_bool("parents")?.unwrap_or(false),
            };
            let modified = actor
                .walker
                .remove_pseudo_class_lock(node, pseudo, options)
                .await?;
            actor.ensure_live()?;
            actor.locks_reply(&modified)
        }
        .boxed()
    }

    fn on_clear_pseudo_class_locks(actor: Arc<Self>, request: Request) -> HandlerFuture {
        async move {
            let node = actor.opt_node_param(&request, "node")?;
            let pseudo = request.opt_str("pseudo")?.map(str::to_owned);
            let options = ClearLocksOptions {
                all: request.opt_bool("all")?.unwrap_or(false),
            };
            let modified = actor
                .walker
                .clear_pseudo_class_locks(node, pseudo, options)
                .await?;
            actor.ensure_live()?;
            actor.locks_reply(&modified)
        }
        .boxed()
    }

    // ── Mutation stream ─────────────────────────────────────────────

    fn forward_mutations(self: &Arc<Self>, mut batches: mpsc::UnboundedReceiver<Vec<Mutation>>) {
        let actor = Arc::downgrade(self);
        let cancelled = self.mutations.clone();
        self.conn.spawn(async move {
            loop {
                let batch = tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    batch = batches.recv() => batch,
                };
                let Some(batch) = batch else { break };
                let Some(actor) = actor.upgrade() else { break };
                actor.on_mutations(&batch);
            }
        });
    }

    fn on_mutations(&self, batch: &[Mutation]) {
        if !self.cell.is_live() {
            return;
        }
        let records: Vec<MutationRecord> = {
            let pool = self.nodes.lock();
            batch
                .iter()
                .filter_map(|mutation| {
                    let target = pool.token_of(mutation.target.as_ref())?;
                    match &mutation.kind {
                        MutationKind::ChildList => Some(MutationRecord::ChildList { target }),
                        MutationKind::Attributes {
                            name,
                            namespace,
                            old_value,
                        } => Some(MutationRecord::Attributes {
                            target,
                            attribute_name: name.clone(),
                            attribute_namespace: namespace.clone(),
                            old_value: old_value.clone(),
                            new_value: mutation.target.get_attribute(name),
                        }),
                        MutationKind::CharacterData => None,
                    }
                })
                .collect()
        };
        if records.is_empty() {
            debug!(walker = %self.id_or_prefix(), dropped = batch.len(), "no observed targets in batch");
            return;
        }
        let mutations = match serde_json::to_value(&records) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to encode mutations");
                return;
            }
        };
        let mut fields = Map::new();
        let _ = fields.insert("mutations".to_owned(), mutations);
        self.conn
            .send(Packet::event(self.id_or_prefix(), "mutations", fields));
    }
}

impl Actor for DomWalkerActor {
    fn prefix(&self) -> &'static str {
        "domwalker"
    }

    fn cell(&self) -> &ActorCell {
        &self.cell
    }

    fn dispatch(self: Arc<Self>, request: Request) -> Option<HandlerFuture> {
        WALKER_REQUESTS.dispatch(self, request)
    }

    fn disconnect(&self) -> Result<(), ActorError> {
        if let Err(err) = self.cell.mark_disconnected(self.prefix()) {
            error!(error = %err, "walker disconnected twice");
            return Err(err);
        }
        self.mutations.cancel();
        self.walker.destroy();
        self.conn.remove_actor_pool(&self.pool);
        self.pool.destroy();
        let parent = self.parent.lock().take().and_then(|parent| parent.upgrade());
        if let Some(parent) = parent {
            parent.release_actor(&self.id_or_prefix());
        }
        self.nodes.lock().cleanup();
        debug!(walker = %self.id_or_prefix(), "walker disconnected");
        Ok(())
    }
}
