//! Per-target inspector actor and the browsing-context seam.

use std::fmt;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use lookout_actors::{
    Actor, ActorCell, ActorError, ActorPool, Connection, HandlerFuture, RequestTypes,
};
use lookout_core::{ActorId, Grip, ProtocolError, Request};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::dom_walker::DomWalkerActor;
use crate::errors::{InspectorError, WalkerError};
use crate::walker::{Walker, WalkerOptions};

/// A window whose document can be walked.
pub trait ContentWindow: Send + Sync {
    /// Document title.
    fn title(&self) -> String;
    /// Document URL.
    fn url(&self) -> String;
    /// Build a walker over the window's document.
    fn open_walker(&self, options: WalkerOptions) -> Result<Arc<dyn Walker>, WalkerError>;
}

/// A frame-like element that may host a window.
pub trait FrameElement: Send + Sync {
    /// The hosted window, if one is loaded.
    fn content_window(&self) -> Option<Arc<dyn ContentWindow>>;
}

/// What an inspected target exposes.
#[derive(Clone)]
pub enum BrowsingContext {
    /// A top-level window.
    Window(Arc<dyn ContentWindow>),
    /// A frame element; usable only when it hosts a window.
    Frame(Arc<dyn FrameElement>),
    /// Nothing inspectable.
    Detached,
}

impl BrowsingContext {
    /// The window to inspect, if any.
    pub fn content_window(&self) -> Option<Arc<dyn ContentWindow>> {
        match self {
            Self::Window(window) => Some(window.clone()),
            Self::Frame(frame) => frame.content_window(),
            Self::Detached => None,
        }
    }
}

impl fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Window(window) => f.debug_tuple("Window").field(&window.url()).finish(),
            Self::Frame(_) => f.write_str("Frame"),
            Self::Detached => f.write_str("Detached"),
        }
    }
}

/// Defaults applied to walkers this inspector creates.
#[derive(Clone, Copy, Debug)]
pub struct InspectorOptions {
    /// Passed to every walker.
    pub walker: WalkerOptions,
    /// Window size used when a request carries no `maxNodes`.
    pub default_max_nodes: Option<usize>,
}

impl Default for InspectorOptions {
    fn default() -> Self {
        Self {
            walker: WalkerOptions { watch_visited: true },
            default_max_nodes: None,
        }
    }
}

static INSPECTOR_REQUESTS: LazyLock<RequestTypes<InspectorActor>> =
    LazyLock::new(|| RequestTypes::new().with("getWalker", InspectorActor::on_get_walker));

/// Entry point for inspecting one target.
pub struct InspectorActor {
    cell: ActorCell,
    conn: Arc<Connection>,
    window: Mutex<Option<Arc<dyn ContentWindow>>>,
    pool: Mutex<Option<Arc<ActorPool>>>,
    options: InspectorOptions,
}

impl fmt::Debug for InspectorActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InspectorActor")
            .field("actor", &self.cell.label(self.prefix()))
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl InspectorActor {
    /// Bind to `context`'s window and register an empty pool on `conn`.
    ///
    /// The caller registers the returned actor in its own pool.
    pub fn new(
        conn: &Arc<Connection>,
        context: &BrowsingContext,
        options: InspectorOptions,
    ) -> Result<Arc<Self>, InspectorError> {
        let Some(window) = context.content_window() else {
            error!(?context, "inspector target has no content window");
            return Err(InspectorError::NoBrowsingContext {
                target: format!("{context:?}"),
            });
        };
        let pool = conn.new_pool();
        conn.add_actor_pool(pool.clone());
        Ok(Arc::new(Self {
            cell: ActorCell::new(),
            conn: conn.clone(),
            window: Mutex::new(Some(window)),
            pool: Mutex::new(Some(pool)),
            options,
        }))
    }

    /// `{actor}` reference for the client.
    pub fn grip(&self) -> Option<Grip> {
        self.actor_id().map(Grip::new)
    }

    /// The bound window, until disconnect.
    pub fn window(&self) -> Option<Arc<dyn ContentWindow>> {
        self.window.lock().clone()
    }

    /// Number of actors this inspector currently owns.
    pub fn owned_actors(&self) -> usize {
        self.pool.lock().as_ref().map_or(0, |pool| pool.len())
    }

    /// Drop `id` from this inspector's pool without tearing it down.
    pub fn release_actor(&self, id: &ActorId) {
        let pool = self.pool.lock().clone();
        if let Some(pool) = pool {
            if pool.remove_actor(id).is_some() {
                debug!(inspector = %self.cell.label(self.prefix()), actor = %id, "actor released");
            }
        }
    }

    fn on_get_walker(actor: Arc<Self>, _request: Request) -> HandlerFuture {
        async move { actor.get_walker().map(|grip| serde_json::json!({ "actor": grip.actor })) }
            .boxed()
    }

    /// Create a walker actor over the window's document.
    pub fn get_walker(self: &Arc<Self>) -> Result<Grip, ProtocolError> {
        let disconnected = || ProtocolError::ActorDisconnected {
            actor: self.actor_id().unwrap_or_else(|| self.prefix().into()),
        };
        let window = self.window().ok_or_else(disconnected)?;
        let pool = self.pool.lock().clone().ok_or_else(disconnected)?;

        let walker = window.open_walker(self.options.walker)?;
        let actor = DomWalkerActor::new(&self.conn, self, walker, self.options.default_max_nodes);
        let id = pool.add_actor(actor.clone()).map_err(|err| {
            error!(error = %err, "failed to register walker actor");
            ProtocolError::Inspector {
                message: err.to_string(),
            }
        })?;
        info!(walker = %id, url = %window.url(), "walker created");
        Ok(Grip::new(id))
    }
}

impl Actor for InspectorActor {
    fn prefix(&self) -> &'static str {
        "inspector"
    }

    fn cell(&self) -> &ActorCell {
        &self.cell
    }

    fn dispatch(self: Arc<Self>, request: Request) -> Option<HandlerFuture> {
        INSPECTOR_REQUESTS.dispatch(self, request)
    }

    fn disconnect(&self) -> Result<(), ActorError> {
        self.cell.mark_disconnected(self.prefix())?;
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            self.conn.remove_actor_pool(&pool);
            pool.destroy();
        }
        let _ = self.window.lock().take();
        debug!(inspector = %self.cell.label(self.prefix()), "inspector disconnected");
        Ok(())
    }
}
