//! The RPC channel: request routing, outbound queue, and the per-connection
//! scheduler.
//!
//! Every handler body and every event pump of one connection runs inside the
//! connection's [`Scheduler`], a single tokio task polling a
//! `FuturesUnordered`. Handlers may suspend; while one is suspended the
//! scheduler polls the others, so state read before an `.await` must be
//! rechecked after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use lookout_core::{ActorId, Packet, ProtocolError, Request};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::actor::Actor;
use crate::pool::{ActorIdAllocator, ActorPool};

type Task = BoxFuture<'static, ()>;

/// One client connection.
pub struct Connection {
    ids: Arc<ActorIdAllocator>,
    pools: Mutex<Vec<Arc<ActorPool>>>,
    outbound: mpsc::UnboundedSender<Packet>,
    tasks: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    closed: AtomicBool,
    sent: AtomicU64,
}

impl Connection {
    /// Create a connection named `prefix` (e.g. `conn0`).
    ///
    /// Returns the connection, the receiver of its outbound packets in send
    /// order, and the scheduler that must be driven for handlers to run.
    pub fn new(
        prefix: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Packet>, Scheduler) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            ids: Arc::new(ActorIdAllocator::new(prefix)),
            pools: Mutex::new(Vec::new()),
            outbound,
            tasks: Mutex::new(Some(tasks_tx)),
            closed: AtomicBool::new(false),
            sent: AtomicU64::new(0),
        });
        (conn, outbound_rx, Scheduler { tasks: tasks_rx })
    }

    /// Connection prefix used in every actor ID.
    pub fn prefix(&self) -> &str {
        self.ids.prefix()
    }

    /// Allocate an ID ahead of registration, for actors that need to know
    /// their own ID while being built.
    pub fn next_actor_id(&self, actor_prefix: &str) -> ActorId {
        self.ids.next_id(actor_prefix)
    }

    /// A new, unregistered pool drawing IDs from this connection.
    pub fn new_pool(&self) -> Arc<ActorPool> {
        Arc::new(ActorPool::new(self.ids.clone()))
    }

    /// Make the actors of `pool` addressable.
    pub fn add_actor_pool(&self, pool: Arc<ActorPool>) {
        let mut pools = self.pools.lock();
        if !pools.iter().any(|p| Arc::ptr_eq(p, &pool)) {
            pools.push(pool);
        }
    }

    /// Stop routing to `pool`. Does not destroy it.
    pub fn remove_actor_pool(&self, pool: &Arc<ActorPool>) {
        self.pools.lock().retain(|p| !Arc::ptr_eq(p, pool));
    }

    /// Number of registered pools.
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Find `id` in whichever registered pool holds it.
    pub fn lookup(&self, id: &ActorId) -> Option<Arc<dyn Actor>> {
        self.pools.lock().iter().find_map(|pool| pool.get(id))
    }

    /// Queue a packet for the client. Fire-and-forget; order is preserved.
    pub fn send(&self, packet: Packet) {
        if self.closed.load(Ordering::Acquire) {
            debug!(from = %packet.from, "connection closed, dropping packet");
            return;
        }
        if self.outbound.send(packet).is_err() {
            debug!(conn = self.prefix(), "outbound receiver gone, dropping packet");
            return;
        }
        let _ = self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Packets queued so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Run `task` on this connection's scheduler.
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let guard = self.tasks.lock();
        let Some(tasks) = guard.as_ref() else {
            debug!(conn = self.prefix(), "scheduler closed, dropping task");
            return;
        };
        if tasks.send(Box::pin(task)).is_err() {
            debug!(conn = self.prefix(), "scheduler stopped, dropping task");
        }
    }

    /// Parse an inbound text frame and route it.
    pub fn receive_text(self: &Arc<Self>, text: &str) {
        match Request::parse(text) {
            Ok(request) => self.receive(request),
            Err(err) => {
                warn!(conn = self.prefix(), error = %err, "unparseable packet");
                self.send(err.to_packet(&ActorId::from(ActorId::ROOT)));
            }
        }
    }

    /// Route `request` to its actor on the scheduler.
    pub fn receive(self: &Arc<Self>, request: Request) {
        let conn = Arc::clone(self);
        self.spawn(async move { conn.route(request).await });
    }

    #[instrument(skip_all, fields(conn = self.prefix(), to = %request.to, request_type = %request.request_type))]
    async fn route(&self, request: Request) {
        let to = request.to.clone();
        let Some(actor) = self.lookup(&to) else {
            warn!("no such actor");
            self.send(ProtocolError::NoSuchActor { actor: to.clone() }.to_packet(&to));
            return;
        };

        let request_type = request.request_type.clone();
        let Some(pending) = Arc::clone(&actor).dispatch(request) else {
            warn!("unrecognized packet type");
            let err = ProtocolError::UnrecognizedPacketType {
                actor: to.clone(),
                request_type,
            };
            self.send(err.to_packet(&to));
            return;
        };

        debug!("dispatching");
        let result = pending.await;

        if !actor.cell().is_live() {
            debug!("actor disconnected while request was in flight, reply dropped");
            return;
        }
        match result {
            Ok(body) => self.send(Packet::reply(to, body)),
            Err(err) => {
                warn!(error = err.name(), message = %err, "request failed");
                self.send(err.to_packet(&to));
            }
        }
    }

    /// Whether [`Connection::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the connection down: destroy every registered pool (cascading
    /// disconnect), stop accepting tasks, stop sending.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pools: Vec<Arc<ActorPool>> = std::mem::take(&mut *self.pools.lock());
        info!(conn = self.prefix(), pools = pools.len(), "closing connection");
        for pool in pools {
            pool.destroy();
        }
        let _ = self.tasks.lock().take();
    }
}

/// Cooperative executor for one connection's tasks.
pub struct Scheduler {
    tasks: mpsc::UnboundedReceiver<Task>,
}

impl Scheduler {
    /// Poll queued tasks until the connection closes and in-flight tasks
    /// have settled.
    pub async fn run(mut self) {
        let mut running: FuturesUnordered<Task> = FuturesUnordered::new();
        loop {
            tokio::select! {
                task = self.tasks.recv() => match task {
                    Some(task) => running.push(task),
                    None => break,
                },
                Some(()) = running.next(), if !running.is_empty() => {}
            }
        }
        while running.next().await.is_some() {}
    }
}
