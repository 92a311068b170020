//! Actor pools and connection-scoped ID allocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lookout_core::ActorId;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::actor::Actor;
use crate::errors::PoolError;

/// Allocates actor IDs and pool serials for one connection.
///
/// IDs look like `conn0.domwalker3`; the counter is shared by every prefix so
/// an ID is never handed out twice while the connection lives.
#[derive(Debug)]
pub struct ActorIdAllocator {
    prefix: String,
    next_actor: AtomicU64,
    next_pool: AtomicU64,
}

impl ActorIdAllocator {
    /// Allocator for the connection named `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_actor: AtomicU64::new(1),
            next_pool: AtomicU64::new(1),
        }
    }

    /// Connection prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next actor ID for `actor_prefix`.
    pub fn next_id(&self, actor_prefix: &str) -> ActorId {
        let serial = self.next_actor.fetch_add(1, Ordering::Relaxed);
        ActorId::compose(&self.prefix, actor_prefix, serial)
    }

    fn next_pool(&self) -> u64 {
        self.next_pool.fetch_add(1, Ordering::Relaxed)
    }
}

/// Ownership scope for a set of actors.
///
/// Destroying a pool disconnects every actor it still owns.
pub struct ActorPool {
    serial: u64,
    ids: Arc<ActorIdAllocator>,
    actors: Mutex<HashMap<ActorId, Arc<dyn Actor>>>,
}

impl ActorPool {
    /// Create an empty pool drawing IDs from `ids`.
    pub fn new(ids: Arc<ActorIdAllocator>) -> Self {
        let serial = ids.next_pool();
        Self {
            serial,
            ids,
            actors: Mutex::new(HashMap::new()),
        }
    }

    /// Serial of this pool within its connection.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Register `actor`, assigning its ID if unset.
    pub fn add_actor(&self, actor: Arc<dyn Actor>) -> Result<ActorId, PoolError> {
        let cell = actor.cell();
        if !cell.is_live() {
            return Err(PoolError::Disconnected {
                actor: cell.label(actor.prefix()),
            });
        }
        let id = cell.id_or_assign(|| self.ids.next_id(actor.prefix()));
        if let Err(owner) = cell.claim(self.serial) {
            error!(actor = %id, owner, pool = self.serial, "actor already belongs to a pool");
            return Err(PoolError::AlreadyOwned { actor: id, owner });
        }
        debug!(actor = %id, pool = self.serial, "actor registered");
        let _ = self.actors.lock().insert(id.clone(), actor);
        Ok(id)
    }

    /// Drop the mapping for `id` without tearing the actor down.
    pub fn remove_actor(&self, id: &ActorId) -> Option<Arc<dyn Actor>> {
        let actor = self.actors.lock().remove(id)?;
        actor.cell().release(self.serial);
        debug!(actor = %id, pool = self.serial, "actor unregistered");
        Some(actor)
    }

    /// Look up an owned actor.
    pub fn get(&self, id: &ActorId) -> Option<Arc<dyn Actor>> {
        self.actors.lock().get(id).cloned()
    }

    /// Whether `id` is owned by this pool.
    pub fn has(&self, id: &ActorId) -> bool {
        self.actors.lock().contains_key(id)
    }

    /// Number of owned actors.
    pub fn len(&self) -> usize {
        self.actors.lock().len()
    }

    /// Whether the pool owns nothing.
    pub fn is_empty(&self) -> bool {
        self.actors.lock().is_empty()
    }

    /// Disconnect and drop every owned actor.
    ///
    /// Entries are drained before any `disconnect` runs, so an actor that
    /// releases itself from this pool during teardown finds nothing to remove.
    pub fn destroy(&self) {
        let drained: Vec<(ActorId, Arc<dyn Actor>)> = self.actors.lock().drain().collect();
        for (id, actor) in drained {
            actor.cell().release(self.serial);
            if !actor.cell().is_live() {
                continue;
            }
            if let Err(err) = actor.disconnect() {
                error!(actor = %id, error = %err, "disconnect during pool teardown failed");
            }
        }
    }
}
