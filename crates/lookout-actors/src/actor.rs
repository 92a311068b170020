//! The [`Actor`] trait, per-actor bookkeeping, and static request tables.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use lookout_core::{ActorId, ProtocolError, Request};
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::ActorError;

/// Pending result of a request handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, ProtocolError>>;

/// A request handler bound to an actor kind.
pub type RequestHandler<A> = fn(Arc<A>, Request) -> HandlerFuture;

/// Identity, ownership and liveness shared by every actor.
///
/// The ID is assigned once, by the first pool the actor joins, and never
/// changes afterwards.
#[derive(Debug, Default)]
pub struct ActorCell {
    id: OnceLock<ActorId>,
    owner: Mutex<Option<u64>>,
    disconnected: AtomicBool,
}

impl ActorCell {
    /// A cell whose ID will be allocated on registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell with a fixed, well-known ID (the root actor).
    pub fn with_id(id: ActorId) -> Self {
        let cell = Self::default();
        let _ = cell.id.set(id);
        cell
    }

    /// The assigned ID, if registered at least once.
    pub fn id(&self) -> Option<&ActorId> {
        self.id.get()
    }

    /// The assigned ID, allocating it with `allocate` if still unset.
    pub(crate) fn id_or_assign(&self, allocate: impl FnOnce() -> ActorId) -> ActorId {
        self.id.get_or_init(allocate).clone()
    }

    /// Serial of the owning pool.
    pub fn owner(&self) -> Option<u64> {
        *self.owner.lock()
    }

    /// Record `pool` as owner. Fails with the current owner if already owned.
    pub(crate) fn claim(&self, pool: u64) -> Result<(), u64> {
        let mut owner = self.owner.lock();
        match *owner {
            Some(current) => Err(current),
            None => {
                *owner = Some(pool);
                Ok(())
            }
        }
    }

    /// Clear ownership if `pool` is the owner.
    pub(crate) fn release(&self, pool: u64) {
        let mut owner = self.owner.lock();
        if *owner == Some(pool) {
            *owner = None;
        }
    }

    /// Whether the actor is still serving requests.
    pub fn is_live(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    /// Flip to disconnected. Errors if this already happened.
    pub fn mark_disconnected(&self, prefix: &str) -> Result<(), ActorError> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Err(ActorError::AlreadyDisconnected {
                actor: self.label(prefix),
            });
        }
        Ok(())
    }

    /// ID if assigned, otherwise the prefix.
    pub fn label(&self, prefix: &str) -> String {
        self.id().map_or_else(|| prefix.to_owned(), ToString::to_string)
    }
}

/// An addressable, stateful server-side object.
pub trait Actor: Send + Sync + 'static {
    /// Tag used to build human-legible IDs.
    fn prefix(&self) -> &'static str;

    /// Identity and lifecycle bookkeeping.
    fn cell(&self) -> &ActorCell;

    /// Start handling `request`. `None` means the type is not recognized.
    fn dispatch(self: Arc<Self>, request: Request) -> Option<HandlerFuture>;

    /// Release every resource the actor holds. Must be called exactly once.
    fn disconnect(&self) -> Result<(), ActorError>;

    /// The assigned ID.
    fn actor_id(&self) -> Option<ActorId> {
        self.cell().id().cloned()
    }
}

/// Request-type name → handler, shared by every instance of an actor kind.
pub struct RequestTypes<A> {
    handlers: HashMap<&'static str, RequestHandler<A>>,
}

impl<A> RequestTypes<A> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Add a handler, replacing any previous one of the same name.
    #[must_use]
    pub fn with(mut self, request_type: &'static str, handler: RequestHandler<A>) -> Self {
        let _ = self.handlers.insert(request_type, handler);
        self
    }

    /// Look up a handler.
    pub fn get(&self, request_type: &str) -> Option<RequestHandler<A>> {
        self.handlers.get(request_type).copied()
    }

    /// Start `request` on `actor` if its type is known.
    pub fn dispatch(&self, actor: Arc<A>, request: Request) -> Option<HandlerFuture> {
        let handler = self.get(&request.request_type)?;
        Some(handler(actor, request))
    }
}

impl<A> Default for RequestTypes<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use serde_json::json;

    struct Echo;

    fn echo(_actor: Arc<Echo>, request: Request) -> HandlerFuture {
        async move { Ok(Value::Object(request.fields)) }.boxed()
    }

    fn fail(_actor: Arc<Echo>, _request: Request) -> HandlerFuture {
        async move { Err(ProtocolError::missing("node")) }.boxed()
    }

    #[tokio::test]
    async fn table_dispatches_by_type() {
        let table = RequestTypes::new().with("echo", echo).with("fail", fail);
        let fut = table
            .dispatch(Arc::new(Echo), Request::new("a", "echo").with("x", 1))
            .unwrap();
        assert_eq!(fut.await.unwrap(), json!({"x": 1}));

        let fut = table.dispatch(Arc::new(Echo), Request::new("a", "fail")).unwrap();
        assert_matches!(fut.await, Err(ProtocolError::MissingParameter { .. }));
    }

    #[test]
    fn table_unknown_type() {
        let table = RequestTypes::new().with("echo", echo);
        assert!(table.dispatch(Arc::new(Echo), Request::new("a", "nope")).is_none());
    }

    #[test]
    fn cell_claim_and_release() {
        let cell = ActorCell::new();
        assert!(cell.owner().is_none());
        cell.claim(1).unwrap();
        assert_eq!(cell.claim(2), Err(1));
        cell.release(2);
        assert_eq!(cell.owner(), Some(1));
        cell.release(1);
        assert!(cell.owner().is_none());
        cell.claim(2).unwrap();
    }

    #[test]
    fn cell_id_assigned_once() {
        let cell = ActorCell::new();
        let first = cell.id_or_assign(|| "conn0.tab1".into());
        let second = cell.id_or_assign(|| "conn0.tab2".into());
        assert_eq!(first, second);
        assert_eq!(cell.id().unwrap().as_str(), "conn0.tab1");
    }

    #[test]
    fn cell_disconnect_once() {
        let cell = ActorCell::with_id("root".into());
        assert!(cell.is_live());
        cell.mark_disconnected("root").unwrap();
        assert!(!cell.is_live());
        assert_matches!(
            cell.mark_disconnected("root"),
            Err(ActorError::AlreadyDisconnected { actor }) if actor == "root"
        );
    }

    #[test]
    fn label_falls_back_to_prefix() {
        let cell = ActorCell::new();
        assert_eq!(cell.label("domwalker"), "domwalker");
    }
}
