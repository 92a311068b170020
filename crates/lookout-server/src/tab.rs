//! Tab actor: one inspectable document.

use std::sync::{Arc, LazyLock};

use lookout_actors::{Actor, ActorCell, ActorError, ActorPool, Connection, HandlerFuture, RequestTypes};
use lookout_core::{ActorId, ProtocolError, Request};
use lookout_inspector::{BrowsingContext, ContentWindow, InspectorActor, InspectorOptions};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};

/// One entry of a `listTabs` reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabForm {
    /// The tab actor.
    pub actor: ActorId,
    /// Document title.
    pub title: String,
    /// Document URL.
    pub url: String,
    /// Inspector actor for this tab.
    pub inspector_actor: ActorId,
}

// Tabs answer no requests of their own yet; clients go through the inspector.
static TAB_REQUESTS: LazyLock<RequestTypes<TabActor>> = LazyLock::new(RequestTypes::new);

/// Exposes a window as a browsing context and owns its inspector.
pub struct TabActor {
    cell: ActorCell,
    conn: Arc<Connection>,
    window: Arc<dyn ContentWindow>,
    pool: Mutex<Option<Arc<ActorPool>>>,
    inspector: ActorId,
}

impl TabActor {
    /// Create the tab and its inspector, registering the tab's pool on `conn`.
    pub fn new(
        conn: &Arc<Connection>,
        window: Arc<dyn ContentWindow>,
        options: InspectorOptions,
    ) -> Result<Arc<Self>, ProtocolError> {
        let inspector =
            InspectorActor::new(conn, &BrowsingContext::Window(window.clone()), options)?;
        let pool = conn.new_pool();
        let inspector = pool.add_actor(inspector).map_err(|err| {
            error!(error = %err, "failed to register inspector actor");
            ProtocolError::Inspector {
                message: err.to_string(),
            }
        })?;
        conn.add_actor_pool(pool.clone());
        Ok(Arc::new(Self {
            cell: ActorCell::new(),
            conn: conn.clone(),
            window,
            pool: Mutex::new(Some(pool)),
            inspector,
        }))
    }

    /// The inspector actor owned by this tab.
    pub fn inspector(&self) -> &ActorId {
        &self.inspector
    }

    /// Wire form, once the tab has an ID.
    pub fn form(&self) -> Option<TabForm> {
        Some(TabForm {
            actor: self.actor_id()?,
            title: self.window.title(),
            url: self.window.url(),
            inspector_actor: self.inspector.clone(),
        })
    }
}

impl Actor for TabActor {
    fn prefix(&self) -> &'static str {
        "tab"
    }

    fn cell(&self) -> &ActorCell {
        &self.cell
    }

    fn dispatch(self: Arc<Self>, request: Request) -> Option<HandlerFuture> {
        TAB_REQUESTS.dispatch(self, request)
    }

    fn disconnect(&self) -> Result<(), ActorError> {
        self.cell.mark_disconnected(self.prefix())?;
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            self.conn.remove_actor_pool(&pool);
            pool.destroy();
        }
        debug!(tab = %self.cell.label(self.prefix()), "tab disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_inspector::memory::{DocumentSpec, MemoryWindow};

    fn window() -> Arc<dyn ContentWindow> {
        Arc::new(MemoryWindow::from_spec(&DocumentSpec::sample()))
    }

    #[test]
    fn tab_owns_inspector() {
        let (conn, _rx, _scheduler) = Connection::new("conn0");
        let tab = TabActor::new(&conn, window(), InspectorOptions::default()).unwrap();
        assert!(tab.inspector().starts_with("conn0.inspector"));
        assert!(conn.lookup(tab.inspector()).is_some());
        // tab pool plus the inspector's walker pool
        assert_eq!(conn.pool_count(), 2);
        assert!(tab.form().is_none());
    }

    #[test]
    fn form_after_registration() {
        let (conn, _rx, _scheduler) = Connection::new("conn0");
        let tab = TabActor::new(&conn, window(), InspectorOptions::default()).unwrap();
        let pool = conn.new_pool();
        let id = pool.add_actor(tab.clone()).unwrap();
        let form = tab.form().unwrap();
        assert_eq!(form.actor, id);
        assert_eq!(form.title, "Lookout sample");
        assert_eq!(form.url, "about:lookout");
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["inspectorActor"], tab.inspector().as_str());
    }

    #[test]
    fn disconnect_tears_down_inspector() {
        let (conn, _rx, _scheduler) = Connection::new("conn0");
        let tab = TabActor::new(&conn, window(), InspectorOptions::default()).unwrap();
        let inspector = conn.lookup(tab.inspector()).unwrap();
        tab.disconnect().unwrap();
        assert!(!inspector.cell().is_live());
        assert_eq!(conn.pool_count(), 0);
        assert!(tab.disconnect().is_err());
    }
}
