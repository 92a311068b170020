//! Root actor: the connection's fixed entry point.

use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use lookout_actors::{Actor, ActorCell, ActorError, ActorPool, Connection, HandlerFuture, RequestTypes};
use lookout_core::{ActorId, Packet, ProtocolError, Request};
use lookout_inspector::{ContentWindow, InspectorOptions};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::tab::{TabActor, TabForm};

static ROOT_REQUESTS: LazyLock<RequestTypes<RootActor>> =
    LazyLock::new(|| RequestTypes::new().with("listTabs", RootActor::on_list_tabs));

#[derive(Serialize)]
struct ListTabsReply {
    tabs: Vec<TabForm>,
    selected: usize,
}

struct TabList {
    pool: Arc<ActorPool>,
    tabs: Vec<Arc<TabActor>>,
}

/// Answers at `root`; lists the inspectable documents.
pub struct RootActor {
    cell: ActorCell,
    conn: Arc<Connection>,
    targets: Arc<[Arc<dyn ContentWindow>]>,
    options: InspectorOptions,
    tabs: Mutex<Option<TabList>>,
}

impl RootActor {
    /// Root actor serving `targets` on `conn`.
    pub fn new(
        conn: &Arc<Connection>,
        targets: Arc<[Arc<dyn ContentWindow>]>,
        options: InspectorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            cell: ActorCell::with_id(ActorId::from(ActorId::ROOT)),
            conn: conn.clone(),
            targets,
            options,
            tabs: Mutex::new(None),
        })
    }

    /// The unsolicited packet sent when a client connects.
    pub fn greeting() -> Packet {
        Packet::reply(
            ActorId::from(ActorId::ROOT),
            json!({ "applicationType": "browser", "traits": {} }),
        )
    }

    fn on_list_tabs(actor: Arc<Self>, _request: Request) -> HandlerFuture {
        async move { actor.list_tabs() }.boxed()
    }

    /// Tab forms, creating the tab actors on first use.
    pub fn list_tabs(&self) -> Result<serde_json::Value, ProtocolError> {
        if !self.cell.is_live() {
            return Err(ProtocolError::ActorDisconnected {
                actor: ActorId::from(ActorId::ROOT),
            });
        }
        let mut tabs = self.tabs.lock();
        if tabs.is_none() {
            *tabs = Some(self.open_tabs()?);
        }
        let reply = ListTabsReply {
            tabs: tabs
                .iter()
                .flat_map(|list| list.tabs.iter())
                .filter_map(|tab| tab.form())
                .collect(),
            selected: 0,
        };
        serde_json::to_value(reply).map_err(|err| ProtocolError::Inspector {
            message: err.to_string(),
        })
    }

    fn open_tabs(&self) -> Result<TabList, ProtocolError> {
        let pool = self.conn.new_pool();
        self.conn.add_actor_pool(pool.clone());
        let mut tabs = Vec::with_capacity(self.targets.len());
        for window in self.targets.iter() {
            let tab = match TabActor::new(&self.conn, window.clone(), self.options) {
                Ok(tab) => tab,
                Err(err) => {
                    self.conn.remove_actor_pool(&pool);
                    pool.destroy();
                    return Err(err);
                }
            };
            let _ = pool.add_actor(tab.clone()).map_err(|err| ProtocolError::Inspector {
                message: err.to_string(),
            })?;
            tabs.push(tab);
        }
        info!(conn = %self.conn.prefix(), tabs = tabs.len(), "tabs opened");
        Ok(TabList { pool, tabs })
    }
}

impl Actor for RootActor {
    fn prefix(&self) -> &'static str {
        "root"
    }

    fn cell(&self) -> &ActorCell {
        &self.cell
    }

    fn dispatch(self: Arc<Self>, request: Request) -> Option<HandlerFuture> {
        ROOT_REQUESTS.dispatch(self, request)
    }

    fn disconnect(&self) -> Result<(), ActorError> {
        self.cell.mark_disconnected(self.prefix())?;
        let tabs = self.tabs.lock().take();
        if let Some(list) = tabs {
            self.conn.remove_actor_pool(&list.pool);
            list.pool.destroy();
        }
        debug!(conn = %self.conn.prefix(), "root disconnected");
        Ok(())
    }
}
