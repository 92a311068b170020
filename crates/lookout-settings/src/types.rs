//! Settings schema.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookoutSettings {
    /// Transport settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
    /// Walker defaults.
    pub inspector: InspectorSettings,
}

/// WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth above which a connection logs a warning.
    pub outbound_queue_warn: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6080,
            max_message_size: 4 * 1024 * 1024,
            outbound_queue_warn: 1024,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Defaults applied to walkers created by `getWalker`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectorSettings {
    /// Only forward mutations for nodes the walker has visited.
    pub watch_visited: bool,
    /// Cap applied to `children`/`siblings` when the client sends no `maxNodes`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_nodes: Option<usize>,
}

impl Default for InspectorSettings {
    fn default() -> Self {
        Self {
            watch_visited: true,
            default_max_nodes: None,
        }
    }
}
