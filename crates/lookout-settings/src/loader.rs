//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::LookoutSettings;

/// Resolve the path to the settings file (`~/.lookout/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".lookout").join("settings.json")
}

/// Load defaults deep-merged with the settings file at `path`.
///
/// A missing file yields defaults; invalid JSON is an error. `LOOKOUT_*`
/// overrides are applied separately by [`apply_env_overrides`].
pub fn load_settings_file(path: &Path) -> Result<LookoutSettings> {
    let defaults = serde_json::to_value(LookoutSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `LOOKOUT_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut LookoutSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = read_string(&lookup, "LOOKOUT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_parsed(&lookup, "LOOKOUT_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = read_string(&lookup, "LOOKOUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_parsed(&lookup, "LOOKOUT_WATCH_VISITED", parse_bool) {
        settings.inspector.watch_visited = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env override, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested() {
        let merged = deep_merge(
            json!({"server": {"host": "a", "port": 1}, "list": [1, 2]}),
            json!({"server": {"port": 2}, "list": [3]}),
        );
        assert_eq!(merged["server"]["host"], "a");
        assert_eq!(merged["server"]["port"], 2);
        assert_eq!(merged["list"], json!([3]));
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"x": 1}), json!({"x": null, "y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.port, 6080);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":7001},"inspector":{"defaultMaxNodes":50}}"#)
            .unwrap();
        let settings = load_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.inspector.default_max_nodes, Some(50));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(load_settings_file(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = LookoutSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("LOOKOUT_HOST", "0.0.0.0"),
                ("LOOKOUT_PORT", "9229"),
                ("LOOKOUT_LOG_LEVEL", "debug"),
                ("LOOKOUT_WATCH_VISITED", "off"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9229);
        assert_eq!(settings.logging.level, "debug");
        assert!(!settings.inspector.watch_visited);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = LookoutSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("LOOKOUT_PORT", "99999"),
                ("LOOKOUT_WATCH_VISITED", "maybe"),
                ("LOOKOUT_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 6080);
        assert!(settings.inspector.watch_visited);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }
}
