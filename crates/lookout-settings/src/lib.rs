//! # lookout-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LookoutSettings::default()`]
//! 2. **User file**: `~/.lookout/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LOOKOUT_*` overrides (highest priority)
//!
//! The loaded value is handed to the server explicitly; there is no global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings_file, settings_path};
pub use types::*;
