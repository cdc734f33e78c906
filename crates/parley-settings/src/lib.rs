//! # parley-settings
//!
//! Layered configuration for the chat client:
//! 1. **Compiled defaults** ([`ParleySettings::default()`])
//! 2. **User file** `~/.parley/settings.json`, layered over defaults key by key
//! 3. **Environment variables** `PARLEY_*` (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, load_settings_from_path, settings_path};
pub use types::*;
