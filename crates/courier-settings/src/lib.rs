//! # courier-settings
//!
//! Configuration for the Courier realtime client, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`CourierSettings::default()`]
//! 2. **Settings file**: `~/.courier/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `COURIER_*` overrides (highest priority)
//!
//! Settings are plain values: the composition root loads them once and
//! passes them to the components it builds.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, deep_merge, load_settings, load_settings_from_path, load_with_lookup,
    settings_path,
};
pub use types::{
    ConnectionSettings, CourierSettings, LogFormat, LoggingSettings, NotificationSettings,
};
