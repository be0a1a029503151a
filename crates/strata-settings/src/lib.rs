//! # strata-settings
//!
//! Layered configuration for the Strata session store.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StrataSettings::default()`]
//! 2. **Settings file**: `~/.strata/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STRATA_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<StrataSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.strata/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static StrataSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            StrataSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: StrataSettings) -> std::result::Result<(), StrataSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = StrataSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn get_settings_is_stable() {
        let a = get_settings() as *const StrataSettings;
        let b = get_settings() as *const StrataSettings;
        assert_eq!(a, b);
    }
}
