//! # copydesk-settings
//!
//! Configuration management with layered sources for copydesk.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CopydeskSettings::default()`]
//! 2. **User file**: `~/.copydesk/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `COPYDESK_*` overrides (highest priority)
//!
//! The global singleton is reloadable: [`reload_settings_from_path`] swaps
//! the cached value so later [`get_settings`] calls return fresh data.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, data_dir, deep_merge, load_settings, load_settings_from_path, settings_path,
    store_path,
};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings singleton.
static SETTINGS: RwLock<Option<Arc<CopydeskSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads settings from the default path with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> Arc<CopydeskSettings> {
    if let Some(ref s) = *SETTINGS.read() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    // Another thread may have initialized while we waited
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(load_settings().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load settings, using defaults");
        CopydeskSettings::default()
    }));
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
pub fn init_settings(settings: CopydeskSettings) {
    *SETTINGS.write() = Some(Arc::new(settings));
}

/// Reload settings from `path` and swap the global cache.
///
/// Falls back to compiled defaults when the file cannot be loaded.
pub fn reload_settings_from_path(path: &Path) -> Arc<CopydeskSettings> {
    let new = Arc::new(load_settings_from_path(path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
        CopydeskSettings::default()
    }));
    *SETTINGS.write() = Some(Arc::clone(&new));
    tracing::info!(?path, "settings reloaded from disk");
    new
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    *SETTINGS.write() = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that mutate the global SETTINGS static hold this lock.
    static SETTINGS_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn init_settings_sets_custom_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        let mut custom = CopydeskSettings::default();
        custom.api.app_id = 9999;
        init_settings(custom);
        assert_eq!(get_settings().api.app_id, 9999);
        reset_settings();
    }

    #[test]
    fn reload_settings_from_path_updates_cached_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(CopydeskSettings::default());
        assert!(get_settings().session.standalone);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"standalone": false}}"#).unwrap();

        let returned = reload_settings_from_path(&path);
        assert!(!returned.session.standalone);
        let updated = get_settings();
        assert!(!updated.session.standalone);
        // Other defaults preserved by the deep merge
        assert_eq!(updated.session.keepalive_interval_ms, 10_000);
        reset_settings();
    }

    #[test]
    fn reload_from_invalid_file_falls_back_to_defaults() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        let mut custom = CopydeskSettings::default();
        custom.api.app_id = 7777;
        init_settings(custom);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "garbage").unwrap();
        let _ = reload_settings_from_path(&path);

        assert_eq!(get_settings().api.app_id, 105_315);
        reset_settings();
    }

    #[test]
    fn snapshot_isolation() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(CopydeskSettings::default());
        let snapshot = get_settings();

        let mut new = CopydeskSettings::default();
        new.api.app_id = 5555;
        init_settings(new);

        assert_eq!(snapshot.api.app_id, 105_315);
        assert_eq!(get_settings().api.app_id, 5555);
        reset_settings();
    }
}
