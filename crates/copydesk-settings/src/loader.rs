//! Settings loading: compiled defaults, JSON file, environment overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::CopydeskSettings;

/// Directory name under `$HOME`.
const DATA_DIR_NAME: &str = ".copydesk";

/// Data directory (`$COPYDESK_HOME`, else `~/.copydesk`).
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("COPYDESK_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(DATA_DIR_NAME)
}

/// Default settings file path.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Store file path for `settings`.
pub fn store_path(settings: &CopydeskSettings) -> PathBuf {
    settings
        .storage
        .path
        .as_ref()
        .map_or_else(|| data_dir().join("store.json"), PathBuf::from)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// any other overlay value replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<CopydeskSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides. A missing file yields defaults.
pub fn load_settings_from_path(path: &Path) -> Result<CopydeskSettings> {
    let defaults = serde_json::to_value(CopydeskSettings::default())?;
    let merged = match std::fs::read_to_string(path) {
        Ok(raw) => {
            let file: Value = serde_json::from_str(&raw)?;
            deep_merge(defaults, file)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut settings: CopydeskSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |var| std::env::var(var).ok())?;
    settings.validate();
    Ok(settings)
}

/// Apply `COPYDESK_*` overrides read through `lookup`.
pub fn apply_overrides(
    settings: &mut CopydeskSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T> {
        value
            .trim()
            .parse()
            .map_err(|_| SettingsError::InvalidValue {
                var: var.to_string(),
                value,
            })
    }

    if let Some(v) = lookup("COPYDESK_ENDPOINT") {
        settings.api.endpoint = v;
    }
    if let Some(v) = lookup("COPYDESK_DEMO_ENDPOINT") {
        settings.api.demo_endpoint = v;
    }
    if let Some(v) = lookup("COPYDESK_APP_ID") {
        settings.api.app_id = parse("COPYDESK_APP_ID", v)?;
    }
    if let Some(v) = lookup("COPYDESK_BRAND") {
        settings.api.brand = v;
    }
    if let Some(v) = lookup("COPYDESK_LANGUAGE") {
        settings.api.default_language = v;
    }
    if let Some(v) = lookup("COPYDESK_STANDALONE") {
        settings.session.standalone = parse("COPYDESK_STANDALONE", v)?;
    }
    if let Some(v) = lookup("COPYDESK_STORE_PATH") {
        settings.storage.path = Some(v);
    }
    if let Some(v) = lookup("COPYDESK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = lookup("COPYDESK_LOG_JSON") {
        settings.logging.json = parse("COPYDESK_LOG_JSON", v)?;
    }
    Ok(())
}
