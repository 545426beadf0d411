//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the fields it changes.

mod api;
mod session;

pub use api::*;
pub use session::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Loaded from `~/.copydesk/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// ```json
/// {
///   "api": { "appId": 105315, "defaultLanguage": "es" },
///   "session": { "keepaliveIntervalMs": 15000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CopydeskSettings {
    /// Settings schema version.
    pub version: String,
    /// Trading API endpoint settings.
    pub api: ApiSettings,
    /// Session timers and mode.
    pub session: SessionSettings,
    /// Local storage location.
    pub storage: StorageSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for CopydeskSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            api: ApiSettings::default(),
            session: SessionSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl CopydeskSettings {
    /// Correct values that would break the session.
    ///
    /// Called automatically during loading. Invalid values are replaced by
    /// their defaults with a warning rather than rejected.
    pub fn validate(&mut self) {
        fn non_zero(val: &mut u64, default: u64, name: &str) {
            if *val == 0 {
                tracing::warn!("{name} must be positive, using {default}");
                *val = default;
            }
        }

        let defaults = SessionSettings::default();
        let s = &mut self.session;
        non_zero(
            &mut s.keepalive_interval_ms,
            defaults.keepalive_interval_ms,
            "keepalive_interval_ms",
        );
        non_zero(
            &mut s.reconnect_delay_ms,
            defaults.reconnect_delay_ms,
            "reconnect_delay_ms",
        );
        non_zero(
            &mut s.login_poll_interval_ms,
            defaults.login_poll_interval_ms,
            "login_poll_interval_ms",
        );

        let api_defaults = ApiSettings::default();
        if self.api.endpoint.trim().is_empty() {
            tracing::warn!("api endpoint empty, using {}", api_defaults.endpoint);
            self.api.endpoint = api_defaults.endpoint;
        }
        if self.api.demo_endpoint.trim().is_empty() {
            self.api.demo_endpoint = self.api.endpoint.clone();
        }
        if self.api.default_language.trim().is_empty() {
            self.api.default_language = api_defaults.default_language;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_version() {
        let s = CopydeskSettings::default();
        assert_eq!(s.version, "0.1.0");
    }

    #[test]
    fn default_settings_serde_roundtrip() {
        let defaults = CopydeskSettings::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let back: CopydeskSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.api.app_id, defaults.api.app_id);
        assert_eq!(back.api.endpoint, defaults.api.endpoint);
        assert_eq!(
            back.session.keepalive_interval_ms,
            defaults.session.keepalive_interval_ms
        );
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(CopydeskSettings::default()).unwrap();
        assert!(json["api"].get("appId").is_some());
        assert!(json["api"].get("demoEndpoint").is_some());
        assert!(json["session"].get("keepaliveIntervalMs").is_some());
        assert!(json["session"].get("loginPollIntervalMs").is_some());
        assert!(json["logging"].get("level").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: CopydeskSettings =
            serde_json::from_str(r#"{"api": {"appId": 1}}"#).unwrap();
        assert_eq!(s.api.app_id, 1);
        assert_eq!(s.api.brand, "deriv");
        assert_eq!(s.session.reconnect_delay_ms, 500);
    }

    #[test]
    fn validate_replaces_zero_intervals() {
        let mut s = CopydeskSettings::default();
        s.session.keepalive_interval_ms = 0;
        s.session.reconnect_delay_ms = 0;
        s.session.login_poll_interval_ms = 0;
        s.validate();
        assert_eq!(s.session.keepalive_interval_ms, 10_000);
        assert_eq!(s.session.reconnect_delay_ms, 500);
        assert_eq!(s.session.login_poll_interval_ms, 500);
    }

    #[test]
    fn validate_fills_empty_endpoints() {
        let mut s = CopydeskSettings::default();
        s.api.endpoint = "  ".into();
        s.api.demo_endpoint = String::new();
        s.api.default_language = String::new();
        s.validate();
        assert_eq!(s.api.endpoint, "ws.derivws.com");
        assert_eq!(s.api.demo_endpoint, "ws.derivws.com");
        assert_eq!(s.api.default_language, "en");
    }

    #[test]
    fn validate_keeps_valid_values() {
        let mut s = CopydeskSettings::default();
        s.session.keepalive_interval_ms = 2_000;
        s.api.demo_endpoint = "demo.example".into();
        s.validate();
        assert_eq!(s.session.keepalive_interval_ms, 2_000);
        assert_eq!(s.api.demo_endpoint, "demo.example");
    }
}
