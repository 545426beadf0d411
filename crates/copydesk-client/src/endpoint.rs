//! Websocket endpoint URL construction.

use copydesk_core::Environment;
use copydesk_core::storage::{KeyValueStore, keys};
use copydesk_settings::ApiSettings;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// API path on every endpoint host.
const API_PATH: &str = "/websockets/v3";

/// Query value escaping. Locale codes like `zh_cn` pass through untouched.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-').remove(b'.');

/// Fully qualified socket URL for `environment`.
///
/// `config.server_url` in the store overrides the configured host. An
/// override that already carries a `ws://` or `wss://` scheme is used as
/// the base as-is, which is how local test servers are reached.
pub fn socket_url(api: &ApiSettings, store: &dyn KeyValueStore, environment: Environment) -> String {
    let base = match store.get_non_empty(keys::SERVER_URL) {
        Some(server) if server.starts_with("ws://") || server.starts_with("wss://") => {
            server.trim_end_matches('/').to_string()
        }
        Some(server) => format!("wss://{}", server.trim_end_matches('/')),
        None => {
            let host = match environment {
                Environment::Demo => &api.demo_endpoint,
                Environment::Real | Environment::Custom => &api.endpoint,
            };
            format!("wss://{host}")
        }
    };
    let language = store
        .get_non_empty(keys::LANGUAGE)
        .unwrap_or_else(|| api.default_language.clone());

    format!(
        "{base}{API_PATH}?app_id={}&l={}&brand={}",
        api.app_id,
        utf8_percent_encode(&language, QUERY_VALUE),
        utf8_percent_encode(&api.brand.to_lowercase(), QUERY_VALUE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use copydesk_core::MemoryStore;

    #[test]
    fn default_real_url() {
        let url = socket_url(&ApiSettings::default(), &MemoryStore::new(), Environment::Real);
        assert_eq!(url, "wss://ws.derivws.com/websockets/v3?app_id=105315&l=en&brand=deriv");
    }

    #[test]
    fn demo_uses_demo_endpoint() {
        let api = ApiSettings {
            demo_endpoint: "demo.example.com".into(),
            ..ApiSettings::default()
        };
        let url = socket_url(&api, &MemoryStore::new(), Environment::Demo);
        assert!(url.starts_with("wss://demo.example.com/websockets/v3?"));
        let real = socket_url(&api, &MemoryStore::new(), Environment::Real);
        assert!(real.starts_with("wss://ws.derivws.com/"));
    }

    #[test]
    fn stored_language_wins() {
        let store = MemoryStore::new().with(keys::LANGUAGE, "zh_cn");
        let url = socket_url(&ApiSettings::default(), &store, Environment::Real);
        assert!(url.contains("&l=zh_cn&"));
    }

    #[test]
    fn language_reserved_characters_are_escaped() {
        let store = MemoryStore::new().with(keys::LANGUAGE, "pt-br&x=1");
        let url = socket_url(&ApiSettings::default(), &store, Environment::Real);
        assert!(url.contains("&l=pt-br%26x%3D1&"));
    }

    #[test]
    fn server_override_host() {
        let store = MemoryStore::new().with(keys::SERVER_URL, "qa10.deriv.dev/");
        let url = socket_url(&ApiSettings::default(), &store, Environment::Custom);
        assert!(url.starts_with("wss://qa10.deriv.dev/websockets/v3?app_id=105315"));
    }

    #[test]
    fn server_override_with_scheme() {
        let store = MemoryStore::new().with(keys::SERVER_URL, "ws://127.0.0.1:9001");
        let url = socket_url(&ApiSettings::default(), &store, Environment::Custom);
        assert!(url.starts_with("ws://127.0.0.1:9001/websockets/v3?"));
    }

    #[test]
    fn brand_is_lowercased() {
        let api = ApiSettings {
            brand: "Deriv".into(),
            ..ApiSettings::default()
        };
        let url = socket_url(&api, &MemoryStore::new(), Environment::Real);
        assert!(url.ends_with("&brand=deriv"));
    }
}
