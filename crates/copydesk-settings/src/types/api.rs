//! Trading API endpoint settings.

use serde::{Deserialize, Serialize};

/// Where and as whom the client connects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Websocket host for real accounts.
    pub endpoint: String,
    /// Websocket host for demo accounts.
    pub demo_endpoint: String,
    /// Registered application id (`app_id=` query parameter).
    pub app_id: u32,
    /// Brand (`brand=` query parameter).
    pub brand: String,
    /// Language used when the store has no `i18n_language`.
    pub default_language: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws.derivws.com".to_string(),
            demo_endpoint: "ws.derivws.com".to_string(),
            app_id: 105_315,
            brand: "deriv".to_string(),
            default_language: "en".to_string(),
        }
    }
}
