//! Auth-token bookkeeping and the login-id change signal.
//!
//! Tokens live in the store under `client.accounts` (login id → account
//! record) with the active account's token mirrored to `auth_token`.
//! [`AuthState`] is the only writer of `active_loginid` inside the process
//! and publishes every change on a `watch` channel so the session can react
//! without polling.

use std::collections::BTreeMap;
use std::sync::Arc;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::storage::{KeyValueStore, get_json, keys, set_json};

/// Host serving the OAuth authorize page.
const OAUTH_HOST: &str = "oauth.deriv.com";

/// Per-account record stored in `client.accounts`.
///
/// Unknown fields written by other clients are preserved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// API token for the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Any other fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

type Accounts = BTreeMap<String, AccountRecord>;

/// Token of the active account, or `None` when absent or unreadable.
pub fn get_auth_token(store: &dyn KeyValueStore) -> Option<String> {
    let loginid = store.get_non_empty(keys::ACTIVE_LOGINID)?;
    match get_json::<Accounts>(store, keys::CLIENT_ACCOUNTS) {
        Ok(accounts) => accounts?
            .remove(&loginid)?
            .token
            .filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(error = %e, "failed to read client.accounts");
            None
        }
    }
}

/// OAuth authorize URL for signing in.
///
/// A server override containing `qa` points the flow at that QA host.
pub fn login_url(store: &dyn KeyValueStore, app_id: u32, language: &str, brand: &str) -> String {
    let lang = utf8_percent_encode(language, NON_ALPHANUMERIC);
    let brand = brand.to_lowercase();
    let host = match store.get_non_empty(keys::SERVER_URL) {
        Some(server) if server.contains("qa") => server,
        _ => OAUTH_HOST.to_string(),
    };
    format!("https://{host}/oauth2/authorize?app_id={app_id}&l={lang}&brand={brand}")
}

/// Auth bookkeeping over a shared store, with a login-id change signal.
pub struct AuthState {
    store: Arc<dyn KeyValueStore>,
    loginid_tx: watch::Sender<Option<String>>,
}

impl AuthState {
    /// Create auth state over `store`, seeding the signal with the stored login id.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let current = store.get_non_empty(keys::ACTIVE_LOGINID);
        let (loginid_tx, _) = watch::channel(current);
        Self { store, loginid_tx }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Currently active login id.
    pub fn active_loginid(&self) -> Option<String> {
        self.store.get_non_empty(keys::ACTIVE_LOGINID)
    }

    /// Receive login-id changes. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.loginid_tx.subscribe()
    }

    /// Switch the active account and notify subscribers.
    pub fn set_active_loginid(&self, loginid: &str) -> Result<(), ClientError> {
        if loginid.is_empty() {
            return Err(ClientError::InvalidInput("empty login id".into()));
        }
        self.store.set(keys::ACTIVE_LOGINID, loginid)?;
        let _ = self.publish(Some(loginid.to_string()));
        Ok(())
    }

    /// Forget the active account and notify subscribers.
    pub fn clear_active_loginid(&self) -> Result<(), ClientError> {
        self.store.remove(keys::ACTIVE_LOGINID)?;
        let _ = self.publish(None);
        Ok(())
    }

    /// Re-read the store and publish if the login id changed underneath us.
    ///
    /// Returns `true` when a change was published.
    pub fn sync_from_store(&self) -> bool {
        if let Err(e) = self.store.refresh() {
            warn!(error = %e, "failed to refresh store");
        }
        let current = self.active_loginid();
        self.publish(current)
    }

    fn publish(&self, loginid: Option<String>) -> bool {
        self.loginid_tx.send_if_modified(|prev| {
            if *prev == loginid {
                false
            } else {
                debug!(?loginid, "active login id changed");
                *prev = loginid;
                true
            }
        })
    }

    /// Token of the active account.
    pub fn auth_token(&self) -> Option<String> {
        get_auth_token(self.store.as_ref())
    }

    /// Whether the active account has a token.
    pub fn is_authenticated(&self) -> bool {
        self.auth_token().is_some()
    }

    /// Store `token` for `loginid` (or the active account) and mirror it to `auth_token`.
    pub fn store_auth_token(&self, token: &str, loginid: Option<&str>) -> Result<(), ClientError> {
        let loginid = loginid
            .map(str::to_string)
            .or_else(|| self.active_loginid())
            .ok_or_else(|| ClientError::InvalidInput("no active login id to store token for".into()))?;

        let store = self.store.as_ref();
        let mut accounts = match get_json::<Accounts>(store, keys::CLIENT_ACCOUNTS) {
            Ok(accounts) => accounts.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "client.accounts unreadable, starting fresh");
                Accounts::new()
            }
        };
        accounts.entry(loginid.clone()).or_default().token = Some(token.to_string());
        set_json(store, keys::CLIENT_ACCOUNTS, &accounts)?;
        store.set(keys::AUTH_TOKEN, token)?;
        info!(%loginid, "auth token stored");
        Ok(())
    }

    /// Drop the mirrored `auth_token`.
    pub fn remove_auth_token(&self) -> Result<(), ClientError> {
        self.store.remove(keys::AUTH_TOKEN)?;
        info!("auth token removed");
        Ok(())
    }
}
