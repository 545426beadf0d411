//! Account snapshot refresh.
//!
//! Issues the account queries one after another and caches the merged
//! [`AccountInfo`] in the store. Failures never propagate: the caller gets a
//! fallback record built from already-cached values.

use async_trait::async_trait;
use copydesk_core::account::{AccountInfo, AccountType, DEFAULT_CURRENCY};
use copydesk_core::storage::{keys, set_json};
use copydesk_core::{AuthState, ClientError, RequestName};
use serde_json::Value;
use tracing::{info, warn};

/// Anything that can issue a one-shot API request.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Send `name` with `payload` merged into the body and await the response.
    async fn send(&self, name: RequestName, payload: Option<&Value>) -> Result<Value, ClientError>;
}

struct Responses {
    status: Value,
    balance: Value,
    settings: Value,
}

async fn fetch(sender: &dyn RequestSender) -> Result<Responses, ClientError> {
    let _ = sender.send(RequestName::GetAccountStatus, None).await?;
    let balance = sender.send(RequestName::Balance, None).await?;
    let settings = sender.send(RequestName::GetSettings, None).await?;
    // Second status read is the one used
    let status = sender.send(RequestName::GetAccountStatus, None).await?;
    Ok(Responses {
        status,
        balance,
        settings,
    })
}

/// Refresh and cache the account snapshot for the active login id.
pub async fn refresh_account_snapshot(sender: &dyn RequestSender, auth: &AuthState) -> AccountInfo {
    let store = auth.store().as_ref();
    let token = auth
        .auth_token()
        .or_else(|| store.get_non_empty(keys::AUTH_TOKEN));
    let loginid = auth.active_loginid();
    let cached_currency = store.get_non_empty(keys::CURRENCY);

    let responses = match fetch(sender).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, ?loginid, "account snapshot failed, storing fallback");
            let info = AccountInfo::fallback(token, loginid, cached_currency);
            if let Err(e) = set_json(store, keys::ACCOUNT_INFO, &info) {
                warn!(error = %e, "failed to store fallback account info");
            }
            return info;
        }
    };

    let info = merge(&responses, token, loginid, cached_currency);
    if let Err(e) = persist(auth, &info) {
        warn!(error = %e, "failed to store account snapshot");
    }
    info!(loginid = %info.loginid, account_type = %info.account_type, "account snapshot refreshed");
    info
}

fn merge(
    responses: &Responses,
    token: Option<String>,
    loginid: Option<String>,
    cached_currency: Option<String>,
) -> AccountInfo {
    let settings = &responses.settings["get_settings"];
    let text = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

    let name = text(&settings["first_name"])
        .or_else(|| text(&settings["last_name"]))
        .unwrap_or_default();
    let email = text(&settings["email"]).unwrap_or_default();

    let balance_body = &responses.balance["balance"];
    let balance = match &balance_body["balance"] {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    let currency = text(&balance_body["currency"])
        .or(cached_currency)
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    let status = responses.status["get_account_status"]["status"]
        .as_array()
        .map(|list| list.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();

    AccountInfo {
        name,
        email,
        balance,
        account_type: AccountType::from_status(status),
        token: token.unwrap_or_default(),
        loginid: loginid.unwrap_or_default(),
        currency,
    }
}

fn persist(auth: &AuthState, info: &AccountInfo) -> Result<(), ClientError> {
    let store = auth.store().as_ref();
    set_json(store, keys::ACCOUNT_INFO, info)?;
    store.set(keys::BALANCE, &info.balance.to_string())?;
    store.set(keys::CURRENCY, &info.currency)?;
    store.set(keys::ACCOUNT_TYPE, info.account_type.as_str())?;
    Ok(())
}
