//! Request names and request body construction.
//!
//! A request body is `{ <name>: 1, ...payload }`. Payload keys are merged
//! last, so a request that carries a value under its own name (such as
//! `authorize: <token>`) overrides the `1` marker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ClientError;

/// Trading API request types known to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestName {
    /// Authorize the connection with an API token.
    Authorize,
    /// Account balance (subscribable).
    Balance,
    /// Start copying a trader.
    CopyStart,
    /// Stop copying a trader.
    CopyStop,
    /// Cancel a subscription by stream id.
    Forget,
    /// Cancel every subscription of a stream type.
    ForgetAll,
    /// Account status flags.
    GetAccountStatus,
    /// Account settings (name, email).
    GetSettings,
    /// Keepalive.
    Ping,
    /// Open contract updates (subscribable).
    ProposalOpenContract,
    /// Tick stream for a symbol (subscribable).
    Ticks,
    /// Transaction stream (subscribable).
    Transaction,
    /// Server status (subscribable).
    WebsiteStatus,
}

impl RequestName {
    /// Every known request type.
    pub const ALL: [Self; 13] = [
        Self::Authorize,
        Self::Balance,
        Self::CopyStart,
        Self::CopyStop,
        Self::Forget,
        Self::ForgetAll,
        Self::GetAccountStatus,
        Self::GetSettings,
        Self::Ping,
        Self::ProposalOpenContract,
        Self::Ticks,
        Self::Transaction,
        Self::WebsiteStatus,
    ];

    /// Wire name, also the response `msg_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Balance => "balance",
            Self::CopyStart => "copy_start",
            Self::CopyStop => "copy_stop",
            Self::Forget => "forget",
            Self::ForgetAll => "forget_all",
            Self::GetAccountStatus => "get_account_status",
            Self::GetSettings => "get_settings",
            Self::Ping => "ping",
            Self::ProposalOpenContract => "proposal_open_contract",
            Self::Ticks => "ticks",
            Self::Transaction => "transaction",
            Self::WebsiteStatus => "website_status",
        }
    }

    /// Whether the API accepts `subscribe: 1` for this request.
    pub fn is_subscribable(self) -> bool {
        matches!(
            self,
            Self::Balance
                | Self::ProposalOpenContract
                | Self::Ticks
                | Self::Transaction
                | Self::WebsiteStatus
        )
    }
}

impl fmt::Display for RequestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestName {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ClientError::InvalidInput(format!("unknown request type: {s}")))
    }
}

fn payload_object(payload: Option<&Value>) -> Result<Map<String, Value>, ClientError> {
    match payload {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(ClientError::InvalidInput(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}

/// Body for a one-shot request.
pub fn build_request(name: RequestName, payload: Option<&Value>) -> Result<Value, ClientError> {
    let mut body = Map::new();
    let _ = body.insert(name.as_str().into(), Value::from(1));
    body.extend(payload_object(payload)?);
    Ok(Value::Object(body))
}

/// Body for a subscription request.
///
/// Callers may pass the request fields flat or nested under `payload`;
/// when a nested `payload` object is present only its fields are used.
pub fn build_subscribe_request(
    name: RequestName,
    payload: Option<&Value>,
) -> Result<Value, ClientError> {
    let fields = normalize_subscribe_payload(payload)?;
    let mut body = Map::new();
    let _ = body.insert(name.as_str().into(), Value::from(1));
    let _ = body.insert("subscribe".into(), Value::from(1));
    body.extend(fields);
    Ok(Value::Object(body))
}

/// Collapse the flat and nested payload shapes into one field map.
pub fn normalize_subscribe_payload(
    payload: Option<&Value>,
) -> Result<Map<String, Value>, ClientError> {
    let mut outer = payload_object(payload)?;
    match outer.remove("payload") {
        Some(inner) => payload_object(Some(&inner)),
        None => Ok(outer),
    }
}
