//! Cached account snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Currency assumed when neither the API nor the store knows one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Regulatory account category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Account status lists `financial`.
    Financial,
    /// Everything else.
    #[default]
    Gaming,
}

impl AccountType {
    /// Classify from the `get_account_status.status` list.
    pub fn from_status<'a>(status: impl IntoIterator<Item = &'a str>) -> Self {
        if status.into_iter().any(|s| s == "financial") {
            Self::Financial
        } else {
            Self::Gaming
        }
    }

    /// Lowercase name, as stored under `account_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Gaming => "gaming",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized account record stored under `account_info`.
///
/// Every field is always present; missing data becomes an empty string,
/// zero, or the default account type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// First name, else last name, else empty.
    pub name: String,
    /// Account email.
    pub email: String,
    /// Account balance.
    pub balance: f64,
    /// Account category.
    pub account_type: AccountType,
    /// API token of the active account.
    pub token: String,
    /// Active login id.
    pub loginid: String,
    /// Account currency.
    pub currency: String,
}

impl AccountInfo {
    /// Minimal record built only from already-cached values.
    pub fn fallback(token: Option<String>, loginid: Option<String>, currency: Option<String>) -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            balance: 0.0,
            account_type: AccountType::Gaming,
            token: token.unwrap_or_default(),
            loginid: loginid.unwrap_or_default(),
            currency: currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        }
    }
}
