//! Account environment selection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::{KeyValueStore, keys};

/// Login id prefixes of virtual (demo) accounts.
const DEMO_PREFIXES: [&str; 2] = ["VRT", "VRW"];

/// Which backend the session talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Virtual-money account.
    Demo,
    /// Real-money account.
    Real,
    /// A custom server override is configured.
    Custom,
}

impl Environment {
    /// Derive the environment from a login id and the custom server override.
    ///
    /// A non-empty override always wins; otherwise the login id prefix decides.
    pub fn resolve(loginid: Option<&str>, custom_server_url: Option<&str>) -> Self {
        if custom_server_url.is_some_and(|url| !url.is_empty()) {
            return Self::Custom;
        }
        match loginid {
            Some(id) if DEMO_PREFIXES.iter().any(|p| id.starts_with(p)) => Self::Demo,
            _ => Self::Real,
        }
    }

    /// Derive the environment for `loginid` using the override stored in `store`.
    pub fn from_store(store: &dyn KeyValueStore, loginid: Option<&str>) -> Self {
        Self::resolve(loginid, store.get(keys::SERVER_URL).as_deref())
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Real => "real",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
