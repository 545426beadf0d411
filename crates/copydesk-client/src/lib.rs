//! # copydesk-client
//!
//! Websocket session client for the trading API.
//!
//! - **Transport**: [`transport::Transport`] seam with the `tokio-tungstenite`
//!   implementation and an in-process mock
//! - **Connection**: [`connection::Connection`] correlates responses to
//!   requests by `req_id` and carries subscription streams
//! - **Registry**: [`registry::ConnectionRegistry`] shares one live
//!   connection per endpoint URL
//! - **Session**: [`session::SessionContext`] with subscription dedup,
//!   environment switching, and the keepalive, reconnect and login watchers
//! - **Snapshot**: [`snapshot::refresh_account_snapshot`] caches account info
//! - **Copy trading**: [`copy_trading::CopyTrader`]
//!
//! ## Crate Position
//!
//! Depends on copydesk-core and copydesk-settings. Used by the `copydesk` binary.

#![deny(unsafe_code)]

pub mod connection;
pub mod copy_trading;
pub mod endpoint;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod transport;
mod watchers;

pub use connection::{Connection, ReadyState, Subscription};
pub use copy_trading::{CopyStatus, CopyTrader};
pub use registry::ConnectionRegistry;
pub use session::{ReconnectState, SessionContext, SubscriptionEntry};
pub use snapshot::{RequestSender, refresh_account_snapshot};
pub use transport::{Transport, WsTransport};
