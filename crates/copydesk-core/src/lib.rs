//! # copydesk-core
//!
//! Foundation types, errors, local storage, and auth bookkeeping for copydesk.
//!
//! This crate provides the shared vocabulary that the other copydesk crates
//! depend on:
//!
//! - **Errors**: [`errors::ClientError`] and [`errors::StoreError`] via `thiserror`
//! - **Storage**: [`storage::KeyValueStore`] with in-memory and JSON-file backends
//! - **Environment**: [`environment::Environment`] derived from login id and server override
//! - **Auth**: [`auth::AuthState`] token bookkeeping with a login-id change signal
//! - **Account**: [`account::AccountInfo`] snapshot record
//! - **Requests**: [`request::RequestName`] and request body construction
//! - **Hashing**: [`hashing::subscription_id`] over canonical JSON
//! - **Logging**: [`logging::init_logging`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other copydesk crates.

#![deny(unsafe_code)]

pub mod account;
pub mod auth;
pub mod environment;
pub mod errors;
pub mod hashing;
pub mod logging;
pub mod request;
pub mod storage;

pub use account::{AccountInfo, AccountType};
pub use auth::AuthState;
pub use environment::Environment;
pub use errors::{ClientError, StoreError};
pub use request::RequestName;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
