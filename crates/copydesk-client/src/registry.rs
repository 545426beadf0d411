//! Process-wide connection registry keyed by endpoint URL.
//!
//! Callers asking for the same URL share one live connection. A handle that
//! is closing or closed is replaced on the next request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::{CloseHook, Connection};
use crate::transport::Transport;

/// Connections by endpoint URL.
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Registry opening sockets through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Live connection for `url`, opening a new one when none is usable.
    ///
    /// `on_close` is only attached to a newly opened connection.
    pub fn get_or_create(&self, url: &str, on_close: Option<CloseHook>) -> Arc<Connection> {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(url) {
            if !existing.ready_state().is_terminal() {
                debug!(conn_id = existing.id(), %url, "reusing connection");
                return Arc::clone(existing);
            }
        }
        let conn = Connection::open(Arc::clone(&self.transport), url, on_close);
        let _ = connections.insert(url.to_string(), Arc::clone(&conn));
        conn
    }

    /// Current handle for `url`, whatever its state.
    pub fn get(&self, url: &str) -> Option<Arc<Connection>> {
        self.connections.lock().get(url).cloned()
    }

    /// Number of tracked URLs.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no URL is tracked.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Close every connection and forget them.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close();
        }
    }
}
