//! Session context: the active connection, subscription dedup, environment
//! tracking, and the background watchers that keep them current.
//!
//! A [`SessionContext`] is constructed explicitly and shared as an `Arc`.
//! In standalone mode it owns its connection: it opens it, pings it,
//! reopens it after a close, and refreshes the cached account snapshot.
//! Otherwise it only serves requests over a connection handed to
//! [`SessionContext::attach`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use copydesk_core::hashing::subscription_id;
use copydesk_core::request::{build_request, build_subscribe_request};
use copydesk_core::{AccountInfo, AuthState, ClientError, Environment, RequestName};
use copydesk_settings::CopydeskSettings;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{CloseHook, Connection, Subscription};
use crate::endpoint::socket_url;
use crate::registry::ConnectionRegistry;
use crate::snapshot::{self, RequestSender};
use crate::watchers;

/// Reconnect flag observed by the reconnect watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectState {
    /// Nothing to do.
    Stable,
    /// The connection closed and the reconnect delay elapsed.
    Pending,
}

/// A deduplicated subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionEntry {
    /// Hash of the request name and payload.
    pub id: String,
    /// Shared stream handle.
    pub handle: Arc<Subscription>,
}

/// Session state shared by callers and watchers.
pub struct SessionContext {
    settings: Arc<CopydeskSettings>,
    auth: Arc<AuthState>,
    registry: Arc<ConnectionRegistry>,
    active: RwLock<Option<Arc<Connection>>>,
    subscriptions: Mutex<HashMap<String, SubscriptionEntry>>,
    environment: Mutex<Environment>,
    last_loginid: Mutex<Option<String>>,
    reconnect: watch::Sender<ReconnectState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("standalone", &self.is_standalone())
            .field("environment", &self.environment())
            .field("active", &self.active_connection())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Create a session. Nothing is opened until [`start`](Self::start) or
    /// [`initialize`](Self::initialize).
    pub fn new(
        settings: Arc<CopydeskSettings>,
        auth: Arc<AuthState>,
        registry: Arc<ConnectionRegistry>,
    ) -> Arc<Self> {
        let loginid = auth.active_loginid();
        let environment = Environment::from_store(auth.store().as_ref(), loginid.as_deref());
        let (reconnect, _) = watch::channel(ReconnectState::Stable);
        Arc::new(Self {
            settings,
            auth,
            registry,
            active: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            environment: Mutex::new(environment),
            last_loginid: Mutex::new(loginid),
            reconnect,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the connection (standalone mode), take the first account
    /// snapshot, and spawn the watchers.
    pub fn start(self: &Arc<Self>) {
        info!(
            standalone = self.is_standalone(),
            environment = %self.environment(),
            "session starting"
        );
        if self.is_standalone() {
            let _ = self.initialize();
            let ctx = Arc::clone(self);
            self.track(tokio::spawn(async move {
                let _ = ctx.refresh_account_snapshot().await;
            }));
        }
        self.track(tokio::spawn(watchers::keepalive(Arc::clone(self))));
        self.track(tokio::spawn(watchers::reconnect(Arc::clone(self))));
        let signal = self.auth.subscribe();
        self.track(tokio::spawn(watchers::login_watch(Arc::clone(self), signal)));
    }

    /// Acquire or reuse the connection for the current environment and make
    /// it the active one.
    ///
    /// Returns without waiting for the handshake.
    pub fn initialize(self: &Arc<Self>) -> Arc<Connection> {
        let url = self.socket_url();
        let conn = self.registry.get_or_create(&url, Some(self.close_hook()));
        debug!(conn_id = conn.id(), %url, "session initialized");
        *self.active.write() = Some(Arc::clone(&conn));
        conn
    }

    /// Serve requests over a connection owned elsewhere.
    pub fn attach(&self, conn: Arc<Connection>) {
        debug!(conn_id = conn.id(), "attached shared connection");
        *self.active.write() = Some(conn);
    }

    /// Stop the watchers, cancel every subscription, and close the
    /// connection if it is open.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let entries: Vec<_> = self.subscriptions.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.handle.unsubscribe();
        }
        if let Some(conn) = self.active.write().take() {
            if conn.is_open() {
                conn.close();
            }
        }
        info!("session shut down");
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn close_hook(self: &Arc<Self>) -> CloseHook {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.on_connection_closed();
            }
        })
    }

    fn on_connection_closed(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let live = self
            .active_connection()
            .is_some_and(|c| !c.ready_state().is_terminal());
        if live {
            debug!("replaced connection closed, no reconnect needed");
            return;
        }
        let delay = self.settings.session.reconnect_delay();
        info!(?delay, "connection closed, scheduling reconnect");
        let ctx = Arc::clone(self);
        self.track(tokio::spawn(async move {
            tokio::select! {
                () = ctx.cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = ctx.reconnect.send_replace(ReconnectState::Pending);
                }
            }
        }));
    }

    /// Re-run the initializer after a close and clear the reconnect flag.
    pub(crate) async fn reconnect_now(self: &Arc<Self>) {
        let conn = self.initialize();
        let _ = self.reconnect.send_replace(ReconnectState::Stable);
        info!(conn_id = conn.id(), url = %conn.url(), "reconnected");
        if self.is_standalone() {
            let _ = self.refresh_account_snapshot().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a one-shot request and await its response.
    pub async fn send(&self, name: RequestName, payload: Option<&Value>) -> Result<Value, ClientError> {
        let conn = self.active_connection().ok_or(ClientError::NotInitialized)?;
        let body = build_request(name, payload)?;
        debug!(request = %name, conn_id = conn.id(), "send");
        conn.send(body).await
    }

    /// Subscribe, reusing a live subscription for an identical request.
    pub async fn subscribe(
        &self,
        name: RequestName,
        payload: Option<&Value>,
    ) -> Result<SubscriptionEntry, ClientError> {
        if !name.is_subscribable() {
            return Err(ClientError::InvalidInput(format!("{name} is not subscribable")));
        }
        let id = subscription_id(name, payload)?;
        if let Some(entry) = self.live_entry(&id) {
            debug!(request = %name, %id, "reusing subscription");
            return Ok(entry);
        }

        let conn = self.active_connection().ok_or(ClientError::NotInitialized)?;
        let body = build_subscribe_request(name, payload)?;
        let handle = conn.subscribe(body).await?;

        let mut subscriptions = self.subscriptions.lock();
        if let Some(existing) = subscriptions.get(&id).filter(|e| e.handle.is_active()) {
            // Lost a race with an identical subscribe
            handle.unsubscribe();
            return Ok(existing.clone());
        }
        let entry = SubscriptionEntry { id: id.clone(), handle };
        let _ = subscriptions.insert(id.clone(), entry.clone());
        info!(request = %name, %id, "subscribed");
        Ok(entry)
    }

    /// Cancel and forget a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &str) {
        let Some(entry) = self.subscriptions.lock().remove(id) else {
            debug!(%id, "unsubscribe for unknown id");
            return;
        };
        entry.handle.unsubscribe();
        info!(%id, "unsubscribed");
    }

    fn live_entry(&self, id: &str) -> Option<SubscriptionEntry> {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.get(id) {
            Some(entry) if entry.handle.is_active() => Some(entry.clone()),
            Some(_) => {
                debug!(%id, "dropping stale subscription");
                let _ = subscriptions.remove(id);
                None
            }
            None => None,
        }
    }

    /// Refresh and cache the account snapshot over this session.
    pub async fn refresh_account_snapshot(&self) -> AccountInfo {
        snapshot::refresh_account_snapshot(self, &self.auth).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Environment
    // ─────────────────────────────────────────────────────────────────────────

    /// Explicitly move to the environment of `loginid` (standalone only).
    ///
    /// Custom environments and no-op switches are ignored.
    pub async fn switch_environment(self: &Arc<Self>, loginid: Option<&str>) {
        if !self.is_standalone() {
            return;
        }
        let next = Environment::from_store(self.auth.store().as_ref(), loginid);
        {
            let mut current = self.environment.lock();
            if next == Environment::Custom || next == *current {
                debug!(environment = %next, "environment switch ignored");
                return;
            }
            *current = next;
        }
        info!(environment = %next, ?loginid, "switching environment");
        let _ = self.initialize();
        let _ = self.refresh_account_snapshot().await;
    }

    /// React to the active login id becoming `loginid`.
    pub(crate) async fn handle_loginid(self: &Arc<Self>, loginid: Option<String>) {
        {
            let mut last = self.last_loginid.lock();
            if *last == loginid {
                return;
            }
            last.clone_from(&loginid);
        }
        let next = Environment::from_store(self.auth.store().as_ref(), loginid.as_deref());
        let changed = {
            let mut current = self.environment.lock();
            let changed = *current != next;
            *current = next;
            changed
        };
        info!(?loginid, environment = %next, changed, "login id changed");

        if !self.is_standalone() {
            return;
        }
        if changed && next != Environment::Custom {
            let _ = self.initialize();
        }
        let _ = self.refresh_account_snapshot().await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Socket URL for the current environment.
    pub fn socket_url(&self) -> String {
        socket_url(&self.settings.api, self.auth.store().as_ref(), self.environment())
    }

    /// Whether this session owns its connection.
    pub fn is_standalone(&self) -> bool {
        self.settings.session.standalone
    }

    /// Current environment.
    pub fn environment(&self) -> Environment {
        *self.environment.lock()
    }

    /// Active connection, if any.
    pub fn active_connection(&self) -> Option<Arc<Connection>> {
        self.active.read().clone()
    }

    /// Auth bookkeeping.
    pub fn auth(&self) -> &Arc<AuthState> {
        &self.auth
    }

    /// Settings in effect.
    pub fn settings(&self) -> &CopydeskSettings {
        &self.settings
    }

    /// Current reconnect flag.
    pub fn reconnect_state(&self) -> ReconnectState {
        *self.reconnect.borrow()
    }

    /// Number of tracked subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub(crate) fn reconnect_signal(&self) -> watch::Receiver<ReconnectState> {
        self.reconnect.subscribe()
    }

    pub(crate) fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
impl RequestSender for SessionContext {
    async fn send(&self, name: RequestName, payload: Option<&Value>) -> Result<Value, ClientError> {
        SessionContext::send(self, name, payload).await
    }
}
