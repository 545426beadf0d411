//! Connection handle: ready state, request/response correlation, and
//! subscription streams over one socket.
//!
//! Every tracked request gets a numeric `req_id`; the API echoes it on the
//! response (and on every message of a subscription stream), which is how
//! frames are routed back to their caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use copydesk_core::ClientError;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// Callback fired once when a connection reaches [`ReadyState::Closed`].
pub type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// Item delivered on a subscription stream.
pub type StreamItem = Result<Value, ClientError>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Websocket ready state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Frames can be written.
    Open = 1,
    /// Close requested locally, waiting for the socket to end.
    Closing = 2,
    /// Socket gone.
    Closed = 3,
}

impl ReadyState {
    /// `Closing` or `Closed`; such a handle is never reused.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

struct StreamSlot {
    tx: mpsc::UnboundedSender<StreamItem>,
    stream_id: Option<String>,
}

/// One socket plus its correlation tables.
pub struct Connection {
    id: u64,
    url: String,
    state: watch::Sender<ReadyState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_req_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<StreamItem>>>,
    streams: Mutex<HashMap<u64, StreamSlot>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start opening `url` and return the handle immediately.
    ///
    /// The handshake and read loop run on a spawned task. `on_close` fires
    /// once the socket is gone, whether the handshake failed or an open
    /// socket closed. Must be called inside a tokio runtime.
    pub fn open(transport: Arc<dyn Transport>, url: &str, on_close: Option<CloseHook>) -> Arc<Self> {
        let (state, _) = watch::channel(ReadyState::Connecting);
        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            url: url.to_string(),
            state,
            outbound: Mutex::new(None),
            next_req_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        });
        debug!(conn_id = conn.id, %url, "opening connection");

        let task_conn = Arc::clone(&conn);
        drop(tokio::spawn(async move {
            match transport.open(&task_conn.url).await {
                Ok(channels) => {
                    let still_wanted = {
                        let mut outbound = task_conn.outbound.lock();
                        if task_conn.ready_state() == ReadyState::Connecting {
                            *outbound = Some(channels.outbound);
                            true
                        } else {
                            false
                        }
                    };
                    if still_wanted {
                        task_conn.set_state(ReadyState::Open);
                        info!(conn_id = task_conn.id, url = %task_conn.url, "connection open");
                        task_conn.read_loop(channels.inbound).await;
                    }
                }
                Err(e) => {
                    warn!(conn_id = task_conn.id, url = %task_conn.url, error = %e, "connection failed");
                }
            }
            task_conn.finish_closed();
            if let Some(hook) = on_close {
                hook();
            }
        }));

        conn
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Whether frames can be written right now.
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Watch ready-state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }

    /// Wait for the handshake to finish.
    pub async fn wait_open(&self) -> Result<(), ClientError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != ReadyState::Connecting)
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        if state == ReadyState::Open {
            Ok(())
        } else {
            Err(ClientError::ConnectionClosed)
        }
    }

    /// Wait until the socket is gone.
    pub async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ReadyState::Closed).await;
    }

    /// Send a request and wait for its response.
    ///
    /// Waits for the handshake first. API `error` responses become
    /// [`ClientError::Api`].
    pub async fn send(&self, request: Value) -> StreamItem {
        self.wait_open().await?;
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let frame = with_req_id(request, req_id)?;

        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(req_id, tx);
        if let Err(e) = self.write(frame) {
            let _ = self.pending.lock().remove(&req_id);
            return Err(e);
        }
        debug!(conn_id = self.id, req_id, "request sent");
        rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Write a frame without tracking any response.
    pub fn send_untracked(&self, request: &Value) -> Result<(), ClientError> {
        self.write(request.to_string())
    }

    /// Open a subscription stream.
    ///
    /// Returns once the request is written; the first response (or error)
    /// arrives on the stream.
    pub async fn subscribe(self: &Arc<Self>, request: Value) -> Result<Arc<Subscription>, ClientError> {
        self.wait_open().await?;
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let frame = with_req_id(request, req_id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.streams.lock().insert(
            req_id,
            StreamSlot {
                tx,
                stream_id: None,
            },
        );
        if let Err(e) = self.write(frame) {
            let _ = self.streams.lock().remove(&req_id);
            return Err(e);
        }
        debug!(conn_id = self.id, req_id, "subscription opened");
        Ok(Arc::new(Subscription {
            req_id,
            connection: Arc::downgrade(self),
            rx: tokio::sync::Mutex::new(rx),
            cancelled: AtomicBool::new(false),
        }))
    }

    /// Request a close. The socket reaches `Closed` once the transport ends.
    pub fn close(&self) {
        let mut outbound = self.outbound.lock();
        if self.ready_state().is_terminal() {
            return;
        }
        self.set_state(ReadyState::Closing);
        drop(outbound.take());
        info!(conn_id = self.id, url = %self.url, "connection closing");
    }

    fn write(&self, frame: String) -> Result<(), ClientError> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(ClientError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| ClientError::ConnectionClosed)
    }

    fn set_state(&self, state: ReadyState) {
        let _ = self.state.send_replace(state);
    }

    fn has_stream(&self, req_id: u64) -> bool {
        self.streams.lock().contains_key(&req_id)
    }

    fn cancel_stream(&self, req_id: u64) {
        let Some(slot) = self.streams.lock().remove(&req_id) else {
            return;
        };
        if let Some(stream_id) = slot.stream_id {
            if let Err(e) = self.send_untracked(&json!({ "forget": stream_id })) {
                debug!(conn_id = self.id, req_id, error = %e, "forget not sent");
            }
        }
        debug!(conn_id = self.id, req_id, "subscription cancelled");
    }

    async fn read_loop(&self, mut inbound: mpsc::UnboundedReceiver<String>) {
        while let Some(text) = inbound.recv().await {
            self.dispatch(&text);
        }
    }

    fn dispatch(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(conn_id = self.id, error = %e, "dropping malformed frame");
                return;
            }
        };
        let Some(req_id) = message.get("req_id").and_then(Value::as_u64) else {
            let msg_type = message.get("msg_type").and_then(|t| t.as_str()).unwrap_or("");
            debug!(conn_id = self.id, msg_type, "unsolicited frame");
            return;
        };

        if let Some(tx) = self.pending.lock().remove(&req_id) {
            let _ = tx.send(into_result(message));
            return;
        }

        let mut streams = self.streams.lock();
        let Some(slot) = streams.get_mut(&req_id) else {
            debug!(conn_id = self.id, req_id, "no listener for frame");
            return;
        };
        if slot.stream_id.is_none() {
            slot.stream_id = message
                .pointer("/subscription/id")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        let failed = message.get("error").is_some();
        let delivered = slot.tx.send(into_result(message)).is_ok();
        if failed || !delivered {
            let _ = streams.remove(&req_id);
        }
    }

    fn finish_closed(&self) {
        drop(self.outbound.lock().take());
        self.set_state(ReadyState::Closed);
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(ClientError::ConnectionClosed));
        }
        self.streams.lock().clear();
        info!(conn_id = self.id, url = %self.url, "connection closed");
    }
}

fn with_req_id(request: Value, req_id: u64) -> Result<String, ClientError> {
    let Value::Object(mut body) = request else {
        return Err(ClientError::InvalidInput("request must be a JSON object".into()));
    };
    let _ = body.insert("req_id".into(), Value::from(req_id));
    Ok(serde_json::to_string(&body)?)
}

fn into_result(message: Value) -> StreamItem {
    match message.get("error") {
        Some(error) => Err(ClientError::from_api_error(error)),
        None => Ok(message),
    }
}

/// Handle to a subscription stream.
pub struct Subscription {
    req_id: u64,
    connection: Weak<Connection>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamItem>>,
    cancelled: AtomicBool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("req_id", &self.req_id)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Request id the stream is keyed by.
    pub fn req_id(&self) -> u64 {
        self.req_id
    }

    /// Next message, or `None` once the stream ended.
    pub async fn next(&self) -> Option<StreamItem> {
        self.rx.lock().await.recv().await
    }

    /// Whether the stream can still deliver messages.
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self
                .connection
                .upgrade()
                .is_some_and(|conn| !conn.ready_state().is_terminal() && conn.has_stream(self.req_id))
    }

    /// Cancel the stream. Idempotent.
    pub fn unsubscribe(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(conn) = self.connection.upgrade() {
            conn.cancel_stream(self.req_id);
        }
    }
}
