//! Transport seam between connection handles and the socket.
//!
//! A transport turns an endpoint URL into a pair of text channels. The
//! connection writes frames into `outbound` and reads frames from
//! `inbound`; the socket is gone once `inbound` yields `None`. Dropping
//! `outbound` asks the transport to close the socket.

use std::time::Duration;

use async_trait::async_trait;
use copydesk_core::ClientError;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Upper bound on the websocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Text channels of an open socket.
pub struct WireChannels {
    /// Frames to write. Dropping the sender closes the socket.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames read. `None` means the socket closed.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens sockets.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake for `url`.
    async fn open(&self, url: &str) -> Result<WireChannels, ClientError>;
}

/// Websocket transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<WireChannels, ClientError> {
        let (socket, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| ClientError::Transport(format!("handshake timed out: {url}")))?
                .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        drop(tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        }));

        drop(tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(len = bytes.len(), "dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                };
                if in_tx.send(text).is_err() {
                    break;
                }
            }
        }));

        Ok(WireChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub mod mock {
    //! In-process transport for tests.
    //!
    //! Each opened socket is served by a task that records every frame the
    //! client writes and answers through a [`Responder`]. Replies that lack a
    //! `req_id` get the request's `req_id` copied in, like the real API does.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tokio::sync::{mpsc, oneshot};

    use super::{Transport, WireChannels};
    use async_trait::async_trait;
    use copydesk_core::ClientError;

    /// Maps a request frame to the frames the server sends back.
    pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

    struct Peer {
        url: String,
        kill: Option<oneshot::Sender<()>>,
        push: mpsc::UnboundedSender<String>,
    }

    /// Mock transport with a scripted server.
    pub struct MockTransport {
        responder: Arc<Mutex<Responder>>,
        opens: AtomicUsize,
        fail_opens: AtomicUsize,
        frames: Arc<Mutex<Vec<Value>>>,
        peers: Mutex<Vec<Peer>>,
    }

    impl MockTransport {
        /// Mock whose server answers with [`default_reply`].
        pub fn new() -> Self {
            Self::with_responder(Arc::new(|req: &Value| {
                default_reply(req).into_iter().collect::<Vec<_>>()
            }))
        }

        /// Mock with a custom responder.
        pub fn with_responder(responder: Responder) -> Self {
            Self {
                responder: Arc::new(Mutex::new(responder)),
                opens: AtomicUsize::new(0),
                fail_opens: AtomicUsize::new(0),
                frames: Arc::new(Mutex::new(Vec::new())),
                peers: Mutex::new(Vec::new()),
            }
        }

        /// Replace the responder, including for sockets already open.
        pub fn set_responder(&self, responder: Responder) {
            *self.responder.lock() = responder;
        }

        /// Make the next `count` opens fail.
        pub fn fail_next_opens(&self, count: usize) {
            self.fail_opens.store(count, Ordering::SeqCst);
        }

        /// Number of successful opens.
        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        /// URLs of every socket opened, in order.
        pub fn opened_urls(&self) -> Vec<String> {
            self.peers.lock().iter().map(|p| p.url.clone()).collect()
        }

        /// Every frame written by clients, in order.
        pub fn frames(&self) -> Vec<Value> {
            self.frames.lock().clone()
        }

        /// Frames that carry `name` as a top-level key.
        pub fn frames_named(&self, name: &str) -> Vec<Value> {
            self.frames()
                .into_iter()
                .filter(|f| f.get(name).is_some())
                .collect()
        }

        /// Close socket `index` from the server side.
        pub fn kill(&self, index: usize) {
            if let Some(peer) = self.peers.lock().get_mut(index) {
                if let Some(kill) = peer.kill.take() {
                    let _ = kill.send(());
                }
            }
        }

        /// Push a raw frame to socket `index`.
        pub fn push_raw(&self, index: usize, frame: impl Into<String>) {
            if let Some(peer) = self.peers.lock().get(index) {
                let _ = peer.push.send(frame.into());
            }
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&self, url: &str) -> Result<WireChannels, ClientError> {
            let failed = self
                .fail_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(ClientError::Transport(format!("refused: {url}")));
            }

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
            let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
            let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

            let responder = Arc::clone(&self.responder);
            let frames = Arc::clone(&self.frames);
            drop(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut kill_rx => break,
                        frame = out_rx.recv() => {
                            let Some(text) = frame else { break };
                            let Ok(request) = serde_json::from_str::<Value>(&text) else { continue };
                            frames.lock().push(request.clone());
                            let respond = Arc::clone(&*responder.lock());
                            for mut reply in respond(&request) {
                                if reply.get("req_id").is_none() {
                                    if let (Some(obj), Some(id)) = (reply.as_object_mut(), request.get("req_id")) {
                                        let _ = obj.insert("req_id".into(), id.clone());
                                    }
                                }
                                if in_tx.send(reply.to_string()).is_err() {
                                    break;
                                }
                            }
                        }
                        Some(raw) = push_rx.recv() => {
                            let _ = in_tx.send(raw);
                        }
                    }
                }
            }));

            let _ = self.opens.fetch_add(1, Ordering::SeqCst);
            self.peers.lock().push(Peer {
                url: url.to_string(),
                kill: Some(kill_tx),
                push: push_tx,
            });
            Ok(WireChannels {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    /// Canned answer for the request types the client uses.
    pub fn default_reply(request: &Value) -> Option<Value> {
        let name = ["authorize", "balance", "get_settings", "get_account_status", "copy_start",
            "copy_stop", "ping", "forget", "ticks"]
            .into_iter()
            .find(|n| request.get(*n).is_some())?;
        let body = match name {
            "authorize" => json!({"loginid": "CR1000", "currency": "USD"}),
            "balance" => json!({"balance": 1250.5, "currency": "USD", "loginid": "CR1000"}),
            "get_settings" => json!({"first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.com"}),
            "get_account_status" => json!({"status": ["financial_information_not_complete", "financial"]}),
            "copy_start" | "copy_stop" | "forget" => json!(1),
            "ping" => json!("pong"),
            "ticks" => {
                return Some(json!({
                    "msg_type": "tick",
                    "tick": {"symbol": request["ticks"], "quote": 100.0},
                    "subscription": {"id": "sub-ticks-1"},
                }));
            }
            _ => return None,
        };
        let mut reply = serde_json::Map::new();
        let _ = reply.insert("msg_type".into(), json!(name));
        let _ = reply.insert(name.into(), body);
        let _ = reply.insert("echo_req".into(), request.clone());
        Some(Value::Object(reply))
    }
}
