//! Full-duplex JSON-RPC dispatch over the agent's pipes.
//!
//! One reader task drains the child's stdout and routes every frame:
//! responses complete the matching pending request, notifications fan
//! out to subscribers in registration order, and incoming requests from
//! the agent are forwarded to the permission dispatch channel. Outbound
//! requests allocate strictly increasing identifiers and carry a 60 s
//! deadline.
//!
//! The pending-request table and the subscriber list share one mutex —
//! the reader and request-issuing callers are the only writers, and the
//! two structures are always consistent with each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::{parse_frame, FrameCodec};
use super::protocol::{IncomingFrame, RpcRequest, RpcResponse, JSONRPC_VERSION};
use crate::{AcpError, Result};

/// Deadline applied to every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A notification received from the agent.
#[derive(Debug, Clone)]
pub struct AgentNotification {
    /// Notification method (e.g., `session/update`).
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

/// An incoming request from the agent awaiting exactly one response.
#[derive(Debug)]
pub struct IncomingRequest {
    /// Correlation identifier to echo in the response.
    pub id: u64,
    /// Request method (e.g., `session/request_permission`).
    pub method: String,
    /// Request payload.
    pub params: Value,
}

/// Opaque handle identifying a notification subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// One registered notification subscriber.
struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<AgentNotification>,
}

/// A request waiting for its response.
struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    method: String,
    deadline: Instant,
}

/// Pending table and subscriber list, guarded together.
#[derive(Default)]
struct RouterState {
    pending: HashMap<u64, PendingRequest>,
    subscribers: Vec<Subscriber>,
}

/// Full-duplex dispatcher bound to one agent process.
pub struct Router {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    state: Mutex<RouterState>,
    next_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    incoming_tx: mpsc::UnboundedSender<IncomingRequest>,
}

impl Router {
    /// Create a router writing frames to `writer`.
    ///
    /// Returns the router and the receiver carrying incoming requests
    /// from the agent (the permission dispatch task drains it).
    #[must_use]
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<IncomingRequest>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            state: Mutex::new(RouterState::default()),
            next_id: AtomicU64::new(1),
            next_subscriber_id: AtomicU64::new(1),
            incoming_tx,
        });
        (router, incoming_rx)
    }

    /// Issue a request and await its response.
    ///
    /// The pending entry is registered before the frame is written, so a
    /// response can never race its own registration. The entry is
    /// removed on response, timeout, or cleanup — exactly one terminal
    /// outcome per request.
    ///
    /// # Errors
    ///
    /// - [`AcpError::RequestTimeout`] after [`REQUEST_TIMEOUT`], naming
    ///   the method.
    /// - [`AcpError::Agent`] when the response carries an error object.
    /// - [`AcpError::ProcessExited`] when the write fails or the
    ///   connection is cleaned up while the request is outstanding.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            state.pending.insert(
                id,
                PendingRequest {
                    tx,
                    method: method.to_owned(),
                    deadline: Instant::now() + REQUEST_TIMEOUT,
                },
            );
        }

        let frame = RpcRequest {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params: Some(params),
            id: Some(id),
        };

        if let Err(err) = self.write_value(&serde_json::to_value(&frame).unwrap_or_default()).await
        {
            self.state.lock().await.pending.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(AcpError::ProcessExited(
                "connection closed while awaiting response".into(),
            )),
            Err(_elapsed) => {
                self.state.lock().await.pending.remove(&id);
                Err(AcpError::RequestTimeout(format!(
                    "'{method}' received no response within {REQUEST_TIMEOUT:?}"
                )))
            }
        }
    }

    /// Send a response to an incoming request from the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AcpError::ProcessExited`] when the write fails.
    pub async fn respond(&self, id: u64, result: Value) -> Result<()> {
        let frame = RpcResponse {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id: Some(id),
        };
        self.write_value(&serde_json::to_value(&frame).unwrap_or_default())
            .await
    }

    /// Register a notification subscriber.
    ///
    /// Every inbound notification is delivered to the returned receiver,
    /// in registration order relative to other subscribers, until
    /// [`Router::unsubscribe`] is called or the receiver is dropped.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<AgentNotification>) {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .await
            .subscribers
            .push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove a subscriber by handle. Idempotent.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.state.lock().await.subscribers.retain(|s| s.id != id);
    }

    /// Fail every pending request with a clone of `error` and drop all
    /// subscribers. Idempotent; used on process exit and disposal.
    pub async fn shut_down(&self, error: &AcpError) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        for (id, entry) in state.pending.drain() {
            debug!(
                id,
                method = entry.method.as_str(),
                remaining = ?entry.deadline.saturating_duration_since(now),
                "router: failing pending request during shutdown"
            );
            let _ = entry.tx.send(Err(error.clone()));
        }
        state.subscribers.clear();
    }

    /// Serialize one frame and write it, newline-terminated.
    async fn write_value(&self, value: &Value) -> Result<()> {
        let mut bytes = serde_json::to_vec(value)
            .map_err(|err| AcpError::Io(format!("failed to serialize frame: {err}")))?;
        bytes.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await.map_err(|err| {
            AcpError::ProcessExited(format!("write to agent stdin failed: {err}"))
        })?;
        writer
            .flush()
            .await
            .map_err(|err| AcpError::ProcessExited(format!("flush to agent stdin failed: {err}")))
    }

    /// Route one classified inbound frame.
    async fn dispatch(&self, frame: IncomingFrame) {
        if frame.is_response() {
            self.route_response(frame).await;
        } else if frame.is_incoming_request() {
            let (Some(id), Some(method)) = (frame.id, frame.method) else {
                return;
            };
            let request = IncomingRequest {
                id,
                method,
                params: frame.params.unwrap_or(Value::Null),
            };
            if self.incoming_tx.send(request).is_err() {
                debug!("router: incoming-request channel closed, dropping request");
            }
        } else if frame.is_notification() {
            let Some(method) = frame.method else { return };
            self.deliver_notification(AgentNotification {
                method,
                params: frame.params.unwrap_or(Value::Null),
            })
            .await;
        } else {
            debug!("router: ignoring frame with neither method nor id");
        }
    }

    /// Complete the pending request matching a response frame.
    async fn route_response(&self, frame: IncomingFrame) {
        let Some(id) = frame.id else { return };
        let entry = self.state.lock().await.pending.remove(&id);
        let Some(entry) = entry else {
            warn!(id, "router: response for unknown request id");
            return;
        };

        let outcome = match frame.error {
            Some(err) => {
                let message = if err.message.trim().is_empty() {
                    serde_json::to_string(&err).unwrap_or_else(|_| "unknown agent error".into())
                } else {
                    err.message
                };
                Err(AcpError::Agent(message))
            }
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };

        if entry.tx.send(outcome).is_err() {
            debug!(
                id,
                method = entry.method.as_str(),
                "router: waiter gone before response arrived"
            );
        }
    }

    /// Deliver a notification to every subscriber in registration order.
    ///
    /// Sends are non-blocking (unbounded channels); subscribers whose
    /// receivers are gone are pruned.
    async fn deliver_notification(&self, notification: AgentNotification) {
        let mut state = self.state.lock().await;
        state
            .subscribers
            .retain(|s| s.tx.send(notification.clone()).is_ok());
    }
}

/// Spawn the reader task draining the agent's stdout through `router`.
///
/// Malformed lines are discarded by the codec layer; EOF and stream
/// errors stop the task quietly — process-exit cleanup is owned by the
/// exit monitor.
pub fn spawn_reader<R>(
    router: Arc<Router>,
    stdout: R,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedRead::new(stdout, FrameCodec::new());

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("router reader: cancellation received, stopping");
                    break;
                }

                item = framed.next() => {
                    match item {
                        None => {
                            debug!("router reader: EOF on agent stdout");
                            break;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "router reader: stream error, stopping");
                            break;
                        }
                        Some(Ok(line)) => {
                            if let Some(frame) = parse_frame(&line) {
                                router.dispatch(frame).await;
                            }
                        }
                    }
                }
            }
        }
    })
}
