//! Request/response correlation over a framed stream.
//!
//! Every outbound request gets the next id from a per-session counter and a
//! pending entry holding a oneshot sender. The reader task decodes frames
//! from the server and completes the matching entry; responses may arrive in
//! any order. An entry leaves the map when its response is consumed, when
//! its caller times out or gives up, or when the stream closes.

use crate::codec::JsonFrameCodec;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcReply, JsonRpcRequest,
    METHOD_NOT_FOUND, METHOD_PING,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, trace, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bound on writing a reply to a server-initiated request.
const SERVER_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pending calls plus the reason the stream closed, if it has.
///
/// Kept under one lock so a call cannot register after the reader has
/// already failed everything.
#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, oneshot::Sender<McpResult<Value>>>,
    closed: Option<String>,
}

/// Correlates requests written to a server with the responses it sends back.
pub struct Correlator {
    server: String,
    writer: Mutex<Option<FramedWrite<BoxedWriter, JsonFrameCodec>>>,
    pending: std::sync::Mutex<PendingCalls>,
    next_id: AtomicU64,
}

/// Removes a pending entry when the waiting call goes away, for whatever
/// reason.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}

impl Correlator {
    /// Create a correlator writing to `writer`.
    pub fn new<W>(server: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        Self {
            server: server.into(),
            writer: Mutex::new(Some(FramedWrite::new(writer, JsonFrameCodec::new()))),
            pending: std::sync::Mutex::new(PendingCalls::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the next request ID.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) -> McpResult<oneshot::Receiver<McpResult<Value>>> {
        let mut pending = self.lock_pending();
        if let Some(reason) = &pending.closed {
            return Err(McpError::connection_closed(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        pending.calls.insert(id, tx);
        Ok(rx)
    }

    fn forget(&self, id: u64) {
        if self.lock_pending().calls.remove(&id).is_some() {
            trace!(server = %self.server, id, "Removed abandoned pending call");
        }
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// The deadline covers writing the request as well as waiting for the
    /// answer, so a server that stops reading stdin still yields
    /// [`McpError::CallTimeout`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        let id = self.next_request_id();
        let rx = self.register(id)?;
        let _guard = PendingGuard {
            correlator: self,
            id,
        };

        let exchange = self.exchange(JsonRpcRequest::new(id, method, params), rx);
        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(server = %self.server, id, method, "Request timed out");
                Err(McpError::CallTimeout {
                    method: method.to_string(),
                    id,
                    timeout,
                })
            }
        }
    }

    async fn exchange(
        &self,
        request: JsonRpcRequest,
        rx: oneshot::Receiver<McpResult<Value>>,
    ) -> McpResult<Value> {
        debug!(
            server = %self.server,
            id = request.id,
            method = %request.method,
            "Sending request"
        );
        self.send(request).await?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::connection_closed(
                "pending call dropped without a response",
            )),
        }
    }

    /// Send a notification. No response is expected or tracked; `timeout`
    /// only bounds the write.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<()> {
        debug!(server = %self.server, method, "Sending notification");
        self.send_within(JsonRpcNotification::new(method, params), method, timeout)
            .await
    }

    async fn send_within<T: Serialize>(
        &self,
        message: T,
        method: &str,
        timeout: Duration,
    ) -> McpResult<()> {
        match tokio::time::timeout(timeout, self.send(message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(server = %self.server, method, "Write timed out");
                Err(McpError::WriteTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Write one message. Writers queue on the lock so frames never interleave.
    ///
    /// Encoding into the frame buffer is not interrupted by cancellation, so
    /// a write abandoned mid-flush leaves whole frames behind for the next
    /// flush.
    async fn send<T: Serialize>(&self, message: T) -> McpResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| McpError::connection_closed("server stdin is closed"))?;
        writer.send(message).await
    }

    /// Route one decoded frame.
    pub fn dispatch(self: &Arc<Self>, frame: Value) {
        trace!(server = %self.server, frame = %frame, "Received frame");

        match IncomingMessage::classify(frame) {
            IncomingMessage::Response { id, outcome } => self.complete(id, outcome),
            IncomingMessage::Request { id, method, .. } => self.answer_server_request(id, method),
            IncomingMessage::Notification { method, .. } => {
                debug!(server = %self.server, method = %method, "Ignoring server notification");
            }
            IncomingMessage::Invalid(frame) => {
                warn!(server = %self.server, frame = %frame, "Dropping malformed message");
            }
        }
    }

    fn complete(&self, id: Value, outcome: Result<Value, JsonRpcError>) {
        let sender = id
            .as_u64()
            .and_then(|id| self.lock_pending().calls.remove(&id));

        let Some(sender) = sender else {
            warn!(server = %self.server, id = %id, "Dropping stray response");
            return;
        };

        if sender.send(outcome.map_err(McpError::Remote)).is_err() {
            debug!(server = %self.server, id = %id, "Caller went away before the response");
        }
    }

    /// Servers may ping us; everything else they ask for is unsupported.
    fn answer_server_request(self: &Arc<Self>, id: Value, method: String) {
        let reply = if method == METHOD_PING {
            JsonRpcReply::success(id, Value::Object(Default::default()))
        } else {
            debug!(server = %self.server, method = %method, "Rejecting server request");
            JsonRpcReply::failure(
                id,
                JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
            )
        };

        // Replying from a separate task keeps the reader draining stdout
        // while a caller holds the writer.
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = correlator
                .send_within(reply, &method, SERVER_REPLY_TIMEOUT)
                .await
            {
                warn!(server = %correlator.server, error = %e, "Failed to answer server request");
            }
        });
    }

    /// Start draining `reader` into [`Correlator::dispatch`].
    ///
    /// When the stream ends or fails, every pending call fails with
    /// [`McpError::ConnectionClosed`] and later calls are refused.
    pub fn spawn_reader<R>(self: &Arc<Self>, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            let mut frames = FramedRead::new(reader, JsonFrameCodec::new());
            let reason = loop {
                match frames.next().await {
                    Some(Ok(frame)) => correlator.dispatch(frame),
                    Some(Err(e)) => {
                        error!(server = %correlator.server, error = %e, "Error reading server output");
                        break format!("read failed: {e}");
                    }
                    None => break "server closed its output".to_string(),
                }
            };
            correlator.close(&reason);
        })
    }

    /// Fail every pending call and refuse new ones.
    pub fn close(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut pending = self.lock_pending();
            if pending.closed.is_none() {
                pending.closed = Some(reason.to_string());
            }
            pending.calls.drain().collect()
        };

        if !drained.is_empty() {
            warn!(
                server = %self.server,
                count = drained.len(),
                reason,
                "Failing pending calls"
            );
        }
        for (_, sender) in drained {
            let _ = sender.send(Err(McpError::connection_closed(reason)));
        }
    }

    /// Flush and drop the writer, closing the server's stdin.
    pub async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = SinkExt::<Value>::close(&mut writer).await {
                debug!(server = %self.server, error = %e, "Error closing server stdin");
            }
        }
    }

    /// Whether the read side has ended.
    pub fn is_closed(&self) -> bool {
        self.lock_pending().closed.is_some()
    }

    /// Ids currently awaiting a response, ascending.
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock_pending().calls.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
