//! Newline-delimited JSON-RPC channel with request-id correlation.
//!
//! Every request gets a fresh id from a per-channel counter and parks a
//! [`PendingCall`] in a shared table. A background reader task matches each
//! response to its pending call by id, so concurrent requests complete in
//! whatever order the peer answers them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JSONRPC_VERSION,
};
use crate::error::AgentError;

/// Reply to one request: the `result` value or the peer's error object.
pub type RpcReply = Result<Value, JsonRpcError>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingCall {
    pub method: String,
    pub issued_at: Instant,
    slot: oneshot::Sender<RpcReply>,
}

#[derive(Debug, Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    /// Set once the stream ended; new requests fail fast.
    disconnected: Option<String>,
}

/// Drops a request's pending entry however its future ends. A delivered
/// reply has already removed it, so this is a no-op then.
struct ForgetOnDrop<'a> {
    channel: &'a RpcChannel,
    id: u64,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.channel.forget(self.id);
    }
}

/// Client side of a JSON-RPC peer speaking one object per line.
pub struct RpcChannel {
    label: String,
    writer: Mutex<Option<BoxedWriter>>,
    pending: Arc<StdMutex<PendingTable>>,
    next_id: AtomicU64,
}

impl RpcChannel {
    pub fn new<W>(label: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            writer: Mutex::new(Some(Box::new(writer))),
            pending: Arc::new(StdMutex::new(PendingTable::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start the task that reads responses and completes pending calls.
    pub fn spawn_reader<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending = Arc::clone(&self.pending);
        let label = self.label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&label, &pending, &line),
                    Ok(None) => {
                        tracing::info!(server = %label, "server closed its output stream");
                        break "server closed the stream".to_string();
                    }
                    Err(e) => {
                        tracing::warn!(server = %label, error = %e, "failed to read from server");
                        break format!("read error: {e}");
                    }
                }
            };
            fail_all(&pending, &reason);
        })
    }

    /// Send a request and wait for its correlated reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<RpcReply, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = self.register(id, method)?;
        let _pending = ForgetOnDrop { channel: self, id };

        let line = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        })?;
        self.write_line(&line).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(server = %self.label, id, method, "request cancelled");
                Err(AgentError::Cancelled)
            }
            reply = rx => reply.map_err(|_| {
                AgentError::Transport(format!(
                    "{}: {}",
                    self.label,
                    self.disconnect_reason().unwrap_or_else(|| "channel closed".into())
                ))
            }),
        }
    }

    /// Send a notification; no reply is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), AgentError> {
        let line = serde_json::to_string(&JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        })?;
        self.write_line(&line).await
    }

    /// Drop the write half, signalling end-of-input to the peer.
    pub async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(server = %self.label, error = %e, "error shutting down writer");
            }
        }
    }

    /// Fail every outstanding call and refuse new ones.
    pub fn fail_pending(&self, reason: &str) {
        fail_all(&self.pending, reason);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|t| t.calls.len()).unwrap_or(0)
    }

    fn register(&self, id: u64, method: &str) -> Result<oneshot::Receiver<RpcReply>, AgentError> {
        let mut table = self
            .pending
            .lock()
            .map_err(|_| AgentError::InvalidState("pending-call table poisoned".into()))?;
        if let Some(reason) = &table.disconnected {
            return Err(AgentError::Transport(format!("{}: {reason}", self.label)));
        }
        let (tx, rx) = oneshot::channel();
        table.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                issued_at: Instant::now(),
                slot: tx,
            },
        );
        Ok(rx)
    }

    fn forget(&self, id: u64) {
        if let Ok(mut table) = self.pending.lock() {
            table.calls.remove(&id);
        }
    }

    fn disconnect_reason(&self) -> Option<String> {
        self.pending.lock().ok().and_then(|t| t.disconnected.clone())
    }

    async fn write_line(&self, line: &str) -> Result<(), AgentError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| AgentError::Transport(format!("{}: input stream closed", self.label)))?;
        let io = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        io.await
            .map_err(|e| AgentError::Transport(format!("{}: write failed: {e}", self.label)))
    }
}

fn dispatch_line(label: &str, pending: &StdMutex<PendingTable>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let message: IncomingMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(server = %label, error = %e, "skipping malformed line from server");
            return;
        }
    };

    if let Some(method) = &message.method {
        tracing::debug!(server = %label, method, "ignoring server-initiated message");
        return;
    }

    let Some(id) = message.response_id() else {
        tracing::warn!(server = %label, "response without a usable id");
        return;
    };

    let call = pending.lock().ok().and_then(|mut t| t.calls.remove(&id));
    let Some(call) = call else {
        tracing::debug!(server = %label, id, "no pending call for response");
        return;
    };

    tracing::debug!(
        server = %label,
        id,
        method = %call.method,
        elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
        "response received"
    );
    let reply = match message.error {
        Some(error) => Err(error),
        None => Ok(message.result.unwrap_or(Value::Null)),
    };
    // The caller may have given up already.
    let _ = call.slot.send(reply);
}

fn fail_all(pending: &StdMutex<PendingTable>, reason: &str) {
    if let Ok(mut table) = pending.lock() {
        if table.disconnected.is_none() {
            table.disconnected = Some(reason.to_string());
        }
        // Dropping the senders wakes every waiter with a closed-channel error.
        table.calls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Wires a channel to an in-memory peer; returns the peer's halves.
    fn connected() -> (
        Arc<RpcChannel>,
        tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);
        let channel = Arc::new(RpcChannel::new("test", client_out));
        channel.spawn_reader(client_in);
        (channel, BufReader::new(server_in).lines(), server_out)
    }

    fn id_of(line: &str) -> u64 {
        serde_json::from_str::<Value>(line).unwrap()["id"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn responses_are_matched_by_id_not_arrival_order() {
        let (channel, mut requests, mut responses) = connected();
        let cancel = CancellationToken::new();

        let first = {
            let channel = Arc::clone(&channel);
            let cancel = cancel.clone();
            tokio::spawn(async move { channel.request("first", None, &cancel).await })
        };
        let first_id = id_of(&requests.next_line().await.unwrap().unwrap());

        let second = {
            let channel = Arc::clone(&channel);
            let cancel = cancel.clone();
            tokio::spawn(async move { channel.request("second", None, &cancel).await })
        };
        let second_id = id_of(&requests.next_line().await.unwrap().unwrap());
        assert_ne!(first_id, second_id);

        // Answer in reverse order.
        let reply = format!(
            "{}\n{}\n",
            json!({ "jsonrpc": "2.0", "id": second_id, "result": "two" }),
            json!({ "jsonrpc": "2.0", "id": first_id, "result": "one" }),
        );
        responses.write_all(reply.as_bytes()).await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Ok(json!("one")));
        assert_eq!(second.await.unwrap().unwrap(), Ok(json!("two")));
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn error_objects_are_returned_to_the_caller() {
        let (channel, mut requests, mut responses) = connected();
        let cancel = CancellationToken::new();

        let call = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request("tools/call", None, &cancel).await })
        };
        let id = id_of(&requests.next_line().await.unwrap().unwrap());
        let reply = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32602, "message": "unknown tool" },
        });
        responses
            .write_all(format!("{reply}\nnot json at all\n").as_bytes())
            .await
            .unwrap();

        let err = call.await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "unknown tool");
    }

    #[tokio::test]
    async fn cancellation_removes_the_pending_call() {
        let (channel, mut requests, _responses) = connected();
        let cancel = CancellationToken::new();

        let call = {
            let channel = Arc::clone(&channel);
            let cancel = cancel.clone();
            tokio::spawn(async move { channel.request("slow", None, &cancel).await })
        };
        requests.next_line().await.unwrap().unwrap();
        assert_eq!(channel.pending_len(), 1);

        cancel.cancel();
        assert!(matches!(call.await.unwrap(), Err(AgentError::Cancelled)));
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn outer_timeout_removes_the_pending_call() {
        let (channel, mut requests, _responses) = connected();
        let cancel = CancellationToken::new();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            channel.request("slow", None, &cancel),
        )
        .await;

        assert!(outcome.is_err());
        requests.next_line().await.unwrap().unwrap();
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn aborted_request_task_removes_the_pending_call() {
        let (channel, mut requests, _responses) = connected();

        let call = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request("slow", None, &CancellationToken::new()).await })
        };
        requests.next_line().await.unwrap().unwrap();
        assert_eq!(channel.pending_len(), 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn end_of_stream_fails_pending_and_future_calls() {
        let (channel, mut requests, responses) = connected();
        let cancel = CancellationToken::new();

        let call = {
            let channel = Arc::clone(&channel);
            let cancel = cancel.clone();
            tokio::spawn(async move { channel.request("never", None, &cancel).await })
        };
        requests.next_line().await.unwrap().unwrap();
        drop(responses);

        assert!(matches!(call.await.unwrap(), Err(AgentError::Transport(_))));
        let late = channel.request("late", None, &cancel).await;
        assert!(matches!(late, Err(AgentError::Transport(msg)) if msg.contains("closed")));
    }

    #[tokio::test]
    async fn notifications_carry_no_id() {
        let (channel, mut requests, _responses) = connected();
        channel
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        let line = requests.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }));
    }

    #[tokio::test]
    async fn writes_fail_after_writer_is_closed() {
        let (channel, _requests, _responses) = connected();
        channel.close_writer().await;
        let err = channel.notify("ping", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(msg) if msg.contains("input stream closed")));
    }
}
