//! Session layer: request correlation over one channel.
//!
//! A [`Session`] owns the channel exclusively. A single reader task drains
//! inbound frames and resolves each one against a pending-call map, so any
//! number of calls can be in flight concurrently and responses may arrive
//! in any order. Writes are serialized through one writer guard so frames
//! never interleave.
//!
//! Per-call lifecycle: Pending → Resolved / TimedOut / Errored. A timed-out
//! or cancelled id moves into a short-lived discard set so a late response
//! is dropped silently instead of being mistaken for an unknown sender.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{
    self, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ReadResourceResult,
    ResourceDef, ResourcesListResult, ToolDef, ToolsListResult,
};
use crate::transport::{self, Channel};

/// Maximum number of non-JSON lines to skip before declaring the channel
/// broken (a misconfigured server logging to stdout).
const MAX_SKIP_LINES: usize = 1000;

/// How many timed-out or cancelled request ids to remember.
const DISCARD_CAPACITY: usize = 64;

type CallOutcome = std::result::Result<Value, ClientError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared state between the session and its reader task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Shared {
    /// Map of request id → pending oneshot sender.
    pending: Mutex<HashMap<u64, oneshot::Sender<CallOutcome>>>,
    /// Recently timed-out or cancelled ids, FIFO-pruned.
    discarded: Mutex<VecDeque<u64>>,
    alive: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            discarded: Mutex::new(VecDeque::new()),
            alive: AtomicBool::new(true),
        }
    }

    fn discard_id(&self, id: u64) {
        let mut discarded = self.discarded.lock();
        discarded.push_back(id);
        if discarded.len() > DISCARD_CAPACITY {
            discarded.pop_front();
        }
    }

    fn was_discarded(&self, id: u64) -> bool {
        self.discarded.lock().contains(&id)
    }

    /// Resolve every pending call with a connection error.
    fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), reason, "failing in-flight calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(ClientError::Connection(reason.to_string())));
        }
    }
}

/// Removes the pending entry and marks the id discarded unless disarmed.
///
/// Covers both deadline expiry and the caller dropping a call future
/// mid-flight (cancellation).
struct PendingGuard {
    shared: Arc<Shared>,
    id: u64,
    armed: bool,
}

impl PendingGuard {
    fn new(shared: Arc<Shared>, id: u64) -> Self {
        Self { shared, id, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed && self.shared.pending.lock().remove(&self.id).is_some() {
            self.shared.discard_id(self.id);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One established connection to one remote tool host.
pub struct Session {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
    child: Mutex<Option<tokio::process::Child>>,
    /// Tool catalog discovered at connect, refreshed by [`list_tools`](Self::list_tools).
    tools: RwLock<Vec<ToolDef>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the configured server and perform the MCP handshake.
    ///
    /// Transport-level failures (spawn, handshake) are retried immediately
    /// up to the configured retry budget; any other error aborts at once.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let mut last_err = None;
        for attempt in 0..=config.retries {
            if attempt > 0 {
                tracing::warn!(attempt, "retrying connection");
            }
            let outcome = match Channel::spawn(&config.server) {
                Ok(channel) => Self::establish(channel, config).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(session) => return Ok(session),
                Err(e @ ClientError::Connection(_)) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::Connection("connect failed".into())))
    }

    /// Establish a session over an already-built channel.
    ///
    /// Used by [`connect`](Self::connect) and directly when the channel
    /// comes from somewhere other than a spawned process.
    pub async fn establish(channel: Channel, config: &ClientConfig) -> Result<Self> {
        let Channel { reader, writer, child } = channel;

        let shared = Arc::new(Shared::new());
        let reader_task = tokio::spawn(reader_loop(reader, shared.clone()));

        let session = Self {
            shared,
            writer: tokio::sync::Mutex::new(writer),
            next_id: AtomicU64::new(1),
            timeout: Duration::from_millis(config.timeout_ms),
            reader: reader_task,
            child: Mutex::new(child),
            tools: RwLock::new(Vec::new()),
        };

        let startup = Duration::from_millis(config.startup_timeout_ms);
        match tokio::time::timeout(startup, session.handshake()).await {
            Ok(Ok(())) => {
                tracing::info!(tool_count = session.tools.read().len(), "session established");
                Ok(session)
            }
            Ok(Err(e)) => {
                session.close().await;
                Err(ClientError::Connection(format!("handshake failed: {e}")))
            }
            Err(_) => {
                session.close().await;
                Err(ClientError::Connection(format!(
                    "handshake did not complete within {}ms",
                    config.startup_timeout_ms
                )))
            }
        }
    }

    /// `initialize` → `notifications/initialized` → `tools/list`.
    async fn handshake(&self) -> Result<()> {
        let params = serde_json::to_value(protocol::initialize_params())?;
        self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized").await?;
        self.list_tools().await?;
        Ok(())
    }

    /// Whether the channel is still usable.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Number of in-flight calls.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Fetch the tool catalog via `tools/list` and refresh the cache.
    pub async fn list_tools(&self) -> Result<Vec<ToolDef>> {
        let result = self.request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed tools/list result: {e}")))?;
        *self.tools.write() = parsed.tools.clone();
        Ok(parsed.tools)
    }

    /// The cached catalog from the last successful `tools/list`.
    ///
    /// May be stale if the remote catalog changed; call
    /// [`list_tools`](Self::list_tools) to refresh.
    pub fn tools(&self) -> Vec<ToolDef> {
        self.tools.read().clone()
    }

    /// Invoke a named tool. The result payload is returned verbatim; this
    /// client never interprets tool-specific semantics.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if name.trim().is_empty() {
            return Err(ClientError::Validation("tool name must not be empty".into()));
        }
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.request("tools/call", Some(params)).await
    }

    /// Fetch the resource catalog via `resources/list`.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDef>> {
        let result = self.request("resources/list", None).await?;
        let parsed: ResourcesListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed resources/list result: {e}")))?;
        Ok(parsed.resources)
    }

    /// Read a URI-addressed resource (e.g. `semem://status`).
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        if uri.trim().is_empty() {
            return Err(ClientError::Validation("resource uri must not be empty".into()));
        }
        let params = serde_json::json!({ "uri": uri });
        match self.request("resources/read", Some(params)).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| ClientError::Protocol(format!("malformed resources/read result: {e}"))),
            Err(ClientError::Remote { code, message, data }) => {
                let rpc = JsonRpcError { code, message, data };
                if ClientError::is_resource_not_found(&rpc) {
                    Err(ClientError::NotFound(uri.to_string()))
                } else {
                    Err(rpc.into())
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Close the session: resolve every pending call, shut the channel
    /// down, and reap the server process. Idempotent; dropping a `Session`
    /// performs the same cleanup without waiting for the process.
    pub async fn close(&self) {
        if self.shared.alive.swap(false, Ordering::SeqCst) {
            tracing::info!("closing session");
        }
        {
            let mut writer = self.writer.lock().await;
            // Stdin EOF is the shutdown signal MCP servers respond to.
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "error closing channel writer");
            }
        }
        self.shared.fail_all("session closed");
        self.reader.abort();
        let child = self.child.lock().take();
        if let Some(child) = child {
            transport::reap_child(child).await;
        }
    }

    // ── Correlation core ───────────────────────────────────────────

    /// Send one request frame and await its correlated response.
    ///
    /// Exactly one outbound message per call; no automatic retry at this
    /// layer.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_alive() {
            return Err(ClientError::Connection("session is not connected".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            // Monotonic ids make a collision impossible within a session;
            // refuse to overwrite an in-flight call if it ever happens.
            if pending.contains_key(&id) {
                return Err(ClientError::Protocol(format!("request id {id} already in flight")));
            }
            pending.insert(id, tx);
        }
        let mut guard = PendingGuard::new(self.shared.clone(), id);

        tracing::debug!(id, method, "sending request");
        if let Err(e) = self.write_line(&frame).await {
            guard.disarm();
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => {
                guard.disarm();
                outcome
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(ClientError::Connection("session closed while awaiting response".into()))
            }
            // The guard removes the pending entry and discards the id, so
            // a late response cannot leak into a future call.
            Err(_) => Err(ClientError::Timeout {
                method: method.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a notification frame (no response expected).
    async fn notify(&self, method: &str) -> Result<()> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method))?;
        tracing::debug!(method, "sending notification");
        self.write_line(&frame).await
    }

    /// Write one full frame. The writer lock serializes concurrent callers
    /// so frames never interleave on the wire.
    async fn write_line(&self, json: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        write
            .await
            .map_err(|e| ClientError::Connection(format!("write failed: {e}")))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.shared.fail_all("session dropped");
        if let Some(mut child) = self.child.lock().take() {
            // kill_on_drop is set on the Command as well; this just makes
            // the reap explicit when the session is dropped without close().
            child.start_kill().ok();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain inbound frames and route each to its waiting caller.
async fn reader_loop(reader: Box<dyn AsyncRead + Send + Unpin>, shared: Arc<Shared>) {
    let mut lines = BufReader::new(reader).lines();
    let mut skipped = 0usize;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !trimmed.starts_with('{') {
                    // Server logging leaked onto stdout.
                    skipped += 1;
                    if skipped >= MAX_SKIP_LINES {
                        shared.alive.store(false, Ordering::SeqCst);
                        shared.fail_all("server produced too many non-JSON lines on stdout");
                        break;
                    }
                    tracing::debug!(line = %trimmed, "skipping non-JSON line from server");
                    continue;
                }
                dispatch(&shared, trimmed);
            }
            Ok(None) => {
                shared.alive.store(false, Ordering::SeqCst);
                shared.fail_all("server closed the channel");
                break;
            }
            Err(e) => {
                shared.alive.store(false, Ordering::SeqCst);
                shared.fail_all(&format!("read failed: {e}"));
                break;
            }
        }
    }
}

/// Route one inbound frame. A bad frame is logged and dropped; the session
/// and all other pending calls continue unaffected.
fn dispatch(shared: &Shared, raw: &str) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "malformed message from server, discarding");
            return;
        }
    };

    // Frames with a `method` are server-initiated notifications or
    // requests; this client consumes neither.
    if value.get("method").is_some() {
        tracing::debug!(
            method = %value["method"],
            "ignoring server-initiated message"
        );
        return;
    }

    let resp: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "message is not a valid response, discarding");
            return;
        }
    };

    let sender = shared.pending.lock().remove(&resp.id);
    match sender {
        Some(tx) => {
            let _ = tx.send(resp.into_result().map_err(ClientError::from));
        }
        None if shared.was_discarded(resp.id) => {
            tracing::debug!(id = resp.id, "late response for a timed-out or cancelled call, discarding");
        }
        None => {
            tracing::warn!(id = resp.id, "response for unknown request id, discarding");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
