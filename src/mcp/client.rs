//! Proxy-side tool server supervisor.
//!
//! Owns the child process, its stdin writer task, and the single stdout
//! reader. Requests carry monotonically increasing ids; a waiter map
//! correlates each response line back to its caller, so responses may
//! arrive in any order. Outgoing frames go through a channel to one writer
//! task: enqueueing is synchronous, so a caller cancelled mid-request (an
//! HTTP disconnect) can never leave a partial line on the child's stdin.
//! A crashed child fails every outstanding waiter and is respawned lazily
//! on the next call, within a bounded restart budget; once the budget is
//! exhausted the client enters a permanent-failure state and every call
//! reports `backend_unavailable`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};

use crate::core::config::Settings;
use crate::core::errors::{ErrorKind, ToolError};
use crate::mcp::protocol::{RpcRequest, RpcResponse};

const RESTART_WINDOW: Duration = Duration::from_secs(60);
const MAX_RESTARTS: u32 = 3;
const READINESS_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ToolError>>>>>;

struct ChildConn {
    child: Child,
    frames: mpsc::UnboundedSender<String>,
}

pub struct ToolServerClient {
    settings: Settings,
    conn: Mutex<Option<ChildConn>>,
    waiters: Waiters,
    next_id: AtomicU64,
    inflight: Arc<Semaphore>,
    spawn_count: AtomicU64,
    restarts: Mutex<Vec<Instant>>,
    failed_permanently: AtomicBool,
}

impl ToolServerClient {
    pub fn new(settings: Settings) -> Self {
        let inflight = Arc::new(Semaphore::new(settings.max_inflight_calls.max(1)));
        Self {
            settings,
            conn: Mutex::new(None),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            inflight,
            spawn_count: AtomicU64::new(0),
            restarts: Mutex::new(Vec::new()),
            failed_permanently: AtomicBool::new(false),
        }
    }

    /// Spawns the child and waits for the readiness handshake. Called once
    /// at boot; later respawns happen lazily inside `call`.
    pub async fn start(&self) -> Result<(), ToolError> {
        let mut conn = self.conn.lock().await;
        self.ensure_started(&mut conn).await
    }

    pub async fn list_tools(&self) -> Result<Value, ToolError> {
        self.call("tools/list", json!({})).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        self.call(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    pub fn is_failed_permanently(&self) -> bool {
        self.failed_permanently.load(Ordering::SeqCst)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        if self.is_failed_permanently() {
            return Err(backend_unavailable("tool server restart budget exhausted"));
        }

        let _permit = self.inflight.clone().try_acquire_owned().map_err(|_| {
            backend_unavailable("too many in-flight tool calls; retry shortly")
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);

        let enqueued = {
            let mut conn = self.conn.lock().await;
            match self.ensure_started(&mut conn).await {
                Ok(()) => {
                    let request = RpcRequest::new(id, method, params);
                    let sender = conn.as_ref().expect("started above").frames.clone();
                    drop(conn);
                    enqueue_frame(&sender, &request)
                }
                Err(err) => Err(err),
            }
        };
        if let Err(err) = enqueued {
            self.waiters.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.settings.tool_call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(backend_unavailable(
                "tool server connection lost while waiting for a response",
            )),
            Err(_) => {
                self.waiters.lock().await.remove(&id);
                Err(ToolError::new(
                    ErrorKind::Timeout,
                    format!(
                        "tool call did not complete within {}s",
                        self.settings.tool_call_timeout.as_secs()
                    ),
                ))
            }
        }
    }

    async fn ensure_started(&self, slot: &mut Option<ChildConn>) -> Result<(), ToolError> {
        if let Some(conn) = slot.as_mut() {
            match conn.child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    tracing::warn!(%status, "tool server exited; respawning");
                    *slot = None;
                }
                Err(err) => {
                    tracing::warn!("cannot poll tool server: {err}; respawning");
                    *slot = None;
                }
            }
        }

        if self.is_failed_permanently() {
            return Err(backend_unavailable("tool server restart budget exhausted"));
        }

        let previous_spawns = self.spawn_count.fetch_add(1, Ordering::SeqCst);
        if previous_spawns > 0 {
            let mut restarts = self.restarts.lock().await;
            let now = Instant::now();
            restarts.retain(|at| now.duration_since(*at) < RESTART_WINDOW);
            if restarts.len() as u32 >= MAX_RESTARTS {
                self.failed_permanently.store(true, Ordering::SeqCst);
                tracing::error!(
                    "tool server crashed more than {MAX_RESTARTS} times within {}s; giving up",
                    RESTART_WINDOW.as_secs()
                );
                return Err(backend_unavailable("tool server restart budget exhausted"));
            }
            restarts.push(now);
        }

        let bin = resolve_toolserver_bin();
        tracing::info!(bin = %bin.display(), "spawning tool server");

        let mut child = Command::new(&bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                backend_unavailable(format!("failed to spawn {}: {err}", bin.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| backend_unavailable("tool server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| backend_unavailable("tool server stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }
        tokio::spawn(read_responses(stdout, Arc::clone(&self.waiters)));

        let (frames, frame_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(write_frames(stdin, frame_rx));

        *slot = Some(ChildConn { child, frames });

        // Readiness: one tools/list round-trip through the normal
        // correlation path.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);
        let probe = RpcRequest::new(id, "tools/list", json!({}));
        let sender = slot.as_ref().expect("just set").frames.clone();
        if let Err(err) = enqueue_frame(&sender, &probe) {
            self.waiters.lock().await.remove(&id);
            *slot = None;
            return Err(err);
        }

        match tokio::time::timeout(READINESS_TIMEOUT, rx).await {
            Ok(Ok(Ok(_))) => {
                tracing::info!("tool server ready");
                Ok(())
            }
            Ok(Ok(Err(err))) => {
                *slot = None;
                Err(err)
            }
            Ok(Err(_)) | Err(_) => {
                self.waiters.lock().await.remove(&id);
                if let Some(mut conn) = slot.take() {
                    let _ = conn.child.kill().await;
                }
                Err(backend_unavailable("tool server failed its readiness check"))
            }
        }
    }

    /// Close the frame channel (which closes the child's stdin), give the
    /// child a bounded drain, then kill.
    pub async fn shutdown(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            let ChildConn { mut child, frames } = conn;
            drop(frames);
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::info!(%status, "tool server stopped"),
                Ok(Err(err)) => tracing::warn!("error waiting for tool server: {err}"),
                Err(_) => {
                    tracing::warn!("tool server did not stop within grace period; killing");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

fn backend_unavailable(detail: impl Into<String>) -> ToolError {
    ToolError::new(ErrorKind::BackendUnavailable, detail)
}

/// Serializes a request and hands it to the writer task. Enqueueing never
/// suspends, so a cancelled caller cannot tear a frame in half.
fn enqueue_frame(
    sender: &mpsc::UnboundedSender<String>,
    request: &RpcRequest,
) -> Result<(), ToolError> {
    let mut line = serde_json::to_string(request).map_err(ToolError::internal)?;
    line.push('\n');
    sender
        .send(line)
        .map_err(|_| backend_unavailable("tool server stdin writer is gone"))
}

/// The single stdin writer: owns the pipe and writes queued frames in
/// order. Exits when the channel closes (shutdown) or a write fails
/// (child died); dropping the pipe signals EOF to the child.
async fn write_frames(
    mut stdin: tokio::process::ChildStdin,
    mut frames: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = stdin.write_all(frame.as_bytes()).await {
            tracing::warn!("failed to write to tool server: {err}");
            return;
        }
        if let Err(err) = stdin.flush().await {
            tracing::warn!("failed to flush tool server stdin: {err}");
            return;
        }
    }
}

/// The single stdout reader: dispatches each response line to its waiter.
/// EOF means the child is gone; every outstanding waiter fails with
/// `backend_unavailable`.
async fn read_responses(stdout: tokio::process::ChildStdout, waiters: Waiters) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response: RpcResponse = match serde_json::from_str(&line) {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::warn!("unparseable line from tool server: {err}");
                        continue;
                    }
                };
                let Some(id) = response.id.as_u64() else {
                    tracing::warn!("response without numeric id from tool server");
                    continue;
                };
                let waiter = waiters.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let outcome = match response.error {
                            Some(rpc_err) => Err(rpc_err.to_tool_error()),
                            None => Ok(response.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::info!(id, "discarding late response");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("error reading tool server stdout: {err}");
                break;
            }
        }
    }

    let mut waiters = waiters.lock().await;
    if !waiters.is_empty() {
        tracing::error!(
            count = waiters.len(),
            "tool server stdout closed with outstanding requests"
        );
    }
    for (_, tx) in waiters.drain() {
        let _ = tx.send(Err(backend_unavailable(
            "tool server exited before responding",
        )));
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!("toolserver: {line}");
    }
}

/// Environment override first, then a sibling of the current executable,
/// then whatever PATH resolves.
fn resolve_toolserver_bin() -> PathBuf {
    if let Ok(path) = env::var("PDFQA_TOOLSERVER_BIN") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("pdfqa-toolserver");
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("pdfqa-toolserver")
}
