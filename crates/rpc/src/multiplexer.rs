//! Bidirectional JSON-RPC over stdio for conversational agents (§4.C3).
//!
//! Owns the stdin writer and a background reader task. The reader classifies
//! every line and routes it: responses resolve a pending request, notifications
//! go out on a bounded channel, server-requests for the two known approval
//! methods are auto-accepted, anything else gets `-32601`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};

use ie_domain::{Error, Result};

use crate::protocol::{classify, ClientInfo, JsonRpcNotification, JsonRpcRequest, ParsedMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NOTIFICATION_BUFFER: usize = 256;

const APPROVAL_METHODS: &[&str] = &[
    "item/commandExecution/requestApproval",
    "item/fileChange/requestApproval",
];

pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// One multiplexed connection to a spawned agent subprocess.
pub struct Multiplexer {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: PendingTable,
    next_id: AtomicU64,
    closed: AtomicBool,
    turn_id: Mutex<Option<String>>,
    notifications: Mutex<Option<mpsc::Receiver<Notification>>>,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    child: tokio::sync::Mutex<Child>,
}

impl Multiplexer {
    /// Spawn `program` with `args`/`envs`/`cwd`, wire up stdio, and start the
    /// background reader. `envs` is assumed to already be filtered (the
    /// allowlist lives in `ie-executors`).
    pub fn spawn(
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        cwd: Option<&std::path::Path>,
    ) -> Result<Arc<Self>> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env_clear();
        for (k, v) in envs {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            engine: program.to_string(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::Spawn {
            engine: program.to_string(),
            message: "failed to capture child stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
            engine: program.to_string(),
            message: "failed to capture child stdout".into(),
        })?;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let turn_id: Mutex<Option<String>> = Mutex::new(None);

        let mux = Arc::new(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            turn_id,
            notifications: Mutex::new(Some(notif_rx)),
            reader_handle: Mutex::new(None),
            child: tokio::sync::Mutex::new(child),
        });

        let reader = spawn_reader(mux.clone(), stdout, notif_tx);
        *mux.reader_handle.lock() = Some(reader);

        Ok(mux)
    }

    /// Take ownership of the notification receiver. Callable once; later
    /// callers get `None`.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications.lock().take()
    }

    pub fn current_turn_id(&self) -> Option<String> {
        self.turn_id.lock().clone()
    }

    async fn write_line(&self, json: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        let mut stdin = self.stdin.lock().await;
        if let Err(e) = stdin.write_all(json.as_bytes()).await {
            tracing::warn!(error = %e, "write to agent stdin failed");
            return Ok(());
        }
        let _ = stdin.write_all(b"\n").await;
        let _ = stdin.flush().await;
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;
        self.write_line(&json).await?;

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::RpcTimeout(REQUEST_TIMEOUT))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notif)?;
        self.write_line(&json).await
    }

    /// `initialize()` followed by `initialized` notification (§4.C3).
    pub async fn initialize(&self) -> Result<ClientInfo> {
        let params = serde_json::json!({ "clientInfo": crate::protocol::client_info() });
        let result = self.request("initialize", Some(params)).await?;
        self.notify("initialized", None).await?;
        let user_agent = result
            .get("userAgent")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(ClientInfo {
            name: user_agent,
            version: String::new(),
        })
    }

    pub async fn start_thread(&self, opts: Value) -> Result<Value> {
        self.request("thread/start", Some(opts)).await
    }

    pub async fn resume_thread(&self, thread_id: &str) -> Result<Value> {
        self.request("thread/resume", Some(serde_json::json!({ "threadId": thread_id })))
            .await
    }

    pub async fn start_turn(&self, thread_id: &str, prompt: &str) -> Result<Value> {
        self.request(
            "turn/start",
            Some(serde_json::json!({ "threadId": thread_id, "prompt": prompt })),
        )
        .await
    }

    pub async fn interrupt(&self, thread_id: &str, turn_id: &str) -> Result<Value> {
        self.request(
            "turn/interrupt",
            Some(serde_json::json!({ "threadId": thread_id, "turnId": turn_id })),
        )
        .await
    }

    /// Fire-and-forget: start a new turn on the stored thread without
    /// waiting for the response (§4.C3).
    pub async fn send_user_message(&self, thread_id: &str, prompt: &str) -> Result<()> {
        self.notify(
            "turn/start",
            Some(serde_json::json!({ "threadId": thread_id, "prompt": prompt })),
        )
        .await
    }

    /// Idempotent. Rejects all pending waiters, closes the notification
    /// stream, and drops stdin so the child observes EOF.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pending = self.pending.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
        drop(pending);
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
        let mut stdin = self.stdin.lock().await;
        let _ = stdin.shutdown().await;
    }

    pub async fn kill(&self) -> Result<()> {
        self.close().await;
        let mut child = self.child.lock().await;
        child.kill().await.map_err(Error::from)
    }

    pub async fn wait(&self) -> Result<std::process::ExitStatus> {
        let mut child = self.child.lock().await;
        child.wait().await.map_err(Error::from)
    }
}

fn spawn_reader(
    mux: Arc<Multiplexer>,
    stdout: tokio::process::ChildStdout,
    notif_tx: mpsc::Sender<Notification>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        loop {
            let line = match reader.next_line().await {
                Ok(Some(l)) => l,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "error reading agent stdout");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            handle_line(&mux, &line, &notif_tx).await;
        }
    })
}

async fn handle_line(mux: &Arc<Multiplexer>, line: &str, notif_tx: &mpsc::Sender<Notification>) {
    match classify(line) {
        ParsedMessage::Response(resp) => {
            let waiter = mux.pending.lock().remove(&resp.id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(resp.into_result().map_err(|e| Error::Rpc {
                        code: e.code,
                        message: e.message,
                    }));
                }
                None => {
                    tracing::debug!(id = resp.id, "dropping orphan RPC response");
                }
            }
        }
        ParsedMessage::ServerRequest { id, method, params } => {
            let reply = if APPROVAL_METHODS.contains(&method.as_str()) {
                crate::protocol::JsonRpcResponse::ok(id, serde_json::json!({ "decision": "accept" }))
            } else {
                crate::protocol::JsonRpcResponse::err(
                    id,
                    crate::protocol::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                )
            };
            let _ = params;
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = mux.write_line(&json).await;
            }
        }
        ParsedMessage::Notification { method, params } => {
            if method == "turn/completed" {
                *mux.turn_id.lock() = None;
            } else if method == "turn/started" {
                if let Some(id) = params.as_ref().and_then(|p| p.get("turnId")).and_then(|v| v.as_str()) {
                    *mux.turn_id.lock() = Some(id.to_string());
                }
            }
            let _ = notif_tx
                .send(Notification {
                    method,
                    params,
                })
                .await;
        }
        ParsedMessage::Unknown(raw) => {
            let _ = notif_tx
                .send(Notification {
                    method: "raw".into(),
                    params: Some(Value::String(raw)),
                })
                .await;
        }
    }
}
