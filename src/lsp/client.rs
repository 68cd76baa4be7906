//! Process handle for the language server
//!
//! Spawns the server, runs the stdio reader and writer tasks, performs the
//! initialize handshake in the background, and reports process exit back to
//! the lifecycle tagged with the handle's generation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

use super::protocol::{
    read_message, IdGenerator, IncomingNotification, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponseOut, ServerMessage, ServerRequest,
};

/// LSP client errors
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("LSP server not running")]
    NotRunning,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Rpc(#[from] JsonRpcError),

    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Events a server handle reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The post-start grace period for `generation` has elapsed
    Ready { generation: u64 },
    /// The process for `generation` went away without being asked to
    Exited { generation: u64, reason: String },
}

/// Everything needed to start one server process
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub generation: u64,
    pub binary: PathBuf,
    pub root: PathBuf,
    pub events: mpsc::UnboundedSender<ServerEvent>,
}

/// A started server process
#[async_trait]
pub trait ServerHandle: Send + Sync {
    fn generation(&self) -> u64;

    async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), LspError>;

    /// Stop the process. Stopping twice is a no-op.
    async fn stop(&mut self) -> Result<(), LspError>;
}

/// Creates and starts server processes
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn ServerHandle>, LspError>;
}

/// Launches real `pylsp` processes over stdio
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(request_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            request_timeout,
            shutdown_timeout,
        }
    }
}

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn ServerHandle>, LspError> {
        let client = LspClient::spawn(request, self.request_timeout, self.shutdown_timeout)?;
        Ok(Box::new(client))
    }
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<serde_json::Value, LspError>>>>>;

/// Cloneable sending half shared by the client and its handshake task
#[derive(Clone)]
struct RpcChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: PendingMap,
    id_gen: Arc<IdGenerator>,
    timeout: Duration,
}

impl RpcChannel {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, LspError> {
        let id = self.id_gen.next();
        let encoded = JsonRpcRequest::new(id, method, params)
            .encode()
            .map_err(|e| LspError::Parse(e.to_string()))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, response_tx);

        self.tx
            .send(encoded)
            .map_err(|e| LspError::Channel(e.to_string()))?;

        match timeout(self.timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LspError::Channel("Response channel closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(LspError::Timeout(self.timeout))
            }
        }
    }

    fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), LspError> {
        let encoded = JsonRpcNotification::new(method, params)
            .encode()
            .map_err(|e| LspError::Parse(e.to_string()))?;
        self.tx
            .send(encoded)
            .map_err(|e| LspError::Channel(e.to_string()))
    }
}

/// LSP client for one server process
pub struct LspClient {
    name: String,
    generation: u64,
    process: Mutex<Option<Child>>,
    rpc: Option<RpcChannel>,
    initialized: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl LspClient {
    /// Spawn the server and start the handshake. Returns without waiting for it.
    pub fn spawn(
        request: LaunchRequest,
        request_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self, LspError> {
        let name = request
            .binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "server".to_string());
        tracing::info!(
            generation = request.generation,
            "Spawning LSP server {}",
            request.binary.display()
        );

        let mut child = Command::new(&request.binary)
            .current_dir(&request.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LspError::Spawn {
                binary: request.binary.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Io("Failed to get stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Io("Failed to get stdout".into()))?;
        let stderr = child.stderr.take();

        let (request_tx, request_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let rpc = RpcChannel {
            tx: request_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            id_gen: Arc::new(IdGenerator::new()),
            timeout: request_timeout,
        };
        let initialized = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::reader_loop(
            stdout,
            rpc.clone(),
            request.events.clone(),
            request.generation,
            stopping.clone(),
            name.clone(),
        ));
        tokio::spawn(Self::writer_loop(stdin, request_rx, name.clone()));

        if let Some(stderr) = stderr {
            let name = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::debug!("LSP {} stderr: {}", name, line);
                    }
                }
            });
        }

        let root_uri = format!("file://{}", request.root.display());
        tokio::spawn(Self::handshake(
            rpc.clone(),
            root_uri,
            initialized.clone(),
            name.clone(),
        ));

        Ok(Self {
            name,
            generation: request.generation,
            process: Mutex::new(Some(child)),
            rpc: Some(rpc),
            initialized,
            stopping,
            shutdown_timeout,
        })
    }

    async fn handshake(
        rpc: RpcChannel,
        root_uri: String,
        initialized: Arc<AtomicBool>,
        name: String,
    ) {
        let params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": root_uri,
            "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
            "capabilities": {
                "workspace": {
                    "configuration": false,
                    "didChangeConfiguration": { "dynamicRegistration": false }
                }
            }
        });

        let result = match rpc.request("initialize", Some(params)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("LSP {} initialize failed: {}", name, e);
                return;
            }
        };

        if let Ok(init) = serde_json::from_value::<InitializeResult>(result) {
            if let Some(info) = init.server_info {
                tracing::info!(
                    "LSP {} initialized: {} {}",
                    name,
                    info.name,
                    info.version.unwrap_or_default()
                );
            }
        }

        match rpc.notify("initialized", Some(serde_json::json!({}))) {
            Ok(()) => initialized.store(true, Ordering::SeqCst),
            Err(e) => tracing::error!("LSP {} failed to send initialized: {}", name, e),
        }
    }

    /// Reader loop - routes responses, answers server requests, logs notifications
    async fn reader_loop(
        stdout: ChildStdout,
        rpc: RpcChannel,
        events: mpsc::UnboundedSender<ServerEvent>,
        generation: u64,
        stopping: Arc<AtomicBool>,
        name: String,
    ) {
        let mut reader = BufReader::new(stdout);

        let reason = loop {
            let body = match read_message(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => break "server closed its output".to_string(),
                Err(e) => break format!("read error: {}", e),
            };

            match ServerMessage::parse(&body) {
                Ok(ServerMessage::Response(response)) => {
                    let Some(id) = response.id else { continue };
                    if let Some(tx) = rpc.pending.lock().await.remove(&id) {
                        let _ = tx.send(response.into_result().map_err(LspError::from));
                    } else {
                        tracing::debug!("LSP {} response for unknown id {}", name, id);
                    }
                }
                Ok(ServerMessage::Request(request)) => Self::handle_server_request(&request, &rpc, &name),
                Ok(ServerMessage::Notification(notification)) => {
                    Self::handle_notification(&notification, &name)
                }
                Err(e) => tracing::warn!("LSP {} unparseable message: {}", name, e),
            }
        };

        // Fail anything still waiting
        for (_, tx) in rpc.pending.lock().await.drain() {
            let _ = tx.send(Err(LspError::NotRunning));
        }

        if stopping.load(Ordering::SeqCst) {
            tracing::debug!("LSP {} reader ended after stop", name);
        } else {
            let _ = events.send(ServerEvent::Exited { generation, reason });
        }
    }

    /// Server-to-client requests are answered with `null`
    fn handle_server_request(request: &ServerRequest, rpc: &RpcChannel, name: &str) {
        tracing::debug!("LSP {} server request: {} (id={})", name, request.method, request.id);
        match JsonRpcResponseOut::success_null(request.id.clone()).encode() {
            Ok(encoded) => {
                let _ = rpc.tx.send(encoded);
            }
            Err(e) => tracing::warn!("LSP {} failed to encode reply: {}", name, e),
        }
    }

    fn handle_notification(notification: &IncomingNotification, name: &str) {
        match notification.method.as_str() {
            "window/logMessage" | "window/showMessage" => {
                if let Some(msg) = notification
                    .params
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(|v| v.as_str())
                {
                    tracing::debug!("LSP {} message: {}", name, msg);
                }
            }
            _ => tracing::trace!("LSP {} notification: {}", name, notification.method),
        }
    }

    /// Writer loop - writes framed messages to stdin
    async fn writer_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>, name: String) {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                tracing::error!("LSP {} writer error: {}", name, e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                tracing::error!("LSP {} flush error: {}", name, e);
                break;
            }
        }
        tracing::debug!("LSP {} writer loop ended", name);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// SIGTERM, then SIGKILL if the process outlives the timeout
    async fn terminate(&self, mut child: Child) {
        send_sigterm(&child);

        match timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("LSP {} exited: {}", self.name, status),
            Ok(Err(e)) => tracing::warn!("LSP {} wait failed: {}", self.name, e),
            Err(_) => {
                tracing::warn!("LSP {} ignored SIGTERM, killing", self.name);
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned and have not yet reaped
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

#[async_trait]
impl ServerHandle for LspClient {
    fn generation(&self) -> u64 {
        self.generation
    }

    async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), LspError> {
        self.rpc
            .as_ref()
            .ok_or(LspError::NotRunning)?
            .notify(method, Some(params))
    }

    async fn stop(&mut self) -> Result<(), LspError> {
        let child = match self.process.lock().await.take() {
            Some(child) => child,
            None => return Ok(()),
        };
        self.stopping.store(true, Ordering::SeqCst);
        tracing::info!("Shutting down LSP server: {}", self.name);

        if let Some(rpc) = self.rpc.take() {
            if self.is_initialized() {
                if let Err(e) = rpc.request("shutdown", None).await {
                    tracing::debug!("LSP {} shutdown request failed: {}", self.name, e);
                }
                let _ = rpc.notify("exit", None);
            }
        }

        self.terminate(child).await;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}
