use crate::command::CommandResult;
use crate::shutdown::{ShutdownKind, ShutdownSignal};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

pub const IPC_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcEnvelope {
    Request(RequestEnvelope),
    Response(IpcResponse),
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub version: u32,
    pub request: IpcRequest,
}

impl RequestEnvelope {
    pub fn new(request: IpcRequest) -> Self {
        Self {
            version: IPC_PROTOCOL_VERSION,
            request,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "request", content = "data")]
pub enum IpcRequest {
    Ping,
    Execute {
        commands: Vec<String>,
        password: Option<String>,
    },
}

impl fmt::Debug for IpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcRequest::Ping => f.write_str("Ping"),
            IpcRequest::Execute { commands, password } => f
                .debug_struct("Execute")
                .field("commands", commands)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", content = "data")]
pub enum IpcResponse {
    Pong { token: String },
    Results { results: Vec<CommandResult> },
    /// The request carried nothing to do.
    Ignored,
}

/// What the handler sends back, and whether the service should stop once the
/// reply has been written.
#[derive(Debug)]
pub struct Reply {
    pub response: IpcResponse,
    pub shutdown_after: Option<ShutdownKind>,
}

#[async_trait::async_trait]
pub trait IpcHandler {
    async fn execute(&self, commands: Vec<String>, password: Option<String>) -> Result<Reply>;
}

pub struct IpcServer {
    socket_path: PathBuf,
    ping_token: String,
    shutdown: ShutdownSignal,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, ping_token: String, shutdown: ShutdownSignal) -> Self {
        Self {
            socket_path,
            ping_token,
            shutdown,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    #[cfg(unix)]
    pub fn bind(&self) -> std::io::Result<tokio::net::UnixListener> {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tokio::net::UnixListener::bind(&self.socket_path)
    }

    #[cfg(unix)]
    pub async fn start(self: Arc<Self>, handler: Arc<dyn IpcHandler + Send + Sync>) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, handler).await
    }

    /// Accepts connections until shutdown is requested.
    #[cfg(unix)]
    pub async fn serve(
        self: Arc<Self>,
        listener: tokio::net::UnixListener,
        handler: Arc<dyn IpcHandler + Send + Sync>,
    ) -> Result<()> {
        info!(socket = %self.socket_path.display(), "ipc server listening");
        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => accepted?.0,
                _ = self.shutdown.wait() => break,
            };
            let server = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, server, handler).await {
                    warn!(error = %e, "ipc connection error");
                }
            });
        }
        info!("ipc server stopped accepting connections");
        Ok(())
    }

    #[cfg(windows)]
    pub async fn start(self: Arc<Self>, handler: Arc<dyn IpcHandler + Send + Sync>) -> Result<()> {
        use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
        let mut server: NamedPipeServer = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&self.socket_path)?;
        info!(pipe = %self.socket_path.display(), "ipc server listening");
        loop {
            tokio::select! {
                connected = server.connect() => connected?,
                _ = self.shutdown.wait() => break,
            }
            let connection = server;
            server = ServerOptions::new().create(&self.socket_path)?;
            let this = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(connection, this, handler).await {
                    warn!(error = %e, "ipc connection error");
                }
            });
        }
        info!("ipc server stopped accepting connections");
        Ok(())
    }

    async fn respond(
        &self,
        request: RequestEnvelope,
        handler: &Arc<dyn IpcHandler + Send + Sync>,
    ) -> (IpcEnvelope, Option<ShutdownKind>) {
        if request.version != IPC_PROTOCOL_VERSION {
            return (
                IpcEnvelope::Error {
                    message: "protocol version mismatch".to_string(),
                },
                None,
            );
        }
        match request.request {
            IpcRequest::Ping => (
                IpcEnvelope::Response(IpcResponse::Pong {
                    token: self.ping_token.clone(),
                }),
                None,
            ),
            IpcRequest::Execute { commands, .. } if commands.iter().all(|c| c.trim().is_empty()) => {
                (IpcEnvelope::Response(IpcResponse::Ignored), None)
            }
            IpcRequest::Execute { commands, password } => {
                match handler.execute(commands, password).await {
                    Ok(reply) => (IpcEnvelope::Response(reply.response), reply.shutdown_after),
                    Err(e) => (
                        IpcEnvelope::Error {
                            message: e.to_string(),
                        },
                        None,
                    ),
                }
            }
        }
    }
}

pub(crate) async fn write_envelope<W>(writer: &mut W, envelope: &IpcEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(serde_json::to_string(envelope)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_connection<S>(
    stream: S,
    server: Arc<IpcServer>,
    handler: Arc<dyn IpcHandler + Send + Sync>,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        let request = match serde_json::from_str::<IpcEnvelope>(raw) {
            Ok(IpcEnvelope::Request(request)) => request,
            Ok(other) => {
                debug!(envelope = ?other, "ignoring non-request envelope");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "ignoring unparsable line");
                continue;
            }
        };
        let (reply, shutdown_after) = server.respond(request, &handler).await;
        write_envelope(&mut writer, &reply).await?;
        // Only once the caller has its answer.
        if let Some(kind) = shutdown_after {
            server.shutdown.trigger(kind);
        }
    }
    Ok(())
}
