use crate::error::{Result, WardenError};
use crate::ipc::{write_envelope, IpcEnvelope, IpcRequest, IpcResponse, RequestEnvelope};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

/// One request per connection, bounded by `timeout`, never retried.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf, timeout: Duration) -> Self {
        Self {
            socket_path,
            timeout,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            socket_path: self.socket_path.clone(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn send_request(&self, request: IpcRequest) -> Result<IpcResponse> {
        match tokio::time::timeout(self.timeout, exchange(&self.socket_path, request)).await {
            Ok(result) => result,
            Err(_) => Err(WardenError::Protocol(format!(
                "no reply from {} within {:?}",
                self.socket_path.display(),
                self.timeout
            ))),
        }
    }

    /// Returns the liveness token reported by the service.
    pub async fn ping(&self) -> Result<String> {
        match self.send_request(IpcRequest::Ping).await? {
            IpcResponse::Pong { token } => Ok(token),
            other => Err(WardenError::Protocol(format!("unexpected reply to ping: {other:?}"))),
        }
    }

    pub async fn execute(
        &self,
        commands: Vec<String>,
        password: Option<String>,
    ) -> Result<IpcResponse> {
        self.send_request(IpcRequest::Execute { commands, password })
            .await
    }
}

async fn exchange(socket_path: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let protocol = |e: anyhow::Error| WardenError::Protocol(format!("{}: {e}", socket_path.display()));

    #[cfg(unix)]
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| protocol(e.into()))?;

    #[cfg(windows)]
    let stream = ClientOptions::new()
        .open(socket_path)
        .map_err(|e| protocol(e.into()))?;

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let envelope = IpcEnvelope::Request(RequestEnvelope::new(request));
    write_envelope(&mut writer, &envelope).await.map_err(protocol)?;

    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| protocol(e.into()))?;
    if n == 0 {
        return Err(WardenError::Protocol(format!(
            "{}: connection closed before reply",
            socket_path.display()
        )));
    }
    match serde_json::from_str::<IpcEnvelope>(line.trim_end())? {
        IpcEnvelope::Response(response) => Ok(response),
        IpcEnvelope::Error { message } => Err(WardenError::Protocol(message)),
        IpcEnvelope::Request(_) => Err(WardenError::Protocol("unexpected request from service".into())),
    }
}
