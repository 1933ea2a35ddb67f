use anyhow::Result;
use std::sync::Arc;
use tracing::debug;
use warden_core::ipc::{IpcHandler, IpcResponse, Reply};
use warden_core::router::Router;
use warden_core::shutdown::ShutdownKind;
use zeroize::Zeroizing;

/// Runs command batches on the blocking pool; engine and catalog work is
/// synchronous file I/O.
pub struct ServiceHandler {
    router: Arc<Router>,
}

impl ServiceHandler {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait::async_trait]
impl IpcHandler for ServiceHandler {
    async fn execute(&self, commands: Vec<String>, password: Option<String>) -> Result<Reply> {
        let router = self.router.clone();
        let password = password.map(Zeroizing::new);
        debug!(count = commands.len(), "executing batch");
        let outcome = tokio::task::spawn_blocking(move || {
            router.execute_batch(&commands, password.as_ref().map(|p| p.as_str()))
        })
        .await?;
        Ok(Reply {
            response: IpcResponse::Results {
                results: outcome.results,
            },
            shutdown_after: outcome
                .shutdown_after_reply
                .then_some(ShutdownKind::Graceful),
        })
    }
}
