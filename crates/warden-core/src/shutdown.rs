use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Grace delay, final save, exit 0.
    Graceful,
    /// Final save right away, exit 1.
    Fatal,
}

/// Process-wide stop request shared by the router, the IPC server and the runtime.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<ShutdownKind>>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Requests shutdown. A fatal request is never downgraded to graceful.
    pub fn trigger(&self, kind: ShutdownKind) {
        let changed = self.tx.send_if_modified(|current| match current {
            Some(ShutdownKind::Fatal) => false,
            Some(ShutdownKind::Graceful) if kind == ShutdownKind::Graceful => false,
            _ => {
                *current = Some(kind);
                true
            }
        });
        if changed {
            info!(?kind, "shutdown requested");
        }
    }

    pub fn requested(&self) -> Option<ShutdownKind> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownKind>> {
        self.tx.subscribe()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) -> ShutdownKind {
        let mut rx = self.subscribe();
        loop {
            if let Some(kind) = *rx.borrow_and_update() {
                return kind;
            }
            if rx.changed().await.is_err() {
                return ShutdownKind::Graceful;
            }
        }
    }
}
