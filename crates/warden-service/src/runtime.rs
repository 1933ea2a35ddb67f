use crate::handler::ServiceHandler;
use anyhow::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use warden_core::catalog::Catalog;
use warden_core::engine::Engine;
use warden_core::ipc::{IpcHandler, IpcServer};
use warden_core::router::{Router, RouterMode};
use warden_core::settings::WardenSettings;
use warden_core::shutdown::{ShutdownKind, ShutdownSignal};

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub settings: WardenSettings,
    pub socket_path: PathBuf,
    pub catalog_path: PathBuf,
    pub mode: RouterMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    Clean,
    Fatal,
}

impl ServiceExit {
    pub fn code(self) -> i32 {
        match self {
            ServiceExit::Clean => 0,
            ServiceExit::Fatal => 1,
        }
    }
}

/// Everything the running service owns, wired once at startup.
pub struct ServiceContext {
    settings: WardenSettings,
    catalog: Arc<Mutex<Catalog>>,
    router: Arc<Router>,
    shutdown: ShutdownSignal,
    server: Arc<IpcServer>,
}

impl ServiceContext {
    pub fn build(options: ServiceOptions) -> Self {
        let ServiceOptions {
            settings,
            socket_path,
            catalog_path,
            mode,
        } = options;

        let engine = Engine::new();
        let catalog = Arc::new(Mutex::new(Catalog::load(
            catalog_path,
            settings.save_queue_depth,
        )));
        let shutdown = ShutdownSignal::new();
        let router = Arc::new(Router::new(engine, catalog.clone(), shutdown.clone(), mode));
        let server = Arc::new(IpcServer::new(
            socket_path,
            settings.ping_response.clone(),
            shutdown.clone(),
        ));

        Self {
            settings,
            catalog,
            router,
            shutdown,
            server,
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Serves until shutdown is requested, then saves the catalog and cleans up.
    pub async fn run(self) -> Result<ServiceExit> {
        let handler: Arc<dyn IpcHandler + Send + Sync> =
            Arc::new(ServiceHandler::new(self.router.clone()));

        #[cfg(unix)]
        let mut server_task = {
            let listener = self.server.bind()?;
            tokio::spawn(self.server.clone().serve(listener, handler))
        };
        #[cfg(windows)]
        let mut server_task = tokio::spawn(self.server.clone().start(handler));

        info!(
            socket = %self.server.socket_path().display(),
            catalog = %self.catalog.lock().location().display(),
            "service started"
        );

        let kind = tokio::select! {
            kind = self.shutdown.wait() => kind,
            interrupted = signal::ctrl_c() => {
                if let Err(e) = interrupted {
                    warn!(error = %e, "cannot listen for interrupt; stopping");
                }
                info!("interrupt received");
                self.shutdown.trigger(ShutdownKind::Graceful);
                self.shutdown.requested().unwrap_or(ShutdownKind::Graceful)
            }
        };

        if kind == ShutdownKind::Graceful {
            tokio::time::sleep(self.settings.shutdown_grace()).await;
        }
        info!(?kind, "service stopping");

        match tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut server_task).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "ipc server ended with an error"),
            Ok(_) => {}
            Err(_) => server_task.abort(),
        }

        let catalog = self.catalog.clone();
        match tokio::task::spawn_blocking(move || catalog.lock().flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "final catalog save failed"),
            Err(e) => error!(error = %e, "final catalog save did not complete"),
        }

        #[cfg(unix)]
        {
            let socket = self.server.socket_path();
            if socket.exists() {
                if let Err(e) = std::fs::remove_file(socket) {
                    warn!(socket = %socket.display(), error = %e, "cannot remove socket");
                }
            }
        }

        info!("service stopped");
        Ok(match kind {
            ShutdownKind::Graceful => ServiceExit::Clean,
            ShutdownKind::Fatal => ServiceExit::Fatal,
        })
    }
}
