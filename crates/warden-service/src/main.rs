use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_core::paths::{ipc_socket_path, settings_path};
use warden_core::router::RouterMode;
use warden_core::settings::WardenSettings;
use warden_service::{ServiceContext, ServiceExit, ServiceOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Warden background service", long_about = None)]
struct Cli {
    /// Socket (named pipe on Windows) to listen on
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Protected paths file
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Keep running after the protected paths list has been encrypted
    #[arg(long)]
    no_shutdown: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let settings = WardenSettings::load(&settings_path()?)?;
    let socket_path = match cli.socket {
        Some(path) => path,
        None => ipc_socket_path()?,
    };
    let catalog_path = cli.catalog.unwrap_or_else(|| settings.catalog_file.clone());
    let mode = if cli.no_shutdown {
        RouterMode::NoShutdown
    } else {
        RouterMode::Normal
    };
    info!(version = env!("CARGO_PKG_VERSION"), ?mode, "starting warden service");

    let context = ServiceContext::build(ServiceOptions {
        settings,
        socket_path,
        catalog_path,
        mode,
    });
    let exit = context.run().await?;
    if exit != ServiceExit::Clean {
        std::process::exit(exit.code());
    }
    Ok(())
}
