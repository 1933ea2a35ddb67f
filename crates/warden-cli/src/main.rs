use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use warden_core::command::{clean_path_argument, CommandResult, Verb};
use warden_core::ipc::IpcResponse;
use warden_core::ipc_client::IpcClient;
use warden_core::paths::{ipc_socket_path, service_binary_path, settings_path};
use warden_core::settings::WardenSettings;
use warden_core::supervisor::{ProcessLauncher, Supervisor, SupervisorTiming, TokenProbe};
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "WARDEN_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Encrypt files and directories with a password", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Service socket (named pipe on Windows)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Service executable to start when none is running
    #[arg(long)]
    service_bin: Option<PathBuf>,

    /// Commands such as -e=PATH, -a=PATH, -vp; -h lists them all
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let settings = WardenSettings::load(&settings_path()?)?;
    let socket_path = match cli.socket {
        Some(path) => path,
        None => ipc_socket_path()?,
    };
    let executable = match cli.service_bin {
        Some(path) => path,
        None => service_binary_path(env!("CARGO_PKG_VERSION"))?,
    };
    debug!(socket = %socket_path.display(), exe = %executable.display(), "locating service");

    let client = IpcClient::new(socket_path.clone(), settings.request_timeout());
    let launcher = ProcessLauncher::new(executable)
        .arg("--socket")
        .arg(socket_path.as_os_str());
    let probe = TokenProbe::new(client.clone(), settings.ping_response.clone());
    let mut supervisor = Supervisor::new(
        Box::new(probe),
        Box::new(launcher),
        SupervisorTiming::from(&settings),
    );
    if let Err(e) = supervisor.ensure_ready().await {
        eprintln!("[Error]: {e}");
        std::process::exit(1);
    }

    let commands = prepare_commands(cli.commands);
    let password = if commands.iter().any(|c| needs_password(c)) {
        Some(read_password()?)
    } else {
        None
    };
    let response = client
        .execute(commands.clone(), password.as_ref().map(|p| p.to_string()))
        .await;
    match response {
        Ok(IpcResponse::Results { results }) => {
            for result in &results {
                println!("{result}");
            }
            if shutdown_confirmed(&commands, &results) {
                println!("Service is shutting down");
            }
        }
        Ok(IpcResponse::Ignored) => {}
        Ok(other) => {
            eprintln!("[Error]: unexpected reply from service: {other:?}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("[Error]: {e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Defaults to help and makes path arguments absolute, since the service has
/// its own working directory.
fn prepare_commands(raw: Vec<String>) -> Vec<String> {
    if raw.iter().all(|c| c.trim().is_empty()) {
        return vec![Verb::Help.token().to_string()];
    }
    raw.into_iter().map(|c| absolutize(&c)).collect()
}

fn absolutize(raw: &str) -> String {
    let verb = match Verb::of(raw) {
        Some(verb) if verb.takes_path() => verb,
        _ => return raw.to_string(),
    };
    let trimmed = raw.trim();
    let argument = clean_path_argument(&trimmed[verb.token().len()..]);
    if argument.is_empty() {
        return raw.to_string();
    }
    match std::path::absolute(&argument) {
        Ok(path) => format!("{}{}", verb.token(), path.display()),
        Err(_) => raw.to_string(),
    }
}

/// Results come back one per non-blank command, in order. Only a `-c` that did
/// not error stops the service.
fn shutdown_confirmed(commands: &[String], results: &[CommandResult]) -> bool {
    commands
        .iter()
        .filter(|c| !c.trim().is_empty())
        .zip(results)
        .any(|(c, r)| Verb::of(c) == Some(Verb::EncryptCatalog) && !r.is_error())
}

fn needs_password(raw: &str) -> bool {
    Verb::of(raw).is_some_and(Verb::requires_password)
}

fn read_password() -> Result<Zeroizing<String>> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(Zeroizing::new(password));
        }
    }
    Ok(Zeroizing::new(rpassword::prompt_password("Password: ")?))
}
