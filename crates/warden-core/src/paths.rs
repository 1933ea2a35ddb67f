use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "warden";
pub const APP_NAME: &str = "warden";

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SERVICE_BINARY_STEM: &str = "warden-service";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(SETTINGS_FILE_NAME))
}

pub fn ipc_socket_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("WARDEN_SOCKET") {
        if !override_path.trim().is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    #[cfg(unix)]
    {
        Ok(data_dir()?.join("warden.sock"))
    }
    #[cfg(windows)]
    {
        Ok(PathBuf::from(r"\\.\pipe\WardenService"))
    }
}

/// File name of the background executable for a given release, e.g.
/// `warden-service-0.1.0` (`.exe` on Windows).
pub fn service_binary_name(version: &str) -> String {
    format!(
        "{}-{}{}",
        SERVICE_BINARY_STEM,
        version,
        std::env::consts::EXE_SUFFIX
    )
}

/// Looks the background executable up in the current working directory.
pub fn service_binary_path(version: &str) -> anyhow::Result<PathBuf> {
    Ok(std::env::current_dir()?.join(service_binary_name(version)))
}
