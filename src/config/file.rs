//! TOML configuration file loading
//!
//! Supports `~/.config/fleetsync/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FleetSyncConfigFile {
    /// HTTP server and storage locations
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Engine settings
    #[serde(default)]
    pub sync: SyncFileConfig,

    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Bearer key required on guarded endpoints
    pub admin_key: Option<String>,

    /// Directory holding the database
    pub data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncFileConfig {
    /// Default location for export output
    pub export_dir: Option<String>,

    /// Only files under this directory may be downloaded
    pub download_dir: Option<String>,

    pub result_cache_capacity: Option<u64>,

    pub result_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SchedulerFileConfig {
    pub tick_secs: Option<u64>,

    pub run_timeout_secs: Option<u64>,

    /// `scheduler`, `creator`, or any fixed identity
    pub requester: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FleetSyncConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> FleetSyncConfigFile {
    let Some(path) = config_file_path() else {
        return FleetSyncConfigFile::default();
    };

    if !path.exists() {
        return FleetSyncConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FleetSyncConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FleetSyncConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has mistyped fields
pub fn parse(content: &str) -> crate::Result<FleetSyncConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/fleetsync/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fleetsync").join("config.toml"))
}
