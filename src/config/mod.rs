//! Configuration management for the fleet sync daemon

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use file::FleetSyncConfigFile;

use crate::sync::{EngineConfig, ScheduleRequester, SchedulerConfig};

/// Fleet sync configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database, default exports)
    pub data_dir: PathBuf,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Execution engine configuration
    pub sync: SyncSettings,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Bearer key for guarded endpoints (from `FLEETSYNC_ADMIN_KEY` env)
    pub admin_key: Option<String>,
}

/// Engine storage and retention settings
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Where exports land when a request names no destination
    pub export_dir: PathBuf,

    /// Allow-listed directory for downloads; `None` serves any path
    pub download_dir: Option<PathBuf>,

    /// Maximum cached results per direction
    pub result_cache_capacity: u64,

    /// How long results stay retrievable by id
    pub result_ttl: Duration,
}

impl SyncSettings {
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            export_dir: self.export_dir.clone(),
            result_capacity: self.result_cache_capacity,
            result_ttl: self.result_ttl,
        }
    }
}

const DEFAULT_PORT: u16 = 8420;
const DEFAULT_RESULT_CACHE_CAPACITY: u64 = 1000;
const DEFAULT_RESULT_TTL_SECS: u64 = 86_400;
const DEFAULT_TICK_SECS: u64 = 1;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 600;

/// Default data directory: `~/.local/share/fleetsync` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/fleetsync"),
        |d| d.data_dir().join("fleetsync"),
    )
}

impl Config {
    /// Load configuration (env > toml > default)
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        let config = Self::from_sources(|key| std::env::var(key).ok(), fc);

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        config
    }

    /// Layer an environment lookup over a parsed config file
    pub fn from_sources(env: impl Fn(&str) -> Option<String>, fc: FleetSyncConfigFile) -> Self {
        let parsed = |key: &str| env(key).and_then(|s| s.trim().parse::<u64>().ok());

        let data_dir = env("FLEETSYNC_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let api_server = ApiServerConfig {
            port: env("FLEETSYNC_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            admin_key: env("FLEETSYNC_ADMIN_KEY")
                .or(fc.server.admin_key)
                .filter(|k| !k.is_empty()),
        };

        let sync = SyncSettings {
            export_dir: env("FLEETSYNC_EXPORT_DIR")
                .or(fc.sync.export_dir)
                .map_or_else(|| data_dir.join("exports"), PathBuf::from),
            download_dir: env("FLEETSYNC_DOWNLOAD_DIR")
                .or(fc.sync.download_dir)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
            result_cache_capacity: parsed("FLEETSYNC_RESULT_CACHE_CAPACITY")
                .or(fc.sync.result_cache_capacity)
                .unwrap_or(DEFAULT_RESULT_CACHE_CAPACITY),
            result_ttl: Duration::from_secs(
                parsed("FLEETSYNC_RESULT_TTL_SECS")
                    .or(fc.sync.result_ttl_secs)
                    .unwrap_or(DEFAULT_RESULT_TTL_SECS),
            ),
        };

        let scheduler = SchedulerConfig {
            tick: Duration::from_secs(
                parsed("FLEETSYNC_SCHEDULER_TICK_SECS")
                    .or(fc.scheduler.tick_secs)
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_TICK_SECS),
            ),
            run_timeout: Duration::from_secs(
                parsed("FLEETSYNC_SCHEDULER_RUN_TIMEOUT_SECS")
                    .or(fc.scheduler.run_timeout_secs)
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_RUN_TIMEOUT_SECS),
            ),
            requester: env("FLEETSYNC_SCHEDULER_REQUESTER")
                .or(fc.scheduler.requester)
                .map(|r| ScheduleRequester::parse(&r))
                .unwrap_or_default(),
        };

        Self {
            data_dir,
            api_server,
            sync,
            scheduler,
        }
    }

    /// Path of the `SQLite` database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("fleetsync.db")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(env_of(&[]), FleetSyncConfigFile::default());
        assert_eq!(config.api_server.port, 8420);
        assert!(config.api_server.admin_key.is_none());
        assert!(config.sync.download_dir.is_none());
        assert_eq!(config.sync.export_dir, config.data_dir.join("exports"));
        assert_eq!(config.sync.result_cache_capacity, 1000);
        assert_eq!(config.sync.result_ttl, Duration::from_secs(86_400));
        assert_eq!(config.scheduler.tick, Duration::from_secs(1));
        assert_eq!(config.scheduler.run_timeout, Duration::from_secs(600));
        assert_eq!(
            config.scheduler.requester,
            ScheduleRequester::Fixed("scheduler".to_string())
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse(
            r#"
            [server]
            port = 9000
            admin_key = "from-file"

            [sync]
            download_dir = "/srv/exports"
            "#,
        )
        .unwrap();
        let env = env_of(&[
            ("FLEETSYNC_PORT", "9100"),
            ("FLEETSYNC_SCHEDULER_REQUESTER", "creator"),
            ("FLEETSYNC_RESULT_TTL_SECS", "not-a-number"),
        ]);

        let config = Config::from_sources(env, fc);
        assert_eq!(config.api_server.port, 9100);
        assert_eq!(config.api_server.admin_key.as_deref(), Some("from-file"));
        assert_eq!(config.sync.download_dir, Some(PathBuf::from("/srv/exports")));
        assert_eq!(config.scheduler.requester, ScheduleRequester::Creator);
        assert_eq!(config.sync.result_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_empty_admin_key_disables_guard() {
        let config = Config::from_sources(
            env_of(&[("FLEETSYNC_ADMIN_KEY", "")]),
            FleetSyncConfigFile::default(),
        );
        assert!(config.api_server.admin_key.is_none());
    }
}
