//! Process configuration read from the environment.

use crate::storage::GcsConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SOCKET_DIR: &str = "/cloudsql";
const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_COPY_FRAME_BYTES: usize = 1 << 20;

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

/// Database credentials and socket layout.
///
/// Credentials stay optional here; a request is rejected before connecting
/// when any of them is missing.
#[derive(Clone, Default)]
pub struct DatabaseSettings {
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Directory holding one Unix socket directory per Cloud SQL instance.
    pub socket_dir: PathBuf,
}

impl DatabaseSettings {
    pub fn from_env() -> Self {
        Self {
            user: env_opt("DB_USER"),
            password: env_opt("DB_PASS"),
            database: env_opt("DB_NAME"),
            socket_dir: PathBuf::from(env_string("DB_SOCKET_DIR", DEFAULT_SOCKET_DIR)),
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("socket_dir", &self.socket_dir)
            .finish()
    }
}

/// Pipeline tuning shared by every import.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub database: DatabaseSettings,
    /// Upper bound for one COPY data frame sent to the server.
    pub copy_frame_bytes: usize,
    /// Wall-clock limit for one import, enforced by the HTTP layer.
    pub timeout: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            copy_frame_bytes: DEFAULT_COPY_FRAME_BYTES,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Everything the service reads from its environment at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub import: ImportSettings,
    pub storage: GcsConfig,
    /// Listening port handed over by the hosting platform (`PORT`).
    pub port: Option<u16>,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let emulator = env_opt("STORAGE_EMULATOR_HOST");
        let endpoint = env_opt("STORAGE_ENDPOINT")
            .or_else(|| emulator.clone())
            .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string());

        Self {
            import: ImportSettings {
                database: DatabaseSettings::from_env(),
                copy_frame_bytes: env_usize("COPY_FRAME_BYTES", DEFAULT_COPY_FRAME_BYTES),
                timeout: env_duration_secs("IMPORT_TIMEOUT_SECS", 3600),
            },
            storage: GcsConfig {
                endpoint,
                access_token: env_opt("GCS_ACCESS_TOKEN"),
                anonymous: emulator.is_some(),
                connect_timeout: env_duration_secs("STORAGE_TIMEOUT_SECS", 30),
            },
            port: env_opt("PORT").and_then(|value| value.parse().ok()),
        }
    }
}
