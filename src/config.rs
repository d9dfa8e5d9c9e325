//! Server configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_UPLOADS_DIR: &str = "./uploads";
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 1024 * 1024;
pub const DEFAULT_HISTORY_LIMIT: usize = 500;
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_BOARD_IDLE_TTL_SECS: u64 = 600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. Boards are memory-only when absent.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub uploads_dir: PathBuf,
    pub upload_max_bytes: usize,
    /// Maximum undo entries kept per board.
    pub history_limit: usize,
    /// Outbound frames buffered per connection before frames are dropped.
    pub client_queue_capacity: usize,
    pub flush_interval: Duration,
    pub board_idle_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            uploads_dir: PathBuf::from(DEFAULT_UPLOADS_DIR),
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            board_idle_ttl: Duration::from_secs(DEFAULT_BOARD_IDLE_TTL_SECS),
        }
    }
}

impl Config {
    /// Build typed config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3001
    /// - `DATABASE_URL`: enables the Postgres store
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `UPLOADS_DIR`: default `./uploads`
    /// - `UPLOAD_MAX_BYTES`: default 1 MiB
    /// - `HISTORY_LIMIT`: default 500
    /// - `CLIENT_QUEUE_CAPACITY`: default 256
    /// - `FLUSH_INTERVAL_MS`: default 100
    /// - `BOARD_IDLE_TTL_SECS`: default 600
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let uploads_dir = lookup("UPLOADS_DIR").map_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR), PathBuf::from);

        Ok(Self {
            port: parse_var(&lookup, "PORT", DEFAULT_PORT)?,
            database_url,
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            uploads_dir,
            upload_max_bytes: parse_var(&lookup, "UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES)?,
            history_limit: parse_var(&lookup, "HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            client_queue_capacity: parse_var(&lookup, "CLIENT_QUEUE_CAPACITY", DEFAULT_CLIENT_QUEUE_CAPACITY)?.max(1),
            flush_interval: Duration::from_millis(
                parse_var(&lookup, "FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS)?.max(1),
            ),
            board_idle_ttl: Duration::from_secs(parse_var(&lookup, "BOARD_IDLE_TTL_SECS", DEFAULT_BOARD_IDLE_TTL_SECS)?),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value: raw })
}
