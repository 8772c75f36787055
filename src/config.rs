use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

pub const DEFAULT_DATABASE: &str = "sitedesk.sqlite3";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Store connection settings shared by every binary.
#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// SQLite database file, or a `sqlite:` URL.
    #[arg(long = "database", env = "SITEDESK_DATABASE", default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Upper bound on pooled connections.
    #[arg(
        long = "max-connections",
        env = "SITEDESK_MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS
    )]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Logging sink settings.
#[derive(Debug, Clone, Default, Args)]
pub struct LogConfig {
    /// Emit JSON lines instead of human readable output.
    #[arg(long = "log-json", env = "SITEDESK_LOG_JSON")]
    pub json: bool,

    /// Also write daily-rolling log files into this directory.
    #[arg(long = "log-dir", env = "SITEDESK_LOG_DIR", value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    /// Address the maintenance API listens on.
    #[arg(long = "bind", env = "SITEDESK_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,
}
