//! Server configuration, parsed from the command line.

use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleCatalog {
    /// Godfather, Mafia, Doctor, Detective, Villager
    Classic,
    /// Classic plus Vigilante and Mayor
    Extended,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on (0 picks a free port)
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Maximum number of concurrent connections
    #[arg(long, default_value = "64")]
    pub max_connections: usize,

    /// Interval between liveness sweeps in milliseconds
    #[arg(long, default_value = "30000")]
    pub keepalive_interval_ms: u64,

    /// Force-resolve a game phase after this many seconds
    #[arg(long)]
    pub phase_duration_secs: Option<u64>,

    /// Role catalog used for new games
    #[arg(long, value_enum, default_value = "classic")]
    pub roles: RoleCatalog,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    pub fn phase_duration(&self) -> Option<Duration> {
        self.phase_duration_secs.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 64,
            keepalive_interval_ms: 30_000,
            phase_duration_secs: None,
            roles: RoleCatalog::Classic,
        }
    }
}
