//! Session and console configuration
//!
//! [`SessionConfig`] is read from `SEPFINDER_*` environment variables;
//! [`ConsoleArgs`] are the console binary's flags, each with an environment
//! fallback.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default idle time before a session is evicted
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions unused for longer than this are evicted
    pub session_ttl: Duration,

    /// How often eviction runs
    pub eviction_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            eviction_interval: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |var: &str, default: Duration| {
            std::env::var(var)
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(default, Duration::from_secs)
        };

        Self {
            session_ttl: secs("SEPFINDER_SESSION_TTL", defaults.session_ttl),
            eviction_interval: secs("SEPFINDER_EVICTION_INTERVAL", defaults.eviction_interval),
        }
    }
}

/// Command-line flags of the console binary
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sepfinder",
    about = "Find and download SEP and baseband firmware for a device",
    version
)]
pub struct ConsoleArgs {
    /// Enable debug logging
    #[arg(long, env = "SEPFINDER_DEBUG")]
    pub debug: bool,

    /// Directory bundles are written to
    #[arg(long, env = "SEPFINDER_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Session identifier used for this console
    #[arg(long, env = "SEPFINDER_SESSION", default_value = "console")]
    pub session: String,
}

impl ConsoleArgs {
    /// Default log filter directive
    pub fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}
