//! # Observability
//!
//! Logging setup for the Kanban session client.
//!
//! Binaries call [`init_with_config`] once at startup and use `tracing`
//! macros everywhere else. In dev mode (the default feature) every event is
//! written as one JSON object per line to `~/.kanban/logs/dev.jsonl`:
//!
//! - `tail -f ~/.kanban/logs/dev.jsonl | jq` for pretty JSON
//! - `lnav ~/.kanban/logs/dev.jsonl` for interactive exploration
//!
//! Fields whose key names a credential (`access_token`, `password`,
//! `authorization`, ...) and values shaped like JWTs or bearer headers are
//! replaced with `[REDACTED]` before they reach the file.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "kanban-session".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;
mod redact;

pub use json_layer::{JsonLayer, LogEntry};

use std::path::PathBuf;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,session_lifecycle=trace").
    /// `RUST_LOG` takes precedence.
    pub default_level: String,

    /// Defaults to `~/.kanban/logs/dev.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize with defaults and the given service name.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
            )
            .with_target(true)
            .compact()
            .finish()
            .try_init();
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};
