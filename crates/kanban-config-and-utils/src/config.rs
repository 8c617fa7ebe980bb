//! Configuration management for the session client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use session_lifecycle::{LifecycleConfig, RetryPolicy};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://project.supabase.co",
};

/// Default Supabase anon key (can be overridden at compile time via SUPABASE_ANON_KEY env var).
pub const DEFAULT_SUPABASE_ANON_KEY: &str = match option_env!("SUPABASE_ANON_KEY") {
    Some(key) => key,
    None => "anon-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_SUPABASE_URL: &str = "KANBAN_SUPABASE_URL";
const ENV_SUPABASE_ANON_KEY: &str = "KANBAN_SUPABASE_ANON_KEY";
const ENV_LOG_LEVEL: &str = "KANBAN_LOG_LEVEL";

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase anon key (public, safe to expose).
    #[serde(default = "default_supabase_anon_key")]
    pub supabase_anon_key: String,
    /// Session lifecycle tuning.
    #[serde(default)]
    pub session: SessionSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_anon_key() -> String {
    DEFAULT_SUPABASE_ANON_KEY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_anon_key: default_supabase_anon_key(),
            session: SessionSettings::default(),
        }
    }
}

/// Timing knobs for the session lifecycle. Missing keys take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub freshness_window_secs: u64,
    pub debounce_window_ms: u64,
    pub refresh_margin_secs: u64,
    pub init_cooldown_ms: u64,
    pub refresh_cooldown_ms: u64,
    pub foreground_debounce_ms: u64,
    pub retry_initial_delay_ms: u64,
    pub retry_backoff_factor: u32,
    pub retry_max_delay_ms: u64,
    pub retry_max_retries: u32,
    pub rate_limit_max_delay_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300,
            debounce_window_ms: 2000,
            refresh_margin_secs: 300,
            init_cooldown_ms: 2000,
            refresh_cooldown_ms: 1000,
            foreground_debounce_ms: 1000,
            retry_initial_delay_ms: 1000,
            retry_backoff_factor: 2,
            retry_max_delay_ms: 10_000,
            retry_max_retries: 3,
            rate_limit_max_delay_ms: 30_000,
        }
    }
}

impl SessionSettings {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            backoff_factor: self.retry_backoff_factor,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_retries: self.retry_max_retries,
            rate_limit_max_delay: Duration::from_millis(self.rate_limit_max_delay_ms),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            debounce_window: Duration::from_millis(self.debounce_window_ms),
            refresh_margin: Duration::from_secs(self.refresh_margin_secs),
            init_cooldown: Duration::from_millis(self.init_cooldown_ms),
            refresh_cooldown: Duration::from_millis(self.refresh_cooldown_ms),
            foreground_debounce: Duration::from_millis(self.foreground_debounce_ms),
            retry: self.retry_policy(),
        }
    }

    /// Reject settings the retry loop cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.retry_max_retries == 0 {
            return Err(CoreError::Config(
                "session.retry_max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff_factor == 0 {
            return Err(CoreError::Config(
                "session.retry_backoff_factor must be at least 1".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            return Err(CoreError::Config(
                "session.retry_max_delay_ms is below retry_initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.session.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `KANBAN_*` overrides from `lookup`. Blank values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(url) = value(ENV_SUPABASE_URL) {
            self.supabase_url = url;
        }
        if let Some(key) = value(ENV_SUPABASE_ANON_KEY) {
            self.supabase_anon_key = key;
        }
        if let Some(level) = value(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }
}
