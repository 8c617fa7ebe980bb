//! Configuration, paths and logging setup for the Kanban session client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, SessionSettings, DEFAULT_LOG_LEVEL, DEFAULT_SUPABASE_ANON_KEY, DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
