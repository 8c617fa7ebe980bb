//! Kanban session client: sign in, inspect and keep a Supabase session alive.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kanban_config_and_utils::{init_logging, parse_level, Config, Paths};

/// Kanban session command-line interface.
#[derive(Parser)]
#[command(name = "kanban-session")]
#[command(about = "Manage the Kanban Supabase session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, session and logs. Defaults to ~/.kanban
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Password; read from KANBAN_PASSWORD when omitted
        #[arg(short, long, env = "KANBAN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Print the stored session as JSON
    Status {
        /// Also ask the server whether the access token is still accepted
        #[arg(long)]
        verify: bool,
    },
    /// Keep the session refreshed until Ctrl-C
    Watch {
        /// Revalidate the session every N seconds, as an app returning to
        /// the foreground would
        #[arg(long)]
        revalidate_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let watching = matches!(cli.command, Commands::Watch { .. });
    init_logging(&parse_level(level).as_str().to_ascii_lowercase(), &paths, watching);

    match cli.command {
        Commands::Login { email, password } => {
            commands::login::run(&config, &paths, &email, &password).await?;
        }
        Commands::Logout => {
            commands::logout::run(&config, &paths).await?;
        }
        Commands::Status { verify } => {
            commands::status::run(&config, &paths, verify).await?;
        }
        Commands::Watch { revalidate_secs } => {
            commands::watch::run(&config, &paths, revalidate_secs).await?;
        }
    }

    Ok(())
}
