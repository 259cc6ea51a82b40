//! # Tether CLI (`tether`)
//!
//! The `tether` binary runs the HTTP API for the desktop client and offers a
//! few terminal commands for chatting and inspecting stored conversations.
//!
//! ## Usage
//!
//! ```bash
//! tether --config ./config/tether.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tether init` | Create the conversation store and the reference index |
//! | `tether serve` | Start the HTTP server |
//! | `tether chat <session> "<message>"` | Run one turn from the terminal |
//! | `tether sessions` | List sessions |
//! | `tether history <session>` | Print a session's messages |
//! | `tether stats` | Store and index statistics |
//! | `tether activity <file>` | Print the digest for an activity log file |
//!
//! ## Examples
//!
//! ```bash
//! tether init
//! tether chat focus-1 "I can't start my essay" --new
//! tether chat plan-1 "Help me plan a todo app" --mode planner --new
//! tether chat bug-1 "Why does my loop never end?" --mode detective --detective-mode quick-fix --new
//! RUST_LOG=tether=debug tether serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tether::models::{DetectiveMode, Mode};
use tether::{chat, config, server, stats};

/// Tether: an ADHD-friendly assistant that answers from reference material
/// and remembers your conversations.
#[derive(Parser)]
#[command(name = "tether", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tether.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite files and schemas. Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Send one message and print the answer.
    Chat {
        /// Session id.
        session: String,

        /// The message to send.
        message: String,

        /// general, planner, builder, detective, or reviewer.
        #[arg(long, default_value = "general")]
        mode: Mode,

        /// teaching or quick-fix. Only used in detective mode.
        #[arg(long, default_value = "teaching")]
        detective_mode: DetectiveMode,

        /// JSON file with an array of activity events.
        #[arg(long)]
        activity: Option<PathBuf>,

        /// Create (or reactivate) the session first.
        #[arg(long)]
        new: bool,
    },

    /// List sessions, most recently updated first.
    Sessions {
        /// Include inactive sessions.
        #[arg(long)]
        all: bool,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Print a session's messages, oldest first.
    History {
        session: String,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Show store and index statistics.
    Stats,

    /// Summarize an activity log file the way a turn would.
    Activity {
        /// JSON file with an array of activity events.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Activity { file } = &cli.command {
        return chat::run_activity(file);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            chat::run_init(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat {
            session,
            message,
            mode,
            detective_mode,
            activity,
            new,
        } => {
            chat::run_chat(
                &cfg,
                chat::ChatArgs {
                    session: &session,
                    message: &message,
                    mode,
                    detective_mode,
                    activity: activity.as_deref(),
                    create: new,
                },
            )
            .await?;
        }
        Commands::Sessions { all, limit } => {
            chat::run_sessions(&cfg, all, limit).await?;
        }
        Commands::History { session, limit } => {
            chat::run_history(&cfg, &session, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Activity { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
