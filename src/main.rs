//! # Frigate Relay CLI (`frigate-relay`)
//!
//! ## Usage
//!
//! ```bash
//! frigate-relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `frigate-relay init` | Create the SQLite state database |
//! | `frigate-relay run` | Run the event pipeline and the command listener |
//! | `frigate-relay check` | Print the camera/zone matrix and NVR reachability |
//! | `frigate-relay state` | Print the persisted toggle, cursor and dedup window |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use frigate_relay::config::{self, Config};
use frigate_relay::{inspect, migrate, relay};

/// Frigate Relay: Frigate NVR detection events to Telegram.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/relay.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "frigate-relay",
    about = "Relays Frigate NVR detection events to Telegram",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state database. Idempotent.
    Init,

    /// Relay events until SIGINT or SIGTERM.
    Run,

    /// Show the normalized camera/zone filter and check the NVR.
    Check,

    /// Show persisted toggle state, poll cursor and dedup window size.
    State,
}

fn init_tracing(config: &Config) {
    let default = if config.logging.verbose {
        "debug"
    } else {
        "info,hyper=warn,reqwest=warn,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("State database initialized at {}.", cfg.state.path.display());
        }
        Commands::Run => {
            relay::run(cfg).await?;
        }
        Commands::Check => {
            inspect::run_check(&cfg).await?;
        }
        Commands::State => {
            inspect::run_state(&cfg).await?;
        }
    }

    Ok(())
}
