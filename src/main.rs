use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use starcharter::config::{Config, LoggingConfig};
use starcharter::context::ServiceContext;

#[derive(Parser)]
#[command(
    name = "starcharter",
    about = "Chart every waypoint of every system with a fleet of agents",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (default: $STARCHARTER_CONFIG, then ./starcharter.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run orchestration cycles (the default)
    Run {
        /// Stop after a single cycle
        #[arg(long)]
        once: bool,
    },

    /// Measure the achievable request rate against the remote service
    Pace {
        /// Number of status requests to issue
        #[arg(long, default_value = "180")]
        requests: u32,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => {
            starcharter::run(config, once).await?;
        }
        Commands::Pace { requests } => {
            tracing::info!(%requests, "Measuring request pace");
            let ctx = ServiceContext::from_config(config)?;
            let stats = starcharter::pace(&ctx, requests).await?;

            let attempted = stats.attempted_per_minute();
            let succeeded = stats.succeeded_per_minute();
            println!("Attempted pace (/min, /sec): {:.2}, {:.2}", attempted, attempted / 60.0);
            println!("Succeeded pace (/min, /sec): {:.2}, {:.2}", succeeded, succeeded / 60.0);
            println!("Success percentage:          {:.1}%", stats.success_percent());
            if stats.failed_attempts() > 0 {
                println!("Failed attempts:             {}", stats.failed_attempts());
            }
        }
    }

    Ok(())
}
