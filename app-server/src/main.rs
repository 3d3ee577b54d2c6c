use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use strata_server::{Settings, run_router, run_standalone, run_tier};
use strata_vector_index::TierLevel;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "strata-server",
    version,
    about = "Tiered retrieval services and the query router"
)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(long, short, env = "STRATA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long, env = "STRATA_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve one tier.
    Tier {
        /// Tier to serve: 1, 2, 3, L1.. or server1..
        #[arg(long, short)]
        tier: TierLevel,

        /// Override the tier's bind port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Serve the router against tier servers reached over HTTP.
    Router {
        /// Override the router's bind port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Serve all three tiers and the router from this process.
    Standalone {
        /// Let the router call the tiers directly instead of over HTTP.
        #[arg(long)]
        in_process: bool,
    },

    /// Validate the settings and print the effective configuration.
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        settings.data_dir.clone_from(dir);
    }
    match &cli.command {
        Command::Tier {
            tier,
            port: Some(port),
        } => {
            let overrides = match tier {
                TierLevel::L1 => &mut settings.tiers.l1,
                TierLevel::L2 => &mut settings.tiers.l2,
                TierLevel::L3 => &mut settings.tiers.l3,
            };
            overrides.port = Some(*port);
        }
        Command::Router { port: Some(port) } => settings.router.port = *port,
        _ => {}
    }
    Ok(settings)
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!("failed to listen for ctrl-c: {e}"),
        }
        token.cancel();
    });
    shutdown
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    info!("Starting strata-server v{}", env!("CARGO_PKG_VERSION"));

    let settings = load_settings(&cli)?;
    let problems = settings.validate();
    if let Command::CheckConfig = cli.command {
        for problem in &problems {
            error!("{problem}");
        }
        if !problems.is_empty() {
            bail!("{} problem(s) in settings", problems.len());
        }
        let rendered = toml::to_string_pretty(&settings).context("failed to render settings")?;
        println!("{rendered}");
        return Ok(());
    }
    if !problems.is_empty() {
        bail!("invalid settings: {}", problems.join("; "));
    }

    info!(data_dir = %settings.data_dir.display(), "settings loaded");
    let shutdown = shutdown_on_ctrl_c();
    match cli.command {
        Command::Tier { tier, .. } => run_tier(&settings, tier, shutdown).await,
        Command::Router { .. } => run_router(&settings, shutdown).await,
        Command::Standalone { in_process } => run_standalone(&settings, in_process, shutdown).await,
        Command::CheckConfig => Ok(()),
    }
}
