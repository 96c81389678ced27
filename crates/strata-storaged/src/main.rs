use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;

use strata_config::{log_storage_info, log_storage_warn, logging, Config};
use strata_storaged::open_storage;
use strata_storaged::server::{serve, ServerState};

#[derive(Parser)]
#[command(name = "strata-storaged")]
#[command(version, about = "Strata storage node", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/strata/storage.toml)
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the storage node (default)
    Start,
    /// Wipe the mount point and lay down an empty filesystem
    Format,
    /// Verify bitmap, hash index and tag metadata against each other
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init_logging(config.storage.log_level);

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => start(config).await?,
        Commands::Format => {
            let storage = open_storage(&config, true)?;
            println!("Formatted {}", storage.root().display());
        }
        Commands::Check { json } => check(&config, json)?,
    }

    Ok(())
}

async fn start(config: Config) -> Result<()> {
    let s = &config.storage;
    log_storage_info!(
        "Configuration loaded",
        port = s.port,
        fresh_start = s.fresh_start,
        mount_point = format!("{:?}", s.mount_point),
        operation_delay_ms = s.operation_delay_ms,
        block_access_delay_ms = s.block_access_delay_ms,
        log_level = s.log_level.to_string()
    );
    if s.fresh_start {
        log_storage_warn!("FRESH_START set, wiping mount point");
    }

    let storage = open_storage(&config, s.fresh_start)?;
    let state = Arc::new(ServerState {
        storage,
        operation_delay: s.operation_delay(),
    });

    let listener = TcpListener::bind(("0.0.0.0", s.port)).await?;
    serve(listener, state, async {
        let _ = signal::ctrl_c().await;
    })
    .await
}

fn check(config: &Config, json: bool) -> Result<()> {
    let storage = open_storage(config, false)?;
    let report = storage.check()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} blocks, {} free, {} hash entries, {} tags",
            report.total_blocks, report.free_blocks, report.hash_entries, report.tags
        );
        for issue in &report.issues {
            println!("  {:?}", issue);
        }
    }

    if !report.is_clean() {
        anyhow::bail!("{} inconsistencies found", report.issues.len());
    }
    Ok(())
}
