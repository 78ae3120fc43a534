mod config;
mod db;
mod format;
mod logging;
mod remote;
mod retention;
mod runner;
mod schedule;
mod scheduler;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::remote::RcloneRemote;
use crate::runner::{BackupRunner, RunOptions};
use crate::scheduler::{DEFAULT_POLL_INTERVAL, Scheduler};

#[derive(Parser)]
#[command(
    name = "backhaul",
    version,
    about = "Periodic directory and database backups with generational pruning"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Console log level (debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup now, or keep running on the configured schedule when
    /// service mode is enabled
    Run {
        /// Actually upload and prune. Without this flag the run is a local
        /// rehearsal that only logs what it would have done
        #[arg(long)]
        live: bool,
        /// Never delete old backups, even on a live run
        #[arg(long)]
        disable_pruning: bool,
        /// Skip configured directories that do not exist instead of failing
        #[arg(short = 'i', long)]
        ignore_missing: bool,
    },
    /// Validate the configuration, external tools and database connections
    Check,
    /// Show which backups the retention policy would keep and prune
    Plan {
        /// Read the listing from the rclone remote instead of stdin
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .context(format!("could not load configuration from {:?}", cli.config))?;

    match cli.command {
        Commands::Run {
            live,
            disable_pruning,
            ignore_missing,
        } => {
            logging::init(&config.log_dir, &cli.log_level)?;
            let opts = RunOptions {
                live,
                disable_pruning,
                ignore_missing,
            };
            run(config, opts).await
        }
        Commands::Check => check(config).await,
        Commands::Plan { live } => plan(config, live).await,
    }
}

async fn run(config: Config, opts: RunOptions) -> Result<()> {
    tracing::info!("{}", config.service);
    let service = config.service;
    let mut runner = BackupRunner::new(config, opts);
    if service.enabled {
        let mut scheduler = Scheduler::new(service.cadence, DEFAULT_POLL_INTERVAL);
        scheduler
            .run(&mut runner, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        Ok(())
    } else {
        runner.run().await
    }
}

async fn check(config: Config) -> Result<()> {
    println!("Configuration OK:");
    println!("  remote:    {}", config.remote);
    println!("  dirs:      {}", config.dirs.len());
    println!("  databases: {}", config.databases.len());
    println!("  pruning:   {}", config.pruning);
    println!("  schedule:  {}", config.service);

    let runner = BackupRunner::new(config, RunOptions::default());
    runner.preflight().await?;
    println!("External tools and database connections OK.");
    Ok(())
}

async fn plan(config: Config, live: bool) -> Result<()> {
    let listing: Vec<String> = if live {
        RcloneRemote::new(config.remote.clone()).list().await?
    } else {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .context("could not read filenames from stdin")?
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    };

    let plan = config.pruning.plan(&listing, &config.format);
    for filename in &plan.keep {
        println!("keep   {}", filename);
    }
    for filename in &plan.prune {
        println!("prune  {}", filename);
    }
    println!(
        "{} managed backup(s): {} kept, {} pruned.",
        plan.keep.len() + plan.prune.len(),
        plan.keep.len(),
        plan.prune.len()
    );
    Ok(())
}
