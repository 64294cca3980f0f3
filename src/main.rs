mod config;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;
mod validation;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::models::LocalityLookup;
use crate::pipeline::Pipeline;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "fuel-price-etl", about = "Daily fuel price scraper and snapshot store", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// List region codes found on the index page
    Discover,

    /// Scrape region listings and replace today's snapshots
    Update {
        /// Only these region codes, e.g. --regions KL,TN
        #[arg(short, long, value_delimiter = ',')]
        regions: Vec<String>,

        /// Process only this hour's shard of regions
        #[arg(long)]
        shard: bool,

        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Pause after each region, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Scrape only the curated seed localities
    Seed {
        #[arg(short, long)]
        concurrency: Option<usize>,

        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Show database statistics
    Stats,

    /// Latest prices for a locality name
    Lookup {
        name: String,

        #[arg(short, long)]
        region: Option<String>,
    },

    /// Apply schema migrations without scraping
    Migrate,
}

fn open_repository(config: &AppConfig) -> Result<Arc<Repository>> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(Arc::new(repo))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "fuel_price_etl=info,warn",
        1 => "fuel_price_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Discover => {
            let repo = open_repository(&config)?;
            let pipeline = Pipeline::from_config(&config, repo)?;
            let codes = pipeline.discover_region_codes().await;
            if codes.is_empty() {
                println!("No regions discovered.");
            } else {
                println!("{} regions: {}", codes.len(), codes.join(", "));
            }
        }

        Command::Update {
            regions,
            shard,
            concurrency,
            delay_ms,
        } => {
            let _t = utils::Timer::start("Region update");
            let repo = open_repository(&config)?;
            let pipeline = Pipeline::from_config(&config, repo.clone())?;

            let codes = if !regions.is_empty() {
                Some(regions)
            } else if shard {
                let all = pipeline.discover_region_codes().await;
                let hour = utils::region_hour(config.pipeline.utc_offset_minutes);
                let picked = utils::select_shard(&all, config.pipeline.shard_size, hour);
                info!("Shard for hour {}: {}", hour, picked.join(", "));
                Some(picked)
            } else {
                None
            };

            let concurrency = concurrency.unwrap_or(config.pipeline.concurrency);
            let delay = Duration::from_millis(delay_ms.unwrap_or(config.pipeline.inter_batch_delay_ms));

            let run_id = repo.begin_scrape_run("update")?;
            let summary = pipeline
                .scrape_and_upsert_all_regions(concurrency, delay, codes.as_deref())
                .await;
            let failure = (summary.upserts == 0)
                .then(|| summary.errors.first().map(|e| e.reason.as_str()))
                .flatten();
            repo.finish_scrape_run(
                run_id,
                summary.regions_processed,
                summary.upserts,
                summary.errors.len(),
                failure,
            )?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Seed { concurrency, delay_ms } => {
            let _t = utils::Timer::start("Seed list update");
            let repo = open_repository(&config)?;
            let pipeline = Pipeline::from_config(&config, repo.clone())?;
            let concurrency = concurrency.unwrap_or(config.pipeline.concurrency);
            let delay = Duration::from_millis(delay_ms.unwrap_or(config.pipeline.inter_batch_delay_ms));

            let run_id = repo.begin_scrape_run("seed")?;
            let summary = pipeline.scrape_and_upsert_seed_list(concurrency, delay).await;
            let failure = (summary.upserts == 0)
                .then(|| summary.errors.first().map(|e| e.reason.as_str()))
                .flatten();
            repo.finish_scrape_run(run_id, 0, summary.upserts, summary.errors.len(), failure)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Stats => {
            let repo = open_repository(&config)?;
            let snapshots = repo.snapshot_count()?;
            let regions = repo.region_count()?;
            let localities = repo.locality_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            let last_run = repo
                .last_run_status()?
                .map(|(kind, status)| format!("{kind} ({status})"))
                .unwrap_or("-".into());
            println!("─────────────────────────────────");
            println!("  Fuel price ETL: Database Stats");
            println!("─────────────────────────────────");
            println!("  Regions    : {}", utils::fmt_number(regions));
            println!("  Localities : {}", utils::fmt_number(localities));
            println!("  Snapshots  : {}", utils::fmt_number(snapshots));
            println!("  From       : {}", min.map(|d| d.to_string()).unwrap_or("-".into()));
            println!("  To         : {}", max.map(|d| d.to_string()).unwrap_or("-".into()));
            println!("  Last run   : {}", last_run);
            println!("─────────────────────────────────");
        }

        Command::Lookup { name, region } => {
            let repo = open_repository(&config)?;
            match repo.resolve_locality(&name, region.as_deref())? {
                LocalityLookup::Resolved { snapshot } => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                LocalityLookup::Ambiguous { candidates } => {
                    println!("{:?} matches {} localities:", name, candidates.len());
                    for c in &candidates {
                        println!("  {} / {} ({})", c.region, c.locality, c.date);
                    }
                }
                LocalityLookup::NotFound => println!("No locality matches {:?}.", name),
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
