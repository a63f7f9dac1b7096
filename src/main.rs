mod config;
mod export;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::{ListingStore, Repository};

#[derive(Parser)]
#[command(name = "autoria-harvester", about = "Used-car listing harvester", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl listing pages until exhausted and store new listings
    Crawl,

    /// Show stored listing statistics
    Stats,

    /// Print a page of stored listings, newest first
    Recent {
        #[arg(short, long, default_value_t = 0)]
        offset: usize,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Export all stored listings to CSV
    Export {
        #[arg(short, long, default_value = "data/listings.csv")]
        out: PathBuf,
    },

    /// Apply schema migrations without crawling
    Migrate,
}

fn open_store(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "autoria_harvester=info,warn",
        1 => "autoria_harvester=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Crawl => {
            let _t = utils::Timer::start("Crawl");
            let report = Pipeline::new(config).run().await?;
            info!(
                "Done ({:?}): {} pages, {} links, {} new listings, {} failed listings, {} failed batches",
                report.stop,
                report.pages,
                report.links,
                report.inserted,
                report.failed_listings,
                report.failed_batches,
            );
        }

        Command::Stats => {
            let repo = open_store(&config)?;
            let s = repo.summary()?;
            let price = |p: Option<i64>| p.map(|v| format!("${}", utils::group_digits(v, ' '))).unwrap_or("—".into());
            println!("─────────────────────────────────");
            println!("  Listings — Database Stats");
            println!("─────────────────────────────────");
            println!("  Listings : {}", utils::group_digits(s.listings, ','));
            println!("  Min price: {}", price(s.min_price_usd));
            println!("  Avg price: {}", price(s.avg_price_usd.map(|a| a.round() as i64)));
            println!("  Max price: {}", price(s.max_price_usd));
            println!("  First    : {}", s.first_found.map(|d| d.to_rfc3339()).unwrap_or("—".into()));
            println!("  Latest   : {}", s.last_found.map(|d| d.to_rfc3339()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Recent { offset, limit } => {
            let repo = open_store(&config)?;
            let total = repo.count_all()?;
            let rows = repo.page(offset, limit)?;
            if rows.is_empty() {
                println!("No listings — run `autoria-harvester crawl` first.");
            } else {
                println!("{}–{} of {} listings:", offset + 1, offset + rows.len(), total);
                for r in &rows {
                    println!(
                        "  {:<40} {:>10} {:>9} km  +{}  {}",
                        utils::truncate(&r.title, 40),
                        format!("${}", utils::group_digits(r.price_usd, ' ')),
                        utils::group_digits(r.odometer, ' '),
                        r.phone_number,
                        r.url,
                    );
                }
            }
        }

        Command::Export { out } => {
            let repo = open_store(&config)?;
            let records = repo.all()?;
            let n = export::export_csv(&out, &records)?;
            println!("{} listings written to {}", n, out.display());
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
