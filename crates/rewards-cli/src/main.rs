//! Rewards: offline tooling for a rewards data directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rewards_core::DataPaths;
use rewards_store::{ActivityInfoFilter, ExcludeFilter, PublisherStore};

mod inspect;

fn resolve_data_dir(arg: Option<&String>) -> PathBuf {
    arg.map(PathBuf::from).unwrap_or_else(|| {
        std::env::var("REWARDS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"))
    })
}

fn open_store(data_dir: &Path) -> anyhow::Result<PublisherStore> {
    let paths = DataPaths::new(data_dir)
        .with_context(|| format!("Failed to prepare data dir {}", data_dir.display()))?;
    PublisherStore::open(&paths.publisher_info_db)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let data_dir = resolve_data_dir(args.get(2));

    match command {
        "--validate" | "validate" => {
            let report = inspect::validate(&data_dir);
            inspect::print_report(&report);
            std::process::exit(if report.db_valid { 0 } else { 1 });
        }
        "reports" => {
            let store = open_store(&data_dir)?;
            let reports = store
                .get_all_balance_reports()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        "publishers" => {
            let store = open_store(&data_dir)?;
            let filter = ActivityInfoFilter {
                excluded: ExcludeFilter::All,
                ..Default::default()
            };
            let page = store
                .get_activity_list(0, 0, &filter)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            for p in &page.items {
                println!(
                    "{:<40} {:<15} visits={:<5} duration={:<7}s stamp={}{}",
                    p.id,
                    p.category,
                    p.visits,
                    p.duration,
                    p.reconcile_stamp,
                    if p.excluded { " [excluded]" } else { "" }
                );
            }
            println!("{} activity rows", page.items.len());
        }
        "restore" => {
            let store = open_store(&data_dir)?;
            let restored = store
                .restore_publishers()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            info!("Restored {} publishers in {}", restored, data_dir.display());
            println!("Restored {} excluded publishers", restored);
        }
        "--help" | "-h" | "help" => {
            println!("rewards: inspect a rewards data directory");
            println!();
            println!("Usage: rewards <command> [data-dir]");
            println!();
            println!("Commands:");
            println!("  validate [data-dir]      Check database schema and state files");
            println!("  reports [data-dir]       Print balance reports as JSON");
            println!("  publishers [data-dir]    List publisher activity");
            println!("  restore [data-dir]       Clear every publisher exclusion");
            println!("  help                     Show this help message");
            println!();
            println!("The data dir defaults to $REWARDS_DATA_DIR, then ./data.");
        }
        other => {
            eprintln!("Unknown command: {}. Use 'rewards help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
