use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use rss_ingest::config::Settings;
use rss_ingest::feed;
use rss_ingest::ingest::Ingestor;
use rss_ingest::storage::{Database, FeedRunError, RetentionSweeper, Run};

#[derive(Parser, Debug)]
#[command(
    name = "rss-ingest",
    about = "Fetch configured RSS feeds into SQLite and retire stale data"
)]
struct Args {
    /// Runtime settings file
    #[arg(long, value_name = "FILE", default_value = "ingest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ingestion pass and print its summary
    Ingest,
    /// Delete expired items, runs, errors and rate-limit rows
    Cleanup,
    /// Create the database and apply migrations
    InitDb,
    /// Show recent runs with their per-feed errors
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Show items seen by polls in the last few hours
    Items {
        #[arg(long, default_value_t = 24)]
        hours: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Serialize)]
struct RunWithErrors {
    #[serde(flatten)]
    run: Run,
    errors: Vec<FeedRunError>,
}

/// Start of the `items` window, clamped instead of overflowing on huge `--hours`.
fn window_start(now: i64, hours: i64) -> i64 {
    now.saturating_sub(hours.saturating_mul(3600))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;

    // The path is reported, never a connection string
    let db = Database::open(&settings.database_path)
        .await
        .with_context(|| format!("Failed to open database at {}", settings.database_path))?;

    match args.command {
        Command::Ingest => {
            let client = feed::shared_client()
                .await
                .context("Failed to build HTTP client")?
                .clone();
            let summary = Ingestor::new(db.clone(), client, settings)
                .run_ingest()
                .await
                .context("Ingestion run failed")?;
            print_json(&summary)?;
        }
        Command::Cleanup => {
            let report = RetentionSweeper::new(db.clone(), settings.retention_policy())
                .cleanup()
                .await;
            print_json(&report)?;
        }
        Command::InitDb => {
            println!("Database ready at {}", settings.database_path);
        }
        Command::Runs { limit } => {
            let mut out = Vec::new();
            for run in db.recent_runs(limit).await? {
                let errors = db.errors_for_run(&run.id).await?;
                out.push(RunWithErrors { run, errors });
            }
            print_json(&out)?;
        }
        Command::Items { hours, limit } => {
            let now = chrono::Utc::now().timestamp();
            let items = db
                .items_fetched_between(window_start(now, hours), now.saturating_add(1), limit)
                .await?;
            print_json(&items)?;
        }
    }

    db.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_counts_back_whole_hours() {
        assert_eq!(window_start(10_000, 2), 10_000 - 7_200);
    }

    #[test]
    fn test_window_start_saturates_on_huge_hours() {
        assert_eq!(window_start(1_700_000_000, i64::MAX), i64::MIN);
    }
}
