use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lsf_ingest::config::AppConfig;
use lsf_ingest::pipeline::{DayOutcome, Pipeline};
use lsf_ingest::planner::parse_base_url;
use lsf_ingest::scraper::{LsfPortal, RateLimitedFetcher};
use lsf_ingest::storage::Repository;
use lsf_ingest::utils;

#[derive(Parser)]
#[command(name = "lsf-ingest", about = "Mirror the LSF lecture timetable into DuckDB", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Clear upcoming lectures and re-ingest the window (cron mode)
    Run {
        /// Days to ingest, starting today
        #[arg(long, env = "WUWDAYS")]
        days: Option<u32>,

        /// Maximum portal requests in flight
        #[arg(long, env = "WUWCONCURRENCY")]
        concurrency: Option<usize>,

        /// Exit non-zero when any day, row or write failed
        #[arg(long)]
        fail_on_errors: bool,
    },

    /// Show database statistics
    Stats,

    /// List the next lectures
    Upcoming {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Apply schema migrations without ingesting
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "lsf_ingest=info,warn",
        1 => "lsf_ingest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Run { days, concurrency, fail_on_errors } => {
            let _t = utils::Timer::start("Timetable ingest");
            if let Some(days) = days {
                config.pipeline.window_days = days;
            }
            if let Some(concurrency) = concurrency {
                config.pipeline.concurrency = concurrency;
            }
            info!(
                "started with {{ window_days: {}, concurrency: {} }}",
                config.pipeline.window_days, config.pipeline.concurrency
            );

            let repo = Arc::new(Repository::open(&config.storage.db_path)?);
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }
            let run_id = open_run_log(&repo);

            let portal = Arc::new(LsfPortal::new(&config.scraper).context("Failed to build portal client")?);
            // Covers every retry of one page, on top of the per-request timeout.
            let page_budget = Duration::from_secs(config.scraper.timeout_secs)
                * (config.scraper.max_retries as u32 + 1)
                + Duration::from_secs(10);
            let fetcher = RateLimitedFetcher::new(portal, config.pipeline.concurrency, page_budget);
            let base_url = parse_base_url(&config.scraper.base_url)?;

            let (tx, rx) = mpsc::unbounded_channel();
            let progress = tokio::spawn(print_progress(rx));

            let pipeline = Pipeline::new(&config.pipeline, base_url, fetcher, repo.clone()).with_progress(tx);
            let report = pipeline.run().await;
            drop(pipeline);
            progress.await.ok();

            if let Some(run_id) = run_id {
                let error = report
                    .has_failures()
                    .then(|| format!("{} days failed, {} rows skipped, {} write errors",
                        report.days_failed, report.rows_skipped, report.storage_errors));
                if let Err(e) = repo.finish_scrape_run(
                    run_id,
                    report.days_planned,
                    report.days_failed,
                    report.lectures_upserted,
                    error.as_deref(),
                ) {
                    warn!("Could not record scrape run: {}", e);
                }
            }

            info!("completed: {} lectures from {} days", report.lectures_upserted, report.days_ingested);
            if fail_on_errors && report.has_failures() {
                anyhow::bail!("run completed with failures: {:?}", report);
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let lectures = repo.lecture_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            let last = repo.last_scrape_run()?;
            println!("─────────────────────────────────");
            println!("  LSF timetable — Database Stats");
            println!("─────────────────────────────────");
            println!("  Lectures : {}", utils::fmt_number(lectures));
            println!("  From     : {}", utils::fmt_timestamp(min));
            println!("  To       : {}", utils::fmt_timestamp(max));
            match last {
                Some((at, status, n)) => println!(
                    "  Last run : {} ({}, {} lectures)",
                    utils::fmt_timestamp(Some(at)), status, utils::fmt_number(n)
                ),
                None => println!("  Last run : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Upcoming { limit } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let lectures = repo.upcoming(chrono::Local::now().naive_local(), limit)?;
            if lectures.is_empty() {
                println!("No upcoming lectures — run `lsf-ingest run` first.");
            } else {
                for l in &lectures {
                    println!(
                        "{}–{}  {}  [{}] [{}]  {}",
                        l.start.format("%d.%m. %H:%M"),
                        l.end.format("%H:%M"),
                        l.name,
                        l.rooms.iter().cloned().collect::<Vec<_>>().join(", "),
                        l.groups.iter().cloned().collect::<Vec<_>>().join(", "),
                        l.docents.join(", "),
                    );
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

/// A run that cannot be logged still ingests; the failure is only reported.
fn open_run_log(repo: &Repository) -> Option<i64> {
    match repo.begin_scrape_run() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Could not record scrape run start: {}", e);
            None
        }
    }
}

/// One ` *` per finished day on stdout, newline at the end.
async fn print_progress(mut rx: mpsc::UnboundedReceiver<DayOutcome>) {
    let mut out = std::io::stdout();
    write!(out, " ").ok();
    out.flush().ok();
    while rx.recv().await.is_some() {
        write!(out, " *").ok();
        out.flush().ok();
    }
    writeln!(out).ok();
}
