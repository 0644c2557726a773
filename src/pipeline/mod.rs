//! Pipeline orchestrator: ties planner → fetcher → extractor → storage together.
//!
//! ## Run phases
//!
//! `Idle → ClearingWindow → Fetching → Completed`
//!
//!   1. Delete every stored lecture starting at or after "now". Lectures that
//!      vanished from the portal disappear with them.
//!   2. Fetch each day of the window (capped by the fetcher), parse it and
//!      upsert its lectures one by one, in page order.
//!   3. Report once every day is accounted for.
//!
//! Nothing in here is fatal. Failures are logged, counted in the [`RunReport`]
//! and the run always reaches `Completed`; the next run repeats the clear.

use crate::config::PipelineConfig;
use crate::models::PlannedDay;
use crate::planner::plan_window;
use crate::scraper::{RateLimitedFetcher, parse_day_page};
use crate::storage::LectureStore;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    ClearingWindow,
    Fetching,
    Completed,
}

/// What happened to one day of the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayStatus {
    Ingested {
        lectures: usize,
        rows_skipped: usize,
        storage_errors: usize,
    },
    FetchFailed(String),
    PageFailed(String),
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub url: String,
    pub status: DayStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// `None` when clearing the window failed.
    pub cleared: Option<usize>,
    pub days_planned: usize,
    pub days_ingested: usize,
    pub days_failed: usize,
    pub lectures_upserted: usize,
    pub rows_skipped: usize,
    pub storage_errors: usize,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.cleared.is_none() || self.days_failed > 0 || self.rows_skipped > 0 || self.storage_errors > 0
    }

    fn record(&mut self, outcome: &DayOutcome) {
        match &outcome.status {
            DayStatus::Ingested { lectures, rows_skipped, storage_errors } => {
                self.days_ingested += 1;
                self.lectures_upserted += lectures;
                self.rows_skipped += rows_skipped;
                self.storage_errors += storage_errors;
            }
            DayStatus::FetchFailed(_) | DayStatus::PageFailed(_) | DayStatus::Aborted(_) => {
                self.days_failed += 1;
            }
        }
    }
}

pub struct Pipeline {
    window_days: u32,
    base_url: Url,
    fetcher: RateLimitedFetcher,
    store: Arc<dyn LectureStore>,
    phase: watch::Sender<RunPhase>,
    progress: Option<mpsc::UnboundedSender<DayOutcome>>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        base_url: Url,
        fetcher: RateLimitedFetcher,
        store: Arc<dyn LectureStore>,
    ) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            window_days: config.window_days,
            base_url,
            fetcher,
            store,
            phase,
            progress: None,
        }
    }

    /// Every finished day is also sent here, in completion order.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<DayOutcome>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub async fn run(&self) -> RunReport {
        self.run_at(Local::now().naive_local()).await
    }

    /// Runs against an explicit "now": the window starts on `now`'s date and
    /// everything from `now` on is cleared first.
    pub async fn run_at(&self, now: NaiveDateTime) -> RunReport {
        let mut report = RunReport::default();

        // ── 1. Clear the window ───────────────────────────────────────────────
        self.enter(RunPhase::ClearingWindow);
        report.cleared = match self.store.delete_from(now).await {
            Ok(n) => {
                info!("Cleared {} upcoming lectures (start >= {})", n, now);
                Some(n)
            }
            Err(e) => {
                error!("Clearing lectures from {} failed: {}", now, e);
                None
            }
        };

        // ── 2. Fetch, parse, upsert every day ─────────────────────────────────
        self.enter(RunPhase::Fetching);
        let plan = plan_window(&self.base_url, now.date(), self.window_days);
        report.days_planned = plan.len();
        info!("Ingesting {} days from {}", plan.len(), now.date());

        let mut handles = Vec::with_capacity(plan.len());
        for day in plan {
            let fetcher = self.fetcher.clone();
            let store = Arc::clone(&self.store);
            let progress = self.progress.clone();
            let date = day.date;
            let url = day.url.to_string();

            let handle = tokio::spawn(async move {
                let outcome = ingest_day(&fetcher, store.as_ref(), &day).await;
                if let Some(tx) = progress {
                    tx.send(outcome.clone()).ok();
                }
                outcome
            });
            handles.push((date, url, handle));
        }

        for (date, url, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Task panic for {}: {}", date, e);
                    let outcome = DayOutcome { date, url, status: DayStatus::Aborted(e.to_string()) };
                    if let Some(tx) = &self.progress {
                        tx.send(outcome.clone()).ok();
                    }
                    outcome
                }
            };
            report.record(&outcome);
        }

        // ── 3. Done ───────────────────────────────────────────────────────────
        self.enter(RunPhase::Completed);
        info!(
            "=== Done: {} days | {} ingested | {} failed | {} lectures | {} rows skipped | {} storage errors ===",
            report.days_planned,
            report.days_ingested,
            report.days_failed,
            report.lectures_upserted,
            report.rows_skipped,
            report.storage_errors,
        );
        report
    }

    fn enter(&self, phase: RunPhase) {
        info!("=== Phase: {:?} ===", phase);
        self.phase.send_replace(phase);
    }
}

async fn ingest_day(fetcher: &RateLimitedFetcher, store: &dyn LectureStore, day: &PlannedDay) -> DayOutcome {
    let url = day.url.to_string();
    let outcome = |status: DayStatus| DayOutcome { date: day.date, url: url.clone(), status };

    let html = match fetcher.fetch(&url).await {
        Ok(html) => html,
        Err(e) => {
            warn!("{}: {}", day.date, e);
            return outcome(DayStatus::FetchFailed(e.to_string()));
        }
    };

    let page = match parse_day_page(&html) {
        Ok(page) => page,
        Err(e) => {
            warn!("{}: {} ({})", day.date, e, url);
            return outcome(DayStatus::PageFailed(e.to_string()));
        }
    };
    if page.date != day.date {
        warn!("Asked for {} but the page shows {}; using the page's date", day.date, page.date);
    }

    let mut lectures = 0usize;
    let mut rows_skipped = 0usize;
    let mut storage_errors = 0usize;

    for lecture in page.lectures() {
        match lecture {
            Ok(lecture) => {
                let id = lecture.identity();
                match store.upsert(&id, &lecture).await {
                    Ok(()) => lectures += 1,
                    Err(e) => {
                        warn!("{}: upsert of {:?} ({}) failed: {}", day.date, lecture.name, id, e);
                        storage_errors += 1;
                    }
                }
            }
            Err(e) => {
                warn!("{}: skipping {} ({})", day.date, e, url);
                rows_skipped += 1;
            }
        }
    }

    info!("{}: {} lectures", day.date, lectures);
    outcome(DayStatus::Ingested { lectures, rows_skipped, storage_errors })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
