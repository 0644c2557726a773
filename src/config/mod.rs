use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Portal access
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// "Current lectures" URL without the `HISCalendar_Date` parameter.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// How many days, starting today, are re-ingested per run.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Maximum number of portal requests in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://lsf.hft-stuttgart.de/qisserver/rds?state=currentLectures&type=0\
     &next=CurrentLectures.vm&nextdir=ressourcenManager&navigationPosition=lectures\
     &currentLectures&breadcrumb=currentLectures&topitem=lectures\
     &subitem=currentLectures&P.Print="
        .to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_max_retries() -> usize {
    2
}
fn default_user_agent() -> String {
    concat!("lsf-ingest/", env!("CARGO_PKG_VERSION"), " (timetable mirror)").to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/wuw.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_window_days() -> u32 {
    21
}
fn default_concurrency() -> usize {
    5
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            concurrency: default_concurrency(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    /// (`WUW__PIPELINE__WINDOW_DAYS=14`, `WUW__STORAGE__DB_PATH=...`).
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("WUW").separator("__"))
            .build()
            .context("Failed to assemble configuration")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}
