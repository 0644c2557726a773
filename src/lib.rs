//! Mirrors the "current lectures" timetable of an HIS/LSF portal into DuckDB.
//!
//! [`pipeline::Pipeline::run`] is the library entry point; the `lsf-ingest`
//! binary wraps it for cron use.

pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod scraper;
pub mod storage;
pub mod utils;
