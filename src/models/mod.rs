use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::fmt;

use crate::identity;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Primary key of a lecture: 24 hex chars, see [`identity::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LectureId(String);

impl LectureId {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LectureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Planned day ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDay {
    pub date: NaiveDate,
    pub url: url::Url,
}

// ── Lecture as observed in one page row ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LectureRecord {
    pub name: String,
    /// Date text exactly as read from the page heading, e.g. "01.12.2025".
    pub day_label: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub docents: Vec<String>,
    pub room: String,
    pub group: String,
}

impl LectureRecord {
    pub fn identity(&self) -> LectureId {
        identity::derive(&self.name, &self.day_label, self.start)
    }
}

// ── Lecture as stored (union fields accumulated) ──────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StoredLecture {
    pub id: LectureId,
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub docents: Vec<String>,
    pub rooms: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

// ── Raw rows ──────────────────────────────────────────────────────────────────

/// One timetable row, cells trimmed but otherwise uninterpreted.
#[derive(Debug, Clone, Default)]
pub struct RawLectureRow {
    /// 1-based position among the data rows (header excluded).
    pub index: usize,
    pub cells: Vec<String>,
}
