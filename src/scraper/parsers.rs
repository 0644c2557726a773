use crate::error::{PageParseError, RowParseError};
use crate::models::{LectureRecord, RawLectureRow};
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

use super::cleaner::{collapse_whitespace, parse_heading_date, row_to_lecture};

static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2").expect("static 'h2' CSS selector is valid"));
static TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("static 'table' CSS selector is valid"));
static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("static 'tr' CSS selector is valid"));

// ── Day page ──────────────────────────────────────────────────────────────────

/// One day's timetable, detached from the HTML tree so it can be carried
/// across await points.
#[derive(Debug, Clone)]
pub struct DayPage {
    pub day_label: String,
    pub date: NaiveDate,
    pub rows: Vec<RawLectureRow>,
}

impl DayPage {
    /// Lectures in source order. Rows without room or group are left out;
    /// malformed rows come through as errors so the caller can log and move on.
    pub fn lectures(self) -> impl Iterator<Item = Result<LectureRecord, RowParseError>> {
        let DayPage { day_label, date, rows } = self;
        rows.into_iter()
            .filter_map(move |row| row_to_lecture(&row, &day_label, date).transpose())
    }
}

pub fn parse_day_page(html: &str) -> Result<DayPage, PageParseError> {
    let doc = Html::parse_document(html);

    let heading = doc
        .select(&HEADING)
        .next()
        .map(|h| collapse_whitespace(&h.text().collect::<String>()))
        .ok_or(PageParseError::MissingHeading)?;
    let (day_label, date) = parse_heading_date(&heading)?;

    let table = doc.select(&TABLE).next().ok_or(PageParseError::MissingTable)?;

    let rows = table
        .select(&ROW)
        // header
        .skip(1)
        .enumerate()
        .map(|(i, tr)| RawLectureRow {
            index: i + 1,
            cells: row_cells(tr),
        })
        .collect();

    Ok(DayPage { day_label, date, rows })
}

/// Text of every `td`/`th` directly under the row, trimmed.
fn row_cells(tr: ElementRef<'_>) -> Vec<String> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect()
}
