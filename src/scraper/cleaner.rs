use crate::error::{PageParseError, RowParseError};
use crate::models::{LectureRecord, RawLectureRow};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

// ── Column layout ─────────────────────────────────────────────────────────────

pub const COL_START: usize = 0;
pub const COL_END: usize = 1;
pub const COL_NAME: usize = 3;
pub const COL_ROOM: usize = 5;
pub const COL_GROUP: usize = 6;
pub const COL_DOCENTS: usize = 7;

/// Highest index above, plus one.
pub const MIN_CELLS: usize = COL_DOCENTS + 1;

pub const DOCENT_SEPARATOR: &str = " , ";
pub const TITLE_TOKEN: &str = "Professor";

// ── Field parsers ─────────────────────────────────────────────────────────────

/// "Montag, 01.12.2025" → ("01.12.2025", 2025-12-01).
/// Field order is day.month.year regardless of the process locale.
pub fn parse_heading_date(heading: &str) -> Result<(String, NaiveDate), PageParseError> {
    let bad = || PageParseError::BadHeadingDate { heading: heading.to_string() };

    let label = heading.split(", ").nth(1).map(str::trim).ok_or_else(bad)?;
    let date = NaiveDate::parse_from_str(label, "%d.%m.%Y").map_err(|_| bad())?;
    Ok((label.to_string(), date))
}

/// "08:00" or "08:00:00"; single-digit hours are accepted.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drops the longest prefix ending in [`TITLE_TOKEN`]; names without the
/// token are returned unchanged (apart from trimming).
pub fn strip_title(name: &str) -> &str {
    match name.rfind(TITLE_TOKEN) {
        Some(pos) => name[pos + TITLE_TOKEN.len()..].trim(),
        None => name.trim(),
    }
}

/// "Professor Jane Doe , John Roe" → ["Jane Doe", "John Roe"]
pub fn normalise_docents(cell: &str) -> Vec<String> {
    cell.trim()
        .split(DOCENT_SEPARATOR)
        .map(collapse_whitespace)
        .filter(|d| !d.is_empty())
        .map(|d| strip_title(&d).to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

// ── Row → LectureRecord ───────────────────────────────────────────────────────

/// `Ok(None)` for rows without a room or group; those are not lectures
/// anyone can attend.
pub fn row_to_lecture(
    row: &RawLectureRow,
    day_label: &str,
    day: NaiveDate,
) -> Result<Option<LectureRecord>, RowParseError> {
    let cells = &row.cells;
    if cells.len() < MIN_CELLS {
        return Err(RowParseError::TooFewCells {
            row: row.index,
            expected: MIN_CELLS,
            found: cells.len(),
        });
    }

    let room = collapse_whitespace(&cells[COL_ROOM]);
    let group = collapse_whitespace(&cells[COL_GROUP]);
    if room.is_empty() || group.is_empty() {
        return Ok(None);
    }

    let at = |col: usize, field: &'static str| -> Result<NaiveDateTime, RowParseError> {
        parse_time(&cells[col])
            .map(|t| day.and_time(t))
            .ok_or_else(|| RowParseError::BadTime {
                row: row.index,
                field,
                value: cells[col].clone(),
            })
    };

    Ok(Some(LectureRecord {
        name: collapse_whitespace(&cells[COL_NAME]),
        day_label: day_label.to_string(),
        start: at(COL_START, "start")?,
        end: at(COL_END, "end")?,
        docents: normalise_docents(&cells[COL_DOCENTS]),
        room,
        group,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
