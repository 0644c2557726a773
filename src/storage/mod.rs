use crate::error::StorageError;
use crate::models::{LectureId, LectureRecord, StoredLecture};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

// ── Store trait ───────────────────────────────────────────────────────────────

/// The two operations ingestion needs from storage.
#[async_trait]
pub trait LectureStore: Send + Sync {
    /// Removes every lecture starting at or after `from`; returns how many.
    async fn delete_from(&self, from: NaiveDateTime) -> Result<usize, StorageError>;

    /// Inserts the lecture or merges it into the stored one: scalar fields are
    /// replaced, `room`/`group` are added to the stored sets.
    async fn upsert(&self, id: &LectureId, lecture: &LectureRecord) -> Result<(), StorageError>;
}

// ── Schema ────────────────────────────────────────────────────────────────────

// No secondary index on start_time: DuckDB refuses ON CONFLICT updates of
// indexed columns.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS lectures (
    id          VARCHAR   PRIMARY KEY,
    name        VARCHAR   NOT NULL,
    start_time  TIMESTAMP NOT NULL,
    end_time    TIMESTAMP NOT NULL,
    -- JSON array, source order
    docents     VARCHAR   NOT NULL DEFAULT '[]',
    scraped_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS lecture_rooms (
    lecture_id  VARCHAR NOT NULL,
    room        VARCHAR NOT NULL,
    PRIMARY KEY (lecture_id, room)
);

CREATE TABLE IF NOT EXISTS lecture_groups (
    lecture_id  VARCHAR NOT NULL,
    group_name  VARCHAR NOT NULL,
    PRIMARY KEY (lecture_id, group_name)
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    days_planned        BIGINT DEFAULT 0,
    days_failed         BIGINT DEFAULT 0,
    lectures_upserted   BIGINT DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

/// DuckDB-backed lecture store. Writes are serialised on one connection.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn run_migrations(&self) -> Result<(), StorageError> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Lectures ──────────────────────────────────────────────────────────────

    fn delete_from_sync(&self, from: NaiveDateTime) -> Result<usize, StorageError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for child in [
            "DELETE FROM lecture_rooms WHERE lecture_id IN (SELECT id FROM lectures WHERE start_time >= ?)",
            "DELETE FROM lecture_groups WHERE lecture_id IN (SELECT id FROM lectures WHERE start_time >= ?)",
        ] {
            tx.execute(child, params![from])?;
        }
        let removed = tx.execute("DELETE FROM lectures WHERE start_time >= ?", params![from])?;
        tx.commit()?;
        Ok(removed)
    }

    /// One transaction per lecture; re-running it changes nothing.
    fn upsert_sync(&self, id: &LectureId, lecture: &LectureRecord) -> Result<(), StorageError> {
        let docents = serde_json::to_string(&lecture.docents)?;

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"INSERT INTO lectures (id, name, start_time, end_time, docents, scraped_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                   name       = excluded.name,
                   start_time = excluded.start_time,
                   end_time   = excluded.end_time,
                   docents    = excluded.docents,
                   scraped_at = excluded.scraped_at"#,
            params![
                id.as_str(),
                lecture.name,
                lecture.start,
                lecture.end,
                docents,
                Utc::now().naive_utc(),
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO lecture_rooms (lecture_id, room) VALUES (?, ?)",
            params![id.as_str(), lecture.room],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO lecture_groups (lecture_id, group_name) VALUES (?, ?)",
            params![id.as_str(), lecture.group],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_lecture(&self, id: &LectureId) -> Result<Option<StoredLecture>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, start_time, end_time, docents FROM lectures WHERE id = ?",
        )?;
        let lectures = collect_lectures(&conn, &mut stmt, params![id.as_str()])?;
        Ok(lectures.into_iter().next())
    }

    /// Lectures starting at or after `from`, earliest first.
    pub fn upcoming(&self, from: NaiveDateTime, limit: usize) -> Result<Vec<StoredLecture>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, name, start_time, end_time, docents FROM lectures
               WHERE start_time >= ?
               ORDER BY start_time, name
               LIMIT ?"#,
        )?;
        collect_lectures(&conn, &mut stmt, params![from, limit as i64])
    }

    pub fn lecture_count(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM lectures", [], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>), StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT MIN(start_time), MAX(start_time) FROM lectures",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "INSERT INTO scrape_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        days_planned: usize,
        days_failed: usize,
        lectures: usize,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               days_planned = ?, days_failed = ?, lectures_upserted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "partial" },
                days_planned as i64,
                days_failed as i64,
                lectures as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// (started_at, status, lectures_upserted) of the most recent run.
    pub fn last_scrape_run(&self) -> Result<Option<(NaiveDateTime, String, i64)>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT started_at, status, lectures_upserted FROM scrape_runs ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?, row.get::<_, Option<i64>>(2)?.unwrap_or(0)))),
            None => Ok(None),
        }
    }
}

fn collect_lectures(
    conn: &Connection,
    stmt: &mut duckdb::Statement<'_>,
    params: impl duckdb::Params,
) -> Result<Vec<StoredLecture>, StorageError> {
    let rows: Vec<(String, String, NaiveDateTime, NaiveDateTime, String)> = stmt
        .query_map(params, |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
        .collect::<Result<_, _>>()?;

    let mut rooms_stmt =
        conn.prepare("SELECT room FROM lecture_rooms WHERE lecture_id = ? ORDER BY room")?;
    let mut groups_stmt = conn
        .prepare("SELECT group_name FROM lecture_groups WHERE lecture_id = ? ORDER BY group_name")?;

    let mut lectures = Vec::with_capacity(rows.len());
    for (id, name, start, end, docents) in rows {
        let rooms: BTreeSet<String> = rooms_stmt
            .query_map(params![id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        let groups: BTreeSet<String> = groups_stmt
            .query_map(params![id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;

        lectures.push(StoredLecture {
            id: LectureId::from_hex(id),
            name,
            start,
            end,
            docents: serde_json::from_str(&docents)?,
            rooms,
            groups,
        });
    }
    Ok(lectures)
}

// Calls are short and local; they run inline on the calling task.
#[async_trait]
impl LectureStore for Repository {
    async fn delete_from(&self, from: NaiveDateTime) -> Result<usize, StorageError> {
        let removed = self.delete_from_sync(from)?;
        debug!("deleted {} lectures starting at or after {}", removed, from);
        Ok(removed)
    }

    async fn upsert(&self, id: &LectureId, lecture: &LectureRecord) -> Result<(), StorageError> {
        self.upsert_sync(id, lecture)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio_test::assert_ok;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn lecture(name: &str, start: NaiveDateTime, room: &str, group: &str) -> LectureRecord {
        LectureRecord {
            name: name.to_string(),
            day_label: start.format("%d.%m.%Y").to_string(),
            start,
            end: start + chrono::Duration::minutes(90),
            docents: vec!["Jane Doe".into()],
            room: room.to_string(),
            group: group.to_string(),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_creates_singleton_sets() {
        let repo = repo();
        let lec = lecture("Intro to Systems", at(1, 8, 0), "A1", "G1");
        let id = lec.identity();

        assert_ok!(repo.upsert(&id, &lec).await);

        let stored = repo.get_lecture(&id).unwrap().unwrap();
        assert_eq!(stored.name, "Intro to Systems");
        assert_eq!(stored.start, at(1, 8, 0));
        assert_eq!(stored.end, at(1, 9, 30));
        assert_eq!(stored.docents, vec!["Jane Doe"]);
        assert_eq!(stored.rooms, set(&["A1"]));
        assert_eq!(stored.groups, set(&["G1"]));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let repo = repo();
        let lec = lecture("Intro to Systems", at(1, 8, 0), "A1", "G1");
        let id = lec.identity();

        repo.upsert(&id, &lec).await.unwrap();
        repo.upsert(&id, &lec).await.unwrap();

        let stored = repo.get_lecture(&id).unwrap().unwrap();
        assert_eq!(stored.rooms, set(&["A1"]));
        assert_eq!(stored.groups, set(&["G1"]));
        assert_eq!(repo.lecture_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_union_accumulates_and_scalars_follow_latest() {
        let repo = repo();
        let first = lecture("Intro to Systems", at(1, 8, 0), "A1", "G1");
        let mut second = lecture("Intro to Systems", at(1, 8, 0), "B2", "G1");
        second.end = at(1, 10, 0);
        second.docents = vec!["John Roe".into(), "Jane Doe".into()];
        let id = first.identity();
        assert_eq!(id, second.identity());

        repo.upsert(&id, &first).await.unwrap();
        repo.upsert(&id, &second).await.unwrap();

        let stored = repo.get_lecture(&id).unwrap().unwrap();
        assert_eq!(stored.rooms, set(&["A1", "B2"]));
        assert_eq!(stored.groups, set(&["G1"]));
        assert_eq!(stored.end, at(1, 10, 0));
        assert_eq!(stored.docents, vec!["John Roe", "Jane Doe"]);
    }

    #[tokio::test]
    async fn test_delete_from_only_touches_the_window() {
        let repo = repo();
        let past = lecture("Past", at(1, 8, 0), "A1", "G1");
        let future = lecture("Future", at(3, 8, 0), "A1", "G1");
        repo.upsert(&past.identity(), &past).await.unwrap();
        repo.upsert(&future.identity(), &future).await.unwrap();

        let removed = repo.delete_from(at(2, 0, 0)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(repo.get_lecture(&past.identity()).unwrap().is_some());
        assert!(repo.get_lecture(&future.identity()).unwrap().is_none());

        // Sets start over after a clear.
        let again = lecture("Future", at(3, 8, 0), "C3", "G2");
        repo.upsert(&again.identity(), &again).await.unwrap();
        let stored = repo.get_lecture(&again.identity()).unwrap().unwrap();
        assert_eq!(stored.rooms, set(&["C3"]));
        assert_eq!(stored.groups, set(&["G2"]));
    }

    #[tokio::test]
    async fn test_upcoming_is_ordered() {
        let repo = repo();
        for lec in [
            lecture("Late", at(5, 14, 0), "A1", "G1"),
            lecture("Early", at(4, 8, 0), "A1", "G1"),
            lecture("Gone", at(1, 8, 0), "A1", "G1"),
        ] {
            repo.upsert(&lec.identity(), &lec).await.unwrap();
        }

        let names: Vec<String> = repo
            .upcoming(at(2, 0, 0), 10)
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["Early", "Late"]);
        assert_eq!(repo.date_range().unwrap(), (Some(at(1, 8, 0)), Some(at(5, 14, 0))));
    }

    #[test]
    fn test_scrape_run_log() {
        let repo = repo();
        let id = repo.begin_scrape_run().unwrap();
        repo.finish_scrape_run(id, 21, 1, 40, Some("1 day failed")).unwrap();

        let (_, status, lectures) = repo.last_scrape_run().unwrap().unwrap();
        assert_eq!(status, "partial");
        assert_eq!(lectures, 40);
    }

    #[test]
    fn test_migrations_are_rerunnable() {
        let repo = repo();
        assert_ok!(repo.run_migrations());
    }
}
