#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use hint_migration_core::{
    format_rfc3339, now_utc, parse_rfc3339_utc, DateRange, ErrorId, ErrorKind, ErrorStore,
    HintCategory, JobId, JobState, JobStore, JobType, MigrationError, MigrationJob, Page,
    PageRequest, TargetRecord, TargetStore,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

mod legacy;

pub use legacy::SqliteLegacyStore;

const MIGRATION_SCHEMA_VERSION: i64 = 1;

const SCHEMA_MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS hints (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  source_id TEXT UNIQUE,
  hint_source TEXT NOT NULL,
  message TEXT NOT NULL,
  hint_category TEXT NOT NULL CHECK (
    hint_category IN ('INFO', 'WARNING', 'ERROR', 'BLOCKER')
  ),
  show_to_user INTEGER NOT NULL CHECK (show_to_user IN (0, 1)),
  process_id TEXT NOT NULL,
  process_version TEXT,
  resource_id TEXT,
  creation_date TEXT NOT NULL,
  creation_date_unix_s INTEGER NOT NULL,
  creation_date_subsec_ns INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_hints_creation_source
  ON hints(creation_date_unix_s, creation_date_subsec_ns, source_id);

CREATE TABLE IF NOT EXISTS migration_jobs (
  job_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL UNIQUE,
  job_type TEXT NOT NULL CHECK (job_type IN ('MIGRATION', 'FIXING', 'VALIDATION')),
  state TEXT NOT NULL CHECK (state IN ('RUNNING', 'COMPLETED', 'BROKEN')),
  range_start TEXT,
  range_end TEXT,
  total_items INTEGER NOT NULL CHECK (total_items >= 0),
  processed_items INTEGER NOT NULL CHECK (processed_items >= 0),
  message TEXT,
  parent_job_id TEXT,
  created_at TEXT NOT NULL,
  finished_at TEXT
);

CREATE TRIGGER IF NOT EXISTS trg_migration_jobs_terminal_frozen
BEFORE UPDATE ON migration_jobs
WHEN OLD.state <> 'RUNNING'
BEGIN
  SELECT RAISE(FAIL, 'migration_jobs row is terminal and cannot change');
END;

CREATE TRIGGER IF NOT EXISTS trg_migration_jobs_no_delete
BEFORE DELETE ON migration_jobs
BEGIN
  SELECT RAISE(FAIL, 'migration_jobs rows cannot be deleted');
END;

CREATE TABLE IF NOT EXISTS migration_errors (
  error_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  error_id TEXT NOT NULL UNIQUE,
  job_id TEXT NOT NULL,
  source_id TEXT NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('DECODE', 'NOT_FOUND', 'WRITE', 'FIELD_MISMATCH')),
  message TEXT NOT NULL,
  resolved INTEGER NOT NULL CHECK (resolved IN (0, 1)),
  recorded_at TEXT NOT NULL,
  FOREIGN KEY (job_id) REFERENCES migration_jobs(job_id)
);

CREATE INDEX IF NOT EXISTS idx_migration_errors_job_resolved
  ON migration_errors(job_id, resolved);

CREATE TRIGGER IF NOT EXISTS trg_migration_errors_resolved_monotonic
BEFORE UPDATE ON migration_errors
WHEN OLD.resolved = 1 AND NEW.resolved = 0
BEGIN
  SELECT RAISE(FAIL, 'migration_errors.resolved cannot revert to 0');
END;
";

const JOB_COLUMNS: &str = "job_id, job_type, state, range_start, range_end, total_items,
  processed_items, message, parent_job_id, created_at, finished_at";

const ERROR_COLUMNS: &str =
    "error_id, job_id, source_id, kind, message, resolved, recorded_at";

const HINT_COLUMNS: &str = "id, source_id, hint_source, message, hint_category, show_to_user,
  process_id, process_version, resource_id, creation_date";

/// Relational side of the migration: the `hints` table plus the job and error
/// ledgers.
pub struct SqliteMigrationStore {
    conn: Mutex<Connection>,
}

impl SqliteMigrationStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        ensure_schema_migrations(&conn)?;

        conn.execute_batch(SCHEMA_MIGRATION_V1)
            .context("failed to apply migration store schema")?;

        register_schema_version(&conn, MIGRATION_SCHEMA_VERSION)?;
        tracing::debug!(version = MIGRATION_SCHEMA_VERSION, "migration store schema ready");
        Ok(())
    }

    /// Looks a migrated hint up by its legacy source id.
    pub fn find_hint_by_source_id(&self, source_id: &str) -> Result<Option<TargetRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {HINT_COLUMNS} FROM hints WHERE source_id = ?1"),
            params![source_id],
            parse_hint_row,
        )
        .optional()
        .with_context(|| format!("failed to load hint with source_id {source_id}"))
    }

    #[cfg(test)]
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn.lock())
    }
}

impl TargetStore for SqliteMigrationStore {
    fn exists_by_source_id(&self, source_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM hints WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check hint existence")?;
        Ok(found.is_some())
    }

    fn save(&self, record: &TargetRecord) -> Result<i64> {
        let creation_date = format_rfc3339(record.creation_date)?;
        let (creation_s, creation_subsec) = instant_key(record.creation_date);

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hints(
               source_id, hint_source, message, hint_category, show_to_user,
               process_id, process_version, resource_id, creation_date,
               creation_date_unix_s, creation_date_subsec_ns
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.source_id,
                record.hint_source,
                record.message,
                record.category.as_str(),
                record.show_to_user,
                record.process_id,
                record.process_version,
                record.resource_id,
                creation_date,
                creation_s,
                creation_subsec,
            ],
        )
        .context("failed to insert hint")?;

        Ok(conn.last_insert_rowid())
    }

    fn count_by_source_id_present(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM hints WHERE source_id IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .context("failed to count migrated hints")?;
        u64::try_from(count).with_context(|| format!("invalid hint count: {count}"))
    }

    fn find_page_by_range_and_source_id_present(
        &self,
        range: &DateRange,
        request: PageRequest,
    ) -> Result<Page<TargetRecord>> {
        let bounds = RangeKeys::from_range(range);
        let (limit, offset) = limit_offset(request)?;

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {HINT_COLUMNS} FROM hints
             WHERE source_id IS NOT NULL
               AND {}
             ORDER BY source_id ASC
             LIMIT ?5 OFFSET ?6",
            range_clause("creation_date_unix_s", "creation_date_subsec_ns")
        ))?;
        let rows = stmt.query_map(
            params![
                bounds.start_s,
                bounds.start_subsec,
                bounds.end_s,
                bounds.end_subsec,
                limit,
                offset
            ],
            parse_hint_row,
        )?;
        let items = collect_rows(rows).context("failed to page migrated hints")?;

        Ok(Page::new(request, items))
    }
}

impl JobStore for SqliteMigrationStore {
    fn save_job(&self, job: &MigrationJob) -> Result<()> {
        let range_start = job.range.start.map(format_rfc3339).transpose()?;
        let range_end = job.range.end.map(format_rfc3339).transpose()?;
        let created_at = format_rfc3339(job.created_at)?;
        let finished_at = job.finished_at.map(format_rfc3339).transpose()?;
        let total = i64::try_from(job.total_items).context("total_items out of range")?;
        let processed = i64::try_from(job.processed_items).context("processed_items out of range")?;

        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO migration_jobs({JOB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(job_id) DO UPDATE SET
                   state = excluded.state,
                   parent_job_id = COALESCE(migration_jobs.parent_job_id, excluded.parent_job_id),
                   total_items = excluded.total_items,
                   processed_items = excluded.processed_items,
                   message = excluded.message,
                   finished_at = excluded.finished_at"
            ),
            params![
                job.id.to_string(),
                job.job_type.as_str(),
                job.state.as_str(),
                range_start,
                range_end,
                total,
                processed,
                job.message,
                job.parent_job_id.map(|id| id.to_string()),
                created_at,
                finished_at,
            ],
        )
        .with_context(|| format!("failed to save job {}", job.id))?;

        Ok(())
    }

    fn find_job(&self, id: JobId) -> Result<Option<MigrationJob>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM migration_jobs WHERE job_id = ?1"),
            params![id.to_string()],
            parse_job_row,
        )
        .optional()
        .with_context(|| format!("failed to load job {id}"))
    }

    fn list_jobs(&self) -> Result<Vec<MigrationJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM migration_jobs ORDER BY job_seq ASC"
        ))?;
        let rows = stmt.query_map([], parse_job_row)?;
        collect_rows(rows).context("failed to list jobs")
    }
}

impl ErrorStore for SqliteMigrationStore {
    fn save_error(&self, error: &MigrationError) -> Result<()> {
        let recorded_at = format_rfc3339(error.recorded_at)?;

        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO migration_errors({ERROR_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(error_id) DO UPDATE SET
                   job_id = excluded.job_id,
                   kind = excluded.kind,
                   message = excluded.message,
                   resolved = excluded.resolved,
                   recorded_at = excluded.recorded_at"
            ),
            params![
                error.id.to_string(),
                error.job_id.to_string(),
                error.source_id,
                error.kind.as_str(),
                error.message,
                error.resolved,
                recorded_at,
            ],
        )
        .with_context(|| format!("failed to save error {}", error.id))?;

        Ok(())
    }

    fn find_unresolved_by_job(&self, job_id: JobId) -> Result<Vec<MigrationError>> {
        self.list_errors(Some(job_id), true)
    }

    fn find_error(&self, id: ErrorId) -> Result<Option<MigrationError>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ERROR_COLUMNS} FROM migration_errors WHERE error_id = ?1"),
            params![id.to_string()],
            parse_error_row,
        )
        .optional()
        .with_context(|| format!("failed to load error {id}"))
    }

    fn list_errors(&self, job_id: Option<JobId>, unresolved_only: bool) -> Result<Vec<MigrationError>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ERROR_COLUMNS} FROM migration_errors
             WHERE (?1 IS NULL OR job_id = ?1)
               AND (?2 = 0 OR resolved = 0)
             ORDER BY error_seq ASC"
        ))?;
        let rows = stmt.query_map(
            params![job_id.map(|id| id.to_string()), unresolved_only],
            parse_error_row,
        )?;
        collect_rows(rows).context("failed to list errors")
    }
}

pub(crate) fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .context("failed to configure sqlite pragmas")?;

    Ok(conn)
}

pub(crate) fn ensure_schema_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .context("failed to ensure schema_migrations exists")
}

pub(crate) fn register_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to register schema migration {version}"))?;
    Ok(())
}

/// Sortable column pair for an instant: whole unix seconds, then the
/// sub-second nanoseconds.
pub(crate) fn instant_key(value: OffsetDateTime) -> (i64, i64) {
    (value.unix_timestamp(), i64::from(value.nanosecond()))
}

/// Inclusive range bounds split into [`instant_key`] parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RangeKeys {
    pub(crate) start_s: Option<i64>,
    pub(crate) start_subsec: Option<i64>,
    pub(crate) end_s: Option<i64>,
    pub(crate) end_subsec: Option<i64>,
}

impl RangeKeys {
    pub(crate) fn from_range(range: &DateRange) -> Self {
        let start = range.start.map(instant_key);
        let end = range.end.map(instant_key);
        Self {
            start_s: start.map(|(seconds, _)| seconds),
            start_subsec: start.map(|(_, subsec)| subsec),
            end_s: end.map(|(seconds, _)| seconds),
            end_subsec: end.map(|(_, subsec)| subsec),
        }
    }
}

/// Range predicate over a seconds/subsec column pair, bound to ?1..?4 in
/// [`RangeKeys`] field order. Rows with a NULL instant fail any set bound.
pub(crate) fn range_clause(seconds_column: &str, subsec_column: &str) -> String {
    format!(
        "(?1 IS NULL OR ({seconds_column}, {subsec_column}) >= (?1, ?2))
         AND (?3 IS NULL OR ({seconds_column}, {subsec_column}) <= (?3, ?4))"
    )
}

pub(crate) fn limit_offset(request: PageRequest) -> Result<(i64, i64)> {
    let limit = i64::try_from(request.size).context("page size out of range")?;
    let offset = i64::try_from(request.offset()).context("page offset out of range")?;
    Ok((limit, offset))
}

pub(crate) fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

pub(crate) fn invalid_column(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn timestamp_column(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(column)?;
    parse_rfc3339_utc(&raw).map_err(|err| invalid_column(column, err.to_string()))
}

fn optional_timestamp_column(
    row: &rusqlite::Row<'_>,
    column: usize,
) -> rusqlite::Result<Option<OffsetDateTime>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|value| parse_rfc3339_utc(&value).map_err(|err| invalid_column(column, err.to_string())))
        .transpose()
}

fn count_column(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(column)?;
    u64::try_from(raw).map_err(|_| invalid_column(column, format!("negative counter: {raw}")))
}

fn job_id_column(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<JobId> {
    let raw: String = row.get(column)?;
    JobId::parse(&raw).map_err(|err| invalid_column(column, err.to_string()))
}

fn parse_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MigrationJob> {
    let job_type_raw: String = row.get(1)?;
    let job_type = JobType::parse(&job_type_raw)
        .ok_or_else(|| invalid_column(1, format!("unknown job_type: {job_type_raw}")))?;
    let state_raw: String = row.get(2)?;
    let state = JobState::parse(&state_raw)
        .ok_or_else(|| invalid_column(2, format!("unknown state: {state_raw}")))?;
    let parent_raw: Option<String> = row.get(8)?;
    let parent_job_id = parent_raw
        .map(|raw| JobId::parse(&raw).map_err(|err| invalid_column(8, err.to_string())))
        .transpose()?;

    Ok(MigrationJob {
        id: job_id_column(row, 0)?,
        job_type,
        state,
        range: DateRange {
            start: optional_timestamp_column(row, 3)?,
            end: optional_timestamp_column(row, 4)?,
        },
        total_items: count_column(row, 5)?,
        processed_items: count_column(row, 6)?,
        message: row.get(7)?,
        parent_job_id,
        created_at: timestamp_column(row, 9)?,
        finished_at: optional_timestamp_column(row, 10)?,
    })
}

fn parse_error_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MigrationError> {
    let id_raw: String = row.get(0)?;
    let id = ErrorId::parse(&id_raw).map_err(|err| invalid_column(0, err.to_string()))?;
    let kind_raw: String = row.get(3)?;
    let kind = ErrorKind::parse(&kind_raw)
        .ok_or_else(|| invalid_column(3, format!("unknown error kind: {kind_raw}")))?;

    Ok(MigrationError {
        id,
        job_id: job_id_column(row, 1)?,
        source_id: row.get(2)?,
        kind,
        message: row.get(4)?,
        resolved: row.get(5)?,
        recorded_at: timestamp_column(row, 6)?,
    })
}

fn parse_hint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TargetRecord> {
    let category_raw: String = row.get(4)?;
    let category = HintCategory::parse(&category_raw)
        .ok_or_else(|| invalid_column(4, format!("unknown hint_category: {category_raw}")))?;

    Ok(TargetRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        hint_source: row.get(2)?,
        message: row.get(3)?,
        category,
        show_to_user: row.get(5)?,
        process_id: row.get(6)?,
        process_version: row.get(7)?,
        resource_id: row.get(8)?,
        creation_date: timestamp_column(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn fixture_store() -> SqliteMigrationStore {
        let store = must(SqliteMigrationStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn at(value: &str) -> OffsetDateTime {
        must(parse_rfc3339_utc(value).map_err(anyhow::Error::new))
    }

    fn hint(source_id: &str, created: &str) -> TargetRecord {
        TargetRecord {
            id: None,
            source_id: Some(source_id.to_string()),
            hint_source: "underwriting".to_string(),
            message: format!("hint {source_id}"),
            category: HintCategory::Blocker,
            show_to_user: true,
            process_id: "proc-9".to_string(),
            creation_date: at(created),
            process_version: Some("2".to_string()),
            resource_id: None,
        }
    }

    #[test]
    fn migrate_is_repeatable() {
        let store = fixture_store();
        must(store.migrate());

        let versions: i64 = must(store.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
                .map_err(anyhow::Error::new)
        }));
        assert_eq!(versions, 1);
    }

    #[test]
    fn hints_round_trip_and_source_id_is_unique() {
        let store = fixture_store();
        let record = hint("b1", "2024-02-01T10:00:00Z");

        let id = must(store.save(&record));
        assert!(must(store.exists_by_source_id("b1")));
        assert!(!must(store.exists_by_source_id("zz")));

        let loaded = must(store.find_hint_by_source_id("b1"));
        assert_eq!(loaded, Some(TargetRecord { id: Some(id), ..record.clone() }));

        let duplicate = match store.save(&record) {
            Ok(id) => panic!("duplicate insert should fail, got id {id}"),
            Err(err) => err,
        };
        assert!(format!("{duplicate:#}").contains("UNIQUE"));
    }

    #[test]
    fn range_pages_are_inclusive_and_sorted() {
        let store = fixture_store();
        must(store.save(&hint("c", "2024-01-31T23:59:59Z")));
        must(store.save(&hint("a", "2024-01-01T00:00:00Z")));
        must(store.save(&hint("b", "2024-01-15T00:00:00Z")));
        must(store.save(&hint("d", "2024-02-01T00:00:00Z")));
        let mut orphan = hint("ignored", "2024-01-10T00:00:00Z");
        orphan.source_id = None;
        must(store.save(&orphan));

        let range = must(
            DateRange::new(Some(at("2024-01-01T00:00:00Z")), Some(at("2024-01-31T23:59:59Z")))
                .map_err(anyhow::Error::new),
        );

        let first = must(store.find_page_by_range_and_source_id_present(&range, PageRequest::first(2)));
        let ids: Vec<_> = first.items.iter().filter_map(|record| record.source_id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let next = first.next.unwrap_or_else(|| panic!("expected second page"));
        let second = must(store.find_page_by_range_and_source_id_present(&range, next));
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next, None);

        assert_eq!(must(store.count_by_source_id_present()), 4);
    }

    #[test]
    fn terminal_job_rows_cannot_change() {
        let store = fixture_store();
        let mut job = MigrationJob::new(JobType::Validation, DateRange::unbounded());
        job.total_items = 4;
        must(store.save_job(&job));

        job.record_progress(4);
        must(job.finish(JobState::Completed, "done").map_err(anyhow::Error::new));
        must(store.save_job(&job));

        let loaded = must(store.find_job(job.id));
        assert_eq!(loaded.as_ref().map(|found| found.state), Some(JobState::Completed));
        assert_eq!(loaded.map(|found| found.processed_items), Some(4));

        job.processed_items = 99;
        assert!(store.save_job(&job).is_err());

        let update = store.with_connection(|conn| {
            conn.execute(
                "UPDATE migration_jobs SET message = 'mutated' WHERE job_id = ?1",
                params![job.id.to_string()],
            )
        });
        assert!(update.is_err());
    }

    #[test]
    fn errors_resolve_monotonically_and_filter_by_job() {
        let store = fixture_store();
        let job = MigrationJob::new(JobType::Migration, DateRange::unbounded());
        let fix = MigrationJob::new(JobType::Fixing, DateRange::unbounded()).with_parent(job.id);
        must(store.save_job(&job));
        must(store.save_job(&fix));

        let mut first = MigrationError::new(job.id, "a", ErrorKind::Write, "boom");
        let second = MigrationError::new(job.id, "b", ErrorKind::Decode, "bad");
        must(store.save_error(&first));
        must(store.save_error(&second));
        assert_eq!(must(store.find_unresolved_by_job(job.id)).len(), 2);

        first.reraise(fix.id, ErrorKind::NotFound, "gone");
        must(store.save_error(&first));
        assert_eq!(must(store.find_unresolved_by_job(job.id)).len(), 1);
        assert_eq!(must(store.list_errors(Some(fix.id), false)).len(), 1);

        first.resolve();
        must(store.save_error(&first));
        assert!(must(store.find_unresolved_by_job(fix.id)).is_empty());
        assert_eq!(
            must(store.find_error(first.id)).map(|found| (found.resolved, found.kind)),
            Some((true, ErrorKind::NotFound))
        );

        first.resolved = false;
        assert!(store.save_error(&first).is_err());
        assert_eq!(must(store.list_errors(None, true)).len(), 1);
        assert_eq!(must(store.list_errors(None, false)).len(), 2);
    }

    #[test]
    fn parent_link_and_range_survive_storage() {
        let store = fixture_store();
        let parent = MigrationJob::new(JobType::Migration, DateRange::unbounded());
        let range = DateRange {
            start: Some(at("2023-01-01T00:00:00Z")),
            end: None,
        };
        let child = MigrationJob::new(JobType::Validation, range).with_parent(parent.id);
        must(store.save_job(&parent));
        must(store.save_job(&child));

        let jobs = must(store.list_jobs());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].parent_job_id, Some(parent.id));
        assert_eq!(jobs[1].range, range);
    }

    #[test]
    fn parent_link_set_after_creation_is_stored() {
        let store = fixture_store();
        let parent = MigrationJob::new(JobType::Migration, DateRange::unbounded());
        let mut fix = MigrationJob::new(JobType::Fixing, DateRange::unbounded());
        must(store.save_job(&parent));
        must(store.save_job(&fix));

        fix.parent_job_id = Some(parent.id);
        fix.total_items = 3;
        must(store.save_job(&fix));

        let loaded = must(store.find_job(fix.id));
        assert_eq!(loaded.as_ref().and_then(|job| job.parent_job_id), Some(parent.id));
        assert_eq!(loaded.map(|job| job.total_items), Some(3));

        fix.parent_job_id = None;
        must(store.save_job(&fix));
        assert_eq!(must(store.find_job(fix.id)).and_then(|job| job.parent_job_id), Some(parent.id));
    }

    #[test]
    fn far_future_hints_are_stored_and_paged() {
        let store = fixture_store();
        must(store.save(&hint("a", "2024-01-01T00:00:00Z")));
        must(store.save(&hint("b", "2300-06-01T12:00:00.5Z")));

        let range = DateRange {
            start: Some(at("2300-06-01T12:00:00.5Z")),
            end: Some(at("9999-12-31T23:59:59Z")),
        };
        let page = must(store.find_page_by_range_and_source_id_present(&range, PageRequest::first(10)));
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].source_id.as_deref(), Some("b"));
        assert_eq!(page.items[0].creation_date, at("2300-06-01T12:00:00.5Z"));
    }
}
