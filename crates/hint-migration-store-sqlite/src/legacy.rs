use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use hint_migration_core::{
    document_creation_instant, legacy_document_id, HintCategory, Page, PageRequest, RawDocument,
    SourceFilter, SourceRecord, SourceStore,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    collect_rows, ensure_schema_migrations, instant_key, limit_offset, open_connection,
    range_clause, register_schema_version, RangeKeys,
};

const LEGACY_SCHEMA_VERSION: i64 = 101;

const SCHEMA_LEGACY_V1: &str = r"
CREATE TABLE IF NOT EXISTS legacy_hints (
  doc_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  source_id TEXT UNIQUE,
  created_unix_s INTEGER,
  created_subsec_ns INTEGER,
  document TEXT NOT NULL CHECK (json_valid(document))
);

CREATE INDEX IF NOT EXISTS idx_legacy_hints_created
  ON legacy_hints(created_unix_s, created_subsec_ns);
";

/// WHERE clause for [`SourceFilter`]. Parameters ?1..?8 are bound by
/// [`filter_params`].
fn filter_clause() -> String {
    let categories = HintCategory::ALL
        .iter()
        .map(|category| format!("'{}'", category.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}
  AND (?5 = 0 OR json_extract(document, '$.hintCategory') IN ({categories}))
  AND (?6 = 0 OR json_extract(document, '$.hintTextOriginal') IS NOT NULL)
  AND (?7 = 0 OR json_extract(document, '$.processId') IS NOT NULL)
  AND (?8 = 0 OR json_extract(document, '$.hintSource') IS NOT NULL)",
        range_clause("created_unix_s", "created_subsec_ns")
    )
}

/// Document store holding legacy hints as raw JSON, one row per document.
pub struct SqliteLegacyStore {
    conn: Mutex<Connection>,
}

impl SqliteLegacyStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        ensure_schema_migrations(&conn)?;
        conn.execute_batch(SCHEMA_LEGACY_V1)
            .context("failed to apply legacy store schema")?;
        register_schema_version(&conn, LEGACY_SCHEMA_VERSION)?;
        Ok(())
    }

    /// Stores one document. The id and creation instant are indexed when present.
    pub fn insert_document(&self, document: &RawDocument) -> Result<()> {
        let conn = self.conn.lock();
        insert_row(&conn, document)
    }

    /// Imports newline-delimited JSON documents and returns how many were stored.
    /// Blank lines are skipped. The file is imported in one transaction, so a
    /// bad line leaves the store untouched.
    pub fn import_jsonl(&self, path: &Path) -> Result<usize> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let reader = std::io::BufReader::new(file);

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("failed to begin legacy import transaction")?;

        let mut imported = 0_usize;
        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let document: RawDocument = serde_json::from_str(&line)
                .with_context(|| format!("line {} is not valid JSON", index + 1))?;
            insert_row(&tx, &document).with_context(|| format!("failed to import line {}", index + 1))?;
            imported += 1;
        }

        tx.commit().context("failed to commit legacy import")?;
        tracing::info!(path = %path.display(), imported, "imported legacy documents");
        Ok(imported)
    }
}

fn insert_row(conn: &Connection, document: &RawDocument) -> Result<()> {
    let source_id = legacy_document_id(document);
    let created = document_creation_instant(document).map(instant_key);
    let payload = serde_json::to_string(document).context("failed to serialize document")?;

    conn.execute(
        "INSERT INTO legacy_hints(source_id, created_unix_s, created_subsec_ns, document)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            source_id,
            created.map(|(seconds, _)| seconds),
            created.map(|(_, subsec)| subsec),
            payload
        ],
    )
    .with_context(|| {
        format!(
            "failed to insert legacy document {}",
            source_id.as_deref().unwrap_or("<without id>")
        )
    })?;
    Ok(())
}

type FilterParams = (Option<i64>, Option<i64>, Option<i64>, Option<i64>, bool, bool, bool, bool);

fn filter_params(filter: &SourceFilter) -> FilterParams {
    let bounds = RangeKeys::from_range(&filter.range);
    (
        bounds.start_s,
        bounds.start_subsec,
        bounds.end_s,
        bounds.end_subsec,
        filter.require_category,
        filter.require_body,
        filter.require_process_id,
        filter.require_source,
    )
}

fn parse_document(raw: &str) -> rusqlite::Result<RawDocument> {
    serde_json::from_str(raw).map_err(|err| crate::invalid_column(0, err.to_string()))
}

impl SourceStore for SqliteLegacyStore {
    fn count(&self, filter: &SourceFilter) -> Result<u64> {
        let (start_s, start_subsec, end_s, end_subsec, category, body, process, source) =
            filter_params(filter);

        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM legacy_hints WHERE {}", filter_clause()),
                params![start_s, start_subsec, end_s, end_subsec, category, body, process, source],
                |row| row.get(0),
            )
            .context("failed to count legacy documents")?;
        u64::try_from(count).with_context(|| format!("invalid document count: {count}"))
    }

    fn find_page(&self, filter: &SourceFilter, request: PageRequest) -> Result<Page<RawDocument>> {
        let (start_s, start_subsec, end_s, end_subsec, category, body, process, source) =
            filter_params(filter);
        let (limit, offset) = limit_offset(request)?;

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT document FROM legacy_hints
             WHERE {}
             ORDER BY source_id ASC, doc_seq ASC
             LIMIT ?9 OFFSET ?10",
            filter_clause()
        ))?;
        let rows = stmt.query_map(
            params![
                start_s,
                start_subsec,
                end_s,
                end_subsec,
                category,
                body,
                process,
                source,
                limit,
                offset
            ],
            |row| {
                let raw: String = row.get(0)?;
                parse_document(&raw)
            },
        )?;
        let items = collect_rows(rows).context("failed to page legacy documents")?;

        Ok(Page::new(request, items))
    }

    fn find_by_id(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let raw: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT document FROM legacy_hints WHERE source_id = ?1",
                params![source_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to load legacy document {source_id}"))?
        };

        let Some(raw) = raw else {
            return Ok(None);
        };
        let document: RawDocument = serde_json::from_str(&raw)
            .with_context(|| format!("stored legacy document {source_id} is not valid JSON"))?;

        self.decode(&document).map(Some).map_err(anyhow::Error::new)
    }
}
