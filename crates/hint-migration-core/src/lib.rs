//! Domain model for moving hint records out of the legacy document store.
//!
//! This crate owns the persisted job/error shapes, the typed source filter and
//! page types, the legacy document decoding rules and the collaborator traits
//! the engine drives. It carries no I/O of its own apart from the in-memory
//! adapters in [`memory`].

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use ulid::Ulid;

mod legacy;
pub mod memory;
mod store;

pub use legacy::{
    decode_document, document_creation_instant, document_source_id, legacy_document_id,
    legacy_id_timestamp, DecodeFailure, RawDocument, UNKNOWN_SOURCE_ID,
};
pub use store::{ErrorStore, JobStore, SourceStore, TargetStore};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MigrationCoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid job transition: {0}")]
    Transition(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct JobId(pub Ulid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a job identifier from its ULID text form.
    ///
    /// # Errors
    /// Returns [`MigrationCoreError::Validation`] when `value` is not a ULID.
    pub fn parse(value: &str) -> Result<Self, MigrationCoreError> {
        Ulid::from_string(value)
            .map(Self)
            .map_err(|err| MigrationCoreError::Validation(format!("invalid job id {value}: {err}")))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ErrorId(pub Ulid);

impl ErrorId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses an error identifier from its ULID text form.
    ///
    /// # Errors
    /// Returns [`MigrationCoreError::Validation`] when `value` is not a ULID.
    pub fn parse(value: &str) -> Result<Self, MigrationCoreError> {
        Ulid::from_string(value).map(Self).map_err(|err| {
            MigrationCoreError::Validation(format!("invalid error id {value}: {err}"))
        })
    }
}

impl Default for ErrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ErrorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running,
    Completed,
    Broken,
}

impl JobState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Broken => "BROKEN",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "BROKEN" => Some(Self::Broken),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Migration,
    Fixing,
    Validation,
}

impl JobType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Migration => "MIGRATION",
            Self::Fixing => "FIXING",
            Self::Validation => "VALIDATION",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MIGRATION" => Some(Self::Migration),
            "FIXING" => Some(Self::Fixing),
            "VALIDATION" => Some(Self::Validation),
            _ => None,
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record failure categories kept in the error ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Decode,
    NotFound,
    Write,
    FieldMismatch,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "DECODE",
            Self::NotFound => "NOT_FOUND",
            Self::Write => "WRITE",
            Self::FieldMismatch => "FIELD_MISMATCH",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DECODE" => Some(Self::Decode),
            "NOT_FOUND" => Some(Self::NotFound),
            "WRITE" => Some(Self::Write),
            "FIELD_MISMATCH" => Some(Self::FieldMismatch),
            _ => None,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HintCategory {
    Info,
    Warning,
    Error,
    Blocker,
}

impl HintCategory {
    pub const ALL: [Self; 4] = [Self::Info, Self::Warning, Self::Error, Self::Blocker];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Blocker => "BLOCKER",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "BLOCKER" => Some(Self::Blocker),
            _ => None,
        }
    }
}

impl Display for HintCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive creation-time window. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DateRange {
    #[serde(with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
}

impl DateRange {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Builds a range, rejecting windows whose start lies after their end.
    ///
    /// # Errors
    /// Returns [`MigrationCoreError::Validation`] when `start > end`.
    pub fn new(
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
    ) -> Result<Self, MigrationCoreError> {
        if let (Some(lower), Some(upper)) = (start, end) {
            if lower > upper {
                return Err(MigrationCoreError::Validation(
                    "range start MUST NOT be after range end".to_string(),
                ));
            }
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    #[must_use]
    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.start.map_or(true, |start| instant >= start)
            && self.end.map_or(true, |end| instant <= end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationJob {
    pub id: JobId,
    pub job_type: JobType,
    pub state: JobState,
    pub range: DateRange,
    pub total_items: u64,
    pub processed_items: u64,
    pub message: Option<String>,
    /// Job this one repairs or checks, if any.
    pub parent_job_id: Option<JobId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

impl MigrationJob {
    #[must_use]
    pub fn new(job_type: JobType, range: DateRange) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            state: JobState::Running,
            range,
            total_items: 0,
            processed_items: 0,
            message: None,
            parent_job_id: None,
            created_at: now_utc(),
            finished_at: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent_job_id = Some(parent);
        self
    }

    /// Advances the processed counter. The counter never moves backwards.
    pub fn record_progress(&mut self, items: u64) {
        self.processed_items = self.processed_items.saturating_add(items);
    }

    /// Moves a running job into a terminal state.
    ///
    /// # Errors
    /// Returns [`MigrationCoreError::Transition`] when the job already left
    /// `RUNNING` or when `state` is not terminal.
    pub fn finish(
        &mut self,
        state: JobState,
        message: impl Into<String>,
    ) -> Result<(), MigrationCoreError> {
        if self.state.is_terminal() {
            return Err(MigrationCoreError::Transition(format!(
                "job {} is already {}",
                self.id, self.state
            )));
        }
        if !state.is_terminal() {
            return Err(MigrationCoreError::Transition(format!(
                "job {} can only finish as COMPLETED or BROKEN",
                self.id
            )));
        }

        self.state = state;
        self.message = Some(message.into());
        self.finished_at = Some(now_utc());
        Ok(())
    }
}

/// A ledger row for one record that could not be migrated or did not reconcile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationError {
    pub id: ErrorId,
    /// Job during which this row was last written. Resolution leaves it untouched.
    pub job_id: JobId,
    pub source_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub resolved: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl MigrationError {
    #[must_use]
    pub fn new(
        job_id: JobId,
        source_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: ErrorId::new(),
            job_id,
            source_id: source_id.into(),
            kind,
            message: message.into(),
            resolved: false,
            recorded_at: now_utc(),
        }
    }

    pub fn resolve(&mut self) {
        self.resolved = true;
    }

    /// Rewrites the failure details after another failed attempt in `job_id`.
    pub fn reraise(&mut self, job_id: JobId, kind: ErrorKind, message: impl Into<String>) {
        self.job_id = job_id;
        self.kind = kind;
        self.message = message.into();
        self.recorded_at = now_utc();
    }
}

/// Typed view of one legacy hint document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRecord {
    pub source_id: String,
    pub hint_source: String,
    pub body: String,
    pub category: HintCategory,
    pub show_to_user: bool,
    pub process_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub creation_date: Option<OffsetDateTime>,
    pub process_version: Option<String>,
    pub resource_id: Option<String>,
}

/// Relational representation of a hint. `source_id` only links back to the
/// legacy document for idempotency and reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetRecord {
    pub id: Option<i64>,
    pub source_id: Option<String>,
    pub hint_source: String,
    pub message: String,
    pub category: HintCategory,
    pub show_to_user: bool,
    pub process_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_date: OffsetDateTime,
    pub process_version: Option<String>,
    pub resource_id: Option<String>,
}

impl TargetRecord {
    /// Maps a source record onto the target shape and stamps its `source_id`.
    #[must_use]
    pub fn from_source(record: &SourceRecord, creation_date: OffsetDateTime) -> Self {
        Self {
            id: None,
            source_id: Some(record.source_id.clone()),
            hint_source: record.hint_source.clone(),
            message: record.body.clone(),
            category: record.category,
            show_to_user: record.show_to_user,
            process_id: record.process_id.clone(),
            creation_date,
            process_version: record.process_version.clone(),
            resource_id: record.resource_id.clone(),
        }
    }
}

/// Query over the legacy store: a creation window plus required-field checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct SourceFilter {
    pub range: DateRange,
    pub require_category: bool,
    pub require_body: bool,
    pub require_process_id: bool,
    pub require_source: bool,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self::for_range(DateRange::unbounded())
    }
}

impl SourceFilter {
    #[must_use]
    pub fn for_range(range: DateRange) -> Self {
        Self {
            range,
            require_category: true,
            require_body: true,
            require_process_id: true,
            require_source: true,
        }
    }

    /// Evaluates the filter against a raw document.
    #[must_use]
    pub fn matches_document(&self, document: &RawDocument) -> bool {
        let present = |key: &str| document.get(key).is_some_and(|value| !value.is_null());

        if self.require_category
            && !document
                .get(legacy::CATEGORY_KEY)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|raw| HintCategory::parse(raw).is_some())
        {
            return false;
        }
        if self.require_body && !present(legacy::BODY_KEY) {
            return false;
        }
        if self.require_process_id && !present(legacy::PROCESS_ID_KEY) {
            return false;
        }
        if self.require_source && !present(legacy::SOURCE_KEY) {
            return false;
        }
        if self.range.is_unbounded() {
            return true;
        }

        document_creation_instant(document).is_some_and(|instant| self.range.contains(instant))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PageRequest {
    pub number: u64,
    pub size: usize,
}

impl PageRequest {
    #[must_use]
    pub fn first(size: usize) -> Self {
        Self { number: 0, size }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self {
            number: self.number + 1,
            size: self.size,
        }
    }

    #[must_use]
    pub fn offset(self) -> u64 {
        self.number.saturating_mul(self.size as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub request: PageRequest,
    pub items: Vec<T>,
    pub next: Option<PageRequest>,
}

impl<T> Page<T> {
    /// Wraps one fetched slice. A full slice implies another page may follow.
    #[must_use]
    pub fn new(request: PageRequest, items: Vec<T>) -> Self {
        let next = (request.size > 0 && items.len() == request.size).then(|| request.next());
        Self {
            request,
            items,
            next,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct MigrationConfig {
    pub batch_size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl MigrationConfig {
    /// Builds a validated configuration with the given page size.
    ///
    /// # Errors
    /// Returns [`MigrationCoreError::Configuration`] when the size is out of bounds.
    pub fn with_batch_size(batch_size: usize) -> Result<Self, MigrationCoreError> {
        let config = Self { batch_size };
        config.validate()?;
        Ok(config)
    }

    /// Validates page-size bounds.
    ///
    /// # Errors
    /// Returns [`MigrationCoreError::Configuration`] when `batch_size` is zero
    /// or above [`MAX_BATCH_SIZE`].
    pub fn validate(&self) -> Result<(), MigrationCoreError> {
        if self.batch_size == 0 {
            return Err(MigrationCoreError::Configuration(
                "batch_size MUST be >= 1".to_string(),
            ));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(MigrationCoreError::Configuration(format!(
                "batch_size MUST be <= {MAX_BATCH_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Parses a timestamp given either as RFC3339 or as an offset-less ISO-8601
/// local date-time, which is read as UTC.
///
/// # Errors
/// Returns [`MigrationCoreError::Validation`] when neither form parses.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, MigrationCoreError> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed.to_offset(UtcOffset::UTC));
    }

    PrimitiveDateTime::parse(value, &Iso8601::DEFAULT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|err| MigrationCoreError::Validation(format!("invalid timestamp {value}: {err}")))
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`MigrationCoreError::Validation`] when parsing fails or the
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, MigrationCoreError> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| MigrationCoreError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(MigrationCoreError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`MigrationCoreError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, MigrationCoreError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| {
            MigrationCoreError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
