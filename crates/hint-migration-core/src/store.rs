use crate::{
    decode_document, DateRange, ErrorId, JobId, MigrationError, MigrationJob, Page, PageRequest,
    RawDocument, SourceFilter, SourceRecord, TargetRecord,
};

/// Read access to the legacy document store.
pub trait SourceStore: Send + Sync {
    /// Number of documents matching `filter`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn count(&self, filter: &SourceFilter) -> anyhow::Result<u64>;

    /// One page of matching documents, ordered by source id ascending.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn find_page(
        &self,
        filter: &SourceFilter,
        request: PageRequest,
    ) -> anyhow::Result<Page<RawDocument>>;

    /// Looks a single document up by its source id.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried. A document that
    /// exists but cannot be decoded surfaces as an error wrapping
    /// [`crate::DecodeFailure`].
    fn find_by_id(&self, source_id: &str) -> anyhow::Result<Option<SourceRecord>>;

    /// Decodes one document from a page.
    ///
    /// # Errors
    /// Returns [`crate::DecodeFailure`] when the document is malformed.
    fn decode(&self, document: &RawDocument) -> Result<SourceRecord, crate::DecodeFailure> {
        decode_document(document)
    }
}

/// Write and scan access to the relational hints table.
pub trait TargetStore: Send + Sync {
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn exists_by_source_id(&self, source_id: &str) -> anyhow::Result<bool>;

    /// Persists a new record and returns its generated id.
    ///
    /// # Errors
    /// Returns an error when the write is rejected.
    fn save(&self, record: &TargetRecord) -> anyhow::Result<i64>;

    /// Number of records that carry a source id, across all time.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn count_by_source_id_present(&self) -> anyhow::Result<u64>;

    /// Records with a source id whose creation date falls in `range`, ordered
    /// by source id ascending.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn find_page_by_range_and_source_id_present(
        &self,
        range: &DateRange,
        request: PageRequest,
    ) -> anyhow::Result<Page<TargetRecord>>;
}

pub trait JobStore: Send + Sync {
    /// Inserts or updates a job row.
    ///
    /// # Errors
    /// Returns an error when the write fails or the stored job is already terminal.
    fn save_job(&self, job: &MigrationJob) -> anyhow::Result<()>;

    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn find_job(&self, id: JobId) -> anyhow::Result<Option<MigrationJob>>;

    /// All jobs, oldest first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn list_jobs(&self) -> anyhow::Result<Vec<MigrationJob>>;
}

pub trait ErrorStore: Send + Sync {
    /// Inserts or updates an error row.
    ///
    /// # Errors
    /// Returns an error when the write fails or would un-resolve a resolved row.
    fn save_error(&self, error: &MigrationError) -> anyhow::Result<()>;

    /// Unresolved errors last written by `job_id`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn find_unresolved_by_job(&self, job_id: JobId) -> anyhow::Result<Vec<MigrationError>>;

    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn find_error(&self, id: ErrorId) -> anyhow::Result<Option<MigrationError>>;

    /// Errors ordered by recording time, optionally narrowed to one job.
    ///
    /// # Errors
    /// Returns an error when the store cannot be queried.
    fn list_errors(
        &self,
        job_id: Option<JobId>,
        unresolved_only: bool,
    ) -> anyhow::Result<Vec<MigrationError>>;
}
