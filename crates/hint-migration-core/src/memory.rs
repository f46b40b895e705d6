//! In-process store adapters used by tests and dry runs.

use std::collections::HashMap;

use anyhow::bail;
use parking_lot::Mutex;

use crate::{
    legacy_document_id, DateRange, ErrorId, ErrorStore, JobId, JobStore, MigrationError,
    MigrationJob, Page, PageRequest, RawDocument, SourceFilter, SourceRecord, SourceStore,
    TargetRecord, TargetStore,
};

fn paginate<T: Clone>(items: &[T], request: PageRequest) -> Vec<T> {
    let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
    items
        .iter()
        .skip(offset)
        .take(request.size)
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct InMemorySourceStore {
    documents: Mutex<Vec<RawDocument>>,
    lookups: Mutex<usize>,
}

impl InMemorySourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_documents(documents: impl IntoIterator<Item = RawDocument>) -> Self {
        let store = Self::new();
        for document in documents {
            store.insert(document);
        }
        store
    }

    pub fn insert(&self, document: RawDocument) {
        self.documents.lock().push(document);
    }

    /// Drops every document whose id equals `source_id`.
    pub fn remove(&self, source_id: &str) {
        self.documents
            .lock()
            .retain(|document| legacy_document_id(document).as_deref() != Some(source_id));
    }

    /// Number of single-document lookups served so far.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        *self.lookups.lock()
    }

    fn matching(&self, filter: &SourceFilter) -> Vec<RawDocument> {
        let mut matching: Vec<RawDocument> = self
            .documents
            .lock()
            .iter()
            .filter(|document| filter.matches_document(document))
            .cloned()
            .collect();
        matching.sort_by_cached_key(legacy_document_id);
        matching
    }
}

impl SourceStore for InMemorySourceStore {
    fn count(&self, filter: &SourceFilter) -> anyhow::Result<u64> {
        Ok(self.matching(filter).len() as u64)
    }

    fn find_page(
        &self,
        filter: &SourceFilter,
        request: PageRequest,
    ) -> anyhow::Result<Page<RawDocument>> {
        let matching = self.matching(filter);
        Ok(Page::new(request, paginate(&matching, request)))
    }

    fn find_by_id(&self, source_id: &str) -> anyhow::Result<Option<SourceRecord>> {
        *self.lookups.lock() += 1;
        let found = self
            .documents
            .lock()
            .iter()
            .find(|document| legacy_document_id(document).as_deref() == Some(source_id))
            .cloned();

        match found {
            None => Ok(None),
            Some(document) => self
                .decode(&document)
                .map(Some)
                .map_err(anyhow::Error::new),
        }
    }
}

#[derive(Debug, Default)]
struct TargetState {
    records: Vec<TargetRecord>,
    next_id: i64,
    saves: usize,
    failures: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct InMemoryTargetStore {
    state: Mutex<TargetState>,
}

impl InMemoryTargetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future save for `source_id` fail with `message`.
    pub fn fail_saves_for(&self, source_id: impl Into<String>, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .insert(source_id.into(), message.into());
    }

    pub fn clear_failure(&self, source_id: &str) {
        self.state.lock().failures.remove(source_id);
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    #[must_use]
    pub fn records(&self) -> Vec<TargetRecord> {
        self.state.lock().records.clone()
    }

    /// Inserts a record as-is, bypassing failure injection and save counting.
    pub fn seed(&self, mut record: TargetRecord) -> i64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        record.id = Some(id);
        state.records.push(record);
        id
    }
}

impl TargetStore for InMemoryTargetStore {
    fn exists_by_source_id(&self, source_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .any(|record| record.source_id.as_deref() == Some(source_id)))
    }

    fn save(&self, record: &TargetRecord) -> anyhow::Result<i64> {
        let mut state = self.state.lock();
        if let Some(source_id) = record.source_id.as_deref() {
            if let Some(message) = state.failures.get(source_id) {
                bail!("{message}");
            }
            if state
                .records
                .iter()
                .any(|existing| existing.source_id.as_deref() == Some(source_id))
            {
                bail!("UNIQUE constraint failed: hints.source_id");
            }
        }

        state.next_id += 1;
        state.saves += 1;
        let id = state.next_id;
        let mut stored = record.clone();
        stored.id = Some(id);
        state.records.push(stored);
        Ok(id)
    }

    fn count_by_source_id_present(&self) -> anyhow::Result<u64> {
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|record| record.source_id.is_some())
            .count() as u64)
    }

    fn find_page_by_range_and_source_id_present(
        &self,
        range: &DateRange,
        request: PageRequest,
    ) -> anyhow::Result<Page<TargetRecord>> {
        let mut matching: Vec<TargetRecord> = self
            .state
            .lock()
            .records
            .iter()
            .filter(|record| record.source_id.is_some() && range.contains(record.creation_date))
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.source_id.cmp(&right.source_id));
        Ok(Page::new(request, paginate(&matching, request)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<Vec<MigrationJob>>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn save_job(&self, job: &MigrationJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock();
        match jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) if existing.state.is_terminal() => {
                bail!("job {} is {} and cannot be updated", job.id, existing.state)
            }
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    fn find_job(&self, id: JobId) -> anyhow::Result<Option<MigrationJob>> {
        Ok(self.jobs.lock().iter().find(|job| job.id == id).cloned())
    }

    fn list_jobs(&self) -> anyhow::Result<Vec<MigrationJob>> {
        Ok(self.jobs.lock().clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryErrorStore {
    errors: Mutex<Vec<MigrationError>>,
}

impl InMemoryErrorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every ledger row in recording order.
    #[must_use]
    pub fn all(&self) -> Vec<MigrationError> {
        self.errors.lock().clone()
    }
}

impl ErrorStore for InMemoryErrorStore {
    fn save_error(&self, error: &MigrationError) -> anyhow::Result<()> {
        let mut errors = self.errors.lock();
        match errors.iter_mut().find(|existing| existing.id == error.id) {
            Some(existing) if existing.resolved && !error.resolved => {
                bail!("error {} is resolved and cannot be reopened", error.id)
            }
            Some(existing) => *existing = error.clone(),
            None => errors.push(error.clone()),
        }
        Ok(())
    }

    fn find_unresolved_by_job(&self, job_id: JobId) -> anyhow::Result<Vec<MigrationError>> {
        Ok(self
            .errors
            .lock()
            .iter()
            .filter(|error| error.job_id == job_id && !error.resolved)
            .cloned()
            .collect())
    }

    fn find_error(&self, id: ErrorId) -> anyhow::Result<Option<MigrationError>> {
        Ok(self.errors.lock().iter().find(|error| error.id == id).cloned())
    }

    fn list_errors(
        &self,
        job_id: Option<JobId>,
        unresolved_only: bool,
    ) -> anyhow::Result<Vec<MigrationError>> {
        Ok(self
            .errors
            .lock()
            .iter()
            .filter(|error| job_id.map_or(true, |id| error.job_id == id))
            .filter(|error| !unresolved_only || !error.resolved)
            .cloned()
            .collect())
    }
}
