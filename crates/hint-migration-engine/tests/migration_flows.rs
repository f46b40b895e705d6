use std::path::Path;
use std::sync::Arc;

use anyhow::bail;
use hint_migration_core::memory::{
    InMemoryErrorStore, InMemoryJobStore, InMemorySourceStore, InMemoryTargetStore,
};
use hint_migration_core::{
    decode_document, now_utc, parse_rfc3339_utc, DateRange, ErrorKind, ErrorStore, JobId,
    JobState, JobStore, JobType, MigrationConfig, MigrationError, MigrationJob, Page,
    PageRequest, RawDocument, SourceFilter, SourceRecord, SourceStore, TargetRecord,
};
use hint_migration_engine::{
    MigrationOrchestrator, FIX_COMPLETED_MESSAGE, MIGRATION_COMPLETED_MESSAGE,
    VALIDATION_COMPLETED_MESSAGE,
};
use hint_migration_store_sqlite::{SqliteLegacyStore, SqliteMigrationStore};
use serde_json::json;

fn must<T>(result: anyhow::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("test failure: {err:#}"),
    }
}

fn must_some<T>(value: Option<T>, what: &str) -> T {
    match value {
        Some(value) => value,
        None => panic!("expected {what}"),
    }
}

async fn join<T>(handle: tokio::task::JoinHandle<T>) -> T {
    must(handle.await.map_err(anyhow::Error::new))
}

fn hint(id: &str, day: u8) -> RawDocument {
    json!({
        "_id": id,
        "hintSource": "claims",
        "hintTextOriginal": format!("Hint text for {id}"),
        "hintCategory": "WARNING",
        "showToUser": true,
        "processId": format!("proc-{id}"),
        "creationDate": format!("2024-01-{day:02}T09:30:00Z"),
    })
}

fn target_copy(document: &RawDocument) -> TargetRecord {
    let record = must(decode_document(document).map_err(anyhow::Error::new));
    let created = record.creation_date.unwrap_or_else(now_utc);
    TargetRecord::from_source(&record, created)
}

struct Harness {
    source: Arc<InMemorySourceStore>,
    target: Arc<InMemoryTargetStore>,
    jobs: Arc<InMemoryJobStore>,
    errors: Arc<InMemoryErrorStore>,
    orchestrator: MigrationOrchestrator,
}

fn harness(documents: Vec<RawDocument>, batch_size: usize) -> Harness {
    let source = Arc::new(InMemorySourceStore::with_documents(documents));
    let target = Arc::new(InMemoryTargetStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let errors = Arc::new(InMemoryErrorStore::new());
    let config = must(MigrationConfig::with_batch_size(batch_size).map_err(anyhow::Error::new));
    let orchestrator = must(
        MigrationOrchestrator::new(
            source.clone(),
            target.clone(),
            jobs.clone(),
            errors.clone(),
            config,
        )
        .map_err(anyhow::Error::new),
    );
    Harness {
        source,
        target,
        jobs,
        errors,
        orchestrator,
    }
}

impl Harness {
    async fn migrate(&self, range: DateRange) -> MigrationJob {
        let job = must(self.orchestrator.create_job(JobType::Migration, range, None));
        let id = join(self.orchestrator.start_migration(job)).await;
        self.job(id)
    }

    async fn fix(&self, old_job_id: JobId) -> MigrationJob {
        let job = must(self.orchestrator.create_job(
            JobType::Fixing,
            DateRange::unbounded(),
            Some(old_job_id),
        ));
        let id = job.id;
        join(self.orchestrator.fix_unresolved_errors(job, old_job_id)).await;
        self.job(id)
    }

    async fn validate(&self) -> (bool, MigrationJob) {
        let job = must(self.orchestrator.create_job(
            JobType::Validation,
            DateRange::unbounded(),
            None,
        ));
        let id = job.id;
        let completed = join(self.orchestrator.start_validation(job)).await;
        (completed, self.job(id))
    }

    fn job(&self, id: JobId) -> MigrationJob {
        must_some(must(self.jobs.find_job(id)), "persisted job")
    }
}

#[tokio::test]
async fn second_migration_over_same_range_writes_nothing() {
    let h = harness(vec![hint("a1", 1), hint("a2", 2), hint("a3", 3)], 2);

    let first = h.migrate(DateRange::unbounded()).await;
    assert_eq!(first.state, JobState::Completed);
    assert_eq!(first.message.as_deref(), Some(MIGRATION_COMPLETED_MESSAGE));
    assert_eq!((first.total_items, first.processed_items), (3, 3));
    assert_eq!(h.target.save_count(), 3);

    let second = h.migrate(DateRange::unbounded()).await;
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(second.processed_items, 3);
    assert_eq!(h.target.save_count(), 3);
    assert!(h.errors.all().is_empty());
}

#[tokio::test]
async fn one_malformed_record_does_not_stop_the_page() {
    let mut malformed = hint("b2", 2);
    malformed["processId"] = json!(404);
    let h = harness(vec![hint("b1", 1), malformed, hint("b3", 3), hint("b4", 4)], 10);

    let job = h.migrate(DateRange::unbounded()).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.processed_items, 4);
    assert_eq!(h.target.save_count(), 3);
    let errors = h.errors.all();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Decode);
    assert_eq!(errors[0].source_id, "b2");
    assert_eq!(errors[0].job_id, job.id);
}

#[tokio::test]
async fn fix_resolves_error_once_write_succeeds() {
    let h = harness(vec![hint("fixId", 5), hint("ok", 6)], 10);
    h.target.fail_saves_for("fixId", "Initial failure");

    let migration = h.migrate(DateRange::unbounded()).await;
    assert_eq!(migration.state, JobState::Completed);
    assert_eq!(h.target.save_count(), 1);
    assert_eq!(h.errors.all()[0].message, "Initial failure");

    h.target.clear_failure("fixId");
    let fix = h.fix(migration.id).await;

    assert_eq!(fix.state, JobState::Completed);
    assert_eq!(fix.message.as_deref(), Some(FIX_COMPLETED_MESSAGE));
    assert_eq!(fix.parent_job_id, Some(migration.id));
    assert_eq!((fix.total_items, fix.processed_items), (1, 1));
    assert_eq!(h.target.save_count(), 2);

    let errors = h.errors.all();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].resolved);
    assert_eq!(errors[0].job_id, migration.id);
}

#[tokio::test]
async fn fix_that_fails_again_rewrites_the_same_error() {
    let h = harness(vec![hint("fixId", 5)], 10);
    h.target.fail_saves_for("fixId", "Initial failure");
    let migration = h.migrate(DateRange::unbounded()).await;

    h.target.fail_saves_for("fixId", "Still broken");
    let fix = h.fix(migration.id).await;

    assert_eq!(fix.state, JobState::Completed);
    assert_eq!(h.target.save_count(), 0);
    let errors = h.errors.all();
    assert_eq!(errors.len(), 1);
    assert!(!errors[0].resolved);
    assert_eq!(errors[0].message, "Still broken");
    assert_eq!(errors[0].job_id, fix.id);
    assert_eq!(must(h.errors.find_unresolved_by_job(fix.id)).len(), 1);
}

#[tokio::test]
async fn fix_reports_records_that_vanished_from_source() {
    let h = harness(vec![hint("gone", 7)], 10);
    h.target.fail_saves_for("gone", "timeout");
    let migration = h.migrate(DateRange::unbounded()).await;

    h.source.remove("gone");
    let fix = h.fix(migration.id).await;

    assert_eq!(fix.state, JobState::Completed);
    let errors = h.errors.all();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::NotFound);
    assert_eq!(
        errors[0].message,
        "Hint with source_id gone not found in source store."
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_fix_runs_keep_their_own_counters_and_errors() {
    let h = harness(
        vec![hint("x1", 1), hint("x2", 2), hint("y1", 3), hint("y2", 4)],
        10,
    );
    let at = |value: &str| must(parse_rfc3339_utc(value).map_err(anyhow::Error::new));
    let early = DateRange {
        start: Some(at("2024-01-01T00:00:00Z")),
        end: Some(at("2024-01-02T23:59:59Z")),
    };
    let late = DateRange {
        start: Some(at("2024-01-03T00:00:00Z")),
        end: Some(at("2024-01-04T23:59:59Z")),
    };
    for id in ["x1", "y1", "y2"] {
        h.target.fail_saves_for(id, "Initial failure");
    }
    let first = h.migrate(early).await;
    let second = h.migrate(late).await;
    assert_eq!((first.total_items, second.total_items), (2, 2));

    h.target.clear_failure("x1");
    h.target.clear_failure("y2");
    h.target.fail_saves_for("y1", "Still broken");

    let fix_first = must(h.orchestrator.create_job(JobType::Fixing, DateRange::unbounded(), Some(first.id)));
    let fix_second = must(h.orchestrator.create_job(JobType::Fixing, DateRange::unbounded(), Some(second.id)));
    let (fix_first_id, fix_second_id) = (fix_first.id, fix_second.id);
    let (done_first, done_second) = tokio::join!(
        h.orchestrator.fix_unresolved_errors(fix_first, first.id),
        h.orchestrator.fix_unresolved_errors(fix_second, second.id),
    );
    must(done_first.map_err(anyhow::Error::new));
    must(done_second.map_err(anyhow::Error::new));

    let fix_first = h.job(fix_first_id);
    let fix_second = h.job(fix_second_id);
    assert_eq!(fix_first.state, JobState::Completed);
    assert_eq!(fix_second.state, JobState::Completed);
    assert_eq!((fix_first.total_items, fix_first.processed_items), (1, 1));
    assert_eq!((fix_second.total_items, fix_second.processed_items), (2, 2));
    assert_eq!(fix_first.parent_job_id, Some(first.id));
    assert_eq!(fix_second.parent_job_id, Some(second.id));

    let errors = h.errors.all();
    assert_eq!(errors.len(), 3);
    let error_for = |source_id: &str| -> MigrationError {
        must_some(
            errors.iter().find(|error| error.source_id == source_id).cloned(),
            "error row",
        )
    };
    assert!(error_for("x1").resolved);
    assert_eq!(error_for("x1").job_id, first.id);
    assert!(error_for("y2").resolved);
    assert_eq!(error_for("y2").job_id, second.id);
    assert!(!error_for("y1").resolved);
    assert_eq!(error_for("y1").job_id, fix_second_id);
    assert!(must(h.errors.find_unresolved_by_job(fix_first_id)).is_empty());
    assert_eq!(h.target.save_count(), 3);
}

#[tokio::test]
async fn validation_passes_after_clean_migration() {
    let h = harness(vec![hint("c1", 1), hint("c2", 2), hint("c3", 3)], 2);
    let migration = h.migrate(DateRange::unbounded()).await;

    let validation = must(h.orchestrator.create_validation_for(migration.id));
    assert_eq!(validation.parent_job_id, Some(migration.id));
    let id = validation.id;
    let completed = join(h.orchestrator.start_validation(validation)).await;

    let job = h.job(id);
    assert!(completed);
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.message.as_deref(), Some(VALIDATION_COMPLETED_MESSAGE));
    assert_eq!((job.total_items, job.processed_items), (3, 3));
}

#[tokio::test]
async fn validation_count_mismatch_fails_fast() {
    let first = hint("d1", 1);
    let mut drifted = hint("d2", 2);
    let h = harness(vec![first, drifted.clone()], 10);
    drifted["hintTextOriginal"] = json!("changed in target");
    h.target.seed(target_copy(&drifted));

    let (completed, job) = h.validate().await;

    assert!(!completed);
    assert_eq!(job.state, JobState::Broken);
    let message = job.message.unwrap_or_default();
    assert!(message.contains("Mismatch in number of elements"), "{message}");
    assert!(h.errors.all().is_empty());
}

#[tokio::test]
async fn validation_order_mismatch_fails_fast() {
    let h = harness(vec![hint("e1", 1)], 1);
    h.target.seed(target_copy(&hint("e9", 1)));

    let (completed, job) = h.validate().await;

    assert!(!completed);
    assert_eq!(job.state, JobState::Broken);
    let message = job.message.unwrap_or_default();
    assert!(message.contains("Mismatch id between"), "{message}");
    assert!(h.errors.all().is_empty());
}

#[tokio::test]
async fn field_drift_is_logged_and_every_page_is_visited() {
    let documents = vec![hint("f1", 1), hint("f2", 2), hint("f3", 3)];
    let h = harness(documents.clone(), 1);
    for document in &documents {
        let mut record = target_copy(document);
        if record.source_id.as_deref() == Some("f2") {
            record.message = "Edited after migration".to_string();
        }
        h.target.seed(record);
    }

    let (completed, job) = h.validate().await;

    assert!(!completed);
    assert_eq!(job.state, JobState::Broken);
    assert_eq!(job.processed_items, 3);
    assert_eq!(
        job.message.as_deref(),
        Some("There are 1 unresolved errors in migration process")
    );

    let errors = h.errors.all();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::FieldMismatch);
    assert_eq!(errors[0].job_id, job.id);
    assert_eq!(
        errors[0].message,
        "Field mismatches for source_id f2: message: Source=Hint text for f2, Target=Edited after migration"
    );
}

#[tokio::test]
async fn empty_range_completes_without_work() {
    let h = harness(vec![hint("g1", 1), hint("g2", 2)], 10);
    let start = must(parse_rfc3339_utc("2030-01-01T00:00:00Z").map_err(anyhow::Error::new));
    let range = must(DateRange::new(Some(start), None).map_err(anyhow::Error::new));

    assert_eq!(must(h.orchestrator.count_source_records(range)), 0);
    let job = h.migrate(range).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!((job.total_items, job.processed_items), (0, 0));
    assert_eq!(h.target.save_count(), 0);
    assert!(h.errors.all().is_empty());
}

#[tokio::test]
async fn range_limits_migration_to_matching_records() {
    let h = harness(vec![hint("h1", 1), hint("h2", 15), hint("h3", 31)], 10);
    let start = must(parse_rfc3339_utc("2024-01-10T00:00:00Z").map_err(anyhow::Error::new));
    let end = must(parse_rfc3339_utc("2024-01-31T09:30:00Z").map_err(anyhow::Error::new));
    let range = must(DateRange::new(Some(start), Some(end)).map_err(anyhow::Error::new));

    let job = h.migrate(range).await;

    assert_eq!(job.total_items, 2);
    let migrated: Vec<_> = h
        .target
        .records()
        .into_iter()
        .filter_map(|record| record.source_id)
        .collect();
    assert_eq!(migrated, vec!["h2", "h3"]);
}

struct UnavailableSource;

impl SourceStore for UnavailableSource {
    fn count(&self, _filter: &SourceFilter) -> anyhow::Result<u64> {
        Ok(5)
    }

    fn find_page(
        &self,
        _filter: &SourceFilter,
        _request: PageRequest,
    ) -> anyhow::Result<Page<RawDocument>> {
        bail!("connection reset by peer")
    }

    fn find_by_id(&self, _source_id: &str) -> anyhow::Result<Option<SourceRecord>> {
        bail!("connection reset by peer")
    }
}

#[tokio::test]
async fn escaping_failure_marks_job_broken() {
    let jobs = Arc::new(InMemoryJobStore::new());
    let orchestrator = must(
        MigrationOrchestrator::new(
            Arc::new(UnavailableSource),
            Arc::new(InMemoryTargetStore::new()),
            jobs.clone(),
            Arc::new(InMemoryErrorStore::new()),
            MigrationConfig::default(),
        )
        .map_err(anyhow::Error::new),
    );

    let job = must(orchestrator.create_job(JobType::Migration, DateRange::unbounded(), None));
    let id = join(orchestrator.start_migration(job)).await;
    let stored = must_some(must(jobs.find_job(id)), "persisted job");

    assert_eq!(stored.state, JobState::Broken);
    assert_eq!(stored.total_items, 5);
    assert_eq!(stored.processed_items, 0);
    assert!(stored.finished_at.is_some());
    let message = stored.message.unwrap_or_default();
    assert!(message.contains("connection reset by peer"), "{message}");
    assert!(message.contains("failed to read source page 0"), "{message}");
}

#[tokio::test]
async fn wrong_job_type_ends_broken() {
    let h = harness(vec![hint("i1", 1)], 10);
    let job = must(h.orchestrator.create_job(JobType::Validation, DateRange::unbounded(), None));

    let id = join(h.orchestrator.start_migration(job)).await;

    assert_eq!(h.job(id).state, JobState::Broken);
    assert_eq!(h.target.save_count(), 0);
}

#[test]
fn orchestrator_rejects_out_of_bounds_batch_size() {
    let built = MigrationOrchestrator::new(
        Arc::new(InMemorySourceStore::new()),
        Arc::new(InMemoryTargetStore::new()),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(InMemoryErrorStore::new()),
        MigrationConfig { batch_size: 0 },
    );
    assert!(built.is_err());
}

#[tokio::test]
async fn sqlite_stores_run_migration_end_to_end() {
    let legacy = Arc::new(must(SqliteLegacyStore::open(Path::new(":memory:"))));
    must(legacy.migrate());
    let mut malformed = hint("k4", 4);
    malformed["hintCategory"] = json!("WARNING");
    malformed["hintSource"] = json!(17);
    for document in [hint("k1", 1), hint("k2", 2), hint("k3", 3), malformed] {
        must(legacy.insert_document(&document));
    }

    let store = Arc::new(must(SqliteMigrationStore::open(Path::new(":memory:"))));
    must(store.migrate());
    let orchestrator = must(
        MigrationOrchestrator::new(
            legacy,
            store.clone(),
            store.clone(),
            store.clone(),
            MigrationConfig::default(),
        )
        .map_err(anyhow::Error::new),
    );

    let job = must(orchestrator.create_job(JobType::Migration, DateRange::unbounded(), None));
    let id = join(orchestrator.start_migration(job)).await;
    let migrated = must_some(must(store.find_job(id)), "migration job");
    assert_eq!(migrated.state, JobState::Completed);
    assert_eq!(migrated.processed_items, 4);

    let errors = must(store.list_errors(Some(id), true));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source_id, "k4");
    let copied = must(store.find_hint_by_source_id("k2"));
    assert_eq!(copied.map(|record| record.process_id), Some("proc-k2".to_string()));

    let validation = must(orchestrator.create_validation_for(id));
    let validation_id = validation.id;
    assert!(!join(orchestrator.start_validation(validation)).await);
    let checked = must_some(must(store.find_job(validation_id)), "validation job");
    assert!(checked
        .message
        .unwrap_or_default()
        .contains("Mismatch in number of elements"));
    assert_eq!(must(store.list_jobs()).len(), 2);
}
