use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use hint_migration_core::{
    DateRange, ErrorKind, ErrorStore, JobId, JobState, JobStore, JobType, MigrationConfig,
    MigrationCoreError, MigrationJob, SourceStore, TargetStore,
};
use tokio::task::JoinHandle;

use crate::{
    ErrorLedger, RecordMigrator, Reconciler, SourceEntry, SourceReader, ValidationOutcome,
};

pub const MIGRATION_COMPLETED_MESSAGE: &str = "Migration completed successfully.";
pub const FIX_COMPLETED_MESSAGE: &str = "Fix job completed.";
pub const VALIDATION_COMPLETED_MESSAGE: &str = "Validation completed successfully.";

/// Owns the job lifecycle. The only component that moves a job out of `RUNNING`.
#[derive(Clone)]
pub struct MigrationOrchestrator {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    jobs: Arc<dyn JobStore>,
    errors: Arc<dyn ErrorStore>,
    config: MigrationConfig,
}

impl MigrationOrchestrator {
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        jobs: Arc<dyn JobStore>,
        errors: Arc<dyn ErrorStore>,
        config: MigrationConfig,
    ) -> Result<Self, MigrationCoreError> {
        config.validate()?;
        Ok(Self {
            source,
            target,
            jobs,
            errors,
            config,
        })
    }

    pub fn count_source_records(&self, range: DateRange) -> Result<u64> {
        self.reader(range).count()
    }

    /// Creates and persists a `RUNNING` job.
    pub fn create_job(
        &self,
        job_type: JobType,
        range: DateRange,
        parent: Option<JobId>,
    ) -> Result<MigrationJob> {
        let mut job = MigrationJob::new(job_type, range);
        job.parent_job_id = parent;
        self.jobs
            .save_job(&job)
            .with_context(|| format!("failed to create {job_type} job"))?;
        Ok(job)
    }

    /// Creates a validation job that checks `parent` over the parent's range.
    pub fn create_validation_for(&self, parent: JobId) -> Result<MigrationJob> {
        let parent_job = self
            .jobs
            .find_job(parent)?
            .ok_or_else(|| anyhow!("job {parent} not found"))?;
        self.create_job(JobType::Validation, parent_job.range, Some(parent))
    }

    pub fn find_job(&self, id: JobId) -> Result<Option<MigrationJob>> {
        self.jobs.find_job(id)
    }

    /// Schedules a migration run and returns without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_migration(&self, job: MigrationJob) -> JoinHandle<JobId> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.run_migration(job))
    }

    /// Schedules a re-attempt of every unresolved error of `old_job_id`.
    pub fn fix_unresolved_errors(&self, job: MigrationJob, old_job_id: JobId) -> JoinHandle<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.run_fix(job, old_job_id);
        })
    }

    /// Schedules a validation pass. The handle resolves to `true` when the job
    /// ended `COMPLETED`.
    pub fn start_validation(&self, job: MigrationJob) -> JoinHandle<bool> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.run_validation(job) == JobState::Completed)
    }

    pub fn run_migration(&self, mut job: MigrationJob) -> JobId {
        tracing::info!(job_id = %job.id, range = ?job.range, "starting migration");
        let result = self
            .migrate_pages(&mut job)
            .map(|()| (JobState::Completed, MIGRATION_COMPLETED_MESSAGE.to_string()));
        let id = job.id;
        self.finalize(job, result);
        id
    }

    pub fn run_fix(&self, mut job: MigrationJob, old_job_id: JobId) -> JobState {
        tracing::info!(job_id = %job.id, old_job_id = %old_job_id, "starting fix");
        let result = self
            .fix_errors(&mut job, old_job_id)
            .map(|()| (JobState::Completed, FIX_COMPLETED_MESSAGE.to_string()));
        self.finalize(job, result)
    }

    pub fn run_validation(&self, mut job: MigrationJob) -> JobState {
        tracing::info!(job_id = %job.id, range = ?job.range, "starting validation");
        let result = self.validate_pages(&mut job);
        self.finalize(job, result)
    }

    fn migrate_pages(&self, job: &mut MigrationJob) -> Result<()> {
        ensure_job_type(job, JobType::Migration)?;
        let reader = self.reader(job.range);
        let migrator = self.migrator();
        let ledger = self.ledger();

        job.total_items = reader.count()?;
        self.jobs.save_job(job)?;

        let mut request = Some(reader.first_page());
        while let Some(current) = request {
            let page = reader.read_page(current)?;
            let items = page.entries.len();

            for entry in page.entries {
                match entry {
                    SourceEntry::Decoded(record) => {
                        let source_id = record.source_id.clone();
                        migrator.migrate(job.id, &source_id, Some(record), None)?;
                    }
                    SourceEntry::Malformed(failure) => {
                        ledger.record(
                            job.id,
                            &failure.source_id,
                            ErrorKind::Decode,
                            failure.to_string(),
                            None,
                        )?;
                    }
                }
            }

            job.record_progress(items as u64);
            self.jobs.save_job(job)?;
            tracing::info!(
                job_id = %job.id,
                page = page.number,
                items,
                processed = job.processed_items,
                "migrated page"
            );
            request = page.next;
        }

        Ok(())
    }

    fn fix_errors(&self, job: &mut MigrationJob, old_job_id: JobId) -> Result<()> {
        ensure_job_type(job, JobType::Fixing)?;
        let migrator = self.migrator();
        let pending = self.ledger().unresolved_for(old_job_id)?;

        job.parent_job_id = Some(old_job_id);
        job.total_items = pending.len() as u64;
        self.jobs.save_job(job)?;

        for error in pending {
            let source_id = error.source_id.clone();
            let outcome = migrator.migrate(job.id, &source_id, None, Some(error))?;
            job.record_progress(1);
            self.jobs.save_job(job)?;
            tracing::debug!(job_id = %job.id, source_id = %source_id, outcome = ?outcome, "re-attempted record");
        }

        Ok(())
    }

    fn validate_pages(&self, job: &mut MigrationJob) -> Result<(JobState, String)> {
        ensure_job_type(job, JobType::Validation)?;
        job.total_items = self.reader(job.range).count()?;
        self.jobs.save_job(job)?;

        let reconciler = Reconciler::new(
            self.source.clone(),
            self.target.clone(),
            self.ledger(),
            self.config,
        );
        let (job_id, range) = (job.id, job.range);
        let jobs = self.jobs.clone();
        let outcome = reconciler.validate(job_id, range, |items| {
            job.record_progress(items);
            jobs.save_job(job)
        })?;

        match outcome {
            ValidationOutcome::Aborted(abort) => {
                tracing::error!(job_id = %job_id, reason = %abort, "validation aborted");
                Ok((JobState::Broken, abort.to_string()))
            }
            ValidationOutcome::Finished(report) => {
                let unresolved = self.ledger().unresolved_for(job_id)?.len();
                tracing::info!(job_id = %job_id, report = ?report, unresolved, "validation pass finished");
                if unresolved == 0 {
                    Ok((JobState::Completed, VALIDATION_COMPLETED_MESSAGE.to_string()))
                } else {
                    Ok((
                        JobState::Broken,
                        format!("There are {unresolved} unresolved errors in migration process"),
                    ))
                }
            }
        }
    }

    /// Writes the terminal state. Failures here are logged, never raised.
    fn finalize(&self, mut job: MigrationJob, result: Result<(JobState, String)>) -> JobState {
        let (state, message) = match result {
            Ok(done) => done,
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %format!("{err:#}"), "job run failed");
                (JobState::Broken, format!("{err:#}\n{err:?}"))
            }
        };

        if let Err(err) = job.finish(state, message) {
            tracing::error!(job_id = %job.id, error = %err, "job could not be finished");
            return job.state;
        }
        if let Err(err) = self.jobs.save_job(&job) {
            tracing::error!(
                job_id = %job.id,
                state = %job.state,
                error = %format!("{err:#}"),
                "failed to persist final job state"
            );
        }

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            state = %job.state,
            processed = job.processed_items,
            total = job.total_items,
            message = job.message.as_deref().unwrap_or_default(),
            "job finished"
        );
        job.state
    }

    fn reader(&self, range: DateRange) -> SourceReader {
        SourceReader::new(self.source.clone(), range, &self.config)
    }

    fn ledger(&self) -> ErrorLedger {
        ErrorLedger::new(self.errors.clone())
    }

    fn migrator(&self) -> RecordMigrator {
        RecordMigrator::new(self.source.clone(), self.target.clone(), self.ledger())
    }
}

fn ensure_job_type(job: &MigrationJob, expected: JobType) -> Result<()> {
    if job.job_type != expected {
        bail!(
            "job {} has type {} but this run requires {}",
            job.id,
            job.job_type,
            expected
        );
    }
    if job.state.is_terminal() {
        bail!("job {} is already {}", job.id, job.state);
    }
    Ok(())
}
