use std::sync::Arc;

use anyhow::{Context, Result};
use hint_migration_core::{ErrorKind, ErrorStore, JobId, MigrationError};

/// Write path for per-record failures. Every row written here is also logged.
#[derive(Clone)]
pub struct ErrorLedger {
    errors: Arc<dyn ErrorStore>,
}

impl ErrorLedger {
    #[must_use]
    pub fn new(errors: Arc<dyn ErrorStore>) -> Self {
        Self { errors }
    }

    /// Records a failure for `source_id` during `job_id`.
    ///
    /// When `existing` is given the same row is rewritten and moved to `job_id`;
    /// otherwise a new unresolved row is created.
    pub fn record(
        &self,
        job_id: JobId,
        source_id: &str,
        kind: ErrorKind,
        message: impl Into<String>,
        existing: Option<MigrationError>,
    ) -> Result<MigrationError> {
        let message = message.into();
        let error = match existing {
            Some(mut error) => {
                error.reraise(job_id, kind, message);
                error
            }
            None => MigrationError::new(job_id, source_id, kind, message),
        };

        tracing::warn!(
            job_id = %job_id,
            source_id = %error.source_id,
            kind = %error.kind,
            error_id = %error.id,
            "[MIGRATION-ERROR] {}",
            error.message
        );

        self.errors
            .save_error(&error)
            .with_context(|| format!("failed to record error for source_id {source_id}"))?;
        Ok(error)
    }

    pub fn resolve(&self, mut error: MigrationError) -> Result<MigrationError> {
        if error.resolved {
            return Ok(error);
        }
        error.resolve();
        self.errors
            .save_error(&error)
            .with_context(|| format!("failed to resolve error {}", error.id))?;
        tracing::debug!(error_id = %error.id, source_id = %error.source_id, "error resolved");
        Ok(error)
    }

    pub fn unresolved_for(&self, job_id: JobId) -> Result<Vec<MigrationError>> {
        self.errors
            .find_unresolved_by_job(job_id)
            .with_context(|| format!("failed to load unresolved errors for job {job_id}"))
    }
}
