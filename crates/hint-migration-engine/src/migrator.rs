use std::sync::Arc;

use anyhow::{Context, Result};
use hint_migration_core::{
    legacy_id_timestamp, DecodeFailure, ErrorKind, JobId, MigrationError, SourceRecord,
    SourceStore, TargetRecord, TargetStore,
};

use crate::ErrorLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The target already held a record with this source id.
    AlreadyMigrated,
    Migrated(i64),
    /// The failure was written to the ledger.
    Failed(ErrorKind),
}

struct RecordFailure {
    kind: ErrorKind,
    message: String,
}

type Attempt = std::result::Result<MigrationOutcome, RecordFailure>;

/// Idempotent single-record copy from the source store into the target store.
#[derive(Clone)]
pub struct RecordMigrator {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    ledger: ErrorLedger,
}

impl RecordMigrator {
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        ledger: ErrorLedger,
    ) -> Self {
        Self {
            source,
            target,
            ledger,
        }
    }

    /// Migrates one record.
    ///
    /// Not-found, decode and write failures are recorded in the ledger and
    /// reported as [`MigrationOutcome::Failed`]. `existing` is resolved on
    /// success and rewritten on failure. Only store outages and ledger write
    /// failures come back as `Err`.
    pub fn migrate(
        &self,
        job_id: JobId,
        source_id: &str,
        prefetched: Option<SourceRecord>,
        existing: Option<MigrationError>,
    ) -> Result<MigrationOutcome> {
        match self.apply(source_id, prefetched)? {
            Ok(outcome) => {
                if let Some(error) = existing {
                    self.ledger.resolve(error)?;
                }
                Ok(outcome)
            }
            Err(failure) => {
                self.ledger
                    .record(job_id, source_id, failure.kind, failure.message, existing)?;
                Ok(MigrationOutcome::Failed(failure.kind))
            }
        }
    }

    fn apply(&self, source_id: &str, prefetched: Option<SourceRecord>) -> Result<Attempt> {
        let migrated = self
            .target
            .exists_by_source_id(source_id)
            .with_context(|| format!("failed to check target for source_id {source_id}"))?;
        if migrated {
            return Ok(Ok(MigrationOutcome::AlreadyMigrated));
        }

        let record = match prefetched {
            Some(record) => record,
            None => match self.source.find_by_id(source_id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Ok(Err(RecordFailure {
                        kind: ErrorKind::NotFound,
                        message: format!("Hint with source_id {source_id} not found in source store."),
                    }))
                }
                Err(err) => match err.downcast_ref::<DecodeFailure>() {
                    Some(failure) => {
                        return Ok(Err(RecordFailure {
                            kind: ErrorKind::Decode,
                            message: failure.to_string(),
                        }))
                    }
                    None => {
                        return Err(err.context(format!(
                            "failed to fetch source record {source_id}"
                        )))
                    }
                },
            },
        };

        let Some(creation_date) = creation_date_for(&record) else {
            return Ok(Err(RecordFailure {
                kind: ErrorKind::Decode,
                message: format!(
                    "Hint with source_id {source_id} has no creation date and its id carries no timestamp."
                ),
            }));
        };

        let target = TargetRecord::from_source(&record, creation_date);
        match self.target.save(&target) {
            Ok(id) => Ok(Ok(MigrationOutcome::Migrated(id))),
            Err(err) => Ok(Err(RecordFailure {
                kind: ErrorKind::Write,
                message: format!("{err:#}"),
            })),
        }
    }
}

fn creation_date_for(record: &SourceRecord) -> Option<time::OffsetDateTime> {
    if let Some(explicit) = record.creation_date {
        return Some(explicit);
    }
    let derived = legacy_id_timestamp(&record.source_id)?;
    tracing::debug!(
        source_id = %record.source_id,
        creation_date = %derived,
        "creation date taken from source id"
    );
    Some(derived)
}
