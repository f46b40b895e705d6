use std::sync::Arc;

use anyhow::{Context, Result};
use hint_migration_core::{
    DateRange, ErrorKind, JobId, MigrationConfig, SourceRecord, SourceStore, TargetRecord,
    TargetStore,
};

use crate::{ErrorLedger, SourceEntry, SourceReader};

/// Structural validation failures. Either one ends the pass on the spot.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationAbort {
    #[error(
        "Mismatch in number of elements between source and target store on page {page}: source={source_len}, target={target_len}."
    )]
    CountMismatch {
        page: u64,
        source_len: usize,
        target_len: usize,
    },
    #[error(
        "Mismatch id between source and target element on page {page} at position {position}: source={source_id} - target={target_id}"
    )]
    OrderMismatch {
        page: u64,
        position: usize,
        source_id: String,
        target_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDifference {
    pub field: &'static str,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub pages: u64,
    pub compared: u64,
    pub field_mismatches: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Finished(ValidationReport),
    Aborted(ValidationAbort),
}

/// Compares the reconciled fields of one source/target pair.
#[must_use]
pub fn field_differences(source: &SourceRecord, target: &TargetRecord) -> Vec<FieldDifference> {
    let pairs = [
        ("processId", source.process_id.as_str(), target.process_id.as_str()),
        ("hintCategory", source.category.as_str(), target.category.as_str()),
        ("hintSource", source.hint_source.as_str(), target.hint_source.as_str()),
        ("message", source.body.as_str(), target.message.as_str()),
    ];

    pairs
        .into_iter()
        .filter(|(_, left, right)| left != right)
        .map(|(field, left, right)| FieldDifference {
            field,
            source: left.to_string(),
            target: right.to_string(),
        })
        .collect()
}

#[must_use]
pub fn field_mismatch_message(source_id: &str, differences: &[FieldDifference]) -> String {
    let details: Vec<String> = differences
        .iter()
        .map(|diff| format!("{}: Source={}, Target={}", diff.field, diff.source, diff.target))
        .collect();
    format!("Field mismatches for source_id {source_id}: {}", details.join("; "))
}

/// Walks the source and target stores page by page in lockstep.
#[derive(Clone)]
pub struct Reconciler {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    ledger: ErrorLedger,
    config: MigrationConfig,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        ledger: ErrorLedger,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            ledger,
            config,
        }
    }

    /// Runs one validation pass over `range`, writing field drift and decode
    /// failures to the ledger under `job_id`.
    ///
    /// `on_page` is called with the number of compared entries after each page.
    pub fn validate(
        &self,
        job_id: JobId,
        range: DateRange,
        mut on_page: impl FnMut(u64) -> Result<()>,
    ) -> Result<ValidationOutcome> {
        let reader = SourceReader::new(self.source.clone(), range, &self.config);
        let mut report = ValidationReport::default();
        let mut request = Some(reader.first_page());

        while let Some(current) = request {
            let source_page = reader.read_page(current)?;
            let target_page = self
                .target
                .find_page_by_range_and_source_id_present(&range, current)
                .with_context(|| format!("failed to read target page {}", current.number))?;

            if source_page.entries.len() != target_page.items.len() {
                return Ok(ValidationOutcome::Aborted(ValidationAbort::CountMismatch {
                    page: current.number,
                    source_len: source_page.entries.len(),
                    target_len: target_page.items.len(),
                }));
            }

            for (position, (entry, target)) in
                source_page.entries.iter().zip(&target_page.items).enumerate()
            {
                let target_id = target.source_id.as_deref().unwrap_or_default();
                if entry.source_id() != target_id {
                    return Ok(ValidationOutcome::Aborted(ValidationAbort::OrderMismatch {
                        page: current.number,
                        position,
                        source_id: entry.source_id().to_string(),
                        target_id: target_id.to_string(),
                    }));
                }

                match entry {
                    SourceEntry::Malformed(failure) => {
                        self.ledger.record(
                            job_id,
                            &failure.source_id,
                            ErrorKind::Decode,
                            failure.to_string(),
                            None,
                        )?;
                        report.decode_failures += 1;
                    }
                    SourceEntry::Decoded(record) => {
                        let differences = field_differences(record, target);
                        if !differences.is_empty() {
                            self.ledger.record(
                                job_id,
                                &record.source_id,
                                ErrorKind::FieldMismatch,
                                field_mismatch_message(&record.source_id, &differences),
                                None,
                            )?;
                            report.field_mismatches += 1;
                        }
                    }
                }
                report.compared += 1;
            }

            report.pages += 1;
            on_page(source_page.entries.len() as u64)?;
            tracing::info!(
                job_id = %job_id,
                page = current.number,
                compared = source_page.entries.len(),
                "validated page"
            );
            request = source_page.next;
        }

        Ok(ValidationOutcome::Finished(report))
    }
}
