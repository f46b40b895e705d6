//! Migration, fix-up and reconciliation runs over the hint stores.

#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

mod ledger;
mod migrator;
mod orchestrator;
mod reader;
mod reconciler;

pub use ledger::ErrorLedger;
pub use migrator::{MigrationOutcome, RecordMigrator};
pub use orchestrator::{
    MigrationOrchestrator, FIX_COMPLETED_MESSAGE, MIGRATION_COMPLETED_MESSAGE,
    VALIDATION_COMPLETED_MESSAGE,
};
pub use reader::{SourceEntry, SourcePage, SourceReader};
pub use reconciler::{
    field_differences, field_mismatch_message, FieldDifference, Reconciler, ValidationAbort,
    ValidationOutcome, ValidationReport,
};
