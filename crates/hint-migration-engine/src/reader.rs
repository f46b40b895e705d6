use std::sync::Arc;

use anyhow::{Context, Result};
use hint_migration_core::{
    DateRange, DecodeFailure, MigrationConfig, PageRequest, SourceFilter, SourceRecord, SourceStore,
};

/// One entry of a source page after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEntry {
    Decoded(SourceRecord),
    Malformed(DecodeFailure),
}

impl SourceEntry {
    #[must_use]
    pub fn source_id(&self) -> &str {
        match self {
            Self::Decoded(record) => &record.source_id,
            Self::Malformed(failure) => &failure.source_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage {
    pub number: u64,
    pub entries: Vec<SourceEntry>,
    pub next: Option<PageRequest>,
}

/// Filtered, ordered, paged access to the legacy store for a single run.
#[derive(Clone)]
pub struct SourceReader {
    source: Arc<dyn SourceStore>,
    filter: SourceFilter,
    batch_size: usize,
}

impl SourceReader {
    #[must_use]
    pub fn new(source: Arc<dyn SourceStore>, range: DateRange, config: &MigrationConfig) -> Self {
        Self {
            source,
            filter: SourceFilter::for_range(range),
            batch_size: config.batch_size,
        }
    }

    pub fn count(&self) -> Result<u64> {
        self.source
            .count(&self.filter)
            .context("failed to count source records")
    }

    #[must_use]
    pub fn first_page(&self) -> PageRequest {
        PageRequest::first(self.batch_size)
    }

    /// Fetches one page and decodes every entry on its own. Malformed entries
    /// stay in place so positions line up with the raw page.
    pub fn read_page(&self, request: PageRequest) -> Result<SourcePage> {
        let page = self
            .source
            .find_page(&self.filter, request)
            .with_context(|| format!("failed to read source page {}", request.number))?;

        let entries = page
            .items
            .iter()
            .map(|document| match self.source.decode(document) {
                Ok(record) => SourceEntry::Decoded(record),
                Err(failure) => SourceEntry::Malformed(failure),
            })
            .collect();

        Ok(SourcePage {
            number: request.number,
            entries,
            next: page.next,
        })
    }
}
