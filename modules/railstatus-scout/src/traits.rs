// Trait abstractions for the pipeline boundaries.
//
// StatusSource wraps the status page scrape: rendered HTML in, incident texts out.
// HistoryRepository is the single flat-file history, loaded and saved whole.
// IncidentEnricher is the inference call for one incident text.
//
// Mocks for all three live in `testing` so the pipeline runs in tests with
// no browser, no network and no API key.

use anyhow::Result;
use async_trait::async_trait;

use railstatus_common::{Enrichment, History, StoreResult};

use crate::enrichment::EnrichmentError;

// ---------------------------------------------------------------------------
// StatusSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Current incident texts, in page order. Noise is already filtered out.
    async fn fetch_items(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// HistoryRepository
// ---------------------------------------------------------------------------

/// Whole-document storage for the incident history.
///
/// Single writer: callers load, mutate in memory, and save the full state.
/// Concurrent runs against the same backing store are not supported.
pub trait HistoryRepository: Send + Sync {
    /// `Ok(None)` when nothing has ever been saved.
    fn load(&self) -> StoreResult<Option<History>>;

    /// Replace the stored history. Must not leave a truncated document behind
    /// if interrupted.
    fn save(&self, history: &History) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// IncidentEnricher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait IncidentEnricher: Send + Sync {
    async fn enrich(&self, raw_text: &str) -> std::result::Result<Enrichment, EnrichmentError>;
}
