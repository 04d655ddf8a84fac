//! Incremental enrichment of history records through an inference service.

mod llm;
mod prompt;

pub use llm::{parse_enrichment, LlmEnricher};
pub use prompt::build_prompt;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use railstatus_common::{History, HistoryRecord, StoreResult};

use crate::store::HistoryStore;
use crate::traits::{HistoryRepository, IncidentEnricher};

/// Why a single record could not be enriched. Never aborts the batch.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("inference request failed: {0:#}")]
    Request(anyhow::Error),

    #[error("inference service returned an empty response")]
    EmptyResponse,

    #[error("response is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("response is JSON but not an object (got {kind})")]
    NotAnObject { kind: &'static str },

    #[error("response object does not match the enrichment schema: {0}")]
    Schema(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Refresh policy
// ---------------------------------------------------------------------------

/// Whether an already-enriched record is ever sent again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// An enrichment, once attached, is permanent.
    #[default]
    Never,
    /// Re-enrich records observed within this window whose enrichment is
    /// older than the window (or undated).
    StaleAfter(Duration),
}

impl RefreshPolicy {
    pub fn from_hours(hours: Option<u64>) -> Self {
        hours
            .and_then(|h| i64::try_from(h).ok())
            .and_then(Duration::try_hours)
            .map_or(RefreshPolicy::Never, RefreshPolicy::StaleAfter)
    }

    pub fn needs_enrichment(&self, record: &HistoryRecord, now: DateTime<Utc>) -> bool {
        // Off-schema entries are kept as stored.
        if record.is_verbatim() {
            return false;
        }
        if !record.is_enriched() {
            return true;
        }
        match *self {
            RefreshPolicy::Never => false,
            RefreshPolicy::StaleAfter(max_age) => {
                let cutoff = now - max_age;
                record.last_observed() >= cutoff
                    && record.enriched_at.map_or(true, |at| at < cutoff)
            }
        }
    }
}

/// Ids of records the next enrichment pass should send, in history order.
pub fn pending_ids(history: &History, policy: RefreshPolicy, now: DateTime<Utc>) -> Vec<String> {
    history
        .values()
        .filter(|record| policy.needs_enrichment(record, now))
        .map(|record| record.id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EnrichmentFailure {
    pub id: String,
    pub error: EnrichmentError,
}

#[derive(Debug, Default)]
pub struct EnrichmentReport {
    /// Records selected for enrichment.
    pub attempted: usize,
    /// Records that received a new enrichment.
    pub updated: usize,
    pub failures: Vec<EnrichmentFailure>,
    /// True when no enricher was configured and the pass was skipped.
    pub skipped: bool,
}

// ---------------------------------------------------------------------------
// enrich_pending
// ---------------------------------------------------------------------------

/// Enrich every pending record, one request at a time.
///
/// Each record's outcome is collected separately; a failure is logged and
/// the loop moves on. The full history is persisted once, after the loop,
/// and only if something was updated. With no enricher configured this is
/// a no-op.
pub async fn enrich_pending<R: HistoryRepository>(
    history: &mut History,
    enricher: Option<&dyn IncidentEnricher>,
    store: &HistoryStore<R>,
    policy: RefreshPolicy,
    now: DateTime<Utc>,
) -> StoreResult<EnrichmentReport> {
    let Some(enricher) = enricher else {
        warn!("No inference credential configured, skipping enrichment");
        return Ok(EnrichmentReport {
            skipped: true,
            ..Default::default()
        });
    };

    let pending = pending_ids(history, policy, now);
    if pending.is_empty() {
        info!("All incidents already enriched");
        return Ok(EnrichmentReport::default());
    }

    info!(pending = pending.len(), "Enriching incidents");

    let mut report = EnrichmentReport {
        attempted: pending.len(),
        ..Default::default()
    };

    for id in pending {
        let Some(record) = history.get_mut(&id) else {
            continue;
        };

        match enricher.enrich(&record.raw_text).await {
            Ok(enrichment) => {
                info!(
                    id = record.short_id(),
                    summary = enrichment.summary.as_deref().unwrap_or(""),
                    "Incident enriched"
                );
                record.attach_enrichment(enrichment, now);
                report.updated += 1;
            }
            Err(error) => {
                warn!(id = record.short_id(), error = %error, "Enrichment failed");
                report.failures.push(EnrichmentFailure { id, error });
            }
        }
    }

    if report.updated > 0 {
        store.save(history)?;
        info!(updated = report.updated, "Enrichments saved");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::merge_observations;
    use crate::testing::{enrichment, ts, MemoryRepository, MockEnricher};
    use railstatus_common::{content_id, IncidentStatus};

    fn history_with(texts: &[&str]) -> History {
        let mut history = History::new();
        let batch: Vec<String> = texts.iter().map(|s| s.to_string()).collect();
        merge_observations(&mut history, &batch, ts(8));
        history
    }

    fn red() -> railstatus_common::Enrichment {
        enrichment(Some(IncidentStatus::Red), Some(true), Some(4), None)
    }

    #[tokio::test]
    async fn no_enricher_is_a_noop() {
        let mut history = history_with(&["C4 corte"]);
        let store = HistoryStore::new(MemoryRepository::new());

        let report = enrich_pending(&mut history, None, &store, RefreshPolicy::Never, ts(9))
            .await
            .unwrap();

        assert!(report.skipped);
        assert_eq!(report.updated, 0);
        assert_eq!(store.repository().save_count(), 0);
        assert!(!history[&content_id("C4 corte")].is_enriched());
    }

    #[tokio::test]
    async fn nothing_pending_makes_no_call_and_no_write() {
        let mut history = history_with(&["C4 corte"]);
        history
            .get_mut(&content_id("C4 corte"))
            .unwrap()
            .attach_enrichment(red(), ts(8));
        let enricher = MockEnricher::new();
        let store = HistoryStore::new(MemoryRepository::new());

        let report = enrich_pending(
            &mut history,
            Some(&enricher),
            &store,
            RefreshPolicy::Never,
            ts(9),
        )
        .await
        .unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(report.updated, 0);
        assert!(enricher.calls().is_empty());
        assert_eq!(store.repository().save_count(), 0);
    }

    #[tokio::test]
    async fn failure_in_the_middle_is_isolated() {
        let mut history = history_with(&["incidencia uno", "incidencia dos", "incidencia tres"]);
        let enricher = MockEnricher::new()
            .on_text("incidencia uno", red())
            .fail_on("incidencia dos", "connection reset")
            .on_text("incidencia tres", red());
        let store = HistoryStore::new(MemoryRepository::new());

        let report = enrich_pending(
            &mut history,
            Some(&enricher),
            &store,
            RefreshPolicy::Never,
            ts(9),
        )
        .await
        .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, content_id("incidencia dos"));
        assert_eq!(enricher.calls().len(), 3);

        let saved = store.repository().snapshot().unwrap();
        assert!(saved[&content_id("incidencia uno")].is_enriched());
        assert!(!saved[&content_id("incidencia dos")].is_enriched());
        assert!(saved[&content_id("incidencia tres")].is_enriched());
        assert_eq!(saved[&content_id("incidencia uno")].enriched_at, Some(ts(9)));
        assert_eq!(store.repository().save_count(), 1);
    }

    #[tokio::test]
    async fn all_failures_write_nothing() {
        let mut history = history_with(&["incidencia uno"]);
        let enricher = MockEnricher::new().fail_on("incidencia uno", "timeout");
        let store = HistoryStore::new(MemoryRepository::new());

        let report = enrich_pending(
            &mut history,
            Some(&enricher),
            &store,
            RefreshPolicy::Never,
            ts(9),
        )
        .await
        .unwrap();

        assert_eq!(report.updated, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(store.repository().save_count(), 0);
    }

    #[test]
    fn never_policy_only_selects_unenriched() {
        let mut history = history_with(&["a-incidencia", "b-incidencia"]);
        history
            .get_mut(&content_id("a-incidencia"))
            .unwrap()
            .attach_enrichment(red(), ts(8));

        let pending = pending_ids(&history, RefreshPolicy::Never, ts(100));

        assert_eq!(pending, vec![content_id("b-incidencia")]);
    }

    #[test]
    fn off_schema_records_are_never_pending() {
        let mut history = history_with(&["b-incidencia"]);
        let legacy = HistoryRecord::from_unparsed(
            "legacy",
            serde_json::json!({"descripcion": "a-incidencia", "analisis_ia": "rojo"}),
        );
        history.insert(legacy.id.clone(), legacy);

        let expected = vec![content_id("b-incidencia")];
        let stale = RefreshPolicy::StaleAfter(Duration::hours(1));
        assert_eq!(pending_ids(&history, RefreshPolicy::Never, ts(9)), expected);
        assert_eq!(pending_ids(&history, stale, ts(9)), expected);
    }

    #[test]
    fn stale_policy_refreshes_only_recently_observed_records() {
        let mut history = history_with(&["sigue visible", "ya desaparecida"]);
        for record in history.values_mut() {
            record.attach_enrichment(red(), ts(0));
        }
        history
            .get_mut(&content_id("sigue visible"))
            .unwrap()
            .observe(ts(30));

        let policy = RefreshPolicy::from_hours(Some(24));
        let pending = pending_ids(&history, policy, ts(40));

        assert_eq!(pending, vec![content_id("sigue visible")]);
    }

    #[test]
    fn stale_policy_keeps_fresh_enrichments() {
        let mut history = history_with(&["sigue visible"]);
        let record = history.get_mut(&content_id("sigue visible")).unwrap();
        record.attach_enrichment(red(), ts(20));
        record.observe(ts(30));

        let pending = pending_ids(&history, RefreshPolicy::from_hours(Some(24)), ts(30));

        assert!(pending.is_empty());
    }

    #[test]
    fn stale_policy_refreshes_undated_enrichments() {
        let mut history = history_with(&["legado"]);
        let record = history.get_mut(&content_id("legado")).unwrap();
        record.enrichment = Some(red());
        record.observe(ts(30));

        let pending = pending_ids(&history, RefreshPolicy::from_hours(Some(24)), ts(30));

        assert_eq!(pending, vec![content_id("legado")]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_enrichment() {
        let mut history = history_with(&["sigue visible"]);
        let id = content_id("sigue visible");
        history.get_mut(&id).unwrap().attach_enrichment(red(), ts(0));
        history.get_mut(&id).unwrap().observe(ts(30));
        let enricher = MockEnricher::new().fail_on("sigue visible", "503");
        let store = HistoryStore::new(MemoryRepository::new());

        let report = enrich_pending(
            &mut history,
            Some(&enricher),
            &store,
            RefreshPolicy::from_hours(Some(24)),
            ts(30),
        )
        .await
        .unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(history[&id].enrichment.as_ref(), Some(&red()));
        assert_eq!(history[&id].enriched_at, Some(ts(0)));
    }

    #[test]
    fn policy_from_hours() {
        assert_eq!(RefreshPolicy::from_hours(None), RefreshPolicy::Never);
        assert_eq!(
            RefreshPolicy::from_hours(Some(6)),
            RefreshPolicy::StaleAfter(Duration::hours(6))
        );
    }
}
