use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use railstatus_common::Config;

use crate::enrichment::{enrich_pending, LlmEnricher, RefreshPolicy};
use crate::publisher::SnapshotWriter;
use crate::source::StatusPageSource;
use crate::store::{HistoryStore, JsonFileRepository};
use crate::traits::{HistoryRepository, IncidentEnricher, StatusSource};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub items_fetched: usize,
    pub new_incidents: usize,
    pub total_incidents: usize,
    pub enrichment_pending: usize,
    pub enriched: usize,
    pub enrichment_failures: usize,
    pub enrichment_skipped: bool,
    pub published: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run complete: {} fetched, {} new, {} in history, ",
            self.items_fetched, self.new_incidents, self.total_incidents,
        )?;
        if self.enrichment_skipped {
            write!(f, "enrichment skipped, ")?;
        } else {
            write!(
                f,
                "{}/{} enriched ({} failed), ",
                self.enriched, self.enrichment_pending, self.enrichment_failures,
            )?;
        }
        write!(f, "{} published", self.published)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunStats),
    /// The status page yielded nothing. No state was touched.
    NoItems,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// One scrape → merge → enrich → publish pass.
pub struct Pipeline<R> {
    source: Box<dyn StatusSource>,
    store: HistoryStore<R>,
    enricher: Option<Box<dyn IncidentEnricher>>,
    refresh: RefreshPolicy,
    snapshot: SnapshotWriter,
}

impl<R: HistoryRepository> Pipeline<R> {
    pub fn new(source: Box<dyn StatusSource>, repo: R, snapshot: SnapshotWriter) -> Self {
        Self {
            source,
            store: HistoryStore::new(repo),
            enricher: None,
            refresh: RefreshPolicy::Never,
            snapshot,
        }
    }

    pub fn with_enricher(mut self, enricher: Box<dyn IncidentEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_refresh_policy(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn store(&self) -> &HistoryStore<R> {
        &self.store
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunOutcome> {
        let items = match self.source.fetch_items().await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Status page fetch failed, aborting");
                return Ok(RunOutcome::NoItems);
            }
        };
        if items.is_empty() {
            warn!("No incidents found on the status page, aborting");
            return Ok(RunOutcome::NoItems);
        }
        info!(items = items.len(), "Status page fetched");

        let merged = self
            .store
            .dedupe_and_merge(&items, now)
            .context("Failed to merge observations into history")?;
        let mut history = merged.history;

        let report = enrich_pending(
            &mut history,
            self.enricher.as_deref(),
            &self.store,
            self.refresh,
            now,
        )
        .await
        .context("Failed to save enrichments")?;

        let snapshot = self
            .snapshot
            .publish(&history, now)
            .context("Failed to write snapshot")?;

        Ok(RunOutcome::Completed(RunStats {
            items_fetched: items.len(),
            new_incidents: merged.new_count,
            total_incidents: history.len(),
            enrichment_pending: report.attempted,
            enriched: report.updated,
            enrichment_failures: report.failures.len(),
            enrichment_skipped: report.skipped,
            published: snapshot.total,
        }))
    }

    /// Rebuild the snapshot from stored history. No scrape, no enrichment,
    /// no history write.
    pub fn publish_only(&self, now: DateTime<Utc>) -> Result<RunStats> {
        let loaded = self.store.load_or_empty();
        if !loaded.existed {
            warn!("No stored history, publishing an empty snapshot");
        }
        let snapshot = self
            .snapshot
            .publish(&loaded.history, now)
            .context("Failed to write snapshot")?;

        Ok(RunStats {
            total_incidents: loaded.history.len(),
            enrichment_skipped: true,
            published: snapshot.total,
            ..Default::default()
        })
    }
}

impl Pipeline<JsonFileRepository> {
    /// Wire the production pipeline: rendered status page, JSON files on
    /// disk, and the configured inference provider when its key is set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = &config.file.storage;
        let source = StatusPageSource::from_config(config)?;

        let mut pipeline = Pipeline::new(
            Box::new(source),
            JsonFileRepository::new(&storage.history_path),
            SnapshotWriter::new(&storage.snapshot_path),
        )
        .with_refresh_policy(RefreshPolicy::from_hours(
            config.file.enrichment.refresh_after_hours,
        ));

        if let Some(enricher) = LlmEnricher::from_config(config) {
            pipeline = pipeline.with_enricher(Box::new(enricher));
        }

        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{enrichment, ts, MemoryRepository, MockEnricher, MockSource};
    use railstatus_common::{content_id, IncidentStatus, PublishedSnapshot};

    fn read_snapshot(writer: &SnapshotWriter) -> PublishedSnapshot {
        serde_json::from_str(&std::fs::read_to_string(writer.path()).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn empty_source_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let pipeline = Pipeline::new(
            Box::new(MockSource::with_items(&[])),
            MemoryRepository::new(),
            writer.clone(),
        );

        let outcome = pipeline.run(ts(8)).await.unwrap();

        assert_eq!(outcome, RunOutcome::NoItems);
        assert!(!outcome.is_success());
        assert_eq!(pipeline.store().repository().save_count(), 0);
        assert!(!writer.path().exists());
    }

    #[tokio::test]
    async fn fetch_failure_is_no_items() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let pipeline = Pipeline::new(
            Box::new(MockSource::failing("chrome crashed")),
            MemoryRepository::new(),
            writer.clone(),
        );

        assert_eq!(pipeline.run(ts(8)).await.unwrap(), RunOutcome::NoItems);
        assert!(!writer.path().exists());
    }

    #[tokio::test]
    async fn full_run_publishes_enriched_disruptions() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let enricher = MockEnricher::new()
            .on_text(
                "Línea C4: circulación interrumpida",
                enrichment(Some(IncidentStatus::Red), Some(true), Some(4), None),
            )
            .on_text(
                "Línea C1: incidencia subsanada",
                enrichment(Some(IncidentStatus::Green), Some(false), Some(1), None),
            );
        let pipeline = Pipeline::new(
            Box::new(MockSource::with_items(&[
                "Línea C4: circulación interrumpida",
                "Línea C1: incidencia subsanada",
            ])),
            MemoryRepository::new(),
            writer.clone(),
        )
        .with_enricher(Box::new(enricher));

        let outcome = pipeline.run(ts(8)).await.unwrap();

        let RunOutcome::Completed(stats) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(stats.items_fetched, 2);
        assert_eq!(stats.new_incidents, 2);
        assert_eq!(stats.enriched, 2);
        assert_eq!(stats.published, 1);

        let snapshot = read_snapshot(&writer);
        assert_eq!(snapshot.total, 1);
        assert_eq!(
            snapshot.incidents[0].id,
            content_id("Línea C4: circulación interrumpida")
        );
    }

    #[tokio::test]
    async fn missing_enricher_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let pipeline = Pipeline::new(
            Box::new(MockSource::with_items(&["Línea C4: circulación interrumpida"])),
            MemoryRepository::new(),
            writer.clone(),
        );

        let RunOutcome::Completed(stats) = pipeline.run(ts(8)).await.unwrap() else {
            panic!("expected a completed run");
        };

        assert!(stats.enrichment_skipped);
        assert_eq!(stats.published, 0);
        assert_eq!(read_snapshot(&writer).total, 0);
        assert_eq!(pipeline.store().repository().save_count(), 1);
    }

    #[tokio::test]
    async fn publish_only_does_not_write_history() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let mut history = railstatus_common::History::new();
        let mut record = railstatus_common::HistoryRecord::new("Línea R1: retrasos", ts(8));
        record.attach_enrichment(
            enrichment(Some(IncidentStatus::Yellow), None, Some(2), None),
            ts(8),
        );
        history.insert(record.id.clone(), record);
        let pipeline = Pipeline::new(
            Box::new(MockSource::failing("not used")),
            MemoryRepository::with_history(history),
            writer.clone(),
        );

        let stats = pipeline.publish_only(ts(9)).unwrap();

        assert_eq!(stats.published, 1);
        assert_eq!(pipeline.store().repository().save_count(), 0);
        assert_eq!(read_snapshot(&writer).generated_at, ts(9));
    }

    #[test]
    fn stats_display() {
        let stats = RunStats {
            items_fetched: 3,
            new_incidents: 1,
            total_incidents: 10,
            enrichment_pending: 1,
            enriched: 1,
            enrichment_failures: 0,
            enrichment_skipped: false,
            published: 4,
        };
        assert_eq!(
            stats.to_string(),
            "Run complete: 3 fetched, 1 new, 10 in history, 1/1 enriched (0 failed), 4 published"
        );
    }
}
