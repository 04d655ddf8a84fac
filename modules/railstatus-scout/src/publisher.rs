//! Derived snapshot of the incidents worth showing, rebuilt from history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use railstatus_common::{
    Enrichment, History, HistoryRecord, PublishedIncident, PublishedSnapshot, StoreResult,
};

use crate::store::write_json_atomic;

const DEFAULT_NETWORK: &str = "OTROS";
const DEFAULT_LOCATION_TYPE: &str = "LINE";
const DEFAULT_STATUS: &str = "BLUE";
const DEFAULT_CAUSE: &str = "OTROS";
const MIN_SEVERITY: u8 = 1;
const MAX_SEVERITY: u8 = 5;

const SNAPSHOT_INDENT: &[u8] = b"  ";

/// Enriched and either flagged active or in a disruption state.
pub fn is_publishable(record: &HistoryRecord) -> bool {
    if record.is_verbatim() {
        return false;
    }
    record.enrichment.as_ref().is_some_and(|e| {
        e.is_active == Some(true) || e.status.as_ref().is_some_and(|s| s.is_disruption())
    })
}

/// Project a record onto the published shape, filling defaults.
pub fn project(record: &HistoryRecord, enrichment: &Enrichment) -> PublishedIncident {
    PublishedIncident {
        id: record.id.clone(),
        summary: enrichment.summary.clone().unwrap_or_default(),
        description: enrichment
            .description
            .clone()
            .unwrap_or_else(|| record.raw_text.clone()),
        original_text: record.raw_text.clone(),
        network: enrichment
            .network
            .clone()
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
        line_affected: enrichment.line_affected.clone(),
        location_type: enrichment
            .location_type
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCATION_TYPE.to_string()),
        nodes: enrichment.nodes.clone().unwrap_or_default(),
        status: enrichment
            .status
            .as_ref()
            .map_or_else(|| DEFAULT_STATUS.to_string(), |s| s.as_str().to_string()),
        cause_category: enrichment
            .cause_category
            .clone()
            .unwrap_or_else(|| DEFAULT_CAUSE.to_string()),
        severity_level: enrichment
            .severity_level
            .unwrap_or(MIN_SEVERITY)
            .clamp(MIN_SEVERITY, MAX_SEVERITY),
        start_date: enrichment.start_date.clone(),
        end_date: enrichment.end_date.clone(),
        transport_backup: enrichment.transport_backup.unwrap_or(false),
        first_seen: record.first_seen,
        last_seen: record.last_seen,
    }
}

/// Build the snapshot: publishable records, most severe first, then by
/// start date (undated first). Ties keep history order.
pub fn build_snapshot(history: &History, generated_at: DateTime<Utc>) -> PublishedSnapshot {
    let mut incidents: Vec<PublishedIncident> = history
        .values()
        .filter(|record| is_publishable(record))
        .filter_map(|record| record.enrichment.as_ref().map(|e| project(record, e)))
        .collect();

    incidents.sort_by(|a, b| {
        b.severity_level.cmp(&a.severity_level).then_with(|| {
            a.start_date
                .as_deref()
                .unwrap_or("")
                .cmp(b.start_date.as_deref().unwrap_or(""))
        })
    });

    PublishedSnapshot {
        generated_at,
        total: incidents.len(),
        incidents,
    }
}

/// Writes the snapshot document, replacing the previous one atomically.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Always writes, even when only `generated_at` changed.
    pub fn write(&self, snapshot: &PublishedSnapshot) -> StoreResult<()> {
        write_json_atomic(&self.path, snapshot, SNAPSHOT_INDENT)?;
        info!(
            path = %self.path.display(),
            total = snapshot.total,
            generated_at = %railstatus_common::timefmt::to_wire(&snapshot.generated_at),
            "Snapshot published"
        );
        Ok(())
    }

    pub fn publish(&self, history: &History, now: DateTime<Utc>) -> StoreResult<PublishedSnapshot> {
        let snapshot = build_snapshot(history, now);
        self.write(&snapshot)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{enrichment, ts};
    use railstatus_common::IncidentStatus;

    fn enriched(text: &str, e: Enrichment) -> HistoryRecord {
        let mut record = HistoryRecord::new(text, ts(8));
        record.attach_enrichment(e, ts(8));
        record
    }

    fn history_of(records: Vec<HistoryRecord>) -> History {
        records.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn inclusion_predicate() {
        let cases = [
            (Some(IncidentStatus::Blue), Some(true), true),
            (Some(IncidentStatus::Green), Some(true), true),
            (Some(IncidentStatus::Red), Some(false), true),
            (Some(IncidentStatus::Red), None, true),
            (Some(IncidentStatus::Yellow), Some(false), true),
            (Some(IncidentStatus::Blue), Some(false), false),
            (Some(IncidentStatus::Green), None, false),
            (None, None, false),
            (Some(IncidentStatus::Other("PURPLE".into())), None, false),
        ];
        for (status, is_active, expected) in cases {
            let record = enriched("C1 incidencia", enrichment(status.clone(), is_active, None, None));
            assert_eq!(
                is_publishable(&record),
                expected,
                "status={status:?} is_active={is_active:?}"
            );
        }
    }

    #[test]
    fn unenriched_records_are_never_published() {
        let record = HistoryRecord::new("C1 incidencia sin analizar", ts(8));
        assert!(!is_publishable(&record));

        let snapshot = build_snapshot(&history_of(vec![record]), ts(9));
        assert_eq!(snapshot.total, 0);
        assert!(snapshot.incidents.is_empty());
    }

    #[test]
    fn sorted_by_severity_then_start_date() {
        let history = history_of(vec![
            enriched(
                "incidencia A",
                enrichment(Some(IncidentStatus::Red), None, Some(3), Some("2025-02-01")),
            ),
            enriched(
                "incidencia B",
                enrichment(Some(IncidentStatus::Red), None, Some(5), None),
            ),
            enriched(
                "incidencia C",
                enrichment(Some(IncidentStatus::Red), None, Some(3), Some("2025-01-15")),
            ),
        ]);

        let snapshot = build_snapshot(&history, ts(9));

        let order: Vec<&str> = snapshot
            .incidents
            .iter()
            .map(|i| i.original_text.as_str())
            .collect();
        assert_eq!(order, vec!["incidencia B", "incidencia C", "incidencia A"]);
        assert_eq!(snapshot.total, 3);
    }

    #[test]
    fn equal_severity_orders_by_start_date() {
        let history = history_of(vec![
            enriched(
                "leve",
                enrichment(Some(IncidentStatus::Yellow), None, Some(2), None),
            ),
            enriched(
                "grave segunda",
                enrichment(Some(IncidentStatus::Red), None, Some(5), Some("2024-01-02")),
            ),
            enriched(
                "grave primera",
                enrichment(Some(IncidentStatus::Red), None, Some(5), Some("2024-01-01")),
            ),
        ]);

        let snapshot = build_snapshot(&history, ts(9));

        let keys: Vec<(u8, Option<&str>)> = snapshot
            .incidents
            .iter()
            .map(|i| (i.severity_level, i.start_date.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![(5, Some("2024-01-01")), (5, Some("2024-01-02")), (2, None)]
        );
    }

    #[test]
    fn undated_sorts_before_dated_at_same_severity() {
        let history = history_of(vec![
            enriched(
                "con fecha",
                enrichment(Some(IncidentStatus::Yellow), None, Some(2), Some("2025-01-01")),
            ),
            enriched(
                "sin fecha",
                enrichment(Some(IncidentStatus::Yellow), None, Some(2), None),
            ),
        ]);

        let snapshot = build_snapshot(&history, ts(9));

        assert_eq!(snapshot.incidents[0].original_text, "sin fecha");
    }

    #[test]
    fn projection_fills_defaults() {
        let record = enriched(
            "Línea C4: circulación interrumpida",
            Enrichment {
                is_active: Some(true),
                ..Default::default()
            },
        );

        let incident = project(&record, record.enrichment.as_ref().unwrap());

        assert_eq!(incident.summary, "");
        assert_eq!(incident.description, "Línea C4: circulación interrumpida");
        assert_eq!(incident.original_text, "Línea C4: circulación interrumpida");
        assert_eq!(incident.network, "OTROS");
        assert_eq!(incident.location_type, "LINE");
        assert!(incident.nodes.is_empty());
        assert_eq!(incident.status, "BLUE");
        assert_eq!(incident.cause_category, "OTROS");
        assert_eq!(incident.severity_level, 1);
        assert!(!incident.transport_backup);
        assert_eq!(incident.first_seen, ts(8));
        assert_eq!(incident.last_seen, None);
    }

    #[test]
    fn severity_is_clamped() {
        let high = enriched("alta", enrichment(Some(IncidentStatus::Red), None, Some(9), None));
        let zero = enriched("cero", enrichment(Some(IncidentStatus::Red), None, Some(0), None));

        assert_eq!(project(&high, high.enrichment.as_ref().unwrap()).severity_level, 5);
        assert_eq!(project(&zero, zero.enrichment.as_ref().unwrap()).severity_level, 1);
    }

    #[test]
    fn writer_serializes_wire_shape() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let history = history_of(vec![enriched(
            "Línea R2: retrasos",
            enrichment(Some(IncidentStatus::Yellow), None, Some(2), None),
        )]);

        writer.publish(&history, ts(9)).unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert!(content.starts_with("{\n  \"generated_at\": "));
        assert!(content.contains("\"incidencias\": ["));
        assert!(content.contains("\"descripcion_original\": \"Línea R2: retrasos\""));

        let parsed: PublishedSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.generated_at, ts(9));
        assert_eq!(parsed.total, 1);
    }

    #[test]
    fn rewrite_refreshes_generated_at() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));
        let history = history_of(vec![enriched(
            "Línea C5: incidencia en Fuenlabrada",
            enrichment(Some(IncidentStatus::Red), Some(true), Some(3), None),
        )]);

        let first = writer.publish(&history, ts(9)).unwrap();
        let second = writer.publish(&history, ts(10)).unwrap();

        assert_eq!(first.incidents, second.incidents);
        assert_ne!(first.generated_at, second.generated_at);

        let parsed: PublishedSnapshot =
            serde_json::from_str(&std::fs::read_to_string(writer.path()).unwrap()).unwrap();
        assert_eq!(parsed.generated_at, ts(10));
        assert_eq!(parsed.total, 1);
        assert_eq!(parsed.incidents, second.incidents);
    }

    #[test]
    fn empty_history_still_rewrites_the_feed() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("incidencias.json"));

        writer.publish(&History::new(), ts(9)).unwrap();
        writer.publish(&History::new(), ts(10)).unwrap();

        let parsed: PublishedSnapshot =
            serde_json::from_str(&std::fs::read_to_string(writer.path()).unwrap()).unwrap();
        assert_eq!(parsed.generated_at, ts(10));
        assert_eq!(parsed.total, 0);
    }

    #[test]
    fn off_schema_records_are_not_published() {
        let legacy = HistoryRecord::from_unparsed(
            "legacy",
            serde_json::json!({
                "descripcion": "C2 cortada",
                "analisis_ia": {"status": "RED", "is_active": true, "nodes": {}}
            }),
        );
        assert!(!is_publishable(&legacy));

        let snapshot = build_snapshot(&history_of(vec![legacy]), ts(9));
        assert_eq!(snapshot.total, 0);
    }
}
