// Test mocks for the railstatus pipeline.
//
// Three mocks matching the three trait boundaries:
// - MockSource (StatusSource): fixed list of texts, or a fetch failure
// - MockEnricher (IncidentEnricher): text→Enrichment map, records every call
// - MemoryRepository (HistoryRepository): in-memory history with a save counter
//
// Plus helpers for fixed timestamps and enrichments.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use railstatus_common::{Enrichment, History, IncidentStatus, StoreError, StoreResult};

use crate::enrichment::EnrichmentError;
use crate::traits::{HistoryRepository, IncidentEnricher, StatusSource};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 2025-03-01T00:00:00Z plus `hours`.
pub fn ts(hours: i64) -> DateTime<Utc> {
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).single().unwrap_or_default();
    base + Duration::hours(hours)
}

/// Enrichment with the fields that drive publishing set, everything else empty.
pub fn enrichment(
    status: Option<IncidentStatus>,
    is_active: Option<bool>,
    severity_level: Option<u8>,
    start_date: Option<&str>,
) -> Enrichment {
    Enrichment {
        summary: Some("Incidencia de prueba".to_string()),
        status,
        is_active,
        severity_level,
        start_date: start_date.map(str::to_string),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

pub struct MockSource {
    items: std::result::Result<Vec<String>, String>,
}

impl MockSource {
    pub fn with_items(items: &[&str]) -> Self {
        Self {
            items: Ok(items.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            items: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl StatusSource for MockSource {
    async fn fetch_items(&self) -> Result<Vec<String>> {
        match &self.items {
            Ok(items) => Ok(items.clone()),
            Err(message) => bail!("{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

/// Map-based enricher. Returns `Err` for unregistered texts.
/// Builder pattern: `.on_text()`, `.fail_on()`.
#[derive(Default)]
pub struct MockEnricher {
    responses: HashMap<String, std::result::Result<Enrichment, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text(mut self, text: &str, enrichment: Enrichment) -> Self {
        self.responses.insert(text.to_string(), Ok(enrichment));
        self
    }

    pub fn fail_on(mut self, text: &str, message: &str) -> Self {
        self.responses
            .insert(text.to_string(), Err(message.to_string()));
        self
    }

    /// Texts sent to the enricher so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IncidentEnricher for MockEnricher {
    async fn enrich(&self, raw_text: &str) -> std::result::Result<Enrichment, EnrichmentError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(raw_text.to_string());
        }
        match self.responses.get(raw_text) {
            Some(Ok(enrichment)) => Ok(enrichment.clone()),
            Some(Err(message)) => Err(EnrichmentError::Request(anyhow::anyhow!("{message}"))),
            None => Err(EnrichmentError::EmptyResponse),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    history: Option<History>,
    corrupt: bool,
    saves: usize,
}

/// In-memory history store. A corrupt repository fails every load until the
/// first save replaces it.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: History) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                history: Some(history),
                ..Default::default()
            }),
        }
    }

    pub fn corrupt() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                corrupt: true,
                ..Default::default()
            }),
        }
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().map(|s| s.saves).unwrap_or_default()
    }

    /// Last saved history, if any.
    pub fn snapshot(&self) -> Option<History> {
        self.state.lock().ok().and_then(|s| s.history.clone())
    }

    fn poisoned() -> StoreError {
        StoreError::io(
            "memory",
            std::io::Error::new(std::io::ErrorKind::Other, "memory repository lock poisoned"),
        )
    }
}

impl HistoryRepository for MemoryRepository {
    fn load(&self) -> StoreResult<Option<History>> {
        let state = self.state.lock().map_err(|_| Self::poisoned())?;
        if state.corrupt {
            return Err(StoreError::io(
                "memory",
                std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt history"),
            ));
        }
        Ok(state.history.clone())
    }

    fn save(&self, history: &History) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;
        state.history = Some(history.clone());
        state.corrupt = false;
        state.saves += 1;
        Ok(())
    }
}
