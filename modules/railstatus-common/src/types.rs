use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// --- Content identity ---

/// SHA-256 of the exact text, lowercase hex. No normalization: texts that
/// differ only in whitespace get different ids.
pub fn content_id(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

// --- History ---

/// Every record ever observed, keyed by content id.
pub type History = BTreeMap<String, HistoryRecord>;

/// Lifecycle tag written on creation. Informational only.
pub const RECORD_STATUS_ACTIVE: &str = "Activa";

fn default_record_status() -> String {
    RECORD_STATUS_ACTIVE.to_string()
}

/// One observed incident text and everything learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    #[serde(rename = "descripcion")]
    pub raw_text: String,
    #[serde(rename = "primera_vez_visto", with = "crate::timefmt")]
    pub first_seen: DateTime<Utc>,
    #[serde(
        rename = "ultima_vez_visto",
        default,
        with = "crate::timefmt::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(rename = "estado", default = "default_record_status")]
    pub status: String,
    #[serde(
        rename = "analisis_ia",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub enrichment: Option<Enrichment>,
    #[serde(
        rename = "analizado_en",
        default,
        with = "crate::timefmt::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub enriched_at: Option<DateTime<Utc>>,
    /// The stored entry exactly as found on disk, when it did not match this
    /// schema. Such a record is written back unchanged and is never enriched
    /// or published.
    #[serde(skip)]
    pub verbatim: Option<serde_json::Value>,
}

impl HistoryRecord {
    pub fn new(raw_text: impl Into<String>, now: DateTime<Utc>) -> Self {
        let raw_text = raw_text.into();
        Self {
            id: content_id(&raw_text),
            raw_text,
            first_seen: now,
            last_seen: None,
            status: default_record_status(),
            enrichment: None,
            enriched_at: None,
            verbatim: None,
        }
    }

    /// Keep a stored entry that does not fit the schema.
    ///
    /// Identity comes from the history key. Whatever text and timestamps can
    /// be read are used for dedup; the entry itself is kept as-is.
    pub fn from_unparsed(id: impl Into<String>, stored: serde_json::Value) -> Self {
        let text = |key: &str| stored.get(key).and_then(serde_json::Value::as_str);
        let first_seen = text("primera_vez_visto")
            .and_then(crate::timefmt::parse)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            id: id.into(),
            raw_text: text("descripcion").unwrap_or_default().to_string(),
            first_seen,
            last_seen: text("ultima_vez_visto").and_then(crate::timefmt::parse),
            status: text("estado").map_or_else(default_record_status, str::to_string),
            enrichment: None,
            enriched_at: None,
            verbatim: Some(stored),
        }
    }

    pub fn is_verbatim(&self) -> bool {
        self.verbatim.is_some()
    }

    /// Record a re-observation of the same text.
    pub fn observe(&mut self, now: DateTime<Utc>) {
        self.last_seen = Some(now);
        if let Some(serde_json::Value::Object(stored)) = self.verbatim.as_mut() {
            stored.insert(
                "ultima_vez_visto".to_string(),
                serde_json::Value::String(crate::timefmt::to_wire(&now)),
            );
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }

    pub fn attach_enrichment(&mut self, enrichment: Enrichment, now: DateTime<Utc>) {
        self.enrichment = Some(enrichment);
        self.enriched_at = Some(now);
    }

    /// Most recent time this text was on the status page.
    pub fn last_observed(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or(self.first_seen)
    }

    /// First eight characters of the id, for log lines.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

// --- Enrichment ---

/// Traffic-light status the model assigns to an incident.
///
/// Unknown values are kept verbatim in `Other` so nothing the model said is lost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentStatus {
    /// Service cut or interrupted.
    Red,
    /// Delays.
    Yellow,
    /// Works or alternative transport plan.
    Blue,
    /// Resolved.
    Green,
    Other(String),
}

impl IncidentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IncidentStatus::Red => "RED",
            IncidentStatus::Yellow => "YELLOW",
            IncidentStatus::Blue => "BLUE",
            IncidentStatus::Green => "GREEN",
            IncidentStatus::Other(raw) => raw,
        }
    }

    /// Statuses that make an incident publishable even when not flagged active.
    pub fn is_disruption(&self) -> bool {
        matches!(self, IncidentStatus::Red | IncidentStatus::Yellow)
    }
}

impl From<String> for IncidentStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RED" => IncidentStatus::Red,
            "YELLOW" => IncidentStatus::Yellow,
            "BLUE" => IncidentStatus::Blue,
            "GREEN" => IncidentStatus::Green,
            _ => IncidentStatus::Other(raw),
        }
    }
}

impl From<IncidentStatus> for String {
    fn from(status: IncidentStatus) -> Self {
        match status {
            IncidentStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured interpretation of an incident text, as returned by the model.
///
/// Every field is optional; defaults are applied when projecting for the
/// public feed, never here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    #[serde(deserialize_with = "lenient::string")]
    pub summary: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub network: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub line_affected: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub location_type: Option<String>,
    #[serde(deserialize_with = "lenient::string_list")]
    pub nodes: Option<Vec<String>>,
    pub status: Option<IncidentStatus>,
    #[serde(deserialize_with = "lenient::string")]
    pub cause_category: Option<String>,
    #[serde(deserialize_with = "lenient::severity")]
    pub severity_level: Option<u8>,
    #[serde(deserialize_with = "lenient::string")]
    pub start_date: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub end_date: Option<String>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub is_active: Option<bool>,
    #[serde(deserialize_with = "lenient::boolean")]
    pub transport_backup: Option<bool>,
    /// Anything else the model returned (e.g. an echoed `id`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Deserializers that accept the loose shapes models produce for scalar fields.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn scalar_to_string(value: Value) -> Option<String> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Array(items) => {
                let joined: Vec<String> = items.into_iter().filter_map(scalar_to_string).collect();
                if joined.is_empty() {
                    None
                } else {
                    Some(joined.join(", "))
                }
            }
            other => scalar_to_string(other),
        })
    }

    pub fn string_list<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<String>>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Null => None,
            Value::Array(items) => Some(items.into_iter().filter_map(scalar_to_string).collect()),
            other => scalar_to_string(other).map(|s| vec![s]),
        })
    }

    pub fn severity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let level = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(level
            .filter(|l| l.is_finite())
            .map(|l| l.round().clamp(0.0, u8::MAX as f64) as u8))
    }

    pub fn boolean<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Bool(b) => Some(b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "si" | "sí" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        })
    }
}

// --- Published snapshot ---

/// One active incident as exposed to the web front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedIncident {
    pub id: String,
    pub summary: String,
    pub description: String,
    #[serde(rename = "descripcion_original")]
    pub original_text: String,
    pub network: String,
    pub line_affected: Option<String>,
    pub location_type: String,
    pub nodes: Vec<String>,
    pub status: String,
    pub cause_category: String,
    pub severity_level: u8,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub transport_backup: bool,
    #[serde(rename = "primera_vez_visto", with = "crate::timefmt")]
    pub first_seen: DateTime<Utc>,
    #[serde(rename = "ultima_vez_visto", default, with = "crate::timefmt::option")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// The full feed document, recomputed from history on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedSnapshot {
    #[serde(with = "crate::timefmt")]
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    #[serde(rename = "incidencias")]
    pub incidents: Vec<PublishedIncident>,
}
