//! Flat-file JSON persistence with atomic replacement.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::warn;

use railstatus_common::{History, HistoryRecord, StoreError, StoreResult};

use crate::traits::HistoryRepository;

/// History indentation; the snapshot uses two spaces.
const HISTORY_INDENT: &[u8] = b"    ";

/// History stored as one JSON object keyed by content id.
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryRepository for JsonFileRepository {
    fn load(&self) -> StoreResult<Option<History>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let entries: Map<String, Value> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let history = entries
            .into_iter()
            .map(|(id, stored)| {
                let record = match serde_json::from_value::<HistoryRecord>(stored.clone()) {
                    Ok(mut record) => {
                        record.id = id.clone();
                        record
                    }
                    Err(e) => {
                        warn!(
                            id = %id,
                            error = %e,
                            "History entry does not match schema, keeping as-is"
                        );
                        HistoryRecord::from_unparsed(id.clone(), stored)
                    }
                };
                (id, record)
            })
            .collect();
        Ok(Some(history))
    }

    fn save(&self, history: &History) -> StoreResult<()> {
        write_json_atomic(&self.path, &StoredHistory(history), HISTORY_INDENT)
    }
}

/// On-disk view of a history: unparsed entries go back out untouched.
struct StoredHistory<'a>(&'a History);

impl Serialize for StoredHistory<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, record) in self.0 {
            match &record.verbatim {
                Some(stored) => map.serialize_entry(id, stored)?,
                None => map.serialize_entry(id, record)?,
            }
        }
        map.end()
    }
}

/// Pretty-print `value` and atomically replace `path` with it.
///
/// The document is written to a temporary file in the target directory and
/// renamed over `path`, so readers see either the old or the new file.
/// Non-ASCII text is written as-is.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    indent: &[u8],
) -> StoreResult<()> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent));
    value.serialize(&mut serializer)?;
    buf.push(b'\n');

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(&buf).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    make_world_readable(tmp.as_file()).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

// Temp files are created 0600; the published files are read by a web server.
#[cfg(unix)]
fn make_world_readable(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}
