//! Identity & history store: content-id dedup over the persisted history.

mod json_file;

pub use json_file::JsonFileRepository;
pub(crate) use json_file::write_json_atomic;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use railstatus_common::{content_id, History, HistoryRecord, StoreResult};

use crate::traits::HistoryRepository;

/// History as loaded at the start of a unit of work.
#[derive(Debug, Default)]
pub struct LoadedHistory {
    pub history: History,
    /// False when nothing was stored yet or the stored document was unusable.
    pub existed: bool,
}

/// Result of merging one batch of observations.
#[derive(Debug)]
pub struct MergeOutcome {
    pub new_count: usize,
    pub history: History,
}

pub struct HistoryStore<R> {
    repo: R,
}

impl<R: HistoryRepository> HistoryStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Load the history, treating a corrupt or unreadable store as empty.
    pub fn load_or_empty(&self) -> LoadedHistory {
        match self.repo.load() {
            Ok(Some(history)) => LoadedHistory {
                history,
                existed: true,
            },
            Ok(None) => LoadedHistory::default(),
            Err(e) => {
                warn!(error = %e, "History store unusable, starting from an empty history");
                LoadedHistory::default()
            }
        }
    }

    pub fn save(&self, history: &History) -> StoreResult<()> {
        self.repo.save(history)
    }

    /// Merge `observations` into the stored history and persist if needed.
    ///
    /// The store is written when at least one record was created or when
    /// there was no usable store before; re-seen-only runs skip the write.
    pub fn dedupe_and_merge(
        &self,
        observations: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<MergeOutcome> {
        let LoadedHistory {
            mut history,
            existed,
        } = self.load_or_empty();

        let new_count = merge_observations(&mut history, observations, now);

        if new_count > 0 || !existed {
            self.repo.save(&history)?;
        }

        info!(
            observed = observations.len(),
            new = new_count,
            total = history.len(),
            "History merged"
        );

        Ok(MergeOutcome { new_count, history })
    }
}

/// Fold observations into `history`. Returns how many records were created.
///
/// Known texts only get `last_seen` bumped; nothing else on them changes.
pub fn merge_observations(
    history: &mut History,
    observations: &[String],
    now: DateTime<Utc>,
) -> usize {
    let mut new_count = 0;
    for text in observations {
        let id = content_id(text);
        match history.get_mut(&id) {
            Some(record) => record.observe(now),
            None => {
                history.insert(id, HistoryRecord::new(text.as_str(), now));
                new_count += 1;
            }
        }
    }
    new_count
}
