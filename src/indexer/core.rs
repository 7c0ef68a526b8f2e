use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::category::CategoryMap;
use crate::db::Store;
use crate::embedder::Embedder;
use crate::error::EngineError;
use crate::records::ResourceRecord;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct BuildFailure {
    pub record_ref: String,
    pub reason: String,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Entries embedded and written during this build.
    pub indexed_count: usize,
    /// Entries kept as stored because the record did not change.
    pub unchanged_count: usize,
    /// Stored entries removed because no current record produces them.
    pub pruned_count: usize,
    /// Records skipped, sorted by reference.
    pub failed: Vec<BuildFailure>,
    /// Foundations present in the corpus that no subject reaches.
    pub unmapped_foundations: Vec<String>,
    /// The previous index was built by a different embedding function and was discarded.
    pub generation_reset: bool,
}

struct PendingEntry {
    entry_id: String,
    text: String,
    fingerprint: String,
    record: ResourceRecord,
}

pub struct IndexBuilder {
    store: Store,
    embedder: Arc<dyn Embedder>,
    categories: Option<Arc<CategoryMap>>,
    concurrency: usize,
    progress: ProgressBar,
}

impl IndexBuilder {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            categories: None,
            concurrency: 1,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report foundations that no subject in `categories` can reach.
    pub fn with_categories(mut self, categories: Arc<CategoryMap>) -> Self {
        self.categories = Some(categories);
        self
    }

    /// Maximum embedding requests in flight. The embedder may enforce a lower limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Index `records`, replacing whatever the store held for the previous corpus.
    ///
    /// Running this twice over the same records leaves the same entries. A
    /// record that fails validation or embedding is reported in
    /// [`BuildReport::failed`] and does not abort the build; store failures do.
    /// With `force`, every record is re-embedded.
    pub async fn build(
        &self,
        records: &[ResourceRecord],
        force: bool,
    ) -> Result<BuildReport, EngineError> {
        let version = self.embedder.version();
        let generation_reset = self.store.prepare_generation(&version)?;
        if generation_reset {
            warn!("Embedding function changed to {version}; previous index discarded");
        }

        let existing = if force {
            HashMap::new()
        } else {
            self.store.fingerprints()?
        };

        let mut report = BuildReport {
            generation_reset,
            ..Default::default()
        };
        let mut keep = HashSet::new();
        let mut unmapped = BTreeSet::new();
        let mut pending = Vec::new();

        for record in records.iter().map(ResourceRecord::normalized) {
            if let Err(e) = record.validate() {
                report.failed.push(BuildFailure {
                    record_ref: record.record_ref(),
                    reason: e.to_string(),
                });
                continue;
            }

            let entry_id = record.entry_id();
            if !keep.insert(entry_id.clone()) {
                debug!("Duplicate record ignored: {}", record.record_ref());
                continue;
            }

            let reachable = self
                .categories
                .as_ref()
                .is_none_or(|c| c.covers(&record.foundation_name));
            if !reachable {
                unmapped.insert(record.foundation_name.clone());
            }

            let fingerprint = record.fingerprint();
            let unchanged = existing.get(&entry_id).is_some_and(|fp| {
                fp.text_hash == fingerprint && fp.embedding_model == version.model
            });
            if unchanged {
                report.unchanged_count += 1;
                continue;
            }

            pending.push(PendingEntry {
                entry_id,
                text: record.descriptive_text(),
                fingerprint,
                record,
            });
        }

        for foundation in &unmapped {
            warn!("Foundation '{foundation}' is not reachable from any subject");
        }
        report.unmapped_foundations = unmapped.into_iter().collect();

        info!(
            "Embedding {} records ({} unchanged, {} invalid)",
            pending.len(),
            report.unchanged_count,
            report.failed.len()
        );
        self.progress.set_length(pending.len() as u64);

        let embedder = &self.embedder;
        let mut embedded = futures::stream::iter(pending.into_iter().map(|entry| async move {
            let result = embedder.embed(&entry.text).await;
            (entry, result)
        }))
        .buffer_unordered(self.concurrency);

        while let Some((entry, result)) = embedded.next().await {
            self.progress.inc(1);
            match result {
                Ok(vector) => {
                    self.store.upsert(
                        &entry.entry_id,
                        &vector,
                        &entry.record,
                        &entry.fingerprint,
                        &version.model,
                    )?;
                    report.indexed_count += 1;
                }
                Err(e) => {
                    warn!("Failed to embed {}: {e}", entry.record.record_ref());
                    report.failed.push(BuildFailure {
                        record_ref: entry.record.record_ref(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.progress.finish_and_clear();

        report.pruned_count = self.store.prune(&keep)?;
        self.store.mark_built(Utc::now())?;
        report.failed.sort();

        info!(
            "Build complete: {} indexed, {} unchanged, {} pruned, {} failed",
            report.indexed_count,
            report.unchanged_count,
            report.pruned_count,
            report.failed.len()
        );
        Ok(report)
    }
}
