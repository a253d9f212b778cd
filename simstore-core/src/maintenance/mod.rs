/// Maintenance module: offline rewrites of similarity datasets
///
/// Every rewrite builds a complete new dataset next to the live one and
/// swaps it in only after it has been closed. A failure at any point leaves
/// the live dataset as it was; an interrupted swap is repaired by
/// [`recover`] before the next operation on that corpus.

pub mod rewrite;
pub mod batch;
pub mod archive;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::Path;

use crate::compression::Backend;
use crate::core::errors::Result;
use crate::storage::SimilarityStore;

pub use archive::{create_archive, is_safe_blob_name, restore_archive, ArchiveManifest, ArchivedCorpus, RestoredArchive};
pub use batch::{batch_convert, batch_remove, run_batch, BatchOutcome};
pub use rewrite::{break_lock, convert, recover, remove_documents, RecoveryReport, RewriteStats};

/// Maintenance entry points bound to one store.
#[derive(Debug, Clone)]
pub struct StoreMaintenance {
    store: SimilarityStore,
}

impl StoreMaintenance {
    pub fn new(store: SimilarityStore) -> Self {
        StoreMaintenance { store }
    }

    pub fn store(&self) -> &SimilarityStore {
        &self.store
    }

    pub fn remove(&self, corpus_id: u64, doc_ids: &[u32]) -> Result<RewriteStats> {
        remove_documents(&self.store, corpus_id, doc_ids)
    }

    pub fn convert(&self, corpus_id: u64, from: Backend, to: Backend) -> Result<RewriteStats> {
        convert(&self.store, corpus_id, from, to)
    }

    pub fn recover(&self, corpus_id: u64) -> Result<RecoveryReport> {
        recover(&self.store, corpus_id)
    }

    pub fn break_lock(&self, corpus_id: u64) -> Result<bool> {
        break_lock(&self.store, corpus_id)
    }

    pub fn remove_all(&self, corpus_id: u64) -> Result<()> {
        recover(&self.store, corpus_id)?;
        self.store.remove_all(corpus_id)
    }

    pub fn exists(&self, corpus_id: u64) -> bool {
        self.store.exists(corpus_id)
    }

    pub fn batch_convert(&self, corpus_ids: &[u64], from: Backend, to: Backend) -> Result<Vec<BatchOutcome>> {
        batch_convert(&self.store, corpus_ids, from, to)
    }

    pub fn batch_remove(&self, corpus_ids: &[u64], doc_ids: &[u32]) -> Result<Vec<BatchOutcome>> {
        batch_remove(&self.store, corpus_ids, doc_ids)
    }

    pub fn archive(
        &self,
        corpus_ids: &[u64],
        blobs: &BTreeMap<String, Vec<u8>>,
        path: &Path,
    ) -> Result<ArchiveManifest> {
        create_archive(&self.store, corpus_ids, blobs, path)
    }

    pub fn restore(&self, path: &Path) -> Result<RestoredArchive> {
        restore_archive(path, &self.store)
    }
}
