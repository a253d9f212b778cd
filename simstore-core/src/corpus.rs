/// Corpus: the interface the core needs from a document collection
///
/// Ingestion and document storage live outside this crate. They expose a
/// corpus through [`Corpus`]; [`StoreCorpus`] is an in-memory vertex set
/// backed by a [`SimilarityStore`].

use std::collections::BTreeSet;
use tracing::info;

use crate::core::errors::{Result, SimStoreError};
use crate::maintenance::{remove_documents, RewriteStats};
use crate::storage::{SimilarityStore, SimilarityWriter, WriteStats};

pub trait Corpus {
    fn id(&self) -> u64;

    /// Every document id, ascending.
    fn vertex_ids(&self) -> Result<Vec<u32>>;

    fn max_vertex_id(&self) -> Result<Option<u32>>;

    /// Record one similarity edge. Pairs are normalized to `low < high`.
    fn append_similarity(&mut self, a: u32, b: u32, similarity: f32) -> Result<()>;

    /// Forget documents and every similarity pair that touches them.
    fn delete_vertices(&mut self, ids: &[u32]) -> Result<RewriteStats>;

    /// Whether appended similarities may still be buffered outside the store.
    fn has_open_writer(&self) -> bool {
        false
    }
}

/// Corpus over an in-memory id set and a similarity store.
pub struct StoreCorpus {
    id: u64,
    vertices: BTreeSet<u32>,
    store: SimilarityStore,
    writer: Option<SimilarityWriter>,
}

impl StoreCorpus {
    pub fn new(id: u64, store: SimilarityStore) -> Self {
        StoreCorpus {
            id,
            vertices: BTreeSet::new(),
            store,
            writer: None,
        }
    }

    pub fn with_vertices(id: u64, store: SimilarityStore, vertices: impl IntoIterator<Item = u32>) -> Self {
        let mut corpus = StoreCorpus::new(id, store);
        corpus.vertices.extend(vertices);
        corpus
    }

    pub fn add_vertices(&mut self, ids: impl IntoIterator<Item = u32>) {
        self.vertices.extend(ids);
    }

    pub fn store(&self) -> &SimilarityStore {
        &self.store
    }

    /// Close the open ingestion writer, if any.
    pub fn finish_ingestion(&mut self) -> Result<Option<WriteStats>> {
        match self.writer.take() {
            Some(mut writer) => Ok(Some(writer.close()?)),
            None => Ok(None),
        }
    }
}

impl Corpus for StoreCorpus {
    fn id(&self) -> u64 {
        self.id
    }

    fn vertex_ids(&self) -> Result<Vec<u32>> {
        Ok(self.vertices.iter().copied().collect())
    }

    fn max_vertex_id(&self) -> Result<Option<u32>> {
        Ok(self.vertices.iter().next_back().copied())
    }

    fn append_similarity(&mut self, a: u32, b: u32, similarity: f32) -> Result<()> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        for v in [low, high] {
            if !self.vertices.contains(&v) {
                return Err(SimStoreError::UnknownVertex(v));
            }
        }
        if self.writer.is_none() {
            self.writer = Some(self.store.append_writer(self.id)?);
        }
        match self.writer.as_mut() {
            Some(writer) => writer.write(low, high, similarity),
            None => Err(SimStoreError::HandleClosed(format!("corpus {} writer", self.id))),
        }
    }

    fn has_open_writer(&self) -> bool {
        self.writer.is_some()
    }

    fn delete_vertices(&mut self, ids: &[u32]) -> Result<RewriteStats> {
        self.finish_ingestion()?;
        let stats = remove_documents(&self.store, self.id, ids)?;
        for id in ids {
            self.vertices.remove(id);
        }
        info!("Deleted {} documents from corpus {}", ids.len(), self.id);
        Ok(stats)
    }
}

impl Drop for StoreCorpus {
    fn drop(&mut self) {
        if let Err(e) = self.finish_ingestion() {
            tracing::warn!("Failed to close ingestion writer for corpus {}: {}", self.id, e);
        }
    }
}
