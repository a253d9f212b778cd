use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::compression::Backend;
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::CutoffTable;
use crate::corpus::Corpus;
use crate::hierarchy::builder::{ClusterSummarizer, HierarchyBuilder};
use crate::hierarchy::node::Hierarchy;
use crate::maintenance::{self, RewriteStats};
use crate::partition::PartitionKind;
use crate::storage::{SimilarityStore, LOCK_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    corpus_id: u64,
    cutoff_bits: Vec<u32>,
    pruning_size: Option<usize>,
}

impl CacheKey {
    fn new(corpus_id: u64, cutoffs: &CutoffTable, pruning_size: Option<usize>) -> Self {
        CacheKey {
            corpus_id,
            cutoff_bits: cutoffs.key_bits(),
            pruning_size,
        }
    }
}

/// State of the inputs a hierarchy was computed from.
///
/// A cached hierarchy is served only while the dataset generation and the
/// corpus's vertex set are unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetStamp {
    pub generation: Option<u64>,
    pub vertex_count: usize,
    pub vertex_digest: u64,
}

impl DatasetStamp {
    pub fn new(generation: Option<u64>, vertices: &[u32]) -> Self {
        let mut hasher = DefaultHasher::new();
        vertices.hash(&mut hasher);
        DatasetStamp {
            generation,
            vertex_count: vertices.len(),
            vertex_digest: hasher.finish(),
        }
    }
}

struct CachedHierarchy {
    stamp: DatasetStamp,
    hierarchy: Arc<Hierarchy>,
}

/// Computed hierarchies keyed by corpus, cutoff table and pruning size.
#[derive(Default)]
pub struct HierarchyCache {
    entries: RwLock<HashMap<CacheKey, CachedHierarchy>>,
}

impl HierarchyCache {
    pub fn new() -> Self {
        HierarchyCache::default()
    }

    /// Cached hierarchy computed from inputs matching `stamp`.
    pub fn get(
        &self,
        corpus_id: u64,
        cutoffs: &CutoffTable,
        pruning_size: Option<usize>,
        stamp: &DatasetStamp,
    ) -> Option<Arc<Hierarchy>> {
        self.entries
            .read()
            .get(&CacheKey::new(corpus_id, cutoffs, pruning_size))
            .filter(|entry| entry.stamp == *stamp)
            .map(|entry| entry.hierarchy.clone())
    }

    /// Store `hierarchy`, replacing any entry computed from older inputs.
    pub fn insert(
        &self,
        corpus_id: u64,
        cutoffs: &CutoffTable,
        pruning_size: Option<usize>,
        stamp: DatasetStamp,
        hierarchy: Arc<Hierarchy>,
    ) {
        self.entries.write().insert(
            CacheKey::new(corpus_id, cutoffs, pruning_size),
            CachedHierarchy { stamp, hierarchy },
        );
    }

    /// Drop every entry of a corpus; returns how many were dropped.
    pub fn invalidate(&self, corpus_id: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.corpus_id != corpus_id);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazily computes and caches hierarchies over a store.
///
/// Cached entries are checked against the dataset generation and the
/// corpus's vertex set on every request, so changes made through the store
/// or the corpus directly are picked up too.
pub struct HierarchyService {
    store: SimilarityStore,
    cache: HierarchyCache,
    summarizer: Option<Arc<dyn ClusterSummarizer>>,
}

impl HierarchyService {
    pub fn new(store: SimilarityStore) -> Self {
        HierarchyService {
            store,
            cache: HierarchyCache::new(),
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn ClusterSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn store(&self) -> &SimilarityStore {
        &self.store
    }

    pub fn cache(&self) -> &HierarchyCache {
        &self.cache
    }

    /// Hierarchy of `corpus` at `cutoffs`, computed on first request.
    ///
    /// `pruning_size` of `None` uses the default for the corpus size. A
    /// corpus still ingesting through an open writer is refused: its buffered
    /// pairs are not on disk yet.
    pub fn hierarchy(
        &self,
        corpus: &dyn Corpus,
        cutoffs: &CutoffTable,
        pruning_size: Option<usize>,
    ) -> Result<Arc<Hierarchy>> {
        let corpus_id = corpus.id();
        if corpus.has_open_writer() {
            warn!("Hierarchy requested for corpus {} while it is still ingesting", corpus_id);
            return Err(SimStoreError::WriterBusy {
                corpus_id,
                lock: self.store.corpus_dir(corpus_id).join(LOCK_FILE),
            });
        }

        let vertices = corpus.vertex_ids()?;
        let stamp = DatasetStamp::new(self.store.generation(corpus_id)?, &vertices);
        if let Some(hit) = self.cache.get(corpus_id, cutoffs, pruning_size, &stamp) {
            debug!("Hierarchy cache hit for corpus {}", corpus_id);
            return Ok(hit);
        }

        let hierarchy = Arc::new(self.compute(corpus_id, &vertices, cutoffs, pruning_size)?);
        self.cache.insert(corpus_id, cutoffs, pruning_size, stamp, hierarchy.clone());
        Ok(hierarchy)
    }

    fn compute(
        &self,
        corpus_id: u64,
        vertices: &[u32],
        cutoffs: &CutoffTable,
        pruning_size: Option<usize>,
    ) -> Result<Hierarchy> {
        let kind = self.store.config().partition_kind;
        let mut builder = HierarchyBuilder::new(cutoffs.clone()).with_partition_kind(kind);
        if let Some(size) = pruning_size {
            builder = builder.with_pruning_size(size);
        }
        if let Some(summarizer) = &self.summarizer {
            builder = builder.with_summarizer(summarizer.clone());
        }

        let reader = self.store.reader(corpus_id)?;
        let hierarchy = if kind == PartitionKind::Accelerated && reader.backend() == Some(Backend::Chunked) {
            builder.build_from_buckets(vertices, &reader.bucket_artifacts())?
        } else {
            builder.build(vertices, reader)?
        };
        info!(
            "Computed hierarchy for corpus {}: {} levels, {} top clusters",
            corpus_id,
            hierarchy.depth(),
            hierarchy.roots().len()
        );
        Ok(hierarchy)
    }

    pub fn invalidate(&self, corpus_id: u64) -> usize {
        let dropped = self.cache.invalidate(corpus_id);
        if dropped > 0 {
            debug!("Invalidated {} cached hierarchies of corpus {}", dropped, corpus_id);
        }
        dropped
    }

    pub fn remove_documents(&self, corpus_id: u64, doc_ids: &[u32]) -> Result<RewriteStats> {
        let result = maintenance::remove_documents(&self.store, corpus_id, doc_ids);
        self.invalidate(corpus_id);
        result
    }

    pub fn convert(&self, corpus_id: u64, from: Backend, to: Backend) -> Result<RewriteStats> {
        let result = maintenance::convert(&self.store, corpus_id, from, to);
        self.invalidate(corpus_id);
        result
    }

    pub fn remove_all(&self, corpus_id: u64) -> Result<()> {
        let result = self.store.remove_all(corpus_id);
        self.invalidate(corpus_id);
        result
    }
}
