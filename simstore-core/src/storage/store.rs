use std::fs;
use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::info;

use crate::compression::{Backend, OpenMode};
use crate::core::config::StoreConfig;
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::CutoffTable;
use crate::storage::layout::{self, DatasetManifest};
use crate::storage::reader::SimilarityReader;
use crate::storage::writer::{SimilarityWriter, WriterOptions};

/// Summary of one corpus's dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub corpus_id: u64,
    pub backend: Backend,
    pub cutoffs: Vec<f32>,
    pub pairs_per_bucket: Vec<u64>,
    pub bytes_on_disk: u64,
}

impl DatasetStats {
    pub fn total_pairs(&self) -> u64 {
        self.pairs_per_bucket.iter().sum()
    }
}

/// Handle on a root directory of per-corpus similarity datasets.
#[derive(Debug, Clone)]
pub struct SimilarityStore {
    config: StoreConfig,
}

impl SimilarityStore {
    /// Validate the configuration and create the root directory.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root)
            .map_err(|e| SimStoreError::io(format!("create root {}", config.root.display()), e))?;
        info!("Opened similarity store at {}", config.root.display());
        Ok(SimilarityStore { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn corpus_dir(&self, corpus_id: u64) -> PathBuf {
        layout::corpus_dir(&self.config.root, corpus_id)
    }

    pub fn exists(&self, corpus_id: u64) -> bool {
        self.corpus_dir(corpus_id).is_dir()
    }

    fn options(&self, mode: OpenMode, backend: Option<Backend>) -> WriterOptions {
        WriterOptions {
            backend,
            mode,
            stream_buffer_bytes: self.config.stream_buffer_bytes,
            pair_buffer_len: self.config.pair_buffer_len,
        }
    }

    /// Writer that replaces any existing dataset for the corpus.
    pub fn writer(&self, corpus_id: u64) -> Result<SimilarityWriter> {
        self.writer_at(&self.corpus_dir(corpus_id), corpus_id, OpenMode::Create, None)
    }

    /// Writer that adds to the corpus's existing dataset, creating it if absent.
    pub fn append_writer(&self, corpus_id: u64) -> Result<SimilarityWriter> {
        let dir = self.corpus_dir(corpus_id);
        let cutoffs = self.stored_cutoffs(corpus_id)?;
        SimilarityWriter::open(
            &dir,
            corpus_id,
            cutoffs.as_ref().unwrap_or(&self.config.cutoffs),
            self.config.backend,
            &self.options(OpenMode::Append, None),
        )
    }

    /// Writer into an arbitrary directory (used for rewrites into temporary locations).
    pub fn writer_at(
        &self,
        dir: &Path,
        corpus_id: u64,
        mode: OpenMode,
        backend: Option<Backend>,
    ) -> Result<SimilarityWriter> {
        self.writer_with_cutoffs(dir, corpus_id, &self.config.cutoffs, mode, backend)
    }

    pub fn writer_with_cutoffs(
        &self,
        dir: &Path,
        corpus_id: u64,
        cutoffs: &CutoffTable,
        mode: OpenMode,
        backend: Option<Backend>,
    ) -> Result<SimilarityWriter> {
        SimilarityWriter::open(
            dir,
            corpus_id,
            cutoffs,
            self.config.backend,
            &self.options(mode, backend),
        )
    }

    /// Reader over the corpus's buckets; empty if the corpus has no dataset.
    pub fn reader(&self, corpus_id: u64) -> Result<SimilarityReader> {
        SimilarityReader::open(&self.corpus_dir(corpus_id), corpus_id)
    }

    /// Cutoff table the corpus was written with.
    pub fn stored_cutoffs(&self, corpus_id: u64) -> Result<Option<CutoffTable>> {
        let dir = self.corpus_dir(corpus_id);
        if !dir.join(layout::MANIFEST_FILE).exists() {
            return Ok(None);
        }
        Ok(Some(DatasetManifest::load(&dir)?.cutoffs))
    }

    /// Generation of the corpus's dataset, `None` without a dataset.
    pub fn generation(&self, corpus_id: u64) -> Result<Option<u64>> {
        let dir = self.corpus_dir(corpus_id);
        if !dir.join(layout::MANIFEST_FILE).exists() {
            return Ok(None);
        }
        Ok(Some(DatasetManifest::load(&dir)?.generation))
    }

    /// Backend in effect for the corpus, `None` without a dataset.
    pub fn detect_backend(&self, corpus_id: u64) -> Result<Option<Backend>> {
        let dir = self.corpus_dir(corpus_id);
        match self.stored_cutoffs(corpus_id)? {
            Some(cutoffs) => Ok(Some(layout::infer_backend(&dir, &cutoffs))),
            None => Ok(None),
        }
    }

    /// Delete the corpus's dataset. Missing datasets are not an error.
    pub fn remove_all(&self, corpus_id: u64) -> Result<()> {
        let dir = self.corpus_dir(corpus_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| SimStoreError::io(format!("remove {}", dir.display()), e))?;
            info!("Removed similarity data for corpus {}", corpus_id);
        }
        Ok(())
    }

    /// Corpus ids with a dataset under the root, ascending.
    pub fn list_corpora(&self) -> Result<Vec<u64>> {
        let entries = fs::read_dir(&self.config.root)
            .map_err(|e| SimStoreError::io(format!("list {}", self.config.root.display()), e))?;
        let mut ids = vec![];
        for entry in entries {
            let entry = entry.map_err(|e| SimStoreError::io("list root", e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Count pairs per bucket by reading the whole dataset.
    pub fn stats(&self, corpus_id: u64) -> Result<DatasetStats> {
        let reader = self.reader(corpus_id)?;
        let (backend, cutoffs) = match (reader.backend(), reader.cutoffs()) {
            (Some(backend), Some(cutoffs)) => (backend, cutoffs),
            _ => return Err(SimStoreError::DatasetNotFound(corpus_id)),
        };

        let mut pairs_per_bucket = vec![0u64; cutoffs.len()];
        for pair in reader.pairs() {
            pairs_per_bucket[pair?.bucket] += 1;
        }

        Ok(DatasetStats {
            corpus_id,
            backend,
            cutoffs: cutoffs.as_slice().to_vec(),
            pairs_per_bucket,
            bytes_on_disk: layout::dir_size(&self.corpus_dir(corpus_id))?,
        })
    }
}
