use std::path::{Path, PathBuf};
use tracing::debug;

use crate::compression::{chunk_files, open_reader, Backend, CompressedRead};
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::{CutoffTable, SimilarityTriple, PAIR_RECORD_BYTES, SIMILARITY_OFFSET};
use crate::storage::layout::{self, DatasetManifest};

/// Pairs decoded per read from a bucket stream.
const BLOCK_PAIRS: usize = 8192;

/// A stored pair together with the bucket it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketPair {
    pub bucket: usize,
    pub low: u32,
    pub high: u32,
}

/// On-disk artifact of one bucket.
#[derive(Debug, Clone)]
pub struct BucketArtifact {
    pub index: usize,
    pub cutoff: f32,
    /// Similarity reported for every pair of this bucket
    pub similarity: f32,
    pub backend: Backend,
    pub path: PathBuf,
}

impl BucketArtifact {
    /// Chunk files in read order. Empty for the continuous backend.
    pub fn chunk_files(&self) -> Result<Vec<PathBuf>> {
        match self.backend {
            Backend::Chunked => chunk_files(&self.path),
            Backend::Continuous => Ok(vec![]),
        }
    }
}

/// Lazy, single-pass reader over a corpus's buckets, highest cutoff first.
///
/// Iterating yields `(low, high, cutoff + 0.05)` triples. To read again,
/// open a new reader.
pub struct SimilarityReader {
    corpus_id: u64,
    dir: PathBuf,
    cutoffs: Vec<f32>,
    backend: Option<Backend>,
    current_bucket: usize,
    stream: Option<Box<dyn CompressedRead>>,
    block: Vec<u8>,
    block_pos: usize,
    done: bool,
}

impl SimilarityReader {
    /// Open the dataset in `dir`. A missing directory gives an empty reader.
    pub fn open(dir: &Path, corpus_id: u64) -> Result<Self> {
        if !dir.is_dir() {
            debug!("No similarity data for corpus {} at {}", corpus_id, dir.display());
            return Ok(SimilarityReader::empty(dir, corpus_id));
        }
        let manifest = DatasetManifest::load(dir)?;
        let backend = layout::infer_backend(dir, &manifest.cutoffs);

        Ok(SimilarityReader {
            corpus_id,
            dir: dir.to_path_buf(),
            cutoffs: manifest.cutoffs.as_slice().to_vec(),
            backend: Some(backend),
            current_bucket: 0,
            stream: None,
            block: Vec::with_capacity(BLOCK_PAIRS * PAIR_RECORD_BYTES),
            block_pos: 0,
            done: false,
        })
    }

    fn empty(dir: &Path, corpus_id: u64) -> Self {
        SimilarityReader {
            corpus_id,
            dir: dir.to_path_buf(),
            cutoffs: vec![],
            backend: None,
            current_bucket: 0,
            stream: None,
            block: Vec::new(),
            block_pos: 0,
            done: true,
        }
    }

    pub fn corpus_id(&self) -> u64 {
        self.corpus_id
    }

    /// False when the corpus has no dataset at all.
    pub fn has_data(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<Backend> {
        self.backend
    }

    /// Stored cutoff table, `None` without a dataset.
    pub fn cutoffs(&self) -> Option<CutoffTable> {
        if self.cutoffs.is_empty() {
            None
        } else {
            CutoffTable::new(self.cutoffs.clone()).ok()
        }
    }

    /// Bucket artifacts, highest cutoff first.
    pub fn bucket_artifacts(&self) -> Vec<BucketArtifact> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => return vec![],
        };
        self.cutoffs
            .iter()
            .enumerate()
            .map(|(index, &cutoff)| BucketArtifact {
                index,
                cutoff,
                similarity: cutoff + SIMILARITY_OFFSET,
                backend,
                path: layout::bucket_path(&self.dir, cutoff, backend),
            })
            .collect()
    }

    /// Consume the reader as a stream of bucket-tagged pairs.
    pub fn pairs(self) -> BucketPairs {
        BucketPairs { reader: self }
    }

    fn artifact_path(&self, index: usize) -> PathBuf {
        match self.backend {
            Some(backend) => layout::bucket_path(&self.dir, self.cutoffs[index], backend),
            None => self.dir.clone(),
        }
    }

    fn fail(&mut self, err: SimStoreError) -> Option<Result<BucketPair>> {
        self.done = true;
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        Some(Err(err))
    }

    fn next_pair(&mut self) -> Option<Result<BucketPair>> {
        loop {
            if self.done {
                return None;
            }

            if self.block_pos < self.block.len() {
                let record = &self.block[self.block_pos..self.block_pos + PAIR_RECORD_BYTES];
                let low = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
                let high = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
                self.block_pos += PAIR_RECORD_BYTES;
                return Some(Ok(BucketPair {
                    bucket: self.current_bucket,
                    low,
                    high,
                }));
            }

            let backend = match self.backend {
                Some(backend) => backend,
                None => {
                    self.done = true;
                    return None;
                }
            };
            if self.stream.is_none() {
                if self.current_bucket >= self.cutoffs.len() {
                    self.done = true;
                    return None;
                }
                let path = self.artifact_path(self.current_bucket);
                match open_reader(backend, &path) {
                    Ok(stream) => self.stream = Some(stream),
                    Err(e) => return self.fail(e),
                }
            }

            self.block.clear();
            self.block_pos = 0;
            let read = match self.stream.as_mut() {
                Some(stream) => stream.read_into(BLOCK_PAIRS * PAIR_RECORD_BYTES, &mut self.block),
                None => Ok(0),
            };
            match read {
                Err(e) => return self.fail(e),
                Ok(0) => {
                    if let Some(mut stream) = self.stream.take() {
                        stream.close();
                    }
                    self.current_bucket += 1;
                }
                Ok(n) if n % PAIR_RECORD_BYTES != 0 => {
                    let path = self.artifact_path(self.current_bucket);
                    return self.fail(SimStoreError::corrupted(
                        path,
                        format!(
                            "decoded bucket length is not a multiple of {} bytes",
                            PAIR_RECORD_BYTES
                        ),
                    ));
                }
                Ok(_) => {}
            }
        }
    }
}

impl Iterator for SimilarityReader {
    type Item = Result<SimilarityTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.next_pair()?;
        Some(pair.map(|p| SimilarityTriple {
            low: p.low,
            high: p.high,
            similarity: self.cutoffs[p.bucket] + SIMILARITY_OFFSET,
        }))
    }
}

/// Iterator over bucket-tagged pairs; see [`SimilarityReader::pairs`].
pub struct BucketPairs {
    reader: SimilarityReader,
}

impl BucketPairs {
    pub fn cutoffs(&self) -> Option<CutoffTable> {
        self.reader.cutoffs()
    }

    pub fn backend(&self) -> Option<Backend> {
        self.reader.backend()
    }
}

impl Iterator for BucketPairs {
    type Item = Result<BucketPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_pair()
    }
}
