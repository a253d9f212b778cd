use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::compression::{open_writer, Backend, CompressedWrite, OpenMode};
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::{CutoffTable, PAIR_RECORD_BYTES};
use crate::storage::layout::{self, DatasetManifest, LOCK_FILE, MANIFEST_FILE};

/// How a writer is opened.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Force a backend instead of the configured/detected one
    pub backend: Option<Backend>,
    pub mode: OpenMode,
    pub stream_buffer_bytes: usize,
    pub pair_buffer_len: usize,
}

/// Exclusive marker for the single active writer of a corpus.
#[derive(Debug)]
pub(crate) struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub(crate) fn acquire(dir: &Path, corpus_id: u64) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(WriterLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SimStoreError::WriterBusy { corpus_id, lock: path })
            }
            Err(e) => Err(SimStoreError::io(format!("lock {}", path.display()), e)),
        }
    }
}

/// Pid recorded in the lock file at `path`, if it parses.
pub(crate) fn lock_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether the process that took the lock at `path` has exited.
///
/// A lock without a readable pid, or one taken by this process, is treated
/// as held.
pub(crate) fn lock_is_stale(path: &Path) -> bool {
    match lock_holder(path) {
        Some(pid) if pid != std::process::id() => !process_alive(pid),
        _ => false,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// no portable liveness check elsewhere; only an explicit break_lock clears the lock
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            // the locked directory was swapped out from under the lock
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to release writer lock {}: {}", self.path.display(), e),
        }
    }
}

struct Bucket {
    pairs: Vec<u32>,
    stream: Box<dyn CompressedWrite>,
    written: u64,
}

/// Counters reported when a writer closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Pairs accepted per bucket, highest cutoff first
    pub pairs_per_bucket: Vec<u64>,
    /// Pairs below the lowest cutoff
    pub discarded: u64,
}

impl WriteStats {
    pub fn total(&self) -> u64 {
        self.pairs_per_bucket.iter().sum()
    }
}

/// Partitions similarity pairs into cutoff buckets and streams them to disk.
pub struct SimilarityWriter {
    corpus_id: u64,
    dir: PathBuf,
    cutoffs: CutoffTable,
    backend: Backend,
    buckets: Vec<Bucket>,
    pair_buffer_len: usize,
    scratch: Vec<u8>,
    discarded: u64,
    lock: Option<WriterLock>,
}

impl SimilarityWriter {
    /// Open a writer on `dir`.
    ///
    /// `cutoffs` and `default_backend` apply when a dataset is created; in
    /// append mode an existing dataset keeps its own backend and its stored
    /// table must equal `cutoffs`.
    pub fn open(
        dir: &Path,
        corpus_id: u64,
        cutoffs: &CutoffTable,
        default_backend: Backend,
        options: &WriterOptions,
    ) -> Result<Self> {
        layout::check_distinct_stems(cutoffs)?;
        fs::create_dir_all(dir)
            .map_err(|e| SimStoreError::io(format!("create {}", dir.display()), e))?;
        let lock = WriterLock::acquire(dir, corpus_id)?;

        let existing = if options.mode == OpenMode::Append && dir.join(MANIFEST_FILE).exists() {
            Some(DatasetManifest::load(dir)?)
        } else {
            None
        };

        let (backend, stream_mode) = match existing {
            Some(manifest) => {
                if manifest.cutoffs != *cutoffs {
                    return Err(SimStoreError::InvalidCutoffs(format!(
                        "corpus {} was written with cutoffs {:?}, writer uses {:?}",
                        corpus_id,
                        manifest.cutoffs.as_slice(),
                        cutoffs.as_slice()
                    )));
                }
                let actual = layout::infer_backend(dir, cutoffs);
                if let Some(forced) = options.backend {
                    if forced != actual {
                        return Err(SimStoreError::BackendMismatch {
                            corpus_id,
                            expected: forced.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
                (actual, OpenMode::Append)
            }
            None => {
                let previous = DatasetManifest::load(dir).map(|m| m.generation).ok();
                clear_dataset(dir)?;
                let mut manifest = DatasetManifest::new(corpus_id, cutoffs.clone());
                if let Some(previous) = previous {
                    manifest.generation = manifest.generation.max(previous.saturating_add(1));
                }
                manifest.store(dir)?;
                (options.backend.unwrap_or(default_backend), OpenMode::Create)
            }
        };

        let mut buckets = Vec::with_capacity(cutoffs.len());
        for &cutoff in cutoffs.as_slice() {
            let path = layout::bucket_path(dir, cutoff, backend);
            buckets.push(Bucket {
                pairs: Vec::with_capacity(options.pair_buffer_len.min(1 << 16) * 2),
                stream: open_writer(backend, &path, options.stream_buffer_bytes, stream_mode)?,
                written: 0,
            });
        }

        info!(
            "Opened similarity writer for corpus {} ({} buckets, backend {}, {:?})",
            corpus_id,
            cutoffs.len(),
            backend,
            stream_mode
        );

        Ok(SimilarityWriter {
            corpus_id,
            dir: dir.to_path_buf(),
            cutoffs: cutoffs.clone(),
            backend,
            buckets,
            pair_buffer_len: options.pair_buffer_len.max(1),
            scratch: Vec::new(),
            discarded: 0,
            lock: Some(lock),
        })
    }

    pub fn corpus_id(&self) -> u64 {
        self.corpus_id
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn cutoffs(&self) -> &CutoffTable {
        &self.cutoffs
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lock.is_none() {
            return Err(SimStoreError::HandleClosed(format!(
                "similarity writer for corpus {}",
                self.corpus_id
            )));
        }
        Ok(())
    }

    /// Record a pair in the bucket of the largest cutoff not above `similarity`.
    /// Pairs below every cutoff are dropped.
    pub fn write(&mut self, low: u32, high: u32, similarity: f32) -> Result<()> {
        self.ensure_open()?;
        match self.cutoffs.bucket_for(similarity) {
            Some(index) => self.push(index, low, high),
            None => {
                self.discarded += 1;
                Ok(())
            }
        }
    }

    /// Record a pair directly in bucket `index`, bypassing classification.
    pub fn write_to_bucket(&mut self, index: usize, low: u32, high: u32) -> Result<()> {
        self.ensure_open()?;
        if index >= self.buckets.len() {
            return Err(SimStoreError::config(format!(
                "bucket index {} out of range for {} cutoffs",
                index,
                self.buckets.len()
            )));
        }
        self.push(index, low, high)
    }

    fn push(&mut self, index: usize, low: u32, high: u32) -> Result<()> {
        let bucket = &mut self.buckets[index];
        bucket.pairs.push(low);
        bucket.pairs.push(high);
        bucket.written += 1;
        if bucket.pairs.len() / 2 >= self.pair_buffer_len {
            self.flush_bucket(index)?;
        }
        Ok(())
    }

    fn flush_bucket(&mut self, index: usize) -> Result<()> {
        let bucket = &mut self.buckets[index];
        if bucket.pairs.is_empty() {
            return Ok(());
        }
        self.scratch.clear();
        self.scratch.reserve(bucket.pairs.len() / 2 * PAIR_RECORD_BYTES);
        for value in &bucket.pairs {
            self.scratch.extend_from_slice(&value.to_le_bytes());
        }
        bucket.stream.write(&self.scratch)?;
        bucket.pairs.clear();
        Ok(())
    }

    /// Push every bucket's buffered pairs into its stream.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        for index in 0..self.buckets.len() {
            self.flush_bucket(index)?;
        }
        Ok(())
    }

    /// Flush, finalize every stream and release the corpus lock.
    pub fn close(&mut self) -> Result<WriteStats> {
        self.flush()?;

        let mut first_error = None;
        for bucket in &mut self.buckets {
            if let Err(e) = bucket.stream.close() {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        layout::advance_generation(&self.dir, 0)?;

        self.lock = None;
        let stats = WriteStats {
            pairs_per_bucket: self.buckets.iter().map(|b| b.written).collect(),
            discarded: self.discarded,
        };
        info!(
            "Closed similarity writer for corpus {}: {} pairs stored, {} below lowest cutoff",
            self.corpus_id,
            stats.total(),
            stats.discarded
        );
        Ok(stats)
    }
}

impl Drop for SimilarityWriter {
    fn drop(&mut self) {
        if self.lock.is_some() {
            let buffered: usize = self.buckets.iter().map(|b| b.pairs.len() / 2).sum();
            warn!(
                "Similarity writer for corpus {} dropped without close; {} buffered pairs discarded",
                self.corpus_id, buffered
            );
        }
    }
}

/// Remove bucket artifacts and manifest, keeping the writer lock.
fn clear_dataset(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| SimStoreError::io(format!("list {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SimStoreError::io(format!("list {}", dir.display()), e))?;
        let path = entry.path();
        if entry.file_name() == LOCK_FILE {
            continue;
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| SimStoreError::io(format!("remove {}", path.display()), e))?;
        debug!("Removed stale artifact {}", path.display());
    }
    Ok(())
}
