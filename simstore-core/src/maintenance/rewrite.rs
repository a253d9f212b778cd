use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::compression::{Backend, OpenMode};
use crate::core::errors::{Result, SimStoreError};
use crate::storage::layout::{self, DatasetManifest};
use crate::storage::writer::{lock_holder, lock_is_stale, WriterLock};
use crate::storage::{BucketPair, SimilarityStore, LOCK_FILE};

/// Counters from one dataset rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    pub pairs_read: u64,
    pub pairs_written: u64,
    pub pairs_dropped: u64,
}

/// What [`recover`] found and repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Live dataset was missing and the backup was moved back
    pub restored_backup: bool,
    /// Backup of a completed swap was deleted
    pub discarded_backup: bool,
    /// Unfinished rewrite output was deleted
    pub discarded_partial: bool,
    /// Writer lock left by an exited process was deleted
    pub removed_stale_lock: bool,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        !self.restored_backup && !self.discarded_backup && !self.discarded_partial && !self.removed_stale_lock
    }
}

/// Directory a rewrite of `corpus_id` builds into.
pub fn rewrite_dir(store: &SimilarityStore, corpus_id: u64) -> PathBuf {
    store.root().join(format!("{}.rewrite", corpus_id))
}

/// Directory holding the previous dataset while a rewrite is swapped in.
pub fn backup_dir(store: &SimilarityStore, corpus_id: u64) -> PathBuf {
    store.root().join(format!("{}.backup", corpus_id))
}

fn remove_tree(path: &Path) -> Result<()> {
    fs::remove_dir_all(path).map_err(|e| SimStoreError::io(format!("remove {}", path.display()), e))
}

/// Repair the leftovers of an interrupted rewrite.
pub fn recover(store: &SimilarityStore, corpus_id: u64) -> Result<RecoveryReport> {
    let live = store.corpus_dir(corpus_id);
    let tmp = rewrite_dir(store, corpus_id);
    let backup = backup_dir(store, corpus_id);
    let mut report = RecoveryReport::default();

    if backup.exists() {
        if live.exists() {
            remove_tree(&backup)?;
            report.discarded_backup = true;
        } else {
            fs::rename(&backup, &live).map_err(|e| SimStoreError::SwapFailed {
                path: live.clone(),
                message: format!("restore backup: {}", e),
            })?;
            // the lock of the interrupted rewrite moved along with the data
            let moved_lock = live.join(LOCK_FILE);
            if moved_lock.exists() {
                let _ = fs::remove_file(&moved_lock);
            }
            report.restored_backup = true;
        }
    }
    if tmp.exists() {
        remove_tree(&tmp)?;
        report.discarded_partial = true;
    }

    let lock = live.join(LOCK_FILE);
    if lock.exists() && lock_is_stale(&lock) {
        let holder = lock_holder(&lock);
        fs::remove_file(&lock)
            .map_err(|e| SimStoreError::io(format!("remove {}", lock.display()), e))?;
        warn!(
            "Removed writer lock of corpus {} left by exited process {:?}",
            corpus_id, holder
        );
        report.removed_stale_lock = true;
    }

    if !report.is_clean() {
        warn!("Recovered corpus {} after interrupted rewrite: {:?}", corpus_id, report);
    }
    Ok(report)
}

/// Delete the corpus's writer lock whoever holds it; returns whether one existed.
///
/// Only for locks [`recover`] cannot prove stale: a writer still running
/// against the dataset loses its exclusivity.
pub fn break_lock(store: &SimilarityStore, corpus_id: u64) -> Result<bool> {
    let lock = store.corpus_dir(corpus_id).join(LOCK_FILE);
    let holder = lock_holder(&lock);
    match fs::remove_file(&lock) {
        Ok(()) => {
            warn!("Broke writer lock of corpus {} held by {:?}", corpus_id, holder);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SimStoreError::io(format!("remove {}", lock.display()), e)),
    }
}

/// Replace `live` with `tmp`, restoring `live` if the second rename fails.
pub(crate) fn swap_in(live: &Path, tmp: &Path, backup: &Path) -> Result<()> {
    if backup.exists() {
        remove_tree(backup)?;
    }
    let had_live = live.exists();
    if had_live {
        fs::rename(live, backup).map_err(|e| SimStoreError::SwapFailed {
            path: live.to_path_buf(),
            message: format!("move live dataset aside: {}", e),
        })?;
    }

    if let Err(e) = fs::rename(tmp, live) {
        if had_live {
            if let Err(rollback) = fs::rename(backup, live) {
                error!(
                    "Rollback of {} failed, backup kept at {}: {}",
                    live.display(),
                    backup.display(),
                    rollback
                );
            }
        }
        let _ = fs::remove_dir_all(tmp);
        return Err(SimStoreError::SwapFailed {
            path: live.to_path_buf(),
            message: format!("move rewrite into place: {}", e),
        });
    }

    if had_live {
        if let Err(e) = fs::remove_dir_all(backup) {
            warn!("Failed to delete backup {}: {}", backup.display(), e);
        }
    }
    debug!("Swapped {} into {}", tmp.display(), live.display());
    Ok(())
}

/// Copy the corpus's pairs accepted by `keep` into a fresh dataset and swap
/// it in. `backend` of `None` keeps the current backend.
pub(crate) fn rewrite<F>(
    store: &SimilarityStore,
    corpus_id: u64,
    backend: Option<Backend>,
    mut keep: F,
) -> Result<RewriteStats>
where
    F: FnMut(&BucketPair) -> bool,
{
    recover(store, corpus_id)?;
    let live = store.corpus_dir(corpus_id);
    if !live.is_dir() {
        return Err(SimStoreError::DatasetNotFound(corpus_id));
    }
    let _lock = WriterLock::acquire(&live, corpus_id)?;

    let reader = store.reader(corpus_id)?;
    let cutoffs = reader
        .cutoffs()
        .ok_or(SimStoreError::DatasetNotFound(corpus_id))?;
    let target = backend.or(reader.backend());
    let tmp = rewrite_dir(store, corpus_id);

    let copied = (|| -> Result<RewriteStats> {
        let mut writer = store.writer_with_cutoffs(&tmp, corpus_id, &cutoffs, OpenMode::Create, target)?;
        let mut stats = RewriteStats::default();
        for pair in reader.pairs() {
            let pair = pair?;
            stats.pairs_read += 1;
            if keep(&pair) {
                writer.write_to_bucket(pair.bucket, pair.low, pair.high)?;
                stats.pairs_written += 1;
            } else {
                stats.pairs_dropped += 1;
            }
        }
        writer.close()?;
        Ok(stats)
    })();

    let stats = match copied {
        Ok(stats) => stats,
        Err(e) => {
            if tmp.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&tmp) {
                    warn!("Failed to discard {}: {}", tmp.display(), cleanup);
                }
            }
            error!("Rewrite of corpus {} failed, original kept: {}", corpus_id, e);
            return Err(e);
        }
    };

    let live_generation = DatasetManifest::load(&live).map(|m| m.generation).unwrap_or(0);
    layout::advance_generation(&tmp, live_generation)?;
    swap_in(&live, &tmp, &backup_dir(store, corpus_id))?;
    Ok(stats)
}

/// Drop every pair touching one of `doc_ids`.
///
/// A corpus without similarity data has nothing to remove.
pub fn remove_documents(store: &SimilarityStore, corpus_id: u64, doc_ids: &[u32]) -> Result<RewriteStats> {
    if !store.exists(corpus_id) {
        recover(store, corpus_id)?;
        if !store.exists(corpus_id) {
            debug!("No similarity data for corpus {}, nothing to remove", corpus_id);
            return Ok(RewriteStats::default());
        }
    }
    let excluded: HashSet<u32> = doc_ids.iter().copied().collect();
    let stats = rewrite(store, corpus_id, None, |pair| {
        !excluded.contains(&pair.low) && !excluded.contains(&pair.high)
    })?;
    info!(
        "Removed {} documents from corpus {}: {} of {} pairs dropped",
        excluded.len(),
        corpus_id,
        stats.pairs_dropped,
        stats.pairs_read
    );
    Ok(stats)
}

/// Rewrite the dataset from backend `from` into backend `to`.
pub fn convert(store: &SimilarityStore, corpus_id: u64, from: Backend, to: Backend) -> Result<RewriteStats> {
    recover(store, corpus_id)?;
    let actual = store
        .detect_backend(corpus_id)?
        .ok_or(SimStoreError::DatasetNotFound(corpus_id))?;
    if actual != from {
        return Err(SimStoreError::BackendMismatch {
            corpus_id,
            expected: from.to_string(),
            actual: actual.to_string(),
        });
    }
    let stats = rewrite(store, corpus_id, Some(to), |_| true)?;
    info!(
        "Converted corpus {} from {} to {} ({} pairs)",
        corpus_id, from, to, stats.pairs_written
    );
    Ok(stats)
}
