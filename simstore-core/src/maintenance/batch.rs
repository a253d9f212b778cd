use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use rayon::prelude::*;
use tracing::{error, info};

use crate::compression::Backend;
use crate::core::errors::{Result, SimStoreError};
use crate::maintenance::rewrite::{convert, remove_documents, RewriteStats};
use crate::storage::SimilarityStore;

/// Result of one corpus within a batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub corpus_id: u64,
    pub result: Result<RewriteStats>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `op` for every corpus on a pool of `workers` threads.
///
/// Each corpus runs in isolation: an error or panic is recorded against that
/// corpus only. Outcomes come back in input order.
pub fn run_batch<F>(workers: usize, corpus_ids: &[u64], op: F) -> Result<Vec<BatchOutcome>>
where
    F: Fn(u64) -> Result<RewriteStats> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("simstore-maint-{}", i))
        .build()
        .map_err(|e| SimStoreError::config(format!("Failed to create worker pool: {}", e)))?;

    let outcomes: Vec<BatchOutcome> = pool.install(|| {
        corpus_ids
            .par_iter()
            .map(|&corpus_id| {
                let result = match catch_unwind(AssertUnwindSafe(|| op(corpus_id))) {
                    Ok(result) => result,
                    Err(payload) => Err(SimStoreError::WorkerPanicked {
                        corpus_id,
                        message: panic_message(payload),
                    }),
                };
                if let Err(e) = &result {
                    error!("Batch operation on corpus {} failed: {}", corpus_id, e);
                }
                BatchOutcome { corpus_id, result }
            })
            .collect()
    });

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(
        "Batch finished: {} corpora, {} failed, {} workers",
        outcomes.len(),
        failed,
        workers
    );
    Ok(outcomes)
}

/// Convert every listed corpus from `from` to `to`.
pub fn batch_convert(
    store: &SimilarityStore,
    corpus_ids: &[u64],
    from: Backend,
    to: Backend,
) -> Result<Vec<BatchOutcome>> {
    run_batch(store.config().maintenance_workers, corpus_ids, |id| {
        convert(store, id, from, to)
    })
}

/// Remove the same documents from every listed corpus.
pub fn batch_remove(
    store: &SimilarityStore,
    corpus_ids: &[u64],
    doc_ids: &[u32],
) -> Result<Vec<BatchOutcome>> {
    run_batch(store.config().maintenance_workers, corpus_ids, |id| {
        remove_documents(store, id, doc_ids)
    })
}
