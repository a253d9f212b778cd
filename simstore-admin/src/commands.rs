use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{info, warn};

use simstore_core::{
    is_safe_blob_name, Backend, BatchOutcome, HierarchyService, Result, SimStoreError,
    SimilarityStore, StoreCorpus, StoreMaintenance,
};

pub fn list(store: &SimilarityStore) -> Result<Value> {
    Ok(json!(store.list_corpora()?))
}

pub fn stats(store: &SimilarityStore, corpus_ids: &[u64]) -> Result<Value> {
    let ids = if corpus_ids.is_empty() {
        store.list_corpora()?
    } else {
        corpus_ids.to_vec()
    };
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        out.push(serde_json::to_value(store.stats(id)?)?);
    }
    Ok(Value::Array(out))
}

pub fn convert(maintenance: &StoreMaintenance, corpus_id: u64, from: Backend, to: Backend) -> Result<Value> {
    let stats = maintenance.convert(corpus_id, from, to)?;
    info!("Converted corpus {} from {} to {}", corpus_id, from, to);
    Ok(json!({ "corpus_id": corpus_id, "backend": to, "stats": stats }))
}

pub fn batch_convert(
    maintenance: &StoreMaintenance,
    corpus_ids: &[u64],
    from: Backend,
    to: Backend,
) -> Result<Value> {
    let outcomes = maintenance.batch_convert(corpus_ids, from, to)?;
    Ok(outcomes_json(&outcomes))
}

pub fn remove_docs(maintenance: &StoreMaintenance, corpus_ids: &[u64], doc_ids: &[u32]) -> Result<Value> {
    if let [corpus_id] = corpus_ids {
        let stats = maintenance.remove(*corpus_id, doc_ids)?;
        return Ok(json!({ "corpus_id": corpus_id, "stats": stats }));
    }
    let outcomes = maintenance.batch_remove(corpus_ids, doc_ids)?;
    Ok(outcomes_json(&outcomes))
}

pub fn recover(maintenance: &StoreMaintenance, corpus_id: u64) -> Result<Value> {
    let report = maintenance.recover(corpus_id)?;
    Ok(json!({ "corpus_id": corpus_id, "clean": report.is_clean(), "report": report }))
}

/// Remove a writer lock that `recover` could not prove stale.
pub fn break_lock(maintenance: &StoreMaintenance, corpus_id: u64) -> Result<Value> {
    let removed = maintenance.break_lock(corpus_id)?;
    Ok(json!({ "corpus_id": corpus_id, "removed": removed }))
}

pub fn drop_corpus(maintenance: &StoreMaintenance, corpus_id: u64) -> Result<Value> {
    let existed = maintenance.exists(corpus_id);
    maintenance.remove_all(corpus_id)?;
    Ok(json!({ "corpus_id": corpus_id, "removed": existed }))
}

/// `name=path` pairs naming extra files to carry inside an archive.
pub fn archive(
    maintenance: &StoreMaintenance,
    corpus_ids: &[u64],
    blob_args: &[String],
    output: &Path,
) -> Result<Value> {
    let mut blobs = BTreeMap::new();
    for arg in blob_args {
        let (name, path) = parse_blob_arg(arg)?;
        let data = fs::read(&path)
            .map_err(|e| SimStoreError::io(format!("read blob {}", path.display()), e))?;
        blobs.insert(name, data);
    }
    let manifest = maintenance.archive(corpus_ids, &blobs, output)?;
    Ok(json!({ "archive": output, "manifest": manifest }))
}

pub fn restore(maintenance: &StoreMaintenance, input: &Path, blob_dir: Option<&Path>) -> Result<Value> {
    let restored = maintenance.restore(input)?;
    match blob_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .map_err(|e| SimStoreError::io(format!("create {}", dir.display()), e))?;
            for (name, data) in &restored.blobs {
                if !is_safe_blob_name(name) {
                    return Err(SimStoreError::config(format!("refusing to write blob {:?}", name)));
                }
                let path = dir.join(name);
                fs::write(&path, data)
                    .map_err(|e| SimStoreError::io(format!("write blob {}", path.display()), e))?;
            }
        }
        None if !restored.blobs.is_empty() => {
            warn!("Archive carries {} blobs; pass --blob-dir to keep them", restored.blobs.len());
        }
        None => {}
    }
    Ok(json!({ "manifest": restored.manifest }))
}

/// Cluster hierarchy of a corpus as treemap JSON.
///
/// Vertices come from `vertex_file` (whitespace separated ids) or, without
/// one, from every id that appears in a stored pair.
pub fn cluster(
    store: &SimilarityStore,
    corpus_id: u64,
    vertex_file: Option<&Path>,
    pruning_size: Option<usize>,
) -> Result<Value> {
    if !store.exists(corpus_id) {
        return Err(SimStoreError::DatasetNotFound(corpus_id));
    }
    let vertices = match vertex_file {
        Some(path) => read_vertex_file(path)?,
        None => stored_vertices(store, corpus_id)?,
    };
    let cutoffs = match store.stored_cutoffs(corpus_id)? {
        Some(cutoffs) => cutoffs,
        None => store.config().cutoffs.clone(),
    };

    let corpus = StoreCorpus::with_vertices(corpus_id, store.clone(), vertices);
    let service = HierarchyService::new(store.clone());
    let hierarchy = service.hierarchy(&corpus, &cutoffs, pruning_size)?;
    Ok(hierarchy.to_treemap())
}

fn outcomes_json(outcomes: &[BatchOutcome]) -> Value {
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    let results: Vec<Value> = outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(stats) => json!({ "corpus_id": o.corpus_id, "ok": true, "stats": stats }),
            Err(e) => json!({
                "corpus_id": o.corpus_id,
                "ok": false,
                "code": e.code().as_str(),
                "error": e.to_string(),
            }),
        })
        .collect();
    json!({ "failed": failed, "results": results })
}

fn parse_blob_arg(arg: &str) -> Result<(String, PathBuf)> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(SimStoreError::config(format!("blob must be NAME=PATH, got {:?}", arg))),
    }
}

fn read_vertex_file(path: &Path) -> Result<Vec<u32>> {
    let text = fs::read_to_string(path)
        .map_err(|e| SimStoreError::io(format!("read {}", path.display()), e))?;
    text.split_whitespace()
        .map(|token| {
            token
                .parse::<u32>()
                .map_err(|e| SimStoreError::config(format!("bad vertex id {:?}: {}", token, e)))
        })
        .collect()
}

fn stored_vertices(store: &SimilarityStore, corpus_id: u64) -> Result<Vec<u32>> {
    let mut ids = BTreeSet::new();
    for triple in store.reader(corpus_id)? {
        let triple = triple?;
        ids.insert(triple.low);
        ids.insert(triple.high);
    }
    Ok(ids.into_iter().collect())
}
