use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

use crate::compression::Backend;
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::CutoffTable;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LOCK_FILE: &str = ".writer.lock";
pub const FORMAT_VERSION: u32 = 1;

/// Per-corpus dataset description stored next to the buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub format_version: u32,
    pub corpus_id: u64,
    pub cutoffs: CutoffTable,
    pub created_secs: u64,
    /// Changes whenever the dataset's contents may have changed
    #[serde(default)]
    pub generation: u64,
}

impl DatasetManifest {
    /// Fresh manifest; the generation starts at the creation time in
    /// nanoseconds so a recreated dataset does not reuse an old one.
    pub fn new(corpus_id: u64, cutoffs: CutoffTable) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        DatasetManifest {
            format_version: FORMAT_VERSION,
            corpus_id,
            cutoffs,
            created_secs: now.as_secs(),
            generation: now.as_nanos() as u64,
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let data = fs::read(&path).map_err(|e| SimStoreError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let manifest: DatasetManifest =
            serde_json::from_slice(&data).map_err(|e| SimStoreError::Manifest {
                path: path.clone(),
                message: e.to_string(),
            })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(SimStoreError::Manifest {
                path,
                message: format!("unsupported format version {}", manifest.format_version),
            });
        }
        Ok(manifest)
    }

    /// Write via a temporary file and rename so readers never see half a manifest.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_vec_pretty(self)?;

        let mut file = fs::File::create(&tmp)
            .map_err(|e| SimStoreError::io(format!("create {}", tmp.display()), e))?;
        file.write_all(&json)
            .map_err(|e| SimStoreError::io(format!("write {}", tmp.display()), e))?;
        file.sync_all()
            .map_err(|e| SimStoreError::io(format!("sync {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| SimStoreError::io(format!("rename {}", tmp.display()), e))?;
        Ok(())
    }
}

/// Move the generation of the dataset in `dir` past its own and `floor`.
pub fn advance_generation(dir: &Path, floor: u64) -> Result<u64> {
    let mut manifest = DatasetManifest::load(dir)?;
    manifest.generation = manifest.generation.max(floor).saturating_add(1);
    manifest.store(dir)?;
    Ok(manifest.generation)
}

pub fn corpus_dir(root: &Path, corpus_id: u64) -> PathBuf {
    root.join(corpus_id.to_string())
}

/// Artifact name stem for a cutoff, in hundredths: 0.9 -> `bucket_090`.
pub fn bucket_stem(cutoff: f32) -> String {
    format!("bucket_{:03}", (cutoff * 100.0).round() as u32)
}

pub fn bucket_path(dir: &Path, cutoff: f32, backend: Backend) -> PathBuf {
    dir.join(format!("{}.{}", bucket_stem(cutoff), backend.extension()))
}

/// Reject tables whose cutoffs would share an artifact name.
pub fn check_distinct_stems(cutoffs: &CutoffTable) -> Result<()> {
    let mut seen = HashSet::new();
    for &c in cutoffs.as_slice() {
        if !seen.insert(bucket_stem(c)) {
            return Err(SimStoreError::InvalidCutoffs(format!(
                "cutoff {} collides with another cutoff at hundredths precision",
                c
            )));
        }
    }
    Ok(())
}

/// Backend of the dataset in `dir`, inferred from the middle cutoff's artifact.
///
/// Chunked datasets always create a chunk directory for every cutoff, so its
/// absence means the continuous backend.
pub fn infer_backend(dir: &Path, cutoffs: &CutoffTable) -> Backend {
    let middle = cutoffs.as_slice()[cutoffs.len() / 2];
    if bucket_path(dir, middle, Backend::Chunked).is_dir() {
        Backend::Chunked
    } else {
        Backend::Continuous
    }
}

/// Total on-disk size of a dataset directory.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(SimStoreError::io(format!("list {}", dir.display()), e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| SimStoreError::io(format!("list {}", dir.display()), e))?;
        let meta = entry
            .metadata()
            .map_err(|e| SimStoreError::io(format!("stat {}", entry.path().display()), e))?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}
