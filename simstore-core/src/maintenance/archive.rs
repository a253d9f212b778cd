use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compression::{Backend, OpenMode};
use crate::core::errors::{Result, SimStoreError};
use crate::maintenance::rewrite::{recover, rewrite_dir, swap_in, backup_dir};
use crate::storage::layout::{self, MANIFEST_FILE};
use crate::storage::writer::WriterLock;
use crate::storage::SimilarityStore;

const ARCHIVE_MAGIC: &[u8; 8] = b"SIMARC01";
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;
/// Largest table of contents a restore will allocate for.
const MAX_MANIFEST_BYTES: usize = 16 << 20;

/// One dataset inside an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedCorpus {
    pub corpus_id: u64,
    pub cutoffs: Vec<f32>,
    /// Dataset files relative to the corpus directory, `/` separated
    pub files: Vec<String>,
}

/// Table of contents stored at the head of an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    pub created_secs: u64,
    /// Always chunked
    pub backend: Backend,
    pub corpora: Vec<ArchivedCorpus>,
    pub blobs: Vec<String>,
}

/// What [`restore_archive`] brought back.
#[derive(Debug, Clone)]
pub struct RestoredArchive {
    pub manifest: ArchiveManifest,
    pub blobs: BTreeMap<String, Vec<u8>>,
}

fn write_err(path: &Path) -> impl Fn(std::io::Error) -> SimStoreError + '_ {
    move |e| SimStoreError::io(format!("write archive {}", path.display()), e)
}

/// Blob names are plain file names: one normal path component.
pub fn is_safe_blob_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Files of a chunked dataset, relative to its directory.
fn dataset_files(dir: &Path, cutoffs: &[f32]) -> Result<Vec<String>> {
    let mut files = vec![MANIFEST_FILE.to_string()];
    for &cutoff in cutoffs {
        let bucket = layout::bucket_path(dir, cutoff, Backend::Chunked);
        let bucket_name = bucket
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        for chunk in crate::compression::chunk_files(&bucket)? {
            if let Some(name) = chunk.file_name().and_then(|n| n.to_str()) {
                files.push(format!("{}/{}", bucket_name, name));
            }
        }
    }
    Ok(files)
}

/// Copy a dataset into `staging` with the chunked backend.
fn stage_chunked(store: &SimilarityStore, corpus_id: u64, staging: &Path) -> Result<()> {
    let reader = store.reader(corpus_id)?;
    let cutoffs = reader
        .cutoffs()
        .ok_or(SimStoreError::DatasetNotFound(corpus_id))?;
    let mut writer =
        store.writer_with_cutoffs(staging, corpus_id, &cutoffs, OpenMode::Create, Some(Backend::Chunked))?;
    for pair in reader.pairs() {
        let pair = pair?;
        writer.write_to_bucket(pair.bucket, pair.low, pair.high)?;
    }
    writer.close()?;
    Ok(())
}

/// Bundle corpora and named blobs into one gzip-compressed archive at `path`.
///
/// Continuous datasets are converted to the chunked backend in a staging
/// copy; the live datasets are left as they are.
pub fn create_archive(
    store: &SimilarityStore,
    corpus_ids: &[u64],
    blobs: &BTreeMap<String, Vec<u8>>,
    path: &Path,
) -> Result<ArchiveManifest> {
    if let Some(name) = blobs.keys().find(|name| !is_safe_blob_name(name)) {
        return Err(SimStoreError::config(format!("blob name {:?} is not a plain file name", name)));
    }
    let file = File::create(path)
        .map_err(|e| SimStoreError::io(format!("create archive {}", path.display()), e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

    // stage every corpus first so the manifest can list its files
    let mut sources: Vec<(PathBuf, Option<PathBuf>, Option<WriterLock>)> = vec![];
    let mut corpora = vec![];
    let staged = (|| -> Result<()> {
        for &corpus_id in corpus_ids {
            recover(store, corpus_id)?;
            let live = store.corpus_dir(corpus_id);
            let cutoffs = store
                .stored_cutoffs(corpus_id)?
                .ok_or(SimStoreError::DatasetNotFound(corpus_id))?;
            let lock = WriterLock::acquire(&live, corpus_id)?;

            let (dir, staging) = if layout::infer_backend(&live, &cutoffs) == Backend::Chunked {
                (live, None)
            } else {
                let staging = store.root().join(format!("{}.archive", corpus_id));
                if staging.exists() {
                    fs::remove_dir_all(&staging)
                        .map_err(|e| SimStoreError::io(format!("remove {}", staging.display()), e))?;
                }
                stage_chunked(store, corpus_id, &staging)?;
                (staging.clone(), Some(staging))
            };

            corpora.push(ArchivedCorpus {
                corpus_id,
                cutoffs: cutoffs.as_slice().to_vec(),
                files: dataset_files(&dir, cutoffs.as_slice())?,
            });
            sources.push((dir, staging, Some(lock)));
        }
        Ok(())
    })();

    let written = staged.and_then(|()| {
        let manifest = ArchiveManifest {
            format_version: ARCHIVE_FORMAT_VERSION,
            created_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            backend: Backend::Chunked,
            corpora: corpora.clone(),
            blobs: blobs.keys().cloned().collect(),
        };
        let manifest_json = serde_json::to_vec(&manifest)?;

        encoder.write_all(ARCHIVE_MAGIC).map_err(write_err(path))?;
        encoder
            .write_all(&(manifest_json.len() as u32).to_le_bytes())
            .map_err(write_err(path))?;
        encoder.write_all(&manifest_json).map_err(write_err(path))?;

        for (corpus, (dir, _, _)) in corpora.iter().zip(&sources) {
            for name in &corpus.files {
                let data = fs::read(dir.join(name))
                    .map_err(|e| SimStoreError::io(format!("read {}/{}", dir.display(), name), e))?;
                encoder
                    .write_all(&(data.len() as u64).to_le_bytes())
                    .map_err(write_err(path))?;
                encoder.write_all(&data).map_err(write_err(path))?;
            }
            debug!("Archived corpus {} ({} files)", corpus.corpus_id, corpus.files.len());
        }
        for data in blobs.values() {
            encoder
                .write_all(&(data.len() as u64).to_le_bytes())
                .map_err(write_err(path))?;
            encoder.write_all(data).map_err(write_err(path))?;
        }
        Ok(manifest)
    });

    for (_, staging, lock) in sources {
        drop(lock);
        if let Some(staging) = staging {
            let _ = fs::remove_dir_all(staging);
        }
    }

    let manifest = match written {
        Ok(manifest) => manifest,
        Err(e) => {
            drop(encoder);
            let _ = fs::remove_file(path);
            return Err(e);
        }
    };

    let sink = encoder.finish().map_err(write_err(path))?;
    let file = sink
        .into_inner()
        .map_err(|e| SimStoreError::io(format!("flush archive {}", path.display()), e.into_error()))?;
    file.sync_all().map_err(write_err(path))?;

    info!(
        "Archived {} corpora and {} blobs to {}",
        manifest.corpora.len(),
        manifest.blobs.len(),
        path.display()
    );
    Ok(manifest)
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], path: &Path) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| SimStoreError::corrupted(path, format!("truncated archive: {}", e)))
}

fn read_entry<R: Read>(reader: &mut R, path: &Path) -> Result<Vec<u8>> {
    let mut len = [0u8; 8];
    read_exact_or_corrupt(reader, &mut len, path)?;
    let len = u64::from_le_bytes(len);
    let mut data = vec![];
    reader
        .by_ref()
        .take(len)
        .read_to_end(&mut data)
        .map_err(|e| SimStoreError::corrupted(path, format!("archive entry: {}", e)))?;
    if data.len() as u64 != len {
        return Err(SimStoreError::corrupted(path, "truncated archive entry"));
    }
    Ok(data)
}

/// Reject entry names that would escape the corpus directory.
fn safe_relative(name: &str, archive: &Path) -> Result<PathBuf> {
    let relative = PathBuf::from(name);
    if name.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(SimStoreError::corrupted(archive, format!("unsafe entry name {:?}", name)));
    }
    Ok(relative)
}

fn restore_corpus<R: Read>(
    reader: &mut R,
    corpus: &ArchivedCorpus,
    target: &SimilarityStore,
    archive: &Path,
) -> Result<()> {
    recover(target, corpus.corpus_id)?;
    let live = target.corpus_dir(corpus.corpus_id);
    let _lock = if live.is_dir() {
        Some(WriterLock::acquire(&live, corpus.corpus_id)?)
    } else {
        None
    };

    let staging = rewrite_dir(target, corpus.corpus_id);
    let unpacked = (|| -> Result<()> {
        for &cutoff in &corpus.cutoffs {
            let bucket = layout::bucket_path(&staging, cutoff, Backend::Chunked);
            fs::create_dir_all(&bucket)
                .map_err(|e| SimStoreError::io(format!("create {}", bucket.display()), e))?;
        }
        for name in &corpus.files {
            let dest = staging.join(safe_relative(name, archive)?);
            let data = read_entry(reader, archive)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| SimStoreError::io(format!("create {}", parent.display()), e))?;
            }
            fs::write(&dest, data)
                .map_err(|e| SimStoreError::io(format!("write {}", dest.display()), e))?;
        }
        layout::DatasetManifest::load(&staging)?;
        // cached views of the replaced dataset must not match the restored one
        let floor = if live.is_dir() {
            layout::DatasetManifest::load(&live).map(|m| m.generation).unwrap_or(0)
        } else {
            0
        };
        layout::advance_generation(&staging, floor)?;
        Ok(())
    })();

    if let Err(e) = unpacked {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    swap_in(&live, &staging, &backup_dir(target, corpus.corpus_id))
}

/// Unpack an archive into `target`, replacing datasets of the same corpora.
pub fn restore_archive(path: &Path, target: &SimilarityStore) -> Result<RestoredArchive> {
    let file = File::open(path)
        .map_err(|e| SimStoreError::io(format!("open archive {}", path.display()), e))?;
    let mut reader = GzDecoder::new(BufReader::new(file));

    let mut magic = [0u8; 8];
    read_exact_or_corrupt(&mut reader, &mut magic, path)?;
    if &magic != ARCHIVE_MAGIC {
        return Err(SimStoreError::corrupted(path, "not a similarity archive"));
    }
    let mut len = [0u8; 4];
    read_exact_or_corrupt(&mut reader, &mut len, path)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_MANIFEST_BYTES {
        return Err(SimStoreError::corrupted(
            path,
            format!("archive manifest of {} bytes exceeds {}", len, MAX_MANIFEST_BYTES),
        ));
    }
    let mut manifest_json = vec![0u8; len];
    read_exact_or_corrupt(&mut reader, &mut manifest_json, path)?;
    let manifest: ArchiveManifest = serde_json::from_slice(&manifest_json).map_err(|e| {
        SimStoreError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;
    if manifest.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(SimStoreError::Manifest {
            path: path.to_path_buf(),
            message: format!("unsupported archive version {}", manifest.format_version),
        });
    }

    if let Some(name) = manifest.blobs.iter().find(|name| !is_safe_blob_name(name)) {
        return Err(SimStoreError::corrupted(path, format!("unsafe blob name {:?}", name)));
    }

    for corpus in &manifest.corpora {
        restore_corpus(&mut reader, corpus, target, path)?;
        debug!("Restored corpus {}", corpus.corpus_id);
    }

    let mut blobs = BTreeMap::new();
    for name in &manifest.blobs {
        blobs.insert(name.clone(), read_entry(&mut reader, path)?);
    }

    info!(
        "Restored {} corpora and {} blobs from {}",
        manifest.corpora.len(),
        blobs.len(),
        path.display()
    );
    Ok(RestoredArchive { manifest, blobs })
}
