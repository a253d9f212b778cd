use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::compression::{CompressedRead, CompressedWrite, OpenMode};
use crate::core::errors::{ErrorCode, Result, SimStoreError};

const CHUNK_EXTENSION: &str = "lz4";

fn chunk_file_name(index: u64) -> String {
    format!("{:08}.{}", index, CHUNK_EXTENSION)
}

fn parse_chunk_index(path: &Path) -> Option<u64> {
    if path.extension().map_or(true, |ext| ext != CHUNK_EXTENSION) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Chunk files of a chunk directory in ascending numeric order.
///
/// A missing directory has no chunks.
pub fn chunk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(SimStoreError::io(format!("list {}", dir.display()), e)),
    };

    let mut chunks = vec![];
    for entry in entries {
        let entry = entry.map_err(|e| SimStoreError::io(format!("list {}", dir.display()), e))?;
        let path = entry.path();
        if let Some(index) = parse_chunk_index(&path) {
            chunks.push((index, path));
        }
    }
    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks.into_iter().map(|(_, path)| path).collect())
}

/// Decompress one chunk file into memory.
pub fn decode_chunk(path: &Path) -> Result<Vec<u8>> {
    let compressed = fs::read(path)
        .map_err(|e| SimStoreError::io(format!("read {}", path.display()), e))?;
    if compressed.is_empty() {
        return Err(SimStoreError::corrupted(path, "empty chunk"));
    }
    lz4::block::decompress(&compressed, None)
        .map_err(|e| SimStoreError::corrupted(path, format!("lz4: {}", e)))
}

/// Writer producing one LZ4 block file per flush.
pub struct ChunkedWriter {
    dir: PathBuf,
    buffer: Vec<u8>,
    threshold: usize,
    next_index: u64,
    closed: bool,
}

impl ChunkedWriter {
    pub fn open(dir: &Path, threshold: usize, mode: OpenMode) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| SimStoreError::io(format!("create {}", dir.display()), e))?;

        let existing = chunk_files(dir)?;
        let next_index = match mode {
            OpenMode::Append => existing
                .last()
                .and_then(|path| parse_chunk_index(path))
                .map_or(0, |index| index + 1),
            OpenMode::Create => {
                for path in &existing {
                    fs::remove_file(path)
                        .map_err(|e| SimStoreError::io(format!("remove {}", path.display()), e))?;
                }
                0
            }
        };

        Ok(ChunkedWriter {
            dir: dir.to_path_buf(),
            buffer: Vec::with_capacity(threshold.min(1 << 24)),
            threshold: threshold.max(1),
            next_index,
            closed: false,
        })
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SimStoreError::HandleClosed(format!(
                "lz4 writer {}",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

impl CompressedWrite for ChunkedWriter {
    fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        while !bytes.is_empty() {
            let room = self.threshold - self.buffer.len();
            let take = room.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() >= self.threshold {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        // an empty block would break every chunk reader
        if self.buffer.is_empty() {
            return Ok(());
        }

        let compressed = lz4::block::compress(&self.buffer, None, true).map_err(|e| {
            SimStoreError::Compression {
                code: ErrorCode::CompressionFailed,
                message: format!("lz4: {}", e),
            }
        })?;
        let path = self.dir.join(chunk_file_name(self.next_index));
        fs::write(&path, &compressed)
            .map_err(|e| SimStoreError::io(format!("write {}", path.display()), e))?;

        debug!(
            "Wrote chunk {} ({} -> {} bytes)",
            path.display(),
            self.buffer.len(),
            compressed.len()
        );
        self.next_index += 1;
        self.buffer.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        self.buffer = Vec::new();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ChunkedWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Dropping unclosed lz4 writer {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// Reader that decodes chunk files one at a time in index order.
pub struct ChunkedReader {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
    current: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl ChunkedReader {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(ChunkedReader {
            dir: dir.to_path_buf(),
            pending: chunk_files(dir)?.into(),
            current: Vec::new(),
            pos: 0,
            closed: false,
        })
    }
}

impl CompressedRead for ChunkedReader {
    fn read_into(&mut self, n: usize, out: &mut Vec<u8>) -> Result<usize> {
        if self.closed {
            return Err(SimStoreError::HandleClosed(format!(
                "lz4 reader {}",
                self.dir.display()
            )));
        }
        let start = out.len();
        let target = start + n;

        while out.len() < target {
            if self.pos == self.current.len() {
                match self.pending.pop_front() {
                    Some(path) => {
                        self.current = decode_chunk(&path)?;
                        self.pos = 0;
                        continue;
                    }
                    None => break,
                }
            }
            let take = (target - out.len()).min(self.current.len() - self.pos);
            out.extend_from_slice(&self.current[self.pos..self.pos + take]);
            self.pos += take;
        }

        Ok(out.len() - start)
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.current = Vec::new();
        self.pos = 0;
    }
}
