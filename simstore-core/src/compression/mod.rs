/// Compression module: buffered streaming codecs for bucket data
///
/// Two backends share one pair of traits:
/// - Continuous: one growing zlib stream per artifact. Every writer session
///   appends an independently finalized frame; readers walk across frames.
/// - Chunked: a directory of numbered LZ4 blocks, one per writer flush.
///   Appending only adds new chunk files.
///
/// Writers and readers hold at most one buffer's worth of uncompressed
/// data, no matter how large the artifact grows.

pub mod continuous;
pub mod chunked;


use std::fmt;
use std::path::Path;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SimStoreError};

pub use continuous::{ContinuousReader, ContinuousWriter};
pub use chunked::{chunk_files, decode_chunk, ChunkedReader, ChunkedWriter};

/// Compression backend in effect for a whole dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Single zlib stream per bucket
    #[serde(rename = "zlib")]
    Continuous,
    /// Numbered LZ4 chunk files per bucket
    #[serde(rename = "lz4")]
    Chunked,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Continuous => "zlib",
            Backend::Chunked => "lz4",
        }
    }

    /// File extension of a bucket artifact for this backend.
    pub fn extension(&self) -> &'static str {
        self.name()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = SimStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zlib" | "continuous" => Ok(Backend::Continuous),
            "lz4" | "chunked" => Ok(Backend::Chunked),
            other => Err(SimStoreError::config(format!("unknown backend {:?}", other))),
        }
    }
}

/// How a writer treats an existing artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Discard existing content
    Create,
    /// Keep existing content and continue after it
    Append,
}

/// Buffered compressing writer.
pub trait CompressedWrite: Send {
    /// Buffer `bytes`, compressing whenever the buffer reaches its threshold.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Compress and emit whatever is buffered.
    fn flush(&mut self) -> Result<()>;

    /// Flush, finalize the compressor and release the sink.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Incremental decompressing reader.
pub trait CompressedRead: Send {
    /// Append up to `n` decompressed bytes to `out`, returning how many were
    /// added. Fewer than `n` only at end of input.
    fn read_into(&mut self, n: usize, out: &mut Vec<u8>) -> Result<usize>;

    /// Release the source. Later reads fail.
    fn close(&mut self);

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        self.read_into(n, &mut out)?;
        Ok(out)
    }
}

/// Reader over an artifact that does not exist.
#[derive(Debug, Default)]
pub struct EmptyReader {
    closed: bool,
}

impl CompressedRead for EmptyReader {
    fn read_into(&mut self, _n: usize, _out: &mut Vec<u8>) -> Result<usize> {
        if self.closed {
            return Err(SimStoreError::HandleClosed("empty reader".to_string()));
        }
        Ok(0)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Open a writer for the artifact at `path`.
///
/// For the chunked backend `path` is the chunk directory.
pub fn open_writer(
    backend: Backend,
    path: &Path,
    buffer_bytes: usize,
    mode: OpenMode,
) -> Result<Box<dyn CompressedWrite>> {
    Ok(match backend {
        Backend::Continuous => Box::new(ContinuousWriter::open(path, buffer_bytes, mode)?),
        Backend::Chunked => Box::new(ChunkedWriter::open(path, buffer_bytes, mode)?),
    })
}

/// Open a reader for the artifact at `path`. A missing artifact reads as empty.
pub fn open_reader(backend: Backend, path: &Path) -> Result<Box<dyn CompressedRead>> {
    if !path.exists() {
        return Ok(Box::new(EmptyReader::default()));
    }
    Ok(match backend {
        Backend::Continuous => Box::new(ContinuousReader::open(path)?),
        Backend::Chunked => Box::new(ChunkedReader::open(path)?),
    })
}
