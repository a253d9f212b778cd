use std::path::PathBuf;
use thiserror::Error;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 1200-1299: Compression errors
    CompressionFailed = 1201,
    DecompressionFailed = 1202,

    /// 1300-1399: Storage errors
    StorageIOError = 1301,
    CorruptedData = 1302,
    ManifestInvalid = 1303,
    SwapFailed = 1304,

    /// 1400-1499: Partition/hierarchy errors
    UnknownVertex = 1401,
    DuplicateVertex = 1402,

    /// 1500-1599: Dataset errors
    DatasetNotFound = 1501,
    BackendMismatch = 1502,

    /// 1600-1699: Concurrency and lifecycle errors
    WriterBusy = 1601,
    HandleClosed = 1602,
    WorkerPanicked = 1603,

    /// 1700-1799: Configuration/Validation errors
    InvalidConfiguration = 1701,
    InvalidCutoffs = 1702,

    /// 1800-1899: Collaborator errors
    CollaboratorFailed = 1801,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CompressionFailed => "COMPRESSION_FAILED",
            ErrorCode::DecompressionFailed => "DECOMPRESSION_FAILED",
            ErrorCode::StorageIOError => "STORAGE_IO_ERROR",
            ErrorCode::CorruptedData => "CORRUPTED_DATA",
            ErrorCode::ManifestInvalid => "MANIFEST_INVALID",
            ErrorCode::SwapFailed => "SWAP_FAILED",
            ErrorCode::UnknownVertex => "UNKNOWN_VERTEX",
            ErrorCode::DuplicateVertex => "DUPLICATE_VERTEX",
            ErrorCode::DatasetNotFound => "DATASET_NOT_FOUND",
            ErrorCode::BackendMismatch => "BACKEND_MISMATCH",
            ErrorCode::WriterBusy => "WRITER_BUSY",
            ErrorCode::HandleClosed => "HANDLE_CLOSED",
            ErrorCode::WorkerPanicked => "WORKER_PANICKED",
            ErrorCode::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorCode::InvalidCutoffs => "INVALID_CUTOFFS",
            ErrorCode::CollaboratorFailed => "COLLABORATOR_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SimStoreError {
    /// Filesystem failure with the operation that triggered it
    #[error("[{}] Storage error: {context}: {source}", ErrorCode::StorageIOError)]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Compressor or decompressor failure
    #[error("[{code}] Compression error: {message}")]
    Compression { code: ErrorCode, message: String },

    /// Present but malformed data (bad length, truncated frame, empty chunk)
    #[error("[{}] Corrupted data in {}: {message}", ErrorCode::CorruptedData, .path.display())]
    Corrupted { path: PathBuf, message: String },

    /// Manifest missing or unreadable for an existing dataset
    #[error("[{}] Invalid manifest {}: {message}", ErrorCode::ManifestInvalid, .path.display())]
    Manifest { path: PathBuf, message: String },

    /// Vertex id not part of the partition's vertex set
    #[error("[{}] Unknown vertex: {0}", ErrorCode::UnknownVertex)]
    UnknownVertex(u32),

    /// Vertex id given twice when building a partition
    #[error("[{}] Duplicate vertex: {0}", ErrorCode::DuplicateVertex)]
    DuplicateVertex(u32),

    /// No dataset for the corpus where one is required
    #[error("[{}] No similarity data for corpus {0}", ErrorCode::DatasetNotFound)]
    DatasetNotFound(u64),

    /// Dataset backend differs from the one the caller expected
    #[error("[{}] Corpus {corpus_id} uses backend {actual}, expected {expected}", ErrorCode::BackendMismatch)]
    BackendMismatch {
        corpus_id: u64,
        expected: String,
        actual: String,
    },

    /// Another writer holds the corpus lock
    #[error("[{}] Writer already active for corpus {corpus_id} (lock {})", ErrorCode::WriterBusy, .lock.display())]
    WriterBusy { corpus_id: u64, lock: PathBuf },

    /// Use of a writer, reader or partition after it was closed/freed
    #[error("[{}] Handle already closed: {0}", ErrorCode::HandleClosed)]
    HandleClosed(String),

    /// Directory swap at the end of a rewrite failed
    #[error("[{}] Swap failed for {}: {message}", ErrorCode::SwapFailed, .path.display())]
    SwapFailed { path: PathBuf, message: String },

    /// Batch worker panicked while processing one corpus
    #[error("[{}] Worker for corpus {corpus_id} panicked: {message}", ErrorCode::WorkerPanicked)]
    WorkerPanicked { corpus_id: u64, message: String },

    /// Cutoff table rejected by validation
    #[error("[{}] Invalid cutoff table: {0}", ErrorCode::InvalidCutoffs)]
    InvalidCutoffs(String),

    /// Configuration error
    #[error("[{}] Config error: {message}", ErrorCode::InvalidConfiguration)]
    Config { message: String },

    /// Failure reported by an external collaborator (summaries, corpus)
    #[error("[{}] Collaborator error: {0}", ErrorCode::CollaboratorFailed)]
    Collaborator(String),
}

impl SimStoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SimStoreError::Io { .. } => ErrorCode::StorageIOError,
            SimStoreError::Compression { code, .. } => *code,
            SimStoreError::Corrupted { .. } => ErrorCode::CorruptedData,
            SimStoreError::Manifest { .. } => ErrorCode::ManifestInvalid,
            SimStoreError::UnknownVertex(_) => ErrorCode::UnknownVertex,
            SimStoreError::DuplicateVertex(_) => ErrorCode::DuplicateVertex,
            SimStoreError::DatasetNotFound(_) => ErrorCode::DatasetNotFound,
            SimStoreError::BackendMismatch { .. } => ErrorCode::BackendMismatch,
            SimStoreError::WriterBusy { .. } => ErrorCode::WriterBusy,
            SimStoreError::HandleClosed(_) => ErrorCode::HandleClosed,
            SimStoreError::SwapFailed { .. } => ErrorCode::SwapFailed,
            SimStoreError::WorkerPanicked { .. } => ErrorCode::WorkerPanicked,
            SimStoreError::InvalidCutoffs(_) => ErrorCode::InvalidCutoffs,
            SimStoreError::Config { .. } => ErrorCode::InvalidConfiguration,
            SimStoreError::Collaborator(_) => ErrorCode::CollaboratorFailed,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SimStoreError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SimStoreError::Corrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SimStoreError::Config {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SimStoreError {
    fn from(err: std::io::Error) -> Self {
        SimStoreError::io("I/O", err)
    }
}

impl From<serde_json::Error> for SimStoreError {
    fn from(err: serde_json::Error) -> Self {
        SimStoreError::config(format!("JSON error: {}", err))
    }
}

impl From<flate2::CompressError> for SimStoreError {
    fn from(err: flate2::CompressError) -> Self {
        SimStoreError::Compression {
            code: ErrorCode::CompressionFailed,
            message: err.to_string(),
        }
    }
}

impl From<flate2::DecompressError> for SimStoreError {
    fn from(err: flate2::DecompressError) -> Self {
        SimStoreError::Compression {
            code: ErrorCode::DecompressionFailed,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimStoreError>;
