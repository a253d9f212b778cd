// ============================================================================
// CORE TYPES & UTILITIES
// ============================================================================
pub mod core;

// ============================================================================
// STORAGE & PERSISTENCE
// ============================================================================
pub mod compression;
pub mod storage;
pub mod maintenance;

// ============================================================================
// CLUSTERING
// ============================================================================
pub mod partition;
pub mod hierarchy;

// ============================================================================
// COLLABORATOR INTERFACES
// ============================================================================
pub mod corpus;

// Re-export commonly used types
pub use crate::core::{
    CutoffTable, ErrorCode, Result, SimStoreError, SimilarityTriple, StoreConfig,
    DEFAULT_CUTOFFS, PAIR_RECORD_BYTES, SIMILARITY_OFFSET,
};
pub use compression::{open_reader, open_writer, Backend, CompressedRead, CompressedWrite, OpenMode};
pub use storage::{
    BucketArtifact, BucketPair, DatasetStats, SimilarityReader, SimilarityStore, SimilarityWriter,
    WriteStats,
};
pub use maintenance::{is_safe_blob_name, BatchOutcome, RecoveryReport, RewriteStats, StoreMaintenance};
pub use partition::{new_partition, Partition, PartitionKind};
pub use hierarchy::{
    default_pruning_size, ClusterSummarizer, DatasetStamp, Hierarchy, HierarchyBuilder, HierarchyNode,
    HierarchyService,
};
pub use corpus::{Corpus, StoreCorpus};
