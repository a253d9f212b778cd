/// Storage module: bucketed similarity datasets on disk
///
/// Each corpus owns one directory under the store root holding a manifest
/// and one compressed artifact per cutoff bucket.

pub mod layout;
pub mod writer;
pub mod reader;
pub mod store;

pub use layout::{DatasetManifest, LOCK_FILE, MANIFEST_FILE};
pub use reader::{BucketArtifact, BucketPair, BucketPairs, SimilarityReader};
pub use store::{DatasetStats, SimilarityStore};
pub use writer::{SimilarityWriter, WriteStats, WriterOptions};
