pub mod errors;
pub mod config;
pub mod types;

pub use errors::{ErrorCode, Result, SimStoreError};
pub use config::StoreConfig;
pub use types::{
    CutoffTable, SimilarityTriple, DEFAULT_CUTOFFS, PAIR_RECORD_BYTES, SIMILARITY_OFFSET,
};
