use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compression::Backend;
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::CutoffTable;
use crate::partition::PartitionKind;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per corpus
    pub root: PathBuf,
    /// Bucket boundaries for newly created datasets
    pub cutoffs: CutoffTable,
    /// Backend used when creating a dataset
    pub backend: Backend,
    /// Uncompressed bytes buffered by a stream writer before it compresses
    pub stream_buffer_bytes: usize,
    /// Pairs buffered per bucket before they are pushed into the stream
    pub pair_buffer_len: usize,
    /// Union-find implementation used for clustering
    pub partition_kind: PartitionKind,
    /// Corpora processed concurrently by batch maintenance
    pub maintenance_workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from("/tmp/simstore"),
            cutoffs: CutoffTable::default(),
            backend: Backend::Chunked,
            stream_buffer_bytes: 1 << 20,
            pair_buffer_len: 64 * 1024,
            partition_kind: PartitionKind::Standard,
            maintenance_workers: 1,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `root`, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            ..StoreConfig::default()
        }
    }

    /// Load from environment variables.
    pub fn from_env() -> Self {
        StoreConfig::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from `SIMSTORE_*` variables resolved by `lookup`. Values that do
    /// not parse are logged and leave the default in place.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = StoreConfig::default();

        if let Some(root) = lookup("SIMSTORE_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Some(list) = lookup("SIMSTORE_CUTOFFS") {
            match CutoffTable::parse(&list) {
                Ok(table) => config.cutoffs = table,
                Err(e) => warn!("Ignoring SIMSTORE_CUTOFFS: {}", e),
            }
        }
        if let Some(name) = lookup("SIMSTORE_BACKEND") {
            match name.parse::<Backend>() {
                Ok(backend) => config.backend = backend,
                Err(e) => warn!("Ignoring SIMSTORE_BACKEND: {}", e),
            }
        }
        if let Some(bytes) = lookup("SIMSTORE_STREAM_BUFFER_BYTES") {
            parse_count("SIMSTORE_STREAM_BUFFER_BYTES", &bytes, &mut config.stream_buffer_bytes);
        }
        if let Some(len) = lookup("SIMSTORE_PAIR_BUFFER_LEN") {
            parse_count("SIMSTORE_PAIR_BUFFER_LEN", &len, &mut config.pair_buffer_len);
        }
        if let Some(kind) = lookup("SIMSTORE_PARTITION") {
            match kind.parse::<PartitionKind>() {
                Ok(kind) => config.partition_kind = kind,
                Err(e) => warn!("Ignoring SIMSTORE_PARTITION: {}", e),
            }
        }
        if let Some(workers) = lookup("SIMSTORE_WORKERS") {
            parse_count("SIMSTORE_WORKERS", &workers, &mut config.maintenance_workers);
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_buffer_bytes == 0 {
            return Err(SimStoreError::config("stream_buffer_bytes must be positive"));
        }
        if self.pair_buffer_len == 0 {
            return Err(SimStoreError::config("pair_buffer_len must be positive"));
        }
        if self.maintenance_workers == 0 {
            return Err(SimStoreError::config("maintenance_workers must be positive"));
        }
        // re-run table validation in case the config was deserialized by hand
        CutoffTable::new(self.cutoffs.as_slice().to_vec())?;
        Ok(())
    }
}

fn parse_count(name: &str, value: &str, target: &mut usize) {
    match value.trim().parse::<usize>() {
        Ok(n) => *target = n,
        Err(e) => warn!("Ignoring {}={:?}: {}; keeping {}", name, value, e, target),
    }
}
