/// Partition module: disjoint sets over a fixed vertex set
///
/// Both implementations use union by rank with identical tie breaking, so
/// for the same merge sequence they agree on every representative. They
/// differ only in how the tree is stored and compressed.

pub mod standard;
pub mod accelerated;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::compression::decode_chunk;
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::PAIR_RECORD_BYTES;

pub use accelerated::AcceleratedPartition;
pub use standard::StandardPartition;

/// Union-find over an explicit vertex set.
pub trait Partition: Send {
    /// Join the sets of `x` and `y`.
    fn merge(&mut self, x: u32, y: u32) -> Result<()>;

    /// Vertex at the root of `x`'s tree.
    fn representative(&mut self, x: u32) -> Result<u32>;

    /// Every vertex sharing `x`'s set, in construction order.
    fn group(&mut self, x: u32) -> Result<Vec<u32>>;

    /// All sets, ordered by their first member's position; members in
    /// construction order.
    fn sets(&mut self) -> Result<Vec<Vec<u32>>>;

    /// Size of each set keyed by representative.
    fn set_sizes(&mut self) -> Result<HashMap<u32, usize>> {
        let mut sizes = HashMap::new();
        for set in self.sets()? {
            if let Some(&first) = set.first() {
                sizes.insert(self.representative(first)?, set.len());
            }
        }
        Ok(sizes)
    }

    /// Number of vertices.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release memory early. Later calls may fail with `HandleClosed`.
    fn free(&mut self);

    /// Merge every `(low, high)` record of a decoded bucket block.
    fn merge_records(&mut self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() % PAIR_RECORD_BYTES != 0 {
            return Err(SimStoreError::Corrupted {
                path: Default::default(),
                message: format!("record block of {} bytes", bytes.len()),
            });
        }
        for record in bytes.chunks_exact(PAIR_RECORD_BYTES) {
            let x = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let y = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            self.merge(x, y)?;
        }
        Ok(bytes.len() / PAIR_RECORD_BYTES)
    }

    /// Merge every pair stored in one compressed chunk file; returns the pair count.
    fn merge_chunk(&mut self, path: &Path) -> Result<usize> {
        let bytes = decode_chunk(path)?;
        self.merge_records(&bytes).map_err(|e| match e {
            SimStoreError::Corrupted { message, .. } => SimStoreError::corrupted(path, message),
            other => other,
        })
    }
}

/// Which union-find implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Standard,
    Accelerated,
}

impl PartitionKind {
    pub fn name(&self) -> &'static str {
        match self {
            PartitionKind::Standard => "standard",
            PartitionKind::Accelerated => "accelerated",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PartitionKind {
    type Err = SimStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(PartitionKind::Standard),
            "accelerated" | "fast" => Ok(PartitionKind::Accelerated),
            other => Err(SimStoreError::config(format!("unknown partition kind {:?}", other))),
        }
    }
}

/// Build a partition of the requested kind with every vertex in its own set.
pub fn new_partition(kind: PartitionKind, vertices: &[u32]) -> Result<Box<dyn Partition>> {
    Ok(match kind {
        PartitionKind::Standard => Box::new(StandardPartition::new(vertices)?),
        PartitionKind::Accelerated => Box::new(AcceleratedPartition::new(vertices)?),
    })
}

/// Group positions by root: sets ordered by first position, members in position order.
pub(crate) fn collect_sets<F>(len: usize, values: &[u32], mut root_of: F) -> Vec<Vec<u32>>
where
    F: FnMut(usize) -> usize,
{
    let mut slot_of_root = vec![usize::MAX; len];
    let mut sets: Vec<Vec<u32>> = vec![];
    for position in 0..len {
        let root = root_of(position);
        if slot_of_root[root] == usize::MAX {
            slot_of_root[root] = sets.len();
            sets.push(vec![]);
        }
        sets[slot_of_root[root]].push(values[position]);
    }
    sets
}
