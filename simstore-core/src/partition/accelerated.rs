use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::core::errors::{Result, SimStoreError};
use crate::core::types::PAIR_RECORD_BYTES;
use crate::partition::{collect_sets, Partition};

const NO_POSITION: u32 = u32::MAX;

/// Spare slots a dense table may carry per vertex before falling back to a map.
const DENSE_SLACK: u64 = 4;

/// Vertex id to position lookup.
#[derive(Debug)]
enum PositionIndex {
    /// `table[id - base]`, `NO_POSITION` for ids outside the set
    Dense { base: u32, table: Vec<u32> },
    Sparse(HashMap<u32, u32>),
}

impl PositionIndex {
    fn build(vertices: &[u32]) -> Result<Self> {
        let (min, max) = match (vertices.iter().min(), vertices.iter().max()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => return Ok(PositionIndex::Sparse(HashMap::new())),
        };
        let span = (max - min) as u64 + 1;

        if span <= DENSE_SLACK * vertices.len() as u64 + 1024 {
            let mut table = vec![NO_POSITION; span as usize];
            for (position, &vertex) in vertices.iter().enumerate() {
                let slot = &mut table[(vertex - min) as usize];
                if *slot != NO_POSITION {
                    return Err(SimStoreError::DuplicateVertex(vertex));
                }
                *slot = position as u32;
            }
            Ok(PositionIndex::Dense { base: min, table })
        } else {
            let mut map = HashMap::with_capacity(vertices.len());
            for (position, &vertex) in vertices.iter().enumerate() {
                if map.insert(vertex, position as u32).is_some() {
                    return Err(SimStoreError::DuplicateVertex(vertex));
                }
            }
            Ok(PositionIndex::Sparse(map))
        }
    }

    #[inline]
    fn get(&self, vertex: u32) -> Result<usize> {
        let position = match self {
            PositionIndex::Dense { base, table } => vertex
                .checked_sub(*base)
                .and_then(|offset| table.get(offset as usize))
                .copied()
                .filter(|&p| p != NO_POSITION),
            PositionIndex::Sparse(map) => map.get(&vertex).copied(),
        };
        position
            .map(|p| p as usize)
            .ok_or(SimStoreError::UnknownVertex(vertex))
    }
}

#[derive(Debug)]
struct State {
    values: Vec<u32>,
    index: PositionIndex,
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl State {
    /// Root of `position` with path halving.
    #[inline]
    fn find(&mut self, mut position: usize) -> usize {
        while self.parent[position] as usize != position {
            let grandparent = self.parent[self.parent[position] as usize];
            self.parent[position] = grandparent;
            position = grandparent as usize;
        }
        position
    }

    #[inline]
    fn merge_positions(&mut self, x: usize, y: usize) {
        let x_root = self.find(x);
        let y_root = self.find(y);
        if x_root == y_root {
            return;
        }
        if self.rank[x_root] < self.rank[y_root] {
            self.parent[x_root] = y_root as u32;
        } else if self.rank[x_root] > self.rank[y_root] {
            self.parent[y_root] = x_root as u32;
        } else {
            self.parent[y_root] = x_root as u32;
            self.rank[x_root] += 1;
        }
    }

    fn merge_block(&mut self, bytes: &[u8]) -> Result<usize> {
        for record in bytes.chunks_exact(PAIR_RECORD_BYTES) {
            let x = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let y = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            let (x, y) = (self.index.get(x)?, self.index.get(y)?);
            self.merge_positions(x, y);
        }
        Ok(bytes.len() / PAIR_RECORD_BYTES)
    }
}

/// Union-find tuned for bulk merges straight from chunk files.
///
/// Ids map to positions through a flat table when they are compact, and
/// chunk merges decode into a reused buffer without building pair values.
#[derive(Debug)]
pub struct AcceleratedPartition {
    state: Option<State>,
    len: usize,
    scratch: Vec<u8>,
}

impl AcceleratedPartition {
    pub fn new(vertices: &[u32]) -> Result<Self> {
        if vertices.len() >= NO_POSITION as usize {
            return Err(SimStoreError::config("too many vertices for a 32-bit partition"));
        }
        let index = PositionIndex::build(vertices)?;
        Ok(AcceleratedPartition {
            state: Some(State {
                values: vertices.to_vec(),
                index,
                parent: (0..vertices.len() as u32).collect(),
                rank: vec![0; vertices.len()],
            }),
            len: vertices.len(),
            scratch: Vec::new(),
        })
    }

    fn state(&mut self) -> Result<&mut State> {
        self.state
            .as_mut()
            .ok_or_else(|| SimStoreError::HandleClosed("freed partition".to_string()))
    }
}

impl Partition for AcceleratedPartition {
    fn merge(&mut self, x: u32, y: u32) -> Result<()> {
        let state = self.state()?;
        let (x, y) = (state.index.get(x)?, state.index.get(y)?);
        state.merge_positions(x, y);
        Ok(())
    }

    fn representative(&mut self, x: u32) -> Result<u32> {
        let state = self.state()?;
        let position = state.index.get(x)?;
        let root = state.find(position);
        Ok(state.values[root])
    }

    fn group(&mut self, x: u32) -> Result<Vec<u32>> {
        let state = self.state()?;
        let position = state.index.get(x)?;
        let root = state.find(position);
        let mut members = vec![];
        for p in 0..state.values.len() {
            if state.find(p) == root {
                members.push(state.values[p]);
            }
        }
        Ok(members)
    }

    fn sets(&mut self) -> Result<Vec<Vec<u32>>> {
        let state = self.state()?;
        let values = std::mem::take(&mut state.values);
        let sets = collect_sets(values.len(), &values, |p| state.find(p));
        state.values = values;
        Ok(sets)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn free(&mut self) {
        self.state = None;
        self.scratch = Vec::new();
    }

    fn merge_records(&mut self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() % PAIR_RECORD_BYTES != 0 {
            return Err(SimStoreError::corrupted(
                std::path::PathBuf::new(),
                format!("record block of {} bytes", bytes.len()),
            ));
        }
        self.state()?.merge_block(bytes)
    }

    fn merge_chunk(&mut self, path: &Path) -> Result<usize> {
        self.state()?;
        let compressed = fs::read(path)
            .map_err(|e| SimStoreError::io(format!("read {}", path.display()), e))?;
        if compressed.len() < 4 {
            return Err(SimStoreError::corrupted(path, "chunk shorter than its size prefix"));
        }
        let size = i32::from_le_bytes([compressed[0], compressed[1], compressed[2], compressed[3]]);
        if size < 0 || size as usize % PAIR_RECORD_BYTES != 0 {
            return Err(SimStoreError::corrupted(
                path,
                format!("chunk declares {} decoded bytes", size),
            ));
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(size as usize, 0);
        let result = lz4::block::decompress_to_buffer(&compressed, None, &mut scratch)
            .map_err(|e| SimStoreError::corrupted(path, format!("lz4: {}", e)))
            .and_then(|decoded| {
                if decoded != size as usize {
                    return Err(SimStoreError::corrupted(path, "chunk decoded short"));
                }
                self.state()?.merge_block(&scratch[..decoded])
            });
        self.scratch = scratch;

        if let Ok(pairs) = &result {
            debug!("Merged {} pairs from {}", pairs, path.display());
        }
        result
    }
}
