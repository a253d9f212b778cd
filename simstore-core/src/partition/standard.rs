use std::collections::HashMap;

use crate::core::errors::{Result, SimStoreError};
use crate::partition::{collect_sets, Partition};

/// Array-backed union-find with union by rank and full path compression.
#[derive(Debug, Clone)]
pub struct StandardPartition {
    values: Vec<u32>,
    positions: HashMap<u32, usize>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl StandardPartition {
    pub fn new(vertices: &[u32]) -> Result<Self> {
        let mut positions = HashMap::with_capacity(vertices.len());
        for (position, &vertex) in vertices.iter().enumerate() {
            if positions.insert(vertex, position).is_some() {
                return Err(SimStoreError::DuplicateVertex(vertex));
            }
        }
        Ok(StandardPartition {
            values: vertices.to_vec(),
            positions,
            parent: (0..vertices.len()).collect(),
            rank: vec![0; vertices.len()],
        })
    }

    fn position(&self, vertex: u32) -> Result<usize> {
        self.positions
            .get(&vertex)
            .copied()
            .ok_or(SimStoreError::UnknownVertex(vertex))
    }

    /// Root position of `position`, pointing every node on the path at it.
    fn find(&mut self, position: usize) -> usize {
        let mut root = position;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = position;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }
}

impl Partition for StandardPartition {
    fn merge(&mut self, x: u32, y: u32) -> Result<()> {
        let x_root = {
            let position = self.position(x)?;
            self.find(position)
        };
        let y_root = {
            let position = self.position(y)?;
            self.find(position)
        };
        if x_root == y_root {
            return Ok(());
        }

        if self.rank[x_root] < self.rank[y_root] {
            self.parent[x_root] = y_root;
        } else if self.rank[x_root] > self.rank[y_root] {
            self.parent[y_root] = x_root;
        } else {
            self.parent[y_root] = x_root;
            self.rank[x_root] += 1;
        }
        Ok(())
    }

    fn representative(&mut self, x: u32) -> Result<u32> {
        let position = self.position(x)?;
        let root = self.find(position);
        Ok(self.values[root])
    }

    fn group(&mut self, x: u32) -> Result<Vec<u32>> {
        let position = self.position(x)?;
        let root = self.find(position);
        let mut members = vec![];
        for p in 0..self.values.len() {
            if self.find(p) == root {
                members.push(self.values[p]);
            }
        }
        Ok(members)
    }

    fn sets(&mut self) -> Result<Vec<Vec<u32>>> {
        let len = self.values.len();
        let values = std::mem::take(&mut self.values);
        let sets = collect_sets(len, &values, |p| self.find(p));
        self.values = values;
        Ok(sets)
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    /// Nothing to release early; memory goes with the value.
    fn free(&mut self) {}
}
