use std::collections::VecDeque;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One cluster at one cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Partition representative of the cluster
    pub representative: u32,
    pub size: usize,
    /// Members, grouped child by child (largest child first), then the
    /// members no child covers
    pub members: Vec<u32>,
    pub cutoff: f32,
    /// Indices into the next finer level
    pub children: Vec<usize>,
    pub summary: Option<String>,
}

/// Nested clusters stored as an arena of levels.
///
/// `levels[0]` holds the coarsest snapshot (lowest cutoff). A node's
/// `children` index into the level after its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    levels: Vec<Vec<HierarchyNode>>,
    /// Cutoff of each level, kept even when pruning empties the level
    level_cutoffs: Vec<f32>,
    pruning_size: usize,
    vertex_count: usize,
}

impl Hierarchy {
    /// Assemble from snapshots in the order they were taken (finest first),
    /// `cutoffs[i]` being the cutoff of `snapshots[i]`.
    pub(crate) fn from_snapshots(
        mut snapshots: Vec<Vec<HierarchyNode>>,
        mut cutoffs: Vec<f32>,
        pruning_size: usize,
        vertex_count: usize,
    ) -> Self {
        snapshots.reverse();
        cutoffs.reverse();
        Hierarchy {
            levels: snapshots,
            level_cutoffs: cutoffs,
            pruning_size,
            vertex_count,
        }
    }

    /// Top-level clusters.
    pub fn roots(&self) -> &[HierarchyNode] {
        self.levels.first().map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> Option<&[HierarchyNode]> {
        self.levels.get(level).map(|l| l.as_slice())
    }

    pub fn levels(&self) -> &[Vec<HierarchyNode>] {
        &self.levels
    }

    pub fn node(&self, level: usize, index: usize) -> Option<&HierarchyNode> {
        self.levels.get(level)?.get(index)
    }

    /// Cutoff of each level, coarsest first; one entry per level.
    pub fn cutoffs(&self) -> &[f32] {
        &self.level_cutoffs
    }

    pub fn pruning_size(&self) -> usize {
        self.pruning_size
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn is_empty(&self) -> bool {
        self.roots().is_empty()
    }

    /// Direct children of a node.
    pub fn children(&self, level: usize, index: usize) -> Vec<&HierarchyNode> {
        let (node, finer) = match (self.node(level, index), self.levels.get(level + 1)) {
            (Some(node), Some(finer)) => (node, finer),
            _ => return vec![],
        };
        node.children.iter().filter_map(|&c| finer.get(c)).collect()
    }

    /// `(level, index)` of every node below the given one, breadth first.
    pub fn descendants(&self, level: usize, index: usize) -> Vec<(usize, usize)> {
        let mut out = vec![];
        let mut queue = VecDeque::new();
        queue.push_back((level, index));
        while let Some((l, i)) = queue.pop_front() {
            if let Some(node) = self.node(l, i) {
                for &c in &node.children {
                    out.push((l + 1, c));
                    queue.push_back((l + 1, c));
                }
            }
        }
        out
    }

    /// Index of the cluster holding `vertex` at `level`, if it survived pruning.
    pub fn cluster_of(&self, vertex: u32, level: usize) -> Option<usize> {
        self.levels
            .get(level)?
            .iter()
            .position(|node| node.members.contains(&vertex))
    }

    /// Nested `{name, size, cutoff, members, children}` JSON for treemap views.
    pub fn to_treemap(&self) -> Value {
        let children: Vec<Value> = (0..self.roots().len())
            .map(|i| self.treemap_node(0, i))
            .collect();
        json!({
            "name": "clusters",
            "size": self.vertex_count,
            "children": children,
        })
    }

    fn treemap_node(&self, level: usize, index: usize) -> Value {
        let node = &self.levels[level][index];
        let children: Vec<Value> = node
            .children
            .iter()
            .map(|&c| self.treemap_node(level + 1, c))
            .collect();
        let name = node
            .summary
            .clone()
            .unwrap_or_else(|| node.representative.to_string());
        json!({
            "name": name,
            "representative": node.representative,
            "size": node.size,
            "cutoff": node.cutoff,
            "members": node.members,
            "children": children,
        })
    }
}
