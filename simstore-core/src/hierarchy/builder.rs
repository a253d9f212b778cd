use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::compression::{open_reader, Backend};
use crate::core::errors::{Result, SimStoreError};
use crate::core::types::{CutoffTable, SimilarityTriple, PAIR_RECORD_BYTES};
use crate::hierarchy::node::{Hierarchy, HierarchyNode};
use crate::partition::{new_partition, Partition, PartitionKind};
use crate::storage::BucketArtifact;

/// Bytes decoded per read when merging a continuous bucket.
const MERGE_BLOCK_BYTES: usize = 8192 * PAIR_RECORD_BYTES;

/// Produces a label for a cluster from its member ids.
pub trait ClusterSummarizer: Send + Sync {
    fn summarize(&self, members: &[u32]) -> Result<Option<String>>;
}

/// Clusters of this size or smaller are dropped from snapshots.
pub fn default_pruning_size(vertex_count: usize) -> usize {
    std::cmp::max(2, vertex_count / 100)
}

/// Builds a nested cluster tree by replaying similarity edges, highest
/// first, through a partition and snapshotting it at every cutoff.
#[derive(Clone)]
pub struct HierarchyBuilder {
    cutoffs: CutoffTable,
    pruning_size: Option<usize>,
    partition_kind: PartitionKind,
    summarizer: Option<Arc<dyn ClusterSummarizer>>,
}

impl HierarchyBuilder {
    pub fn new(cutoffs: CutoffTable) -> Self {
        HierarchyBuilder {
            cutoffs,
            pruning_size: None,
            partition_kind: PartitionKind::Standard,
            summarizer: None,
        }
    }

    pub fn with_pruning_size(mut self, pruning_size: usize) -> Self {
        self.pruning_size = Some(pruning_size);
        self
    }

    pub fn with_partition_kind(mut self, kind: PartitionKind) -> Self {
        self.partition_kind = kind;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn ClusterSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn cutoffs(&self) -> &CutoffTable {
        &self.cutoffs
    }

    /// Consume edges in descending similarity order.
    pub fn build<I>(&self, vertices: &[u32], edges: I) -> Result<Hierarchy>
    where
        I: IntoIterator<Item = Result<SimilarityTriple>>,
    {
        let mut run = self.start(vertices)?;
        for edge in edges {
            let edge = edge?;
            if !run.advance_to(edge.similarity)? {
                break;
            }
            run.partition.merge(edge.low, edge.high)?;
        }
        run.finish()
    }

    /// Merge whole buckets, chunk file by chunk file where the backend allows.
    ///
    /// Gives the same hierarchy as [`build`](Self::build) over the same store.
    pub fn build_from_buckets(
        &self,
        vertices: &[u32],
        artifacts: &[BucketArtifact],
    ) -> Result<Hierarchy> {
        let mut run = self.start(vertices)?;
        for artifact in artifacts {
            match artifact.backend {
                Backend::Chunked => {
                    let chunks = artifact.chunk_files()?;
                    if chunks.is_empty() {
                        continue;
                    }
                    if !run.advance_to(artifact.similarity)? {
                        break;
                    }
                    let mut merged = 0;
                    for chunk in &chunks {
                        merged += run.partition.merge_chunk(chunk)?;
                    }
                    debug!(
                        "Merged {} pairs from {} chunks of bucket {}",
                        merged,
                        chunks.len(),
                        artifact.cutoff
                    );
                }
                Backend::Continuous => {
                    if !artifact.path.exists() {
                        continue;
                    }
                    if !run.advance_to(artifact.similarity)? {
                        break;
                    }
                    let mut stream = open_reader(Backend::Continuous, &artifact.path)?;
                    let mut block = Vec::with_capacity(MERGE_BLOCK_BYTES);
                    loop {
                        block.clear();
                        if stream.read_into(MERGE_BLOCK_BYTES, &mut block)? == 0 {
                            break;
                        }
                        run.partition.merge_records(&block).map_err(|e| match e {
                            SimStoreError::Corrupted { message, .. } => {
                                SimStoreError::corrupted(&artifact.path, message)
                            }
                            other => other,
                        })?;
                    }
                    stream.close();
                }
            }
        }
        run.finish()
    }

    fn start(&self, vertices: &[u32]) -> Result<Run> {
        let pruning_size = self
            .pruning_size
            .unwrap_or_else(|| default_pruning_size(vertices.len()));
        info!(
            "Building hierarchy over {} vertices ({} cutoffs, pruning size {}, {} partition)",
            vertices.len(),
            self.cutoffs.len(),
            pruning_size,
            self.partition_kind
        );
        Ok(Run {
            partition: new_partition(self.partition_kind, vertices)?,
            cutoffs: self.cutoffs.as_slice().to_vec(),
            next_cutoff: 0,
            pruning_size,
            vertex_count: vertices.len(),
            snapshots: vec![],
            summarizer: self.summarizer.clone(),
        })
    }
}

/// State of one build.
struct Run {
    partition: Box<dyn Partition>,
    cutoffs: Vec<f32>,
    next_cutoff: usize,
    pruning_size: usize,
    vertex_count: usize,
    snapshots: Vec<Vec<HierarchyNode>>,
    summarizer: Option<Arc<dyn ClusterSummarizer>>,
}

impl Run {
    /// Snapshot every cutoff above `similarity`. False once no cutoffs remain.
    fn advance_to(&mut self, similarity: f32) -> Result<bool> {
        while self.next_cutoff < self.cutoffs.len() && similarity < self.cutoffs[self.next_cutoff] {
            self.snapshot()?;
        }
        Ok(self.next_cutoff < self.cutoffs.len())
    }

    /// End of input acts as an edge below every cutoff, and is never merged.
    fn finish(mut self) -> Result<Hierarchy> {
        // a 0.0 cutoff is never passed by advance_to and is snapshotted here
        while self.next_cutoff < self.cutoffs.len() {
            self.snapshot()?;
        }
        self.partition.free();
        Ok(Hierarchy::from_snapshots(
            self.snapshots,
            self.cutoffs,
            self.pruning_size,
            self.vertex_count,
        ))
    }

    fn snapshot(&mut self) -> Result<()> {
        let cutoff = self.cutoffs[self.next_cutoff];
        self.next_cutoff += 1;

        let mut level: Vec<HierarchyNode> = vec![];
        let mut by_representative: HashMap<u32, usize> = HashMap::new();
        for members in self.partition.sets()? {
            if members.len() <= self.pruning_size {
                continue;
            }
            let representative = self.partition.representative(members[0])?;
            by_representative.insert(representative, level.len());
            level.push(HierarchyNode {
                representative,
                size: members.len(),
                members,
                cutoff,
                children: vec![],
                summary: None,
            });
        }

        let empty = vec![];
        let previous = self.snapshots.last().unwrap_or(&empty);
        for (index, child) in previous.iter().enumerate() {
            let parent = self.partition.representative(child.representative)?;
            if let Some(&slot) = by_representative.get(&parent) {
                level[slot].children.push(index);
            }
        }

        for node in &mut level {
            node.children
                .sort_by(|a, b| previous[*b].size.cmp(&previous[*a].size));
            if node.children.is_empty() {
                continue;
            }
            let mut ordered = Vec::with_capacity(node.members.len());
            let mut covered = HashSet::new();
            for &c in &node.children {
                for &m in &previous[c].members {
                    covered.insert(m);
                    ordered.push(m);
                }
            }
            ordered.extend(node.members.iter().filter(|m| !covered.contains(*m)));
            node.members = ordered;
        }

        if let Some(summarizer) = &self.summarizer {
            for node in &mut level {
                node.summary = summarizer.summarize(&node.members)?;
            }
        }

        debug!(
            "Snapshot at cutoff {}: {} clusters above size {}",
            cutoff,
            level.len(),
            self.pruning_size
        );
        self.snapshots.push(level);
        Ok(())
    }
}
