/// Hierarchy module: nested clusters from bucketed similarity edges
///
/// A build replays edges in descending similarity through a partition and
/// snapshots the partition each time the edge stream drops below the next
/// cutoff. Small clusters are pruned from every snapshot; each cluster of a
/// snapshot becomes the child of the cluster containing it in the next one.

pub mod node;
pub mod builder;
pub mod cache;

#[cfg(test)]
mod tests;

pub use builder::{default_pruning_size, ClusterSummarizer, HierarchyBuilder};
pub use cache::{DatasetStamp, HierarchyCache, HierarchyService};
pub use node::{Hierarchy, HierarchyNode};
