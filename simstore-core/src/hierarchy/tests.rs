use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use proptest::prelude::*;

use super::*;
use crate::compression::Backend;
use crate::core::config::StoreConfig;
use crate::core::errors::Result;
use crate::core::types::{CutoffTable, SimilarityTriple};
use crate::corpus::{Corpus, StoreCorpus};
use crate::partition::PartitionKind;
use crate::storage::SimilarityStore;

fn edges(list: &[(u32, u32, f32)]) -> Vec<Result<SimilarityTriple>> {
    list.iter().map(|&t| Ok(SimilarityTriple::from(t))).collect()
}

fn table(cutoffs: &[f32]) -> CutoffTable {
    CutoffTable::new(cutoffs.to_vec()).unwrap()
}

fn merging_clusters() -> Hierarchy {
    let vertices: Vec<u32> = (1..=10).collect();
    HierarchyBuilder::new(table(&[0.9, 0.5]))
        .with_pruning_size(1)
        .build(
            &vertices,
            edges(&[
                (1, 2, 0.95),
                (3, 4, 0.95),
                (3, 5, 0.95),
                (6, 7, 0.95),
                (1, 3, 0.6),
                (1, 8, 0.6),
            ]),
        )
        .unwrap()
}

#[test]
fn test_default_pruning_size() {
    assert_eq!(default_pruning_size(0), 2);
    assert_eq!(default_pruning_size(250), 2);
    assert_eq!(default_pruning_size(1000), 10);
    assert_eq!(default_pruning_size(123_456), 1234);
}

#[test]
fn test_levels_and_children() {
    let h = merging_clusters();
    assert_eq!(h.depth(), 2);
    assert_eq!(h.cutoffs(), vec![0.5, 0.9]);

    let fine: Vec<u32> = h.level(1).unwrap().iter().map(|n| n.representative).collect();
    assert_eq!(fine, vec![1, 3, 6]);

    let roots = h.roots();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0].representative, 1);
    assert_eq!(roots[0].size, 6);
    // larger child first, then its members, then the uncovered vertex 8
    assert_eq!(roots[0].children, vec![1, 0]);
    assert_eq!(roots[0].members, vec![3, 4, 5, 1, 2, 8]);
    assert_eq!(roots[1].representative, 6);
    assert_eq!(roots[1].children, vec![2]);

    let children: Vec<u32> = h.children(0, 0).iter().map(|n| n.representative).collect();
    assert_eq!(children, vec![3, 1]);
    assert_eq!(h.descendants(0, 0), vec![(1, 1), (1, 0)]);
    assert!(h.children(1, 0).is_empty());
}

#[test]
fn test_cluster_lookup() {
    let h = merging_clusters();
    assert_eq!(h.cluster_of(8, 0), Some(0));
    assert_eq!(h.cluster_of(8, 1), None);
    assert_eq!(h.cluster_of(7, 1), Some(2));
    // singletons are pruned at every level
    assert_eq!(h.cluster_of(9, 0), None);
    assert_eq!(h.cluster_of(1, 5), None);
}

#[test]
fn test_small_clusters_pruned() {
    let vertices: Vec<u32> = (1..=6).collect();
    let h = HierarchyBuilder::new(table(&[0.9]))
        .with_pruning_size(2)
        .build(&vertices, edges(&[(1, 2, 0.95), (3, 4, 0.95), (3, 5, 0.95)]))
        .unwrap();
    let reps: Vec<u32> = h.roots().iter().map(|n| n.representative).collect();
    assert_eq!(reps, vec![3]);
    assert_eq!(h.pruning_size(), 2);
}

#[test]
fn test_edges_above_every_cutoff_still_snapshot() {
    let vertices: Vec<u32> = (1..=4).collect();
    let h = HierarchyBuilder::new(table(&[0.9, 0.8, 0.7]))
        .with_pruning_size(1)
        .build(&vertices, edges(&[(1, 2, 0.95), (2, 3, 0.95)]))
        .unwrap();
    assert_eq!(h.depth(), 3);
    for level in h.levels() {
        assert_eq!(level.len(), 1);
        assert_eq!(level[0].members, vec![1, 2, 3]);
    }
}

#[test]
fn test_stops_once_cutoffs_are_exhausted() {
    let vertices: Vec<u32> = (1..=3).collect();
    // the trailing edge names unknown vertices and must never be merged
    let h = HierarchyBuilder::new(table(&[0.9]))
        .with_pruning_size(1)
        .build(&vertices, edges(&[(1, 2, 0.95), (1, 3, 0.5), (99, 100, 0.4)]))
        .unwrap();
    assert_eq!(h.depth(), 1);
    assert_eq!(h.roots()[0].members, vec![1, 2]);
}

#[test]
fn test_edge_errors_propagate() {
    let vertices: Vec<u32> = (1..=3).collect();
    let result = HierarchyBuilder::new(table(&[0.9])).build(&vertices, edges(&[(1, 42, 0.95)]));
    assert!(result.is_err());
}

#[test]
fn test_empty_inputs() {
    let h = HierarchyBuilder::new(CutoffTable::default())
        .build(&[], Vec::<Result<SimilarityTriple>>::new())
        .unwrap();
    assert!(h.is_empty());
    assert_eq!(h.depth(), 5);
    assert_eq!(h.to_treemap()["children"].as_array().unwrap().len(), 0);
}

struct SizeLabel {
    calls: AtomicUsize,
}

impl ClusterSummarizer for SizeLabel {
    fn summarize(&self, members: &[u32]) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("{} docs from {}", members.len(), members[0])))
    }
}

#[test]
fn test_summaries_and_treemap() {
    let vertices: Vec<u32> = (1..=5).collect();
    let summarizer = Arc::new(SizeLabel { calls: AtomicUsize::new(0) });
    let h = HierarchyBuilder::new(table(&[0.9, 0.5]))
        .with_pruning_size(1)
        .with_summarizer(summarizer.clone())
        .build(&vertices, edges(&[(1, 2, 0.95), (2, 3, 0.6)]))
        .unwrap();
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.roots()[0].summary.as_deref(), Some("3 docs from 1"));

    let tree = h.to_treemap();
    assert_eq!(tree["size"], 5);
    let root = &tree["children"][0];
    assert_eq!(root["name"], "3 docs from 1");
    assert_eq!(root["size"], 3);
    assert_eq!(root["members"], serde_json::json!([1, 2, 3]));
    assert_eq!(root["children"][0]["name"], "2 docs from 1");
    assert_eq!(root["children"][0]["children"].as_array().unwrap().len(), 0);
}

fn store_with_pairs(root: &std::path::Path, backend: Backend, pairs: &[(u32, u32, f32)]) -> SimilarityStore {
    let mut config = StoreConfig::with_root(root);
    config.backend = backend;
    config.stream_buffer_bytes = 24;
    config.pair_buffer_len = 2;
    let store = SimilarityStore::open(config).unwrap();
    let mut writer = store.writer(1).unwrap();
    for &(low, high, sim) in pairs {
        writer.write(low, high, sim).unwrap();
    }
    writer.close().unwrap();
    store
}

#[test]
fn test_stored_scenario_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_pairs(
        dir.path(),
        Backend::Chunked,
        &[
            (1, 2, 1.0),
            (1, 3, 0.95),
            (1, 4, 0.9),
            (2, 5, 0.8),
            (2, 6, 0.72),
            (2, 7, 0.7),
            (3, 8, 0.5),
            (3, 9, 0.4),
        ],
    );
    let vertices: Vec<u32> = (1..=9).collect();
    let h = HierarchyBuilder::new(CutoffTable::default())
        .with_pruning_size(1)
        .build(&vertices, store.reader(1).unwrap())
        .unwrap();

    let sizes: Vec<usize> = h.levels().iter().map(|l| l[0].size).collect();
    assert_eq!(sizes, vec![8, 7, 7, 5, 4]);
    assert!(h.levels().iter().all(|l| l.len() == 1));
    assert_eq!(h.roots()[0].members, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

fn random_pairs() -> impl Strategy<Value = (u32, Vec<(u32, u32, f32)>)> {
    (2u32..30).prop_flat_map(|n| {
        let pair = (0..n, 0..n, 0.3f32..1.0).prop_filter_map("distinct", |(a, b, s)| {
            if a == b {
                None
            } else {
                Some((a.min(b), a.max(b), s))
            }
        });
        (Just(n), prop::collection::vec(pair, 0..60))
    })
}

fn check_shape(h: &Hierarchy, pruning: usize) -> std::result::Result<(), TestCaseError> {
    for l in 0..h.depth() {
        let level = h.level(l).unwrap();
        for node in level {
            prop_assert!(node.size > pruning);
            prop_assert_eq!(node.size, node.members.len());
            let unique: HashSet<u32> = node.members.iter().copied().collect();
            prop_assert_eq!(unique.len(), node.size);
        }
        if let Some(finer) = h.level(l + 1) {
            // every finer cluster sits in exactly one coarser cluster containing it
            for (c, child) in finer.iter().enumerate() {
                let parents: Vec<&HierarchyNode> =
                    level.iter().filter(|n| n.children.contains(&c)).collect();
                prop_assert_eq!(parents.len(), 1);
                for m in &child.members {
                    prop_assert!(parents[0].members.contains(m));
                }
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_hierarchy_is_monotonic((n, pairs) in random_pairs(), pruning in 1usize..4) {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_pairs(dir.path(), Backend::Chunked, &pairs);
        let vertices: Vec<u32> = (0..n).collect();
        let h = HierarchyBuilder::new(CutoffTable::default())
            .with_pruning_size(pruning)
            .build(&vertices, store.reader(1).unwrap())
            .unwrap();
        check_shape(&h, pruning)?;
    }

    #[test]
    fn prop_bucket_merge_matches_edge_replay((n, pairs) in random_pairs()) {
        let vertices: Vec<u32> = (0..n).collect();
        for backend in [Backend::Chunked, Backend::Continuous] {
            let dir = tempfile::tempdir().unwrap();
            let store = store_with_pairs(dir.path(), backend, &pairs);
            let builder = HierarchyBuilder::new(CutoffTable::default()).with_pruning_size(1);

            let replayed = builder
                .clone()
                .build(&vertices, store.reader(1).unwrap())
                .unwrap();
            let merged = builder
                .with_partition_kind(PartitionKind::Accelerated)
                .build_from_buckets(&vertices, &store.reader(1).unwrap().bucket_artifacts())
                .unwrap();
            prop_assert_eq!(replayed, merged);
        }
    }
}

#[test]
fn test_service_caches_and_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::with_root(dir.path());
    config.partition_kind = PartitionKind::Accelerated;
    let store = SimilarityStore::open(config).unwrap();

    let mut corpus = StoreCorpus::with_vertices(1, store.clone(), 1..=6);
    for (a, b, s) in [(2, 1, 0.95), (1, 3, 0.95), (4, 5, 0.85), (5, 6, 0.85), (3, 4, 0.55)] {
        corpus.append_similarity(a, b, s).unwrap();
    }
    corpus.finish_ingestion().unwrap();

    let service = HierarchyService::new(store);
    let cutoffs = CutoffTable::default();
    let first = service.hierarchy(&corpus, &cutoffs, Some(1)).unwrap();
    let again = service.hierarchy(&corpus, &cutoffs, Some(1)).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(first.roots()[0].size, 6);
    service.hierarchy(&corpus, &table(&[0.9]), Some(1)).unwrap();
    assert_eq!(service.cache().len(), 2);

    service.remove_documents(1, &[3]).unwrap();
    assert!(service.cache().is_empty());
    let after = service.hierarchy(&corpus, &cutoffs, Some(1)).unwrap();
    assert_eq!(after.roots().len(), 2);
    assert!(after.roots().iter().all(|n| !n.members.contains(&3)));
}

#[test]
fn test_cached_hierarchy_follows_corpus_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = SimilarityStore::open(StoreConfig::with_root(dir.path())).unwrap();
    let mut corpus = StoreCorpus::with_vertices(2, store.clone(), 1..=4);
    for (a, b) in [(1, 2), (2, 3), (3, 4)] {
        corpus.append_similarity(a, b, 0.95).unwrap();
    }

    let service = HierarchyService::new(store.clone());
    let cutoffs = table(&[0.9]);
    let err = service.hierarchy(&corpus, &cutoffs, Some(0)).unwrap_err();
    assert_eq!(err.code(), crate::core::errors::ErrorCode::WriterBusy);
    corpus.finish_ingestion().unwrap();

    let cluster_of = |h: &Hierarchy, v: u32| {
        let mut members = h
            .roots()
            .iter()
            .find(|n| n.members.contains(&v))
            .map(|n| n.members.clone())
            .unwrap_or_default();
        members.sort_unstable();
        members
    };

    let before = service.hierarchy(&corpus, &cutoffs, Some(0)).unwrap();
    assert_eq!(cluster_of(&before, 1), vec![1, 2, 3, 4]);

    // deleted behind the service's back
    corpus.delete_vertices(&[3]).unwrap();
    let after = service.hierarchy(&corpus, &cutoffs, Some(0)).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.roots().iter().all(|n| !n.members.contains(&3)));
    assert_eq!(cluster_of(&after, 1), vec![1, 2]);
    assert_eq!(cluster_of(&after, 4), vec![4]);

    // appended through the store directly
    let mut writer = store.append_writer(2).unwrap();
    writer.write(2, 4, 0.95).unwrap();
    writer.close().unwrap();
    let joined = service.hierarchy(&corpus, &cutoffs, Some(0)).unwrap();
    assert_eq!(cluster_of(&joined, 1), vec![1, 2, 4]);
    assert_eq!(service.cache().len(), 1);
}

#[test]
fn test_pruned_empty_level_keeps_its_cutoff() {
    let vertices: Vec<u32> = (1..=6).collect();
    let h = HierarchyBuilder::new(table(&[0.9, 0.5]))
        .with_pruning_size(2)
        .build(&vertices, edges(&[(1, 2, 0.95), (1, 3, 0.6), (2, 4, 0.6)]))
        .unwrap();

    assert_eq!(h.depth(), 2);
    assert!(h.level(1).unwrap().is_empty());
    assert_eq!(h.cutoffs(), &[0.5, 0.9]);
    assert_eq!(h.roots()[0].size, 4);
}

#[test]
fn test_zero_cutoff_takes_remaining_edges() {
    let vertices: Vec<u32> = (1..=4).collect();
    let h = HierarchyBuilder::new(table(&[0.5, 0.0]))
        .with_pruning_size(1)
        .build(&vertices, edges(&[(1, 2, 0.7), (3, 4, 0.0)]))
        .unwrap();

    assert_eq!(h.cutoffs(), &[0.0, 0.5]);
    assert_eq!(h.level(1).unwrap().len(), 1);
    assert_eq!(h.roots().len(), 2);
    assert!(h.roots().iter().all(|n| n.size == 2 && n.cutoff == 0.0));
}
