use proptest::prelude::*;

use super::*;
use crate::compression::{open_writer, Backend, CompressedWrite, OpenMode};
use crate::core::errors::ErrorCode;

const KINDS: [PartitionKind; 2] = [PartitionKind::Standard, PartitionKind::Accelerated];

fn records(pairs: &[(u32, u32)]) -> Vec<u8> {
    pairs
        .iter()
        .flat_map(|(x, y)| x.to_le_bytes().into_iter().chain(y.to_le_bytes()))
        .collect()
}

#[test]
fn test_partition_merge_sequence() {
    // a..e as 97..101
    let (a, b, c, d, e) = (97, 98, 99, 100, 101);
    for kind in KINDS {
        let mut p = new_partition(kind, &[a, b, c, d, e]).unwrap();
        assert_eq!(p.sets().unwrap(), vec![vec![a], vec![b], vec![c], vec![d], vec![e]]);

        p.merge(a, b).unwrap();
        assert_eq!(p.sets().unwrap(), vec![vec![a, b], vec![c], vec![d], vec![e]]);

        p.merge(c, d).unwrap();
        assert_eq!(p.sets().unwrap(), vec![vec![a, b], vec![c, d], vec![e]]);

        p.merge(a, d).unwrap();
        assert_eq!(p.sets().unwrap(), vec![vec![a, b, c, d], vec![e]]);

        p.merge(b, e).unwrap();
        assert_eq!(p.sets().unwrap(), vec![vec![a, b, c, d, e]]);
        assert_eq!(p.representative(e).unwrap(), a, "kind {}", kind);
    }
}

#[test]
fn test_rank_decides_root() {
    for kind in KINDS {
        let mut p = new_partition(kind, &[1, 2, 3]).unwrap();
        // tie: y's root goes under x's root
        p.merge(2, 1).unwrap();
        assert_eq!(p.representative(1).unwrap(), 2);
        // rank 0 root joins the rank 1 root whichever side it is on
        p.merge(3, 1).unwrap();
        assert_eq!(p.representative(3).unwrap(), 2);
    }
}

#[test]
fn test_group_and_sizes() {
    for kind in KINDS {
        let mut p = new_partition(kind, &[10, 20, 30, 40]).unwrap();
        p.merge(40, 20).unwrap();
        assert_eq!(p.group(20).unwrap(), vec![20, 40]);
        assert_eq!(p.group(30).unwrap(), vec![30]);

        let sizes = p.set_sizes().unwrap();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[&40], 2);
        assert_eq!(sizes[&10], 1);
        assert_eq!(p.len(), 4);
    }
}

#[test]
fn test_unknown_and_duplicate_vertices() {
    for kind in KINDS {
        let err = new_partition(kind, &[1, 2, 1]).err().unwrap();
        assert_eq!(err.code(), ErrorCode::DuplicateVertex);

        let mut p = new_partition(kind, &[1, 2]).unwrap();
        assert_eq!(p.merge(1, 3).unwrap_err().code(), ErrorCode::UnknownVertex);
        assert_eq!(p.representative(0).unwrap_err().code(), ErrorCode::UnknownVertex);
    }
}

#[test]
fn test_sparse_ids() {
    for kind in KINDS {
        let vertices = [7, 4_000_000_000, 123_456_789];
        let mut p = new_partition(kind, &vertices).unwrap();
        p.merge(4_000_000_000, 7).unwrap();
        assert_eq!(p.representative(7).unwrap(), 4_000_000_000);
        assert_eq!(p.sets().unwrap(), vec![vec![7, 4_000_000_000], vec![123_456_789]]);
    }
}

#[test]
fn test_freed_accelerated_partition_fails_loudly() {
    let mut p = new_partition(PartitionKind::Accelerated, &[1, 2]).unwrap();
    p.free();
    assert_eq!(p.merge(1, 2).unwrap_err().code(), ErrorCode::HandleClosed);
    assert_eq!(p.sets().unwrap_err().code(), ErrorCode::HandleClosed);
}

#[test]
fn test_merge_chunk_matches_pairwise_merge() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bucket.lz4");
    let pairs = [(1, 5), (2, 6), (5, 6), (7, 8)];
    let mut w = open_writer(Backend::Chunked, &path, 1 << 20, OpenMode::Create).unwrap();
    w.write(&records(&pairs)).unwrap();
    w.close().unwrap();
    let chunk = crate::compression::chunk_files(&path).unwrap().remove(0);

    let vertices: Vec<u32> = (1..=8).collect();
    for kind in KINDS {
        let mut expected = new_partition(kind, &vertices).unwrap();
        for &(x, y) in &pairs {
            expected.merge(x, y).unwrap();
        }
        let mut p = new_partition(kind, &vertices).unwrap();
        assert_eq!(p.merge_chunk(&chunk).unwrap(), 4);
        assert_eq!(p.sets().unwrap(), expected.sets().unwrap());
        for v in &vertices {
            assert_eq!(p.representative(*v).unwrap(), expected.representative(*v).unwrap());
        }
    }
}

#[test]
fn test_merge_chunk_rejects_bad_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("00000000.lz4");
    std::fs::write(&path, b"").unwrap();
    for kind in KINDS {
        let mut p = new_partition(kind, &[1, 2]).unwrap();
        assert_eq!(p.merge_chunk(&path).unwrap_err().code(), ErrorCode::CorruptedData);
    }

    let odd = lz4::block::compress(&[1, 0, 0, 0, 2], None, true).unwrap();
    std::fs::write(&path, odd).unwrap();
    for kind in KINDS {
        let mut p = new_partition(kind, &[1, 2]).unwrap();
        assert_eq!(p.merge_chunk(&path).unwrap_err().code(), ErrorCode::CorruptedData);
    }
}

#[test]
fn test_kind_names() {
    assert_eq!("accelerated".parse::<PartitionKind>().unwrap(), PartitionKind::Accelerated);
    assert_eq!(" Standard ".parse::<PartitionKind>().unwrap(), PartitionKind::Standard);
    assert!("quick".parse::<PartitionKind>().is_err());
    assert_eq!(serde_json::to_string(&PartitionKind::Accelerated).unwrap(), "\"accelerated\"");
}

/// Naive relabeling partition used as an oracle.
fn oracle_sets(n: u32, pairs: &[(u32, u32)]) -> Vec<Vec<u32>> {
    let mut label: Vec<u32> = (0..n).collect();
    for &(x, y) in pairs {
        let (lx, ly) = (label[x as usize], label[y as usize]);
        if lx != ly {
            for l in label.iter_mut() {
                if *l == ly {
                    *l = lx;
                }
            }
        }
    }
    let mut order: Vec<u32> = vec![];
    let mut sets: Vec<Vec<u32>> = vec![];
    for v in 0..n {
        let l = label[v as usize];
        match order.iter().position(|&o| o == l) {
            Some(i) => sets[i].push(v),
            None => {
                order.push(l);
                sets.push(vec![v]);
            }
        }
    }
    sets
}

fn merge_sequence() -> impl Strategy<Value = (u32, Vec<(u32, u32)>)> {
    (1u32..40).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..80)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Both variants agree with the oracle and with each other.
    #[test]
    fn prop_sets_match_oracle((n, pairs) in merge_sequence()) {
        let vertices: Vec<u32> = (0..n).collect();
        let mut standard = new_partition(PartitionKind::Standard, &vertices).unwrap();
        let mut accelerated = new_partition(PartitionKind::Accelerated, &vertices).unwrap();
        for &(x, y) in &pairs {
            standard.merge(x, y).unwrap();
            accelerated.merge(x, y).unwrap();
        }
        let expected = oracle_sets(n, &pairs);
        prop_assert_eq!(standard.sets().unwrap(), expected.clone());
        prop_assert_eq!(accelerated.sets().unwrap(), expected);
        for v in 0..n {
            prop_assert_eq!(standard.representative(v).unwrap(), accelerated.representative(v).unwrap());
        }
    }

    /// Representatives are shared across every chain of merges.
    #[test]
    fn prop_representative_is_transitive((n, pairs) in merge_sequence()) {
        let vertices: Vec<u32> = (0..n).collect();
        let mut p = new_partition(PartitionKind::Standard, &vertices).unwrap();
        for &(x, y) in &pairs {
            p.merge(x, y).unwrap();
            prop_assert_eq!(p.representative(x).unwrap(), p.representative(y).unwrap());
        }
        for &(x, y) in &pairs {
            prop_assert_eq!(p.representative(x).unwrap(), p.representative(y).unwrap());
        }
    }
}
