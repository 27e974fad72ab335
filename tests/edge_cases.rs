//! Edge case tests for proxima.
//!
//! Unusual inputs and boundary conditions: empty indexes, oversized k,
//! lifecycle transitions, argument validation, and the long tail of metrics.

use proxima::{
    BinaryFlatIndex, BinaryIndex, FlatIndex, IdSelector, Index, IvfIndex, LshIndex, Metric,
    MISSING_ID,
};

// =============================================================================
// Empty and tiny indexes
// =============================================================================

#[test]
fn searching_an_empty_flat_index_returns_only_sentinels() {
    let index = FlatIndex::new(8, Metric::L2).unwrap();
    let r = index.search(&[0.0; 8], 3).unwrap();
    assert_eq!(r.ids, vec![MISSING_ID; 3]);
    assert_eq!(r.distances, vec![f32::INFINITY; 3]);
}

#[test]
fn searching_an_empty_binary_index_returns_only_sentinels() {
    let index = BinaryFlatIndex::new(16).unwrap();
    let r = index.search(&[0x00, 0x00], 2).unwrap();
    assert_eq!(r.ids, vec![MISSING_ID; 2]);
    assert_eq!(r.distances, vec![u32::MAX; 2]);
}

#[test]
fn single_vector_index_handles_any_k() {
    let mut index = FlatIndex::new(2, Metric::L2).unwrap();
    index.add(&[1.0, 2.0]).unwrap();
    for k in [1usize, 2, 10] {
        let r = index.search(&[1.0, 2.0], k).unwrap();
        assert_eq!(r.row(0).0[0], 0);
        assert!(r.row(0).0[1..].iter().all(|&id| id == MISSING_ID));
    }
}

// =============================================================================
// Lifecycle: reset, re-add, id numbering
// =============================================================================

#[test]
fn reset_restarts_sequential_ids_at_zero() {
    let mut index = FlatIndex::new(2, Metric::L2).unwrap();
    index.add(&[0.0, 0.0, 5.0, 5.0]).unwrap();
    index.reset();
    assert_eq!(index.ntotal(), 0);
    index.add(&[9.0, 9.0]).unwrap();
    let r = index.search(&[9.0, 9.0], 1).unwrap();
    assert_eq!(r.row(0).0, &[0]);
}

#[test]
fn flat_refuses_external_ids() {
    let mut index = FlatIndex::new(2, Metric::L2).unwrap();
    let err = index.add_with_ids(&[1.0, 1.0], &[42]).unwrap_err();
    assert_eq!(err.code(), "unsupported_op");
}

#[test]
fn lsh_reconstruct_is_unsupported() {
    let mut index = LshIndex::new(8, 8, false, false).unwrap();
    index.add(&[1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]).unwrap();
    assert_eq!(index.reconstruct(0).unwrap_err().code(), "unsupported_op");
}

// =============================================================================
// Argument validation
// =============================================================================

#[test]
fn zero_k_is_rejected_everywhere() {
    let mut flat = FlatIndex::new(2, Metric::L2).unwrap();
    flat.add(&[0.0, 0.0]).unwrap();
    assert_eq!(flat.search(&[0.0, 0.0], 0).unwrap_err().code(), "invalid_argument");

    let mut bin = BinaryFlatIndex::new(8).unwrap();
    bin.add(&[0u8]).unwrap();
    assert_eq!(bin.search(&[0u8], 0).unwrap_err().code(), "invalid_argument");
}

#[test]
fn ragged_batches_are_dimension_mismatches() {
    let mut index = FlatIndex::new(3, Metric::L2).unwrap();
    assert_eq!(index.add(&[1.0; 7]).unwrap_err().code(), "dimension_mismatch");
    index.add(&[1.0; 6]).unwrap();
    assert_eq!(
        index.search(&[1.0; 4], 1).unwrap_err().code(),
        "dimension_mismatch"
    );
}

#[test]
fn ivf_requires_l2_or_inner_product() {
    let coarse = Box::new(FlatIndex::new(4, Metric::L1).unwrap());
    let err = IvfIndex::new(coarse, None, 2, false).unwrap_err();
    assert_eq!(err.code(), "invalid_argument");
}

// =============================================================================
// Range search orientation
// =============================================================================

#[test]
fn range_search_uses_strict_comparison_in_both_directions() {
    let mut l2 = FlatIndex::new(2, Metric::L2).unwrap();
    l2.add(&[0.0, 0.0, 1.0, 0.0, 2.0, 0.0]).unwrap();
    // Distances from origin: [0, 1, 4]. Strictly below 1.0 keeps only id 0.
    let r = l2.range_search(&[0.0, 0.0], 1.0).unwrap();
    assert_eq!(r.queries[0].len(), 1);
    assert_eq!(r.queries[0][0].0, 0);

    let mut ip = FlatIndex::new(2, Metric::InnerProduct).unwrap();
    ip.add(&[0.0, 0.0, 1.0, 0.0, 2.0, 0.0]).unwrap();
    // Scores for query (1,0): [0, 1, 2]. Strictly above 1.0 keeps only id 2.
    let r = ip.range_search(&[1.0, 0.0], 1.0).unwrap();
    assert_eq!(r.queries[0].len(), 1);
    assert_eq!(r.queries[0][0].0, 2);
}

// =============================================================================
// The long tail of metrics
// =============================================================================

#[test]
fn every_metric_ranks_a_vector_closest_to_itself() {
    // Non-negative data keeps the divergence-style metrics well defined.
    let rows: [[f32; 4]; 3] = [
        [0.1, 0.4, 0.2, 0.3],
        [0.7, 0.1, 0.1, 0.1],
        [0.25, 0.25, 0.25, 0.25],
    ];
    let metrics = [
        Metric::L2,
        Metric::L1,
        Metric::Linf,
        Metric::Lp(3.0),
        Metric::Canberra,
        Metric::BrayCurtis,
        Metric::JensenShannon,
        Metric::Jaccard,
    ];
    for metric in metrics {
        let mut index = FlatIndex::new(4, metric).unwrap();
        for row in &rows {
            index.add(row).unwrap();
        }
        for (i, row) in rows.iter().enumerate() {
            let r = index.search(row, 1).unwrap();
            assert_eq!(r.row(0).0, &[i as i64], "metric {metric:?}");
        }
    }
}

#[test]
fn remove_then_search_sees_survivors_only() {
    let mut index = FlatIndex::new(2, Metric::L2).unwrap();
    index
        .add(&[0.0, 0.0, 10.0, 0.0, 20.0, 0.0, 30.0, 0.0])
        .unwrap();
    index.remove_ids(&IdSelector::from_ids(&[0, 2])).unwrap();
    assert_eq!(index.ntotal(), 2);

    // Survivors (10,0) and (30,0) renumber to 0 and 1.
    let r = index.search(&[30.0, 0.0], 2).unwrap();
    assert_eq!(r.row(0).0, &[1, 0]);
}

// =============================================================================
// Batch behavior
// =============================================================================

#[test]
fn multi_query_batches_are_independent() {
    let mut index = FlatIndex::new(2, Metric::L2).unwrap();
    index.add(&[0.0, 0.0, 100.0, 100.0]).unwrap();

    let batch = index.search(&[0.0, 0.0, 100.0, 100.0], 1).unwrap();
    assert_eq!(batch.row(0).0, &[0]);
    assert_eq!(batch.row(1).0, &[1]);
}

#[test]
fn binary_assign_and_reconstruct_compose() {
    let mut index = BinaryFlatIndex::new(8).unwrap();
    index.add(&[0b0000_1111, 0b1111_0000]).unwrap();
    let (result, recons) = index.search_and_reconstruct(&[0b0000_1110], 1).unwrap();
    assert_eq!(result.row(0).0, &[0]);
    assert_eq!(recons, vec![0b0000_1111]);
}
