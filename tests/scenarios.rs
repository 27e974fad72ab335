//! End-to-end scenarios exercising each index family on small fixtures with
//! hand-checkable answers, plus the quantizer quality relationships on
//! synthetic Gaussian-like data.

use proxima::{
    BinaryFlatIndex, BinaryIndex, Encoder, FlatIndex, Index, IvfIndex, LocalSearchQuantizer,
    LshIndex, Metric, ResidualQuantizer, SearchType,
};

/// Deterministic pseudo-Gaussian data via a mixed congruential stream.
fn gaussian_data(n: usize, d: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f32) / (u32::MAX >> 1) as f32
    };
    let mut out = Vec::with_capacity(n * d);
    for _ in 0..n * d {
        // Sum of uniforms approximates a Gaussian well enough for fixtures.
        let g = next() + next() + next() + next() - 2.0;
        out.push(g);
    }
    out
}

#[test]
fn flat_l2_small_fixture() {
    let mut index = FlatIndex::new(4, Metric::L2).unwrap();
    index
        .add(&[
            0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            2.0, 2.0, 2.0, 2.0,
        ])
        .unwrap();
    let r = index.search(&[0.0, 0.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(r.row(0).0, &[0, 1]);
    assert_eq!(r.row(0).1, &[0.0, 1.0]);
}

#[test]
fn flat_inner_product_tie_breaks_to_smaller_id() {
    let mut index = FlatIndex::new(4, Metric::InnerProduct).unwrap();
    index
        .add(&[
            0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            2.0, 2.0, 2.0, 2.0,
        ])
        .unwrap();
    let r = index.search(&[1.0, 0.0, 0.0, 0.0], 3).unwrap();
    // Ids 0 and 2 tie at score 0; the smaller id takes the last slot.
    assert_eq!(r.row(0).0, &[3, 1, 0]);
    assert_eq!(r.row(0).1, &[2.0, 1.0, 0.0]);
}

#[test]
fn lsh_identical_and_negated_queries() {
    let mut index = LshIndex::new(8, 8, false, false).unwrap();
    let v = [1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0];
    index.add(&v).unwrap();

    let same = index.search(&v, 1).unwrap();
    assert_eq!(same.row(0).0, &[0]);
    assert_eq!(same.row(0).1, &[0.0]);

    let negated: Vec<f32> = v.iter().map(|x| -x).collect();
    let far = index.search(&negated, 1).unwrap();
    assert_eq!(far.row(0).1, &[8.0]);
}

#[test]
fn residual_quantizer_generalizes_to_held_out_data() {
    let d = 16;
    let train = gaussian_data(3000, d, 0xA11CE);
    let held_out = gaussian_data(500, d, 0xB0B);

    let mut rq = ResidualQuantizer::new(d, 4, 5, SearchType::Decompress)
        .unwrap()
        .with_seed(42)
        .with_beam_size(2)
        .with_kmeans_iters(8);
    rq.train(&train).unwrap();

    let codes = rq.encode(&held_out).unwrap();
    let recon = rq.decode(&codes).unwrap();
    let held_mean: f32 = held_out
        .iter()
        .zip(recon.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        / 500.0;

    let train_mean = rq.train_loss();
    assert!(
        held_mean <= train_mean * 1.2,
        "held-out error {held_mean} vs training loss {train_mean}"
    );
    // And quantization must actually compress information: beat the
    // zero-vector baseline.
    let baseline: f32 = held_out.chunks_exact(d).map(|v| v.iter().map(|x| x * x).sum::<f32>()).sum::<f32>() / 500.0;
    assert!(held_mean < baseline * 0.7);
}

#[test]
fn lsq_training_loss_beats_rq_on_the_same_data() {
    let d = 8;
    let train = gaussian_data(1000, d, 0x5EED);

    let mut rq = ResidualQuantizer::new(d, 4, 4, SearchType::Decompress)
        .unwrap()
        .with_seed(7)
        .with_beam_size(2)
        .with_kmeans_iters(8);
    rq.train(&train).unwrap();

    let mut lsq = LocalSearchQuantizer::new(d, 4, 4, SearchType::Decompress)
        .unwrap()
        .with_seed(7)
        .with_train_iters(12)
        .with_ils_iters(3, 8)
        .with_icm_iters(3);
    lsq.train(&train).unwrap();

    assert!(
        lsq.train_loss() < rq.train_loss(),
        "LSQ loss {} should beat RQ loss {}",
        lsq.train_loss(),
        rq.train_loss()
    );
}

#[test]
fn ivf_with_full_probe_equals_flat_for_every_query() {
    let d = 32;
    let n = 2000;
    let data = gaussian_data(n, d, 0xF1A7);

    let coarse = Box::new(FlatIndex::new(d, Metric::L2).unwrap());
    let mut ivf = IvfIndex::new(coarse, None, 16, false)
        .unwrap()
        .with_seed(3);
    ivf.train(&data).unwrap();
    ivf.add(&data).unwrap();
    ivf.set_nprobe(16).unwrap();

    let mut flat = FlatIndex::new(d, Metric::L2).unwrap();
    flat.add(&data).unwrap();

    let queries = &data[..d * 25];
    let got = ivf.search(queries, 10).unwrap();
    let want = flat.search(queries, 10).unwrap();
    assert_eq!(got.ids, want.ids);
}

#[test]
fn binary_hamming_fixture() {
    let mut index = BinaryFlatIndex::new(64).unwrap();
    index.add(&[0x00; 8]).unwrap();
    index.add(&[0xFF; 8]).unwrap();

    let r = index.search(&[0x00; 8], 2).unwrap();
    assert_eq!(r.row(0).0, &[0, 1]);
    assert_eq!(r.row(0).1, &[0, 64]);
}
