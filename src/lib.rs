//! proxima: exact and approximate nearest-neighbor search primitives.
//!
//! Indexes over dense `f32` vectors and packed binary codes, built from three
//! composable layers:
//!
//! - **Exact**: [`index::flat::FlatIndex`] (brute force, every metric) and
//!   [`index::binary::BinaryFlatIndex`] (Hamming over packed bits).
//! - **Hash-based**: [`index::lsh::LshIndex`], sign-bit codes with optional
//!   random rotation and trained thresholds.
//! - **Partition + compression**: [`index::ivf::IvfIndex`] routes vectors to
//!   inverted lists through a coarse quantizer and stores codes from any
//!   [`quant::Encoder`]: raw floats, a residual quantizer
//!   ([`quant::rq::ResidualQuantizer`]), a local-search quantizer
//!   ([`quant::lsq::LocalSearchQuantizer`]), or their product variants
//!   ([`quant::product`]).
//!
//! # Which index should I use?
//!
//! | Situation | Recommendation |
//! |-----------|----------------|
//! | Small database, exact answers | [`index::flat::FlatIndex`] |
//! | Binary fingerprints | [`index::binary::BinaryFlatIndex`] |
//! | Cheap approximate filter | [`index::lsh::LshIndex`] |
//! | Large database, bounded memory | [`index::ivf::IvfIndex`] + additive codes |
//!
//! # Contracts worth knowing
//!
//! - Results are padded with id `-1` and the metric's worst distance when
//!   fewer than `k` hits exist; ties always break toward the smaller id.
//! - Indexes are born untrained unless stated otherwise; `add` and `search`
//!   on an untrained index fail with `NotTrained` rather than guessing.
//! - For a fixed seed, training and search are reproducible at any worker
//!   count: parallel reductions merge in shard order.

pub mod bits;
pub mod error;
pub mod index;
pub mod kmeans;
pub mod linalg;
pub mod metric;
pub mod observer;
pub mod parallel;
pub mod quant;
pub mod rotation;
pub mod selector;

pub use error::{IndexError, Result};
pub use index::binary::{BinaryFlatIndex, BinaryIndex};
pub use index::flat::FlatIndex;
pub use index::ivf::IvfIndex;
pub use index::lsh::LshIndex;
pub use index::{IdSelector, Index, RangeResult, SearchResult, MISSING_ID};
pub use metric::Metric;
pub use observer::{NoopObserver, TrainingObserver};
pub use quant::aq::{AdditiveQuantizer, SearchType};
pub use quant::lsq::LocalSearchQuantizer;
pub use quant::product::{
    ProductAdditiveQuantizer, ProductLocalSearchQuantizer, ProductResidualQuantizer,
};
pub use quant::rq::ResidualQuantizer;
pub use quant::{CodeScorer, Encoder};
pub use selector::TopK;
