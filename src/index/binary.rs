//! Indexes over packed binary vectors.
//!
//! A parallel hierarchy to the float [`Index`](crate::index::Index) for
//! fixed-width bit-vectors: `d` is a multiple of 8, vectors are `d/8` packed
//! bytes, and search ranks by Hamming distance (smaller is closer). Only
//! asymmetric queries are supported; database-to-database search is out of
//! scope.

use crate::bits::hamming;
use crate::error::{IndexError, Result};
use crate::index::{IdSelector, MISSING_ID};
use crate::parallel;
use crate::selector::TopK;

/// Sentinel Hamming distance for unfilled result slots.
pub const MISSING_HAMMING: u32 = u32::MAX;

/// Byte used to fill reconstructions of missing hits.
pub const MISSING_CODE_BYTE: u8 = 0xFF;

/// k-NN output over binary codes: `nq` rows of `k` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySearchResult {
    pub k: usize,
    pub ids: Vec<i64>,
    pub distances: Vec<u32>,
}

impl BinarySearchResult {
    #[must_use]
    fn sentinel(nq: usize, k: usize) -> Self {
        Self {
            k,
            ids: vec![MISSING_ID; nq * k],
            distances: vec![MISSING_HAMMING; nq * k],
        }
    }

    /// Ids and distances of one query row.
    #[must_use]
    pub fn row(&self, q: usize) -> (&[i64], &[u32]) {
        let lo = q * self.k;
        let hi = lo + self.k;
        (&self.ids[lo..hi], &self.distances[lo..hi])
    }
}

/// Range search output over binary codes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinaryRangeResult {
    pub queries: Vec<Vec<(i64, u32)>>,
}

/// Polymorphic contract for binary indexes.
pub trait BinaryIndex: Send + Sync {
    /// Dimensionality in bits; always a multiple of 8.
    fn d(&self) -> usize;

    /// Bytes per stored code.
    fn code_size(&self) -> usize {
        self.d() / 8
    }

    fn ntotal(&self) -> usize;

    fn is_trained(&self) -> bool {
        true
    }

    /// Train on packed codes. Most binary indexes need none.
    fn train(&mut self, x: &[u8]) -> Result<()> {
        let _ = check_codes(self.code_size(), x)?;
        Ok(())
    }

    /// Append codes with sequential ids `ntotal..ntotal + n`.
    fn add(&mut self, x: &[u8]) -> Result<()>;

    /// k-NN by Hamming distance; rows pad with `-1` / `u32::MAX`.
    fn search(&self, x: &[u8], k: usize) -> Result<BinarySearchResult>;

    /// All codes with Hamming distance strictly below `radius`.
    fn range_search(&self, x: &[u8], radius: u32) -> Result<BinaryRangeResult> {
        let _ = (x, radius);
        Err(IndexError::UnsupportedOp("range_search"))
    }

    /// Nearest-neighbor ids only.
    fn assign(&self, x: &[u8], k: usize) -> Result<Vec<i64>> {
        Ok(self.search(x, k)?.ids)
    }

    /// Recover the stored code for `key`.
    fn reconstruct(&self, key: i64) -> Result<Vec<u8>> {
        let _ = key;
        Err(IndexError::UnsupportedOp("reconstruct"))
    }

    /// Search, then reconstruct each hit. Missing slots are filled with
    /// `0xFF` bytes.
    fn search_and_reconstruct(&self, x: &[u8], k: usize) -> Result<(BinarySearchResult, Vec<u8>)> {
        let result = self.search(x, k)?;
        let cs = self.code_size();
        let mut recons = vec![MISSING_CODE_BYTE; result.ids.len() * cs];
        for (slot, &id) in result.ids.iter().enumerate() {
            if id != MISSING_ID {
                let code = self.reconstruct(id)?;
                recons[slot * cs..(slot + 1) * cs].copy_from_slice(&code);
            }
        }
        Ok((result, recons))
    }

    fn reset(&mut self);

    fn remove_ids(&mut self, sel: &IdSelector) -> Result<usize> {
        let _ = sel;
        Err(IndexError::UnsupportedOp("remove_ids"))
    }
}

/// Validate a packed code batch, returning the batch size.
fn check_codes(code_size: usize, x: &[u8]) -> Result<usize> {
    if code_size == 0 || x.len() % code_size != 0 {
        return Err(IndexError::DimensionMismatch {
            expected: code_size,
            got: x.len(),
        });
    }
    Ok(x.len() / code_size)
}

/// Exact binary index: stores codes verbatim, scans all of them per query.
#[derive(Debug, Clone)]
pub struct BinaryFlatIndex {
    d: usize,
    codes: Vec<u8>,
    ntotal: usize,
    threads: usize,
}

impl BinaryFlatIndex {
    pub fn new(d: usize) -> Result<Self> {
        if d == 0 || d % 8 != 0 {
            return Err(IndexError::InvalidArgument(format!(
                "binary dimension must be a positive multiple of 8, got {d}"
            )));
        }
        Ok(Self {
            d,
            codes: Vec::new(),
            ntotal: 0,
            threads: parallel::default_threads(),
        })
    }

    #[inline]
    fn stored(&self, i: usize) -> &[u8] {
        let cs = self.code_size();
        &self.codes[i * cs..(i + 1) * cs]
    }
}

impl BinaryIndex for BinaryFlatIndex {
    fn d(&self) -> usize {
        self.d
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn add(&mut self, x: &[u8]) -> Result<()> {
        let n = check_codes(self.code_size(), x)?;
        self.codes.extend_from_slice(x);
        self.ntotal += n;
        Ok(())
    }

    fn search(&self, x: &[u8], k: usize) -> Result<BinarySearchResult> {
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be positive".to_string()));
        }
        let nq = check_codes(self.code_size(), x)?;
        let cs = self.code_size();
        let mut result = BinarySearchResult::sentinel(nq, k);
        let rows = parallel::parallel_map(nq, self.threads, |qi| {
            let q = &x[qi * cs..(qi + 1) * cs];
            let mut sel = TopK::new(k, false);
            for i in 0..self.ntotal {
                sel.push(i as i64, hamming(q, self.stored(i)) as f32);
            }
            sel.into_sorted()
        });
        for (qi, hits) in rows.iter().enumerate() {
            let lo = qi * k;
            for (slot, &(id, dist)) in hits.iter().enumerate() {
                result.ids[lo + slot] = id;
                result.distances[lo + slot] = dist as u32;
            }
        }
        Ok(result)
    }

    fn range_search(&self, x: &[u8], radius: u32) -> Result<BinaryRangeResult> {
        let nq = check_codes(self.code_size(), x)?;
        let cs = self.code_size();
        let queries = parallel::parallel_map(nq, self.threads, |qi| {
            let q = &x[qi * cs..(qi + 1) * cs];
            let mut hits = Vec::new();
            for i in 0..self.ntotal {
                let dist = hamming(q, self.stored(i));
                if dist < radius {
                    hits.push((i as i64, dist));
                }
            }
            hits
        });
        Ok(BinaryRangeResult { queries })
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<u8>> {
        let idx = usize::try_from(key).ok().filter(|&i| i < self.ntotal);
        match idx {
            Some(i) => Ok(self.stored(i).to_vec()),
            None => Err(IndexError::InvalidArgument(format!(
                "key {key} out of range 0..{}",
                self.ntotal
            ))),
        }
    }

    fn reset(&mut self) {
        self.codes.clear();
        self.ntotal = 0;
    }

    fn remove_ids(&mut self, sel: &IdSelector) -> Result<usize> {
        let cs = self.code_size();
        let before = self.ntotal;
        let mut write = 0usize;
        for read in 0..before {
            if !sel.contains(read as i64) {
                if write != read {
                    let (dst, src) = self.codes.split_at_mut(read * cs);
                    dst[write * cs..(write + 1) * cs].copy_from_slice(&src[..cs]);
                }
                write += 1;
            }
        }
        self.codes.truncate(write * cs);
        self.ntotal = write;
        Ok(before - write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_search_over_64_bits() {
        let mut index = BinaryFlatIndex::new(64).unwrap();
        index.add(&[0x00; 8]).unwrap();
        index.add(&[0xFF; 8]).unwrap();
        let r = index.search(&[0x00; 8], 2).unwrap();
        assert_eq!(r.row(0), (&[0i64, 1][..], &[0u32, 64][..]));
    }

    #[test]
    fn padding_uses_sentinels() {
        let mut index = BinaryFlatIndex::new(8).unwrap();
        index.add(&[0b1010_1010]).unwrap();
        let r = index.search(&[0x00], 3).unwrap();
        let (ids, dists) = r.row(0);
        assert_eq!(ids, &[0, MISSING_ID, MISSING_ID]);
        assert_eq!(dists, &[4, MISSING_HAMMING, MISSING_HAMMING]);
    }

    #[test]
    fn search_and_reconstruct_fills_missing_with_ff() {
        let mut index = BinaryFlatIndex::new(16).unwrap();
        index.add(&[0x12, 0x34]).unwrap();
        let (result, recons) = index.search_and_reconstruct(&[0x12, 0x34], 2).unwrap();
        assert_eq!(result.row(0).0, &[0, MISSING_ID]);
        assert_eq!(&recons[..2], &[0x12, 0x34]);
        assert_eq!(&recons[2..], &[MISSING_CODE_BYTE, MISSING_CODE_BYTE]);
    }

    #[test]
    fn range_search_is_strict() {
        let mut index = BinaryFlatIndex::new(8).unwrap();
        index.add(&[0x00, 0x01, 0x03]).unwrap();
        // Distances from 0x00: [0, 1, 2]; radius 2 keeps the first two.
        let r = index.range_search(&[0x00], 2).unwrap();
        assert_eq!(r.queries[0], vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn assign_matches_search_ids() {
        let mut index = BinaryFlatIndex::new(8).unwrap();
        index.add(&[0x0F, 0xF0, 0xFF]).unwrap();
        let ids = index.assign(&[0x0F], 2).unwrap();
        assert_eq!(ids, index.search(&[0x0F], 2).unwrap().ids);
    }

    #[test]
    fn remove_ids_renumbers_positions() {
        let mut index = BinaryFlatIndex::new(8).unwrap();
        index.add(&[0x01, 0x02, 0x04]).unwrap();
        let removed = index.remove_ids(&IdSelector::from_ids(&[0])).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.ntotal(), 2);
        assert_eq!(index.reconstruct(0).unwrap(), vec![0x02]);
        assert_eq!(index.reconstruct(1).unwrap(), vec![0x04]);
    }

    #[test]
    fn odd_dimension_is_rejected() {
        assert!(BinaryFlatIndex::new(12).is_err());
        assert!(BinaryFlatIndex::new(0).is_err());
    }

    #[test]
    fn ties_break_toward_smaller_id() {
        let mut index = BinaryFlatIndex::new(8).unwrap();
        // ids 0 and 1 are both at Hamming distance 1 from the query.
        index.add(&[0b0000_0001, 0b0000_0010, 0b1111_1111]).unwrap();
        let r = index.search(&[0x00], 2).unwrap();
        assert_eq!(r.row(0).0, &[0, 1]);
    }
}
