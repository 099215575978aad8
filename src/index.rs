//! Size-class mapping and bitmap scan primitives.
//!
//! A block size maps to a (first-level, second-level) bucket pair: the
//! first level is the position of the size's top bit, the second level the
//! four bits just below it. The mapping is monotonic for sizes at or above
//! `2^MIN_SIZE_INDEX`, which is what lets the occupancy-bitmap scan return
//! a bucket whose blocks are always large enough.

/// Sizes below `2^MIN_SIZE_INDEX` collapse onto first-level class 0.
pub(crate) const MIN_SIZE_INDEX: u32 = 4;

/// Second-level subdivision: 4 bits, 16 linearly spaced buckets per class.
pub(crate) const SL_BITS: u32 = 4;
pub(crate) const SL_BUCKETS: usize = 1 << SL_BITS;

/// Upper bound on first-level classes across all widths; sizes the
/// fixed-size diagnostics snapshot.
pub(crate) const MAX_CLASSES: usize = 64;

#[inline(always)]
pub(crate) const fn floor_log2(value: usize) -> u32 {
  usize::BITS - 1 - value.leading_zeros()
}

/// First-level classes needed to index sizes up to `padded`.
pub(crate) const fn class_count(padded: usize) -> usize {
  (floor_log2(padded) - MIN_SIZE_INDEX + 1) as usize
}

/// Maps a block size to its `(fl, sl)` bucket pair.
pub(crate) fn mapping(size: usize) -> (usize, usize) {
  debug_assert!(size >= 1 << MIN_SIZE_INDEX);
  let fl_raw = floor_log2(size);
  let fl = (fl_raw - MIN_SIZE_INDEX) as usize;
  let sl = (size >> (fl_raw - SL_BITS)) & (SL_BUCKETS - 1);
  (fl, sl)
}

#[inline(always)]
pub(crate) const fn flat(fl: usize, sl: usize) -> usize {
  fl * SL_BUCKETS + sl
}

/// Lowest set bit of `word` at or above `from`, via a trailing-zeros scan.
#[inline]
pub(crate) fn scan_from(word: u64, from: u32) -> Option<u32> {
  if from >= u64::BITS {
    return None;
  }
  let masked = word & (u64::MAX << from);
  if masked == 0 {
    None
  } else {
    Some(masked.trailing_zeros())
  }
}
