//! Two-Level Segregated Fit allocator over a fixed arena.
//!
//! One contiguous reservation holds, in order: the padded arena (user
//! capacity plus one header and one footer), the free-list head table
//! (`class_count * SL_BUCKETS` slots) and the second-level bitmap table
//! (one 16-bit mask per first-level class). A machine-word first-level
//! bitmask lives in the allocator struct itself.
//!
//! `allocate` and `deallocate` are O(1): a bounded bit scan plus a list
//! splice. The structure is single-threaded; wrap it in
//! [`LockedTlsf`](crate::sync::LockedTlsf) to share it.

use core::{
  marker::PhantomData,
  ptr::NonNull,
};

use getset::CopyGetters;
use segfit_sys::{
  extent::{
    Extent,
    ExtentError,
  },
  system::{
    SysError,
    SysOption,
  },
};

use crate::{
  block::{
    self,
    Block,
    FreeNode,
    Header,
    NIL,
    min_block_size,
  },
  index::{
    self,
    MAX_CLASSES,
    SL_BUCKETS,
  },
  width::IndexWidth,
};

#[derive(Debug)]
pub enum TlsfError {
  ZeroCapacity,
  BelowMinimum { requested: usize, minimum: usize },
  Overflow,
  SystemError(SysError),
}

pub type TlsfResult<T> = Result<T, TlsfError>;

/// Point-in-time copy of the occupancy bitmaps, for tests and debugging.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters)]
pub struct IndexSnapshot {
  #[getset(get_copy = "pub")]
  fl_bitmask: u64,
  #[getset(get_copy = "pub")]
  class_count: usize,
  sl_bitmasks: [u16; MAX_CLASSES],
}

impl IndexSnapshot {
  pub fn sl_bitmask(&self, fl: usize) -> u16 {
    self.sl_bitmasks[fl]
  }
}

pub struct Tlsf<W: IndexWidth> {
  extent: Extent,
  /// User capacity; zero marks a permanently inert allocator.
  capacity: usize,
  /// Capacity plus one header and one footer; every byte of `[0, padded)`
  /// belongs to exactly one block.
  padded: usize,
  /// Exact sum of free blocks' total sizes.
  free_bytes: usize,
  fl_bitmask: u64,
  class_count: usize,
  heads_off: usize,
  sl_off: usize,
  _width: PhantomData<W>,
}

impl<W: IndexWidth> core::fmt::Debug for Tlsf<W> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Tlsf")
      .field("capacity", &self.capacity)
      .field("padded", &self.padded)
      .field("free_bytes", &self.free_bytes)
      .field("fl_bitmask", &self.fl_bitmask)
      .finish()
  }
}

impl<W: IndexWidth> Tlsf<W> {
  const OVERHEAD: usize = 2 * W::BYTES;

  /// Builds an allocator over a fresh reservation of `capacity` usable
  /// bytes, or reports why the capacity is unusable.
  pub fn try_new(capacity: usize) -> TlsfResult<Self> {
    if capacity == 0 {
      return Err(TlsfError::ZeroCapacity);
    }
    let minimum = min_block_size::<W>() - Self::OVERHEAD;
    if capacity < minimum {
      return Err(TlsfError::BelowMinimum {
        requested: capacity,
        minimum,
      });
    }

    let padded = capacity.checked_add(Self::OVERHEAD).ok_or(TlsfError::Overflow)?;
    if padded as u64 > W::MAX_ENCODABLE {
      return Err(TlsfError::Overflow);
    }

    let class_count = index::class_count(padded);
    let heads_off = padded;
    let heads_bytes = class_count
      .checked_mul(SL_BUCKETS * W::BYTES)
      .ok_or(TlsfError::Overflow)?;
    let sl_off = heads_off.checked_add(heads_bytes).ok_or(TlsfError::Overflow)?;
    let total = sl_off
      .checked_add(class_count * 2)
      .ok_or(TlsfError::Overflow)?;

    let extent = Extent::new(total, SysOption::Commit).map_err(|err| match err {
      ExtentError::SystemError(sys) => TlsfError::SystemError(sys),
      ExtentError::PrimError(_) => TlsfError::Overflow,
    })?;

    let mut tlsf = Self {
      extent,
      capacity,
      padded,
      free_bytes: 0,
      fl_bitmask: 0,
      class_count,
      heads_off,
      sl_off,
      _width: PhantomData,
    };

    for flat in 0..class_count * SL_BUCKETS {
      tlsf.set_head(flat, NIL);
    }
    for fl in 0..class_count {
      tlsf.set_sl_word(fl, 0);
    }

    // the whole padded arena starts life as a single free block
    tlsf.insert_free(0, padded, false);
    tlsf.free_bytes = padded;

    Ok(tlsf)
  }

  /// Infallible constructor: a degenerate capacity (zero, below the
  /// minimum block, or overflowing the index width) yields a permanently
  /// inert allocator whose every `allocate` call fails.
  pub fn new(capacity: usize) -> Self {
    Self::try_new(capacity).unwrap_or_else(|_| Self::inert())
  }

  fn inert() -> Self {
    Self {
      extent: Extent::empty(),
      capacity: 0,
      padded: 0,
      free_bytes: 0,
      fl_bitmask: 0,
      class_count: 0,
      heads_off: 0,
      sl_off: 0,
      _width: PhantomData,
    }
  }

  /// Usable capacity requested at construction; zero for an inert
  /// allocator.
  #[inline(always)]
  pub const fn capacity(&self) -> usize {
    self.capacity
  }

  /// Padded arena size: capacity plus one header and one footer.
  #[inline(always)]
  pub const fn total_size(&self) -> usize {
    self.padded
  }

  /// Exact sum of free blocks' total sizes, block overhead included.
  #[inline(always)]
  pub const fn free_bytes(&self) -> usize {
    self.free_bytes
  }

  /// Bytes still available to a single request, net of the header and
  /// footer every block carries.
  #[inline(always)]
  pub const fn bytes_remaining(&self) -> usize {
    self.free_bytes.saturating_sub(Self::OVERHEAD)
  }

  /// Raw first-level occupancy bitmask. Diagnostics only.
  #[inline(always)]
  pub const fn fl_bitmask(&self) -> u64 {
    self.fl_bitmask
  }

  /// Raw second-level occupancy bitmask for class `fl`. Diagnostics only.
  pub fn sl_bitmask(&self, fl: usize) -> u16 {
    self.sl_word(fl)
  }

  /// Head block offset of bucket `(fl, sl)`, if any. Diagnostics only.
  pub fn bucket_head(&self, fl: usize, sl: usize) -> Option<usize> {
    let head = self.head(index::flat(fl, sl));
    (head != NIL).then_some(head)
  }

  pub fn index_snapshot(&self) -> IndexSnapshot {
    let mut sl_bitmasks = [0u16; MAX_CLASSES];
    for fl in 0..self.class_count {
      sl_bitmasks[fl] = self.sl_word(fl);
    }
    IndexSnapshot {
      fl_bitmask: self.fl_bitmask,
      class_count: self.class_count,
      sl_bitmasks,
    }
  }

  /// Allocates `size` payload bytes out of the arena.
  ///
  /// Returns `None` without mutating any state when the allocator is
  /// inert, `size` is zero, padding the request overflows the index
  /// width, the request is below the minimum block size, or no
  /// sufficiently large free block exists.
  pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
    if self.capacity == 0 || size == 0 {
      return None;
    }

    let required = size.checked_add(Self::OVERHEAD)?;
    if required as u64 > W::MAX_ENCODABLE
      || required < min_block_size::<W>()
      || required > self.bytes_remaining()
    {
      return None;
    }

    let (fl, sl) = self.find_bucket(required)?;
    let off = self.head(index::flat(fl, sl));
    if off == NIL {
      panic!("free-list bucket ({fl}, {sl}) empty despite occupancy bitmap");
    }

    let old = block::read_header::<W>(self.arena(), off);
    self.remove_free(off, old.size);

    // a remainder too small to host a free block is folded into the
    // allocation instead of being stranded
    let final_size = if old.size - required < min_block_size::<W>() {
      old.size
    } else {
      required
    };

    if final_size < old.size {
      self.insert_free(off + final_size, old.size - final_size, false);
    } else if let Some(next) = block::next_header_off(off, final_size, self.padded) {
      let mut header = block::read_header::<W>(self.arena(), next);
      header.prev_free = false;
      block::write_header::<W>(self.arena_mut(), next, header);
    }

    let header = Header {
      size: final_size,
      free: false,
      prev_free: old.prev_free,
    };
    block::write_header::<W>(self.arena_mut(), off, header);
    block::write_footer::<W>(self.arena_mut(), off, final_size);
    self.free_bytes -= final_size;

    #[cfg(feature = "tracing")]
    tracing::debug!(size, off, total = final_size, "allocate");

    let payload = block::payload_off::<W>(off);
    NonNull::new(self.arena_mut()[payload..].as_mut_ptr())
  }

  /// Returns a block to the free state, coalescing with free neighbors,
  /// and clears the caller's handle.
  ///
  /// A `None` handle, a pointer outside the arena, a pointer to an
  /// already-free block, or a pointer whose surrounding metadata does not
  /// describe a live block is tolerated as a no-op.
  pub fn deallocate(&mut self, handle: &mut Option<NonNull<u8>>) {
    let Some(ptr) = *handle else {
      return;
    };
    if self.capacity == 0 {
      return;
    }

    let base = self.arena().as_ptr() as usize;
    let Some(payload) = (ptr.as_ptr() as usize).checked_sub(base) else {
      return;
    };
    if payload < W::BYTES || payload >= self.padded {
      return;
    }

    let off = payload - W::BYTES;
    let header = block::read_header::<W>(self.arena(), off);
    if header.free {
      // best-effort double-free defense
      return;
    }
    if header.size < min_block_size::<W>() || off + header.size > self.padded {
      // not a block this allocator handed out
      return;
    }
    let freed = header.size;

    // a live block is flanked by consistent metadata on both sides;
    // anything that fails these checks is a forged pointer and nothing is
    // touched
    let prev = if off == 0 {
      None
    } else {
      let Some((prev_off, prev_size)) = block::prev_header_off::<W>(self.arena(), off) else {
        return;
      };
      let prev_header = block::read_header::<W>(self.arena(), prev_off);
      if prev_header.size != prev_size {
        return;
      }
      prev_header.free.then_some((prev_off, prev_size))
    };

    let next = match block::next_header_off(off, freed, self.padded) {
      Some(next_off) => {
        let next_header = block::read_header::<W>(self.arena(), next_off);
        if next_header.free {
          if next_header.size < min_block_size::<W>()
            || next_off + next_header.size > self.padded
            || block::read_footer::<W>(self.arena(), next_off, next_header.size)
              != next_header.size
          {
            return;
          }
          Some((next_off, next_header.size))
        } else {
          None
        }
      }
      None => None,
    };

    let mut merged_off = off;
    let mut merged_size = freed;
    if let Some((prev_off, prev_size)) = prev {
      self.remove_free(prev_off, prev_size);
      merged_off = prev_off;
      merged_size += prev_size;
    }
    if let Some((next_off, next_size)) = next {
      self.remove_free(next_off, next_size);
      merged_size += next_size;
    }

    // after coalescing, the merged block's predecessor is allocated or
    // absent
    self.insert_free(merged_off, merged_size, false);

    if let Some(next_off) = block::next_header_off(merged_off, merged_size, self.padded) {
      let mut next = block::read_header::<W>(self.arena(), next_off);
      next.prev_free = true;
      block::write_header::<W>(self.arena_mut(), next_off, next);
    }

    self.free_bytes += freed;
    *handle = None;

    #[cfg(feature = "tracing")]
    tracing::debug!(off, freed, merged = merged_size, "deallocate");
  }

  /// Good-fit search: the request's own bucket if its head actually
  /// covers the request, otherwise the next non-empty bucket above it.
  fn find_bucket(&self, required: usize) -> Option<(usize, usize)> {
    let (fl, sl) = index::mapping(required);
    let head = self.head(index::flat(fl, sl));
    if head != NIL {
      match Block::read::<W>(self.arena(), head) {
        Block::Free { size, .. } if size >= required => return Some((fl, sl)),
        Block::Free { .. } => {}
        Block::Allocated { .. } => {
          panic!("allocated block {head} at the head of a free list")
        }
      }
    }
    self.next_occupied(fl, sl)
  }

  /// Lowest-indexed non-empty bucket strictly above `(fl, sl)`.
  fn next_occupied(&self, fl: usize, sl: usize) -> Option<(usize, usize)> {
    if let Some(found) = index::scan_from(self.sl_word(fl) as u64, sl as u32 + 1) {
      return Some((fl, found as usize));
    }
    let next_fl = index::scan_from(self.fl_bitmask, fl as u32 + 1)? as usize;
    let word = self.sl_word(next_fl);
    if word == 0 {
      panic!("first-level bit {next_fl} set over an empty second-level mask");
    }
    Some((next_fl, word.trailing_zeros() as usize))
  }

  /// Writes a free block at `off` and links it into its bucket.
  fn insert_free(&mut self, off: usize, size: usize, prev_free: bool) {
    let header = Header {
      size,
      free: true,
      prev_free,
    };
    block::write_header::<W>(self.arena_mut(), off, header);
    block::write_footer::<W>(self.arena_mut(), off, size);

    let (fl, sl) = index::mapping(size);
    let flat = index::flat(fl, sl);
    let old_head = self.head(flat);
    block::write_node::<W>(
      self.arena_mut(),
      off,
      FreeNode {
        next: old_head,
        prev: NIL,
      },
    );
    if old_head != NIL {
      let mut node = block::read_node::<W>(self.arena(), old_head);
      node.prev = off;
      block::write_node::<W>(self.arena_mut(), old_head, node);
    }
    self.set_head(flat, off);
    self.set_sl_word(fl, self.sl_word(fl) | 1 << sl);
    self.fl_bitmask |= 1 << fl;
  }

  /// Unlinks the free block at `off` from its bucket, clearing bitmap
  /// bits when the bucket empties.
  fn remove_free(&mut self, off: usize, size: usize) {
    let node = block::read_node::<W>(self.arena(), off);
    let (fl, sl) = index::mapping(size);
    let flat = index::flat(fl, sl);

    if node.prev == NIL {
      if self.head(flat) != off {
        panic!("free block at {off} not at the head of bucket ({fl}, {sl})");
      }
      self.set_head(flat, node.next);
    } else {
      let mut prev = block::read_node::<W>(self.arena(), node.prev);
      prev.next = node.next;
      block::write_node::<W>(self.arena_mut(), node.prev, prev);
    }

    if node.next != NIL {
      let mut next = block::read_node::<W>(self.arena(), node.next);
      next.prev = node.prev;
      block::write_node::<W>(self.arena_mut(), node.next, next);
    }

    if node.prev == NIL && node.next == NIL {
      let word = self.sl_word(fl) & !(1 << sl);
      self.set_sl_word(fl, word);
      if word == 0 {
        self.fl_bitmask &= !(1u64 << fl);
      }
    }
  }

  #[inline(always)]
  fn arena(&self) -> &[u8] {
    self.extent.as_ref()
  }

  #[inline(always)]
  fn arena_mut(&mut self) -> &mut [u8] {
    self.extent.as_mut()
  }

  fn head(&self, flat: usize) -> usize {
    let at = self.heads_off + flat * W::BYTES;
    let raw = W::read(&self.arena()[at..]);
    if raw == W::MAX_RAW { NIL } else { raw }
  }

  fn set_head(&mut self, flat: usize, off: usize) {
    let at = self.heads_off + flat * W::BYTES;
    let raw = if off == NIL { W::MAX_RAW } else { off };
    W::write(&mut self.arena_mut()[at..], raw);
  }

  fn sl_word(&self, fl: usize) -> u16 {
    let at = self.sl_off + fl * 2;
    let arena = self.arena();
    u16::from_le_bytes([arena[at], arena[at + 1]])
  }

  fn set_sl_word(&mut self, fl: usize, word: u16) {
    let at = self.sl_off + fl * 2;
    self.arena_mut()[at..at + 2].copy_from_slice(&word.to_le_bytes());
  }

  #[cfg(test)]
  pub(crate) fn raw_arena(&self) -> &[u8] {
    self.arena()
  }

  #[cfg(test)]
  pub(crate) fn class_limit(&self) -> usize {
    self.class_count
  }
}
