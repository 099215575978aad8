//! Arena block layout and navigation.
//!
//! A block is not a long-lived object; it is reconstructed on demand from a
//! byte offset into the arena. Every block carries a packed header at its
//! start and a boundary-tag footer at its end:
//!
//! ```text
//! +--------+----------------------------+--------+
//! | header |          payload           | footer |
//! +--------+----------------------------+--------+
//! header = (size << FLAG_BITS) | flags    footer = size
//! ```
//!
//! Free blocks overlay a doubly linked `FreeNode` over the payload. The
//! footer is written for allocated blocks too, so any block can locate its
//! predecessor without a separate index.
//!
//! All navigation here is pure offset arithmetic over a byte slice; this
//! module is the only place that knows the wire layout.

use crate::width::IndexWidth;

/// Low header bits reserved for flags.
pub(crate) const FLAG_BITS: u32 = 3;
const FLAG_FREE: usize = 0b001;
const FLAG_PREV_FREE: usize = 0b010;

/// Null link sentinel for free-node offsets.
pub(crate) const NIL: usize = usize::MAX;

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
  pub size: usize,
  pub free: bool,
  pub prev_free: bool,
}

/// Free-list links overlaid on a free block's payload. Offsets are
/// arena-relative header offsets; `NIL` means end of list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
  pub next: usize,
  pub prev: usize,
}

/// Tagged view of a block, decoded from the packed on-arena encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
  Free {
    size: usize,
    next: Option<usize>,
    prev: Option<usize>,
  },
  Allocated {
    size: usize,
  },
}

impl Block {
  pub fn read<W: IndexWidth>(arena: &[u8], off: usize) -> Block {
    let header = read_header::<W>(arena, off);
    if header.free {
      let node = read_node::<W>(arena, off);
      let link = |raw: usize| (raw != NIL).then_some(raw);
      Block::Free {
        size: header.size,
        next: link(node.next),
        prev: link(node.prev),
      }
    } else {
      Block::Allocated { size: header.size }
    }
  }
}

/// Smallest total block size: must hold a header, a footer and a free
/// node, and stay at or above `2^MIN_SIZE_INDEX` so the size-class
/// mapping stays monotonic.
pub(crate) const fn min_block_size<W: IndexWidth>() -> usize {
  let overhead = 4 * W::BYTES;
  let floor = 1 << crate::index::MIN_SIZE_INDEX;
  if overhead > floor { overhead } else { floor }
}

#[inline(always)]
pub(crate) const fn payload_off<W: IndexWidth>(off: usize) -> usize {
  off + W::BYTES
}

pub(crate) fn read_header<W: IndexWidth>(arena: &[u8], off: usize) -> Header {
  let raw = W::read(&arena[off..]);
  Header {
    size: raw >> FLAG_BITS,
    free: raw & FLAG_FREE != 0,
    prev_free: raw & FLAG_PREV_FREE != 0,
  }
}

pub(crate) fn write_header<W: IndexWidth>(arena: &mut [u8], off: usize, header: Header) {
  let mut raw = header.size << FLAG_BITS;
  if header.free {
    raw |= FLAG_FREE;
  }
  if header.prev_free {
    raw |= FLAG_PREV_FREE;
  }
  W::write(&mut arena[off..], raw);
}

/// Footer of the block whose header sits at `off`; holds the plain size.
pub(crate) fn read_footer<W: IndexWidth>(arena: &[u8], off: usize, size: usize) -> usize {
  W::read(&arena[off + size - W::BYTES..])
}

pub(crate) fn write_footer<W: IndexWidth>(arena: &mut [u8], off: usize, size: usize) {
  W::write(&mut arena[off + size - W::BYTES..], size);
}

pub(crate) fn read_node<W: IndexWidth>(arena: &[u8], off: usize) -> FreeNode {
  let payload = payload_off::<W>(off);
  let decode = |raw: usize| if raw == W::MAX_RAW { NIL } else { raw };
  FreeNode {
    next: decode(W::read(&arena[payload..])),
    prev: decode(W::read(&arena[payload + W::BYTES..])),
  }
}

pub(crate) fn write_node<W: IndexWidth>(arena: &mut [u8], off: usize, node: FreeNode) {
  let payload = payload_off::<W>(off);
  let encode = |raw: usize| if raw == NIL { W::MAX_RAW } else { raw };
  W::write(&mut arena[payload..], encode(node.next));
  W::write(&mut arena[payload + W::BYTES..], encode(node.prev));
}

/// Header offset of the block following `off`, or `None` past the arena.
#[inline]
pub(crate) fn next_header_off(off: usize, size: usize, padded: usize) -> Option<usize> {
  let next = off + size;
  (next < padded).then_some(next)
}

/// Header offset and size of the block preceding `off`, recovered from its
/// boundary tag. `None` at the arena start, or when the tag does not
/// describe a block that could end at `off`.
pub(crate) fn prev_header_off<W: IndexWidth>(arena: &[u8], off: usize) -> Option<(usize, usize)> {
  if off == 0 {
    return None;
  }
  let size = W::read(&arena[off - W::BYTES..]);
  if size < min_block_size::<W>() || size > off {
    return None;
  }
  Some((off - size, size))
}
