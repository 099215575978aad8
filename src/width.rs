//! Index-integer-width parametrization.
//!
//! Every on-arena field (header, footer, free-node links) is one unsigned
//! integer of the configured width. The width bounds the largest block the
//! packed header can describe, which is what distinguishes the small,
//! medium and large allocator presets.

use crate::block::FLAG_BITS;

mod sealed {
  pub trait Sealed {}
  impl Sealed for u16 {}
  impl Sealed for u32 {}
  impl Sealed for u64 {}
}

/// Unsigned integer type used for all on-arena fields.
///
/// Values are stored little-endian and byte-addressed, so block offsets
/// need no particular alignment inside the arena.
pub trait IndexWidth: sealed::Sealed + Copy + 'static {
  /// Bytes occupied by one field in the arena.
  const BYTES: usize;

  /// All-ones raw value, reserved as the null link sentinel.
  const MAX_RAW: usize;

  /// Largest block size the packed `(size << FLAG_BITS) | flags` header
  /// can encode.
  const MAX_ENCODABLE: u64;

  fn read(buf: &[u8]) -> usize;
  fn write(buf: &mut [u8], value: usize);
}

macro_rules! impl_index_width {
  ($ty:ty) => {
    impl IndexWidth for $ty {
      const BYTES: usize = core::mem::size_of::<$ty>();
      const MAX_RAW: usize = <$ty>::MAX as usize;
      const MAX_ENCODABLE: u64 = (<$ty>::MAX as u64) >> FLAG_BITS;

      #[inline(always)]
      fn read(buf: &[u8]) -> usize {
        let mut raw = [0u8; core::mem::size_of::<$ty>()];
        raw.copy_from_slice(&buf[..core::mem::size_of::<$ty>()]);
        <$ty>::from_le_bytes(raw) as usize
      }

      #[inline(always)]
      fn write(buf: &mut [u8], value: usize) {
        let raw = (value as $ty).to_le_bytes();
        buf[..core::mem::size_of::<$ty>()].copy_from_slice(&raw);
      }
    }
  };
}

impl_index_width!(u16);
impl_index_width!(u32);
impl_index_width!(u64);
