//! Two-Level Segregated Fit (TLSF) allocation over a fixed arena.
//!
//! A single pre-reserved byte arena is carved into boundary-tagged blocks
//! indexed by segregated free lists under a two-level occupancy bitmap,
//! giving O(1)-bounded `allocate` and `deallocate` with immediate
//! coalescing. The arena never grows and is released in one piece when
//! the allocator drops.
//!
//! The index integer width is a type parameter; the three presets trade
//! per-block overhead against the largest representable arena:
//!
//! | preset        | width | arena ceiling |
//! |---------------|-------|---------------|
//! | [`SmallTlsf`]  | `u16` | ~8 KiB        |
//! | [`MediumTlsf`] | `u32` | ~512 MiB      |
//! | [`LargeTlsf`]  | `u64` | full range    |

#![cfg_attr(not(test), no_std)]

mod block;
mod index;
pub mod sync;
pub mod tlsf;
pub mod width;

#[cfg(test)]
mod tests;

pub use sync::LockedTlsf;
pub use tlsf::{
  IndexSnapshot,
  Tlsf,
  TlsfError,
  TlsfResult,
};
pub use width::IndexWidth;

/// ~8 KiB ceiling, 2-byte block fields.
pub type SmallTlsf = Tlsf<u16>;
/// ~512 MiB ceiling, 4-byte block fields.
pub type MediumTlsf = Tlsf<u32>;
/// Full address range, 8-byte block fields.
pub type LargeTlsf = Tlsf<u64>;

pub mod prelude {
  pub use super::{
    IndexWidth,
    LargeTlsf,
    LockedTlsf,
    MediumTlsf,
    SmallTlsf,
    Tlsf,
    TlsfError,
    TlsfResult,
  };
}
