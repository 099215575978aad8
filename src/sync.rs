//! Lock wrapper for sharing an allocator across threads.
//!
//! [`Tlsf`] itself is a single-threaded structure; this is the external
//! lock callers need when one instance is shared.

use core::ptr::NonNull;

use spin::Mutex;

use crate::{
  tlsf::{
    Tlsf,
    TlsfResult,
  },
  width::IndexWidth,
};

pub struct LockedTlsf<W: IndexWidth> {
  inner: Mutex<Tlsf<W>>,
}

impl<W: IndexWidth> LockedTlsf<W> {
  pub fn new(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(Tlsf::new(capacity)),
    }
  }

  pub fn try_new(capacity: usize) -> TlsfResult<Self> {
    Ok(Self {
      inner: Mutex::new(Tlsf::try_new(capacity)?),
    })
  }

  pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
    self.inner.lock().allocate(size)
  }

  pub fn deallocate(&self, handle: &mut Option<NonNull<u8>>) {
    self.inner.lock().deallocate(handle)
  }

  pub fn capacity(&self) -> usize {
    self.inner.lock().capacity()
  }

  pub fn bytes_remaining(&self) -> usize {
    self.inner.lock().bytes_remaining()
  }

  /// Runs `f` under the lock with direct access to the allocator.
  pub fn with<R>(&self, f: impl FnOnce(&mut Tlsf<W>) -> R) -> R {
    f(&mut self.inner.lock())
  }
}

// Handed-out pointers alias the arena, so the wrapper is only Sync when
// callers serialize pointer use the same way they serialize calls.
unsafe impl<W: IndexWidth> Send for LockedTlsf<W> {}
unsafe impl<W: IndexWidth> Sync for LockedTlsf<W> {}
