use crate::{
  GLOBAL_SYSTEM,
  prim::{
    PrimError,
    page_align,
  },
  system::{
    SysError,
    SysOption,
  },
};

#[derive(Debug)]
pub enum ExtentError {
  SystemError(SysError),
  PrimError(PrimError),
}

pub type ExtentResult<T> = Result<T, ExtentError>;

/// A single anonymous mapping, reserved once and released on drop.
///
/// The requested size is rounded up to the page size; the slice exposed
/// through `as_ref`/`as_mut` covers the whole mapping.
pub struct Extent {
  slice: &'static mut [u8],
}

impl Extent {
  pub fn new(size: usize, options: SysOption) -> ExtentResult<Extent> {
    if size == 0 {
      return Ok(Self::empty());
    }

    let size = page_align(size).map_err(ExtentError::PrimError)?;
    let slice = unsafe { GLOBAL_SYSTEM.alloc(size, options) }.map_err(ExtentError::SystemError)?;

    Ok(Extent { slice })
  }

  pub const fn empty() -> Extent {
    Extent { slice: &mut [] }
  }

  #[inline(always)]
  pub const fn len(&self) -> usize {
    self.slice.len()
  }

  #[inline(always)]
  pub const fn is_empty(&self) -> bool {
    self.slice.is_empty()
  }
}

impl AsRef<[u8]> for Extent {
  fn as_ref(&self) -> &[u8] {
    self.slice
  }
}

impl AsMut<[u8]> for Extent {
  fn as_mut(&mut self) -> &mut [u8] {
    self.slice
  }
}

impl Drop for Extent {
  fn drop(&mut self) {
    if !self.slice.is_empty() {
      let _ = unsafe { GLOBAL_SYSTEM.dealloc(self.slice) };
    }
  }
}
