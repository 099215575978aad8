use crate::math::align_up;
use core::sync::atomic::{
  AtomicBool,
  AtomicUsize,
  Ordering,
};

#[derive(Debug, PartialEq)]
pub enum PrimError {
  Overflow,
}

pub type PrimResult<T> = Result<T, PrimError>;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const COMMON_PAGE_SIZE: usize = 4096;

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn page_size_helper() -> usize {
  unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn page_size_helper() -> usize {
  COMMON_PAGE_SIZE
}

pub fn page_size() -> usize {
  static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);
  static INIT: AtomicBool = AtomicBool::new(false);

  if !INIT.load(Ordering::Acquire) {
    let size = page_size_helper();
    PAGE_SIZE.store(size, Ordering::Release);
    INIT.store(true, Ordering::Release);
    size
  } else {
    PAGE_SIZE.load(Ordering::Acquire)
  }
}

pub fn page_align(value: usize) -> PrimResult<usize> {
  align_up(value, page_size()).ok_or(PrimError::Overflow)
}
