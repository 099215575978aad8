#[cfg(any(target_os = "linux", target_os = "macos"))]
use crate::{
  prim::page_size,
  system::{
    SysError,
    SysOption,
    SysResult,
    System,
  },
};

pub struct UnixSystem {}

#[cfg(any(target_os = "linux", target_os = "macos"))]
pub static UNIX_SYSTEM: UnixSystem = UnixSystem {};

#[cfg(any(target_os = "linux", target_os = "macos"))]
impl UnixSystem {
  const fn prot_as(options: SysOption) -> i32 {
    match options {
      SysOption::Commit => libc::PROT_READ | libc::PROT_WRITE,
      SysOption::Reserve => libc::PROT_NONE,
    }
  }

  const fn flags() -> i32 {
    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS
  }

  const fn as_c(slice: &[u8]) -> *mut libc::c_void {
    slice.as_ptr() as *mut libc::c_void
  }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
unsafe impl System for UnixSystem {
  unsafe fn alloc<'mem>(&self, size: usize, options: SysOption) -> SysResult<&'mem mut [u8]> {
    if size == 0 || size % page_size() != 0 {
      return Err(SysError::InvalidArgument);
    }

    let prot = Self::prot_as(options);
    let ptr = unsafe { libc::mmap(core::ptr::null_mut(), size, prot, Self::flags(), -1, 0) };

    match ptr {
      libc::MAP_FAILED => Err(SysError::OutOfMemory),
      _ => {
        let slice = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, size) };
        Ok(slice)
      }
    }
  }

  unsafe fn dealloc(&self, slice: &[u8]) -> SysResult<()> {
    let result = unsafe { libc::munmap(Self::as_c(slice), slice.len()) };
    if result == 0 {
      return Ok(());
    }

    Err(SysError::InvalidArgument)
  }
}
