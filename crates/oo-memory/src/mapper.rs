//! Host page mapper
//!
//! Allocates aligned, optionally executable page regions from the host OS.
//! The loader maps whole modules into a single RWX region and hands out raw
//! addresses into it, so the region must stay put until the module is torn
//! down; `PageRegion` owns the mapping and releases it on drop.

use crate::pages::{checked_align_up, PageFlags, PAGE_SIZE};
use oo_core::error::MemoryError;
use tracing::trace;

/// An owned, page-aligned region of host memory
pub struct PageRegion {
    ptr: *mut u8,
    len: usize,
    rounded: usize,
}

impl PageRegion {
    /// Allocate a zero-initialised region of at least `len` bytes
    ///
    /// The OS request is rounded up to the page size; the region itself
    /// reports the requested length so callers can slice it directly.
    pub fn alloc(len: usize, flags: PageFlags) -> Result<Self, MemoryError> {
        if len == 0 {
            return Err(MemoryError::AllocationFailed {
                len,
                reason: "zero-length region".to_string(),
            });
        }

        let rounded = checked_align_up(len as u64, PAGE_SIZE as u64).ok_or_else(|| {
            MemoryError::AllocationFailed {
                len,
                reason: "length overflows when rounded to the page size".to_string(),
            }
        })? as usize;
        let ptr = os_alloc(rounded, flags).map_err(|reason| MemoryError::AllocationFailed {
            len: rounded,
            reason,
        })?;

        trace!(
            "Mapped {:#x} bytes at {:p} with flags {:?}",
            rounded,
            ptr,
            flags
        );

        Ok(Self { ptr, len, rounded })
    }

    /// Requested length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Raw address of `offset` bytes into the region
    ///
    /// Panics if `offset` is out of bounds.
    pub fn addr_at(&self, offset: usize) -> *const u8 {
        assert!(offset < self.len, "offset {:#x} out of region", offset);
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for PageRegion {
    fn drop(&mut self) {
        os_free(self.ptr, self.rounded);
        trace!("Unmapped {:#x} bytes at {:p}", self.rounded, self.ptr);
    }
}

#[cfg(unix)]
fn os_alloc(len: usize, flags: PageFlags) -> Result<*mut u8, String> {
    let mut prot = libc::PROT_NONE;
    if flags.contains(PageFlags::READ) {
        prot |= libc::PROT_READ;
    }
    if flags.contains(PageFlags::WRITE) {
        prot |= libc::PROT_WRITE;
    }
    if flags.contains(PageFlags::EXECUTE) {
        prot |= libc::PROT_EXEC;
    }

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            prot,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if std::ptr::eq(ptr, libc::MAP_FAILED) {
        return Err(format!("mmap failed: {}", std::io::Error::last_os_error()));
    }
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn os_free(ptr: *mut u8, len: usize) {
    unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
}

#[cfg(windows)]
fn os_alloc(len: usize, flags: PageFlags) -> Result<*mut u8, String> {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE, PAGE_EXECUTE_READ,
        PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
    };

    // Any combination containing both WRITE and EXECUTE must be RWX;
    // WRITE alone has no write-only protection and becomes RW.
    let protect = match (
        flags.contains(PageFlags::READ),
        flags.contains(PageFlags::WRITE),
        flags.contains(PageFlags::EXECUTE),
    ) {
        (_, true, true) => PAGE_EXECUTE_READWRITE,
        (_, true, false) => PAGE_READWRITE,
        (true, false, true) => PAGE_EXECUTE_READ,
        (false, false, true) => PAGE_EXECUTE,
        (true, false, false) => PAGE_READONLY,
        (false, false, false) => PAGE_NOACCESS,
    };

    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            protect,
        )
    };
    if ptr.is_null() {
        return Err(format!(
            "VirtualAlloc failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(ptr as *mut u8)
}

#[cfg(windows)]
fn os_free(ptr: *mut u8, _len: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    // MEM_RELEASE frees the whole allocation and requires size 0
    unsafe { VirtualFree(ptr as *mut core::ffi::c_void, 0, MEM_RELEASE) };
}
