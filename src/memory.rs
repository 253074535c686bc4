//! Executable memory for finalized method code.
//!
//! A finished code blob is copied into an mmap-backed region that starts
//! out writable, then is flipped to read+execute. The region is never
//! writable and executable at the same time.

use std::ptr::NonNull;

use thiserror::Error;

/// Error type for executable-memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("executable memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid size or out-of-bounds write")]
    InvalidSize,
}

/// A page-aligned block of memory allocated via mmap.
///
/// Initially writable; call [`ExecutableMemory::make_executable`] once the
/// code has been copied in.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Allocate a block of at least `size` bytes, rounded up to page size.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let page = Self::page_size();
        let aligned = (size + page - 1) & !(page - 1);
        let ptr = Self::mmap_alloc(aligned)?;

        Ok(Self {
            ptr,
            size: aligned,
            executable: false,
        })
    }

    fn page_size() -> usize {
        #[cfg(unix)]
        {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }
        #[cfg(not(unix))]
        {
            4096
        }
    }

    #[cfg(unix)]
    fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        use std::ptr;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
    }

    #[cfg(not(unix))]
    fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        // Fallback for non-Unix hosts; the pages will not actually be
        // executable on most of them.
        let layout = std::alloc::Layout::from_size_align(size, Self::page_size())
            .map_err(|_| MemoryError::InvalidSize)?;
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(MemoryError::AllocationFailed)
    }

    /// Pointer to the start of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Size of the region (page-rounded).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `data` into the region at `offset`. Fails once the region has
    /// been made executable.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::ProtectionFailed);
        }
        if offset + data.len() > self.size {
            return Err(MemoryError::InvalidSize);
        }

        unsafe {
            let dest = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }

        Ok(())
    }

    /// Flip the region to read+execute. Irreversible.
    #[cfg(unix)]
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }

        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };

        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        self.executable = true;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        self.executable = true;
        Ok(())
    }

    /// Whether the region has been flipped to executable.
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Reinterpret the start of the region as a function pointer.
    ///
    /// # Safety
    /// The caller must guarantee the region contains valid machine code
    /// whose entry point matches the signature of `F`.
    pub unsafe fn as_fn<F>(&self) -> Option<F>
    where
        F: Copy,
    {
        if !self.executable {
            return None;
        }
        if std::mem::size_of::<F>() != std::mem::size_of::<fn()>() {
            return None;
        }
        let entry = self.ptr.as_ptr();
        Some(unsafe { std::mem::transmute_copy(&entry) })
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            }
        }
        #[cfg(not(unix))]
        {
            let layout = std::alloc::Layout::from_size_align(self.size, Self::page_size())
                .expect("invalid layout");
            unsafe {
                std::alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

// Owns its mapping; the executable flag only ever goes writable -> executable.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_memory() {
        let mem = ExecutableMemory::new(4096).unwrap();
        assert!(mem.size() >= 4096);
        assert!(!mem.is_executable());
    }

    #[test]
    fn test_write_then_protect() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.write(0, &[0x90, 0x90, 0xC3]).unwrap();
        mem.make_executable().unwrap();
        assert!(mem.is_executable());
    }

    #[test]
    fn test_cannot_write_after_executable() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.make_executable().unwrap();
        assert!(mem.write(0, &[0x90]).is_err());
    }

    #[test]
    fn test_out_of_bounds_write() {
        let mut mem = ExecutableMemory::new(64).unwrap();
        let size = mem.size();
        assert!(mem.write(size - 1, &[0x90, 0x90]).is_err());
    }
}
