//! Memory-mapped I/O for vFPGA region windows
//!
//! Maps one window of a region device file (descriptor page or kernel CSR
//! window) and provides volatile 64-bit register access into it.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{Result, VfpgaError};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;
use vfpga_chip::bar::Window;

/// Mapped window of a region device
pub struct MappedRegion {
    /// Memory-mapped pointer
    ptr: NonNull<u8>,
    /// Size of the mapping
    size: usize,
    /// Which window
    window: Window,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("window", &self.window)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively. Moving between threads
// doesn't invalidate the mapping (mmap'd memory is process-wide).
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Map `window` of an open region device
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel refuses the mapping.
    pub fn map(device: &File, window: Window) -> Result<Self> {
        let size = window.size() as usize;

        // SAFETY: mmap necessary for MMIO - maps the window into the process.
        // Invariants: (1) device fd is open for read/write; (2) offset and size
        // come from the fixed window layout; (3) ptr valid for size bytes or Err.
        let raw = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                device.as_fd(),
                window.offset(),
            )
        }
        .map_err(|e| VfpgaError::map_failed(format!("{window:?} window: {e}")))?;

        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| VfpgaError::map_failed(format!("{window:?} window: null mapping")))?;

        tracing::info!("Mapped {window:?} window at {ptr:p}, size={size:#x}");

        Ok(Self { ptr, size, window })
    }

    /// Read a 64-bit register at byte `offset`
    ///
    /// # Panics
    ///
    /// Panics if `offset + 8` exceeds the mapped window.
    pub fn read64(&self, offset: usize) -> u64 {
        assert!(offset + 8 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap; (2) offset+8 <= size; (3) u64 aligned.
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(offset).cast::<u64>()) }
    }

    /// Write a 64-bit register at byte `offset`
    ///
    /// # Panics
    ///
    /// Panics if `offset + 8` exceeds the mapped window.
    pub fn write64(&self, offset: usize, value: u64) {
        assert!(offset + 8 <= self.size, "Register offset out of bounds");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+8 <= size; (3) u64 aligned.
        unsafe {
            std::ptr::write_volatile(self.ptr.as_ptr().add(offset).cast::<u64>(), value);
        }
    }

    /// Which window is mapped
    pub const fn window(&self) -> Window {
        self.window
    }

    /// Mapping size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping created in map(); Drop runs once.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.size);
        }
        tracing::debug!("Unmapped {:?} window", self.window);
    }
}
