//! Host staging buffer
//!
//! A single page-aligned, zeroed region of host memory holds everything the
//! card reads and writes. The buffer is owned by whoever runs the benchmark
//! and is released when dropped.
//!
//! Regular pages come from the global allocator with page alignment; huge
//! pages are mapped anonymously with `MAP_HUGETLB` through rustix.

use crate::error::{Result, VfpgaError};
use rustix::mm::{mlock, munlock, munmap, MapFlags, ProtFlags};
use std::alloc::Layout;
use std::ptr::NonNull;
use vfpga_chip::page::AllocClass;

/// Validated byte range of a [`HostBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    offset: usize,
    len: usize,
}

impl Region {
    /// Start offset within the buffer
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the range is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Whether two ranges share at least one byte
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

#[derive(Debug)]
enum Backing {
    Heap(Layout),
    HugeMap,
}

/// Page-aligned, zero-initialised host buffer
#[derive(Debug)]
pub struct HostBuffer {
    ptr: NonNull<u8>,
    size: usize,
    pages: usize,
    class: AllocClass,
    backing: Backing,
    pinned: bool,
}

// SAFETY: HostBuffer owns its memory exclusively; the pointer is never shared
// outside of borrows tied to &self / &mut self.
unsafe impl Send for HostBuffer {}

impl HostBuffer {
    /// Allocate `pages` zeroed pages of `class`
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::AllocationFailed`] if `pages` is zero, the size
    /// overflows, or the allocator / kernel refuses the request.
    pub fn allocate(class: AllocClass, pages: usize) -> Result<Self> {
        let page_size = class.page_size();
        if pages == 0 {
            return Err(VfpgaError::allocation_failed(pages, page_size, "zero pages requested"));
        }
        let size = pages
            .checked_mul(page_size)
            .ok_or_else(|| VfpgaError::allocation_failed(pages, page_size, "size overflows"))?;

        let (ptr, backing) = match class {
            AllocClass::Reg4K => {
                let layout = Layout::from_size_align(size, page_size).map_err(|e| {
                    VfpgaError::allocation_failed(pages, page_size, format!("invalid layout: {e}"))
                })?;
                // SAFETY: layout has non-zero size (pages > 0) and a power-of-two
                // alignment; the pointer is released in Drop with the same layout.
                let raw = unsafe { std::alloc::alloc_zeroed(layout) };
                let ptr = NonNull::new(raw).ok_or_else(|| {
                    VfpgaError::allocation_failed(pages, page_size, "allocator returned null")
                })?;
                (ptr, Backing::Heap(layout))
            }
            AllocClass::Huge2M => {
                // SAFETY: fresh anonymous private mapping, no existing memory is
                // aliased; unmapped in Drop with the same length.
                let raw = unsafe {
                    rustix::mm::mmap_anonymous(
                        std::ptr::null_mut(),
                        size,
                        ProtFlags::READ | ProtFlags::WRITE,
                        MapFlags::PRIVATE | MapFlags::HUGETLB,
                    )
                }
                .map_err(|e| {
                    VfpgaError::allocation_failed(pages, page_size, format!("hugetlb mmap: {e}"))
                })?;
                let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| {
                    VfpgaError::allocation_failed(pages, page_size, "mmap returned null")
                })?;
                (ptr, Backing::HugeMap)
            }
        };

        tracing::debug!(
            "Allocated host buffer: {pages} x {page_size} B at {:p} ({class:?})",
            ptr
        );

        Ok(Self {
            ptr,
            size,
            pages,
            class,
            backing,
            pinned: false,
        })
    }

    /// Allocate enough pages of `class` to hold `bytes`
    ///
    /// # Errors
    ///
    /// See [`HostBuffer::allocate`].
    pub fn for_bytes(class: AllocClass, bytes: usize) -> Result<Self> {
        Self::allocate(class, class.pages_for(bytes))
    }

    /// Lock the buffer's pages in RAM so the card never faults on them
    ///
    /// # Errors
    ///
    /// Returns an error if `mlock` is refused (commonly `RLIMIT_MEMLOCK`).
    pub fn pin(&mut self) -> Result<()> {
        if self.pinned {
            return Ok(());
        }
        // SAFETY: [ptr, ptr + size) is exactly the region owned by self.
        unsafe { mlock(self.ptr.as_ptr().cast(), self.size) }.map_err(|e| {
            VfpgaError::allocation_failed(self.pages, self.class.page_size(), format!("mlock: {e}"))
        })?;
        self.pinned = true;
        Ok(())
    }

    /// Size in bytes (pages × page size)
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of pages
    pub const fn pages(&self) -> usize {
        self.pages
    }

    /// Allocation class
    pub const fn class(&self) -> AllocClass {
        self.class
    }

    /// Whether the pages are locked in RAM
    pub const fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Whole buffer
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for size bytes for the lifetime of self and was
        // zero-initialised at allocation.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Whole buffer, mutable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Validate `[offset, offset + len)` against the buffer
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::OutOfBounds`] if the range does not fit.
    pub fn region(&self, offset: usize, len: usize) -> Result<Region> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(Region { offset, len }),
            _ => Err(VfpgaError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Re-check a region, e.g. one built against a different buffer
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::OutOfBounds`] if the range does not fit.
    pub fn check(&self, region: Region) -> Result<Region> {
        self.region(region.offset, region.len)
    }

    /// Bytes of a region
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::OutOfBounds`] if the range does not fit.
    pub fn bytes(&self, region: Region) -> Result<&[u8]> {
        let r = self.check(region)?;
        Ok(&self.as_slice()[r.offset..r.end()])
    }

    /// Bytes of a region, mutable
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::OutOfBounds`] if the range does not fit.
    pub fn bytes_mut(&mut self, region: Region) -> Result<&mut [u8]> {
        let r = self.check(region)?;
        Ok(&mut self.as_mut_slice()[r.offset..r.end()])
    }

    /// Host virtual address of the first byte of `region`
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::OutOfBounds`] if the range does not fit.
    pub fn vaddr(&self, region: Region) -> Result<u64> {
        let r = self.check(region)?;
        Ok(self.ptr.as_ptr() as u64 + r.offset as u64)
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        if self.pinned {
            // SAFETY: same range that was locked in pin().
            let _ = unsafe { munlock(self.ptr.as_ptr().cast(), self.size) };
        }
        match self.backing {
            // SAFETY: ptr was returned by alloc_zeroed with this layout.
            Backing::Heap(layout) => unsafe { std::alloc::dealloc(self.ptr.as_ptr(), layout) },
            Backing::HugeMap => {
                // SAFETY: ptr/size describe the mapping created in allocate().
                let _ = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) };
            }
        }
        tracing::debug!("Released host buffer ({} pages)", self.pages);
    }
}

/// Input / output partition of the host buffer
///
/// Inputs are packed at offset 0 (`n_inputs × input_size` bytes); the kernel
/// produces one byte per input, placed right after the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    n_inputs: usize,
    input_size: usize,
}

impl BufferLayout {
    /// Layout for `n_inputs` inputs of `input_size` bytes
    pub const fn new(n_inputs: usize, input_size: usize) -> Self {
        Self {
            n_inputs,
            input_size,
        }
    }

    /// Number of inputs (kernel batch size)
    pub const fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Bytes per input
    pub const fn input_size(&self) -> usize {
        self.input_size
    }

    /// Input region length
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the product overflows.
    pub fn input_len(&self) -> Result<usize> {
        self.n_inputs
            .checked_mul(self.input_size)
            .ok_or_else(|| VfpgaError::config("input region size overflows"))
    }

    /// Output region length (one byte per input)
    pub const fn output_len(&self) -> usize {
        self.n_inputs
    }

    /// Bytes the layout needs in total
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the sum overflows.
    pub fn total_len(&self) -> Result<usize> {
        self.input_len()?
            .checked_add(self.output_len())
            .ok_or_else(|| VfpgaError::config("buffer layout size overflows"))
    }

    /// Input region within `buffer`
    ///
    /// # Errors
    ///
    /// Fails if the region does not fit.
    pub fn input(&self, buffer: &HostBuffer) -> Result<Region> {
        buffer.region(0, self.input_len()?)
    }

    /// Output region within `buffer`
    ///
    /// # Errors
    ///
    /// Fails if the region does not fit.
    pub fn output(&self, buffer: &HostBuffer) -> Result<Region> {
        buffer.region(self.input_len()?, self.output_len())
    }
}
