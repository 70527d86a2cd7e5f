//! Cache-line aligned backing memory.
//!
//! DMA engines and cache maintenance instructions operate on whole cache
//! lines. Every allocation here starts on an alignment boundary and is padded
//! to a multiple of it, so flushing or invalidating a buffer never touches a
//! line shared with unrelated data.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use crate::error::{ConfigError, Error};

/// One zeroed, aligned heap block. Freed on drop.
#[allow(clippy::len_without_is_empty)]
pub struct AlignedStorage {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: AlignedStorage is a plain owned allocation. Access to the bytes is
// mediated by whoever hands out pointers into it (the buffer pool).
unsafe impl Send for AlignedStorage {}
unsafe impl Sync for AlignedStorage {}

impl AlignedStorage {
    /// Round `size` up to the next multiple of `align`.
    ///
    /// Returns `None` if `align` is not a power of two or the result overflows.
    pub const fn round_up(size: usize, align: usize) -> Option<usize> {
        if !align.is_power_of_two() {
            return None;
        }
        match size.checked_add(align - 1) {
            Some(padded) => Some(padded & !(align - 1)),
            None => None,
        }
    }

    /// Allocate `round_up(size, align)` zeroed bytes starting on an `align` boundary.
    pub fn allocate(size: usize, align: usize) -> Result<Self, Error> {
        if !align.is_power_of_two() {
            return Err(Error::InvalidAlignment(align));
        }
        if size == 0 {
            return Err(ConfigError::SampleCount.into());
        }
        let rounded = Self::round_up(size, align).ok_or(Error::OutOfMemory)?;
        let layout = Layout::from_size_align(rounded, align).map_err(|_| Error::OutOfMemory)?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::OutOfMemory)?;
        trace!("aligned alloc: {=usize} bytes, align {=usize}", rounded, align);
        Ok(AlignedStorage { ptr, layout })
    }

    /// Start of the block.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size in bytes after rounding.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for AlignedStorage {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
