//! Sample buffer handles.
//!
//! A [`SampleBuffer`] is an owned token for one fixed-size slot of a
//! [`BufferPool`](super::BufferPool). It is not `Clone`: whoever holds the
//! token is the only party that may touch the slot's memory, and handing the
//! token to a queue or to the DMA driver hands over that right with it.
//!
//! The token keeps a reference to the pool's backing storage, so the memory
//! stays valid even if the pool itself is torn down while the application
//! still holds a buffer. Dropping a token while its pool is alive puts the
//! slot back on the pool's write queue.

use alloc::sync::{Arc, Weak};
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use bitflags::bitflags;

use super::aligned::AlignedStorage;
use super::cache;
use super::pool::Queues;
use crate::hal::DmaTarget;

mod sealed {
    pub trait Sealed {}
}

/// Element types a buffer can hold.
///
/// Sealed: every implementor is a plain number for which an all-zero bit
/// pattern is a valid value, which the pool relies on when it hands out
/// freshly allocated memory.
pub trait Sample: sealed::Sealed + Copy + Default + Send + Sync + 'static {}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Sample for $t {}
        )*
    };
}

impl_sample!(u8, i8, u16, i16, u32, i32, f32);

bitflags! {
    /// Status bits carried by a buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u16 {
        /// The stream could not hand this buffer over on time; the data does
        /// not follow on from the previous buffer.
        const DISCONTINUOUS = 1 << 0;
        /// Multi-channel samples are interleaved frame by frame.
        const INTERLEAVED = 1 << 1;
        /// Holds data ready for a consumer.
        const READ = 1 << 2;
        /// Handed out to be filled by a producer.
        const WRITE = 1 << 3;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BufferFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "BufferFlags({=u16:#x})", self.bits())
    }
}

/// Exclusive handle to one buffer of a pool.
pub struct SampleBuffer<T: Sample> {
    ptr: NonNull<T>,
    samples: usize,
    channels: usize,
    index: usize,
    timestamp: u64,
    flags: BufferFlags,
    storage: Arc<AlignedStorage>,
    home: Weak<Queues<T>>,
}

// SAFETY: the token is the unique owner of its slot, so moving it to another
// context moves exclusive access with it.
unsafe impl<T: Sample> Send for SampleBuffer<T> {}

impl<T: Sample> SampleBuffer<T> {
    /// Create the handle for slot `index`.
    ///
    /// # Safety
    /// `ptr` must point at `samples * channels` elements inside `storage`,
    /// and no other handle may cover any part of that range.
    pub(crate) unsafe fn new(
        storage: Arc<AlignedStorage>,
        home: Weak<Queues<T>>,
        ptr: NonNull<T>,
        samples: usize,
        channels: usize,
        index: usize,
    ) -> Self {
        SampleBuffer {
            ptr,
            samples,
            channels,
            index,
            timestamp: 0,
            flags: BufferFlags::empty(),
            storage,
            home,
        }
    }

    /// Samples as a slice (all channels).
    pub fn data(&self) -> &[T] {
        self
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Samples per channel.
    pub fn size(&self) -> usize {
        self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total elements across all channels.
    pub fn len(&self) -> usize {
        self.samples * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload size in bytes.
    pub fn bytes(&self) -> usize {
        self.len() * core::mem::size_of::<T>()
    }

    /// Slot number inside the owning pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Tick at which the transfer into this buffer completed.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, ticks: u64) {
        self.timestamp = ticks;
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags.insert(flags);
    }

    pub fn remove_flags(&mut self, flags: BufferFlags) {
        self.flags.remove(flags);
    }

    pub fn clear_flags(&mut self) {
        self.flags = BufferFlags::empty();
    }

    pub fn is_discontinuous(&self) -> bool {
        self.flags.contains(BufferFlags::DISCONTINUOUS)
    }

    pub fn is_interleaved(&self) -> bool {
        self.flags.contains(BufferFlags::INTERLEAVED)
    }

    /// Iterate over sample frames (one element per channel).
    pub fn frames(&self) -> core::slice::ChunksExact<'_, T> {
        self.data().chunks_exact(self.channels)
    }

    /// Iterate over the samples of one channel of an interleaved buffer.
    ///
    /// # Panics
    /// If `channel >= self.channels()`.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = T> + '_ {
        assert!(channel < self.channels, "channel out of range");
        self.data()[channel..].iter().step_by(self.channels).copied()
    }

    /// Make CPU writes visible to the DMA engine. Call before handing an
    /// output buffer to hardware.
    pub fn flush_for_device(&self) {
        cache::clean(self.ptr.as_ptr() as usize, self.padded_bytes());
    }

    /// Drop stale cache lines so the CPU sees what the DMA engine wrote.
    /// Call before the first CPU read of a just-completed input buffer.
    pub fn invalidate_for_cpu(&mut self) {
        cache::invalidate(self.ptr.as_ptr() as usize, self.padded_bytes());
    }

    /// Address and length to program into a DMA target register.
    pub fn dma_target(&self) -> DmaTarget {
        DmaTarget {
            address: self.ptr.as_ptr() as usize,
            len: self.len(),
            bytes: self.bytes(),
        }
    }

    /// Whether this buffer was carved out of `storage`.
    pub(crate) fn is_backed_by(&self, storage: &Arc<AlignedStorage>) -> bool {
        Arc::ptr_eq(&self.storage, storage)
    }

    // Cache operations cover whole lines; the pool pads each slot to the
    // storage alignment so the rounded range never leaves the slot.
    fn padded_bytes(&self) -> usize {
        let align = self.storage.align();
        AlignedStorage::round_up(self.bytes(), align).unwrap_or(self.bytes())
    }
}

impl<T: Sample> Drop for SampleBuffer<T> {
    fn drop(&mut self) {
        let Some(home) = self.home.upgrade() else {
            return;
        };
        let slot = SampleBuffer {
            ptr: self.ptr,
            samples: self.samples,
            channels: self.channels,
            index: self.index,
            timestamp: 0,
            flags: BufferFlags::empty(),
            storage: self.storage.clone(),
            home: Arc::downgrade(&home),
        };
        // The write queue may be pushed from interrupt context as well.
        critical_section::with(|_| {
            if let Err(mut lost) = home.write.push(slot) {
                // Cannot happen while every slot is accounted for; keep the
                // rejected copy from trying again.
                lost.home = Weak::new();
            }
        });
    }
}

impl<T: Sample> Deref for SampleBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the handle exclusively owns len() initialised elements.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }
}

impl<T: Sample> DerefMut for SampleBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees no other borrow is live.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl<T: Sample> core::fmt::Debug for SampleBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("index", &self.index)
            .field("samples", &self.samples)
            .field("channels", &self.channels)
            .field("timestamp", &self.timestamp)
            .field("flags", &self.flags)
            .finish()
    }
}
