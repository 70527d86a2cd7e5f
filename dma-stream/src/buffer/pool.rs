//! Fixed pool of DMA buffers with a write queue and a ready queue.
//!
//! All buffers are carved out of one aligned allocation when the pool is
//! created and never individually allocated or freed afterwards. A buffer is
//! always in exactly one place: the write queue, the ready queue, bound to a
//! DMA target, or held by the application as a [`SampleBuffer`] token.
//!
//! ```text
//!            allocate()                      enqueue()
//! write queue ─────────► producer (fills) ──────────────► ready queue
//!      ▲                                                       │
//!      │        release()                       dequeue()      │
//!      └─────────────────── consumer (drains) ◄────────────────┘
//! ```
//!
//! Each queue is SPSC: one context pushes, one context pops. For an input
//! stream the interrupt handler calls `allocate`/`enqueue` and the
//! application calls `dequeue`/`release`; for an output stream the roles are
//! mirrored. No locks are taken and no memory is allocated after `new()`.
//!
//! A [`SampleBuffer`] dropped while its pool is alive returns to the write
//! queue by itself, inside a critical section, so a lost token never shrinks
//! the pool.

use alloc::sync::Arc;
use core::mem::size_of;
use core::ptr::NonNull;

use super::aligned::AlignedStorage;
use super::queue::BoundedQueue;
use super::sample::{BufferFlags, Sample, SampleBuffer};
use crate::constants::{DCACHE_LINE_SIZE, MIN_BUFFERS};
use crate::error::{ConfigError, Error};

/// The two queues, shared with every buffer of the pool through a weak
/// reference.
pub(crate) struct Queues<T: Sample> {
    pub(crate) write: BoundedQueue<SampleBuffer<T>>,
    pub(crate) ready: BoundedQueue<SampleBuffer<T>>,
}

/// A pool of `N` equally sized sample buffers.
pub struct BufferPool<T: Sample> {
    queues: Arc<Queues<T>>,
    storage: Arc<AlignedStorage>,
    samples: usize,
    channels: usize,
    buffers: usize,
    stride: usize,
}

impl<T: Sample> BufferPool<T> {
    /// Create a pool aligned to the data-cache line size.
    pub fn new(samples: usize, channels: usize, buffers: usize) -> Result<Self, Error> {
        Self::with_alignment(samples, channels, buffers, DCACHE_LINE_SIZE)
    }

    /// Create a pool of `buffers` buffers, each holding `samples` samples of
    /// `channels` interleaved channels, every buffer starting on an `align`
    /// byte boundary. All buffers start in the write queue.
    pub fn with_alignment(
        samples: usize,
        channels: usize,
        buffers: usize,
        align: usize,
    ) -> Result<Self, Error> {
        if samples == 0 {
            return Err(ConfigError::SampleCount.into());
        }
        if channels == 0 {
            return Err(ConfigError::ChannelCount.into());
        }
        if buffers < MIN_BUFFERS {
            return Err(ConfigError::BufferCount.into());
        }
        if !align.is_power_of_two() {
            return Err(Error::InvalidAlignment(align));
        }
        // Never align below the element type.
        let align = align.max(core::mem::align_of::<T>());

        let payload = samples
            .checked_mul(channels)
            .and_then(|n| n.checked_mul(size_of::<T>()))
            .ok_or(Error::OutOfMemory)?;
        let stride = AlignedStorage::round_up(payload, align).ok_or(Error::OutOfMemory)?;
        let total = stride.checked_mul(buffers).ok_or(Error::OutOfMemory)?;

        let storage = Arc::new(AlignedStorage::allocate(total, align)?);
        let queues = Arc::new(Queues {
            write: BoundedQueue::new(buffers)?,
            ready: BoundedQueue::new(buffers)?,
        });

        for index in 0..buffers {
            // SAFETY: index * stride + payload <= total, so the slot lies
            // inside the allocation; slots are stride apart and stride >=
            // payload, so no two slots overlap. The base is aligned to
            // `align` >= align_of::<T>() and stride is a multiple of it.
            let buf = unsafe {
                let ptr = storage.as_ptr().add(index * stride) as *mut T;
                SampleBuffer::new(
                    storage.clone(),
                    Arc::downgrade(&queues),
                    NonNull::new_unchecked(ptr),
                    samples,
                    channels,
                    index,
                )
            };
            if queues.write.push(buf).is_err() {
                // Queue capacity equals the buffer count.
                unreachable!();
            }
        }

        trace!(
            "pool: {=usize} x {=usize} samples x {=usize} ch, stride {=usize}",
            buffers,
            samples,
            channels,
            stride
        );

        Ok(BufferPool {
            queues,
            storage,
            samples,
            channels,
            buffers,
            stride,
        })
    }

    /// Total number of buffers owned by the pool.
    pub fn buffer_count(&self) -> usize {
        self.buffers
    }

    /// Samples per channel in each buffer.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn alignment(&self) -> usize {
        self.storage.align()
    }

    /// Distance in bytes between consecutive buffers.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Buffers available to a producer.
    pub fn writable(&self) -> usize {
        self.queues.write.len()
    }

    /// Filled buffers waiting for a consumer.
    pub fn readable(&self) -> usize {
        self.queues.ready.len()
    }

    /// Whether `buf` was carved out of this pool.
    pub fn owns(&self, buf: &SampleBuffer<T>) -> bool {
        buf.is_backed_by(&self.storage)
    }

    /// Take a free buffer to fill. Never blocks.
    pub fn allocate(&self) -> Option<SampleBuffer<T>> {
        let mut buf = self.queues.write.pop()?;
        buf.set_flags(BufferFlags::WRITE);
        Some(buf)
    }

    /// Return a buffer to the write queue, clearing its flags.
    ///
    /// Buffers from another pool are handed back in `Err`.
    pub fn release(&self, mut buf: SampleBuffer<T>) -> Result<(), SampleBuffer<T>> {
        if !self.owns(&buf) {
            return Err(buf);
        }
        buf.clear_flags();
        self.queues.write.push(buf)
    }

    /// Publish a filled buffer on the ready queue. Flags are kept.
    ///
    /// Buffers from another pool are handed back in `Err`.
    pub fn enqueue(&self, buf: SampleBuffer<T>) -> Result<(), SampleBuffer<T>> {
        if !self.owns(&buf) {
            return Err(buf);
        }
        self.queues.ready.push(buf)
    }

    /// Take the oldest filled buffer. Never blocks.
    pub fn dequeue(&self) -> Option<SampleBuffer<T>> {
        let mut buf = self.queues.ready.pop()?;
        buf.remove_flags(BufferFlags::WRITE);
        buf.set_flags(BufferFlags::READ);
        Some(buf)
    }

    /// Move every ready buffer back to the write queue, discarding its data.
    ///
    /// Pops the ready queue and pushes the write queue, so the caller must be
    /// the consumer of the former and the producer of the latter, or both
    /// contexts must be quiescent.
    pub fn flush(&self) {
        while let Some(mut buf) = self.queues.ready.pop() {
            buf.clear_flags();
            if self.queues.write.push(buf).is_err() {
                unreachable!();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn new_pool_is_all_writable() {
        let pool: BufferPool<u16> = BufferPool::new(8, 1, 4).unwrap();
        assert_eq!(pool.buffer_count(), 4);
        assert_eq!(pool.writable(), 4);
        assert_eq!(pool.readable(), 0);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(
            BufferPool::<u16>::new(0, 1, 4).err(),
            Some(Error::Config(ConfigError::SampleCount))
        );
        assert_eq!(
            BufferPool::<u16>::new(8, 0, 4).err(),
            Some(Error::Config(ConfigError::ChannelCount))
        );
        assert_eq!(
            BufferPool::<u16>::new(8, 1, 1).err(),
            Some(Error::Config(ConfigError::BufferCount))
        );
        assert_eq!(
            BufferPool::<u16>::with_alignment(8, 1, 2, 12).err(),
            Some(Error::InvalidAlignment(12))
        );
        assert_eq!(
            BufferPool::<u16>::new(usize::MAX, 2, 2).err(),
            Some(Error::OutOfMemory)
        );
    }

    #[test]
    fn every_buffer_is_aligned() {
        for &buffers in &[2usize, 3, 8] {
            for &samples in &[1usize, 17, 256] {
                let pool: BufferPool<u16> = BufferPool::new(samples, 1, buffers).unwrap();
                let mut held = Vec::new();
                while let Some(buf) = pool.allocate() {
                    assert_eq!(buf.as_ptr() as usize % 32, 0);
                    held.push(buf);
                }
                assert_eq!(held.len(), buffers);
            }
        }
    }

    #[test]
    fn buffers_do_not_overlap() {
        let pool: BufferPool<u16> = BufferPool::new(17, 2, 5).unwrap();
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        let mut held = Vec::new();
        while let Some(buf) = pool.allocate() {
            let start = buf.as_ptr() as usize;
            ranges.push((start, start + buf.bytes()));
            held.push(buf);
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
        let base = ranges[0].0;
        let end = ranges[ranges.len() - 1].1;
        assert!(end - base <= pool.stride() * pool.buffer_count());
    }

    #[test]
    fn round_trip_pattern() {
        let pool: BufferPool<u16> = BufferPool::new(8, 1, 4).unwrap();
        let mut a = pool.allocate().unwrap();
        for (i, s) in a.iter_mut().enumerate() {
            *s = i as u16;
        }
        a.flush_for_device();
        pool.enqueue(a).unwrap();

        let mut back = pool.dequeue().unwrap();
        back.invalidate_for_cpu();
        assert_eq!(&back[..], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn fifo_order_preserved() {
        let pool: BufferPool<u32> = BufferPool::new(4, 1, 6).unwrap();
        for seq in 0..6u64 {
            let mut buf = pool.allocate().unwrap();
            buf.set_timestamp(seq);
            pool.enqueue(buf).unwrap();
        }
        for seq in 0..6u64 {
            let buf = pool.dequeue().unwrap();
            assert_eq!(buf.timestamp(), seq);
            pool.release(buf).unwrap();
        }
    }

    #[test]
    fn role_flags_follow_queues() {
        let pool: BufferPool<u16> = BufferPool::new(4, 2, 2).unwrap();
        let mut buf = pool.allocate().unwrap();
        assert!(buf.flags().contains(BufferFlags::WRITE));
        buf.set_flags(BufferFlags::DISCONTINUOUS);
        pool.enqueue(buf).unwrap();

        let buf = pool.dequeue().unwrap();
        assert!(buf.flags().contains(BufferFlags::READ));
        assert!(!buf.flags().contains(BufferFlags::WRITE));
        assert!(buf.is_discontinuous());

        pool.release(buf).unwrap();
        let buf = pool.allocate().unwrap();
        let buf2 = pool.allocate().unwrap();
        // Whichever slot we got back, stale status is gone.
        assert!(!buf.is_discontinuous());
        assert!(!buf2.is_discontinuous());
    }

    #[test]
    fn conservation_across_moves() {
        let pool: BufferPool<u16> = BufferPool::new(8, 1, 4).unwrap();
        let mut held = Vec::new();
        let check = |held: &Vec<SampleBuffer<u16>>| {
            assert_eq!(pool.writable() + pool.readable() + held.len(), 4);
        };

        held.push(pool.allocate().unwrap());
        held.push(pool.allocate().unwrap());
        check(&held);
        pool.enqueue(held.pop().unwrap()).unwrap();
        check(&held);
        held.push(pool.dequeue().unwrap());
        check(&held);
        pool.release(held.pop().unwrap()).unwrap();
        check(&held);
        pool.enqueue(held.pop().unwrap()).unwrap();
        check(&held);
        assert_eq!(pool.writable(), 3);
        assert_eq!(pool.readable(), 1);
    }

    #[test]
    fn no_buffer_issued_twice() {
        let pool: BufferPool<u16> = BufferPool::new(4, 1, 4).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.enqueue(a).unwrap();
        let c = pool.allocate().unwrap();
        let d = pool.dequeue().unwrap();
        let e = pool.allocate().unwrap();
        let mut idx = [b.index(), c.index(), d.index(), e.index()];
        idx.sort();
        assert_eq!(idx, [0, 1, 2, 3]);
        assert!(pool.allocate().is_none());
        assert!(pool.dequeue().is_none());
    }

    #[test]
    fn flush_returns_ready_buffers() {
        let pool: BufferPool<u16> = BufferPool::new(4, 1, 4).unwrap();
        for _ in 0..3 {
            let buf = pool.allocate().unwrap();
            pool.enqueue(buf).unwrap();
        }
        assert_eq!(pool.readable(), 3);
        pool.flush();
        assert_eq!(pool.readable(), 0);
        assert_eq!(pool.writable(), 4);
        let buf = pool.allocate().unwrap();
        assert_eq!(buf.flags(), BufferFlags::WRITE);
    }

    #[test]
    fn foreign_buffers_are_rejected() {
        let a: BufferPool<u16> = BufferPool::new(4, 1, 2).unwrap();
        let b: BufferPool<u16> = BufferPool::new(4, 1, 2).unwrap();
        let buf = a.allocate().unwrap();
        assert!(!b.owns(&buf));
        let buf = b.release(buf).unwrap_err();
        let buf = b.enqueue(buf).unwrap_err();
        assert!(a.owns(&buf));
        a.release(buf).unwrap();
        assert_eq!(b.writable(), 2);
        assert_eq!(a.writable(), 2);
    }

    #[test]
    fn buffer_outlives_pool() {
        let pool: BufferPool<u16> = BufferPool::new(4, 1, 2).unwrap();
        let mut buf = pool.allocate().unwrap();
        drop(pool);
        buf.fill(7);
        assert!(buf.iter().all(|&s| s == 7));
    }

    #[test]
    fn concurrent_producer_consumer() {
        extern crate std;
        const ROUNDS: u64 = 5_000;

        let pool: BufferPool<u32> = BufferPool::new(16, 1, 4).unwrap();

        std::thread::scope(|s| {
            // Producer: allocate, stamp, enqueue.
            s.spawn(|| {
                let mut seq = 0;
                while seq < ROUNDS {
                    if let Some(mut buf) = pool.allocate() {
                        buf.fill(seq as u32);
                        buf.set_timestamp(seq);
                        pool.enqueue(buf).unwrap();
                        seq += 1;
                    } else {
                        core::hint::spin_loop();
                    }
                }
            });

            // Consumer: dequeue in order, check payload, release.
            let mut expected = 0;
            while expected < ROUNDS {
                if let Some(buf) = pool.dequeue() {
                    assert_eq!(buf.timestamp(), expected);
                    assert!(buf.iter().all(|&s| s == expected as u32));
                    pool.release(buf).unwrap();
                    expected += 1;
                } else {
                    core::hint::spin_loop();
                }
            }
        });

        assert_eq!(pool.writable(), 4);
    }
}
