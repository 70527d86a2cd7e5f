//! Double-buffered DMA stream driver.
//!
//! [`DoubleBuffer`] owns one DMA stream in ping-pong mode and the
//! [`BufferPool`] that feeds it. Two pool buffers are bound to the two DMA
//! targets at any time while the stream runs; every transfer-complete
//! interrupt swaps the finished one for a fresh one.
//!
//! ## States
//!
//! ```text
//!          begin()                start() / primed            stop()
//! Idle ─────────────► Armed ──────────────────────► Streaming ──────► Idle
//!                       ▲                                │
//!                       └────────── output underrun ─────┘
//! ```
//!
//! - **Input** (`begin` binds two buffers straight away): each completion moves
//!   the finished buffer to the ready queue. If no free buffer is left the
//!   finished buffer stays bound, is flagged
//!   [`DISCONTINUOUS`](BufferFlags::DISCONTINUOUS), and the DMA overwrites it.
//! - **Output** (`begin` binds nothing): the stream is primed once the
//!   application has queued
//!   [`prime_depth`](StreamConfig::prime_depth) buffers (two by default) with
//!   [`write()`](DoubleBuffer::write). Two are bound, the rest stay queued.
//!   If the ready queue is empty at a completion the transfer stops and both
//!   bound buffers return to the pool, including the one that was still
//!   playing; the next `prime_depth` writes restart it.
//!
//! A buffer the application drops instead of handing back goes to the write
//! queue by itself; [`discard()`](DoubleBuffer::discard) does the same and
//! reports buffers of another stream.
//!
//! ## Contexts
//!
//! `on_transfer_complete` runs in the DMA interrupt. Everything else runs in
//! application context. The descriptor (DMA handle, bound buffers, state) sits
//! behind a `critical_section::Mutex`; pool queues are used lock-free.
//!
//! ```ignore
//! static ADC_STREAM: DoubleBuffer<u16, Dma1Stream0> =
//!     DoubleBuffer::new(Dma1Stream0::new(), Direction::Input);
//!
//! #[interrupt]
//! fn DMA1_STR0() {
//!     ADC_STREAM.on_transfer_complete(ticks());
//! }
//! ```

use alloc::sync::Arc;
use core::cell::RefCell;

use critical_section::Mutex;

use crate::buffer::{BufferFlags, BufferPool, Sample, SampleBuffer};
use crate::config::{Direction, StreamConfig};
use crate::constants::MIN_BUFFERS;
use crate::error::Error;
use crate::hal::{self, DoubleBufferDma, StreamSetup};

#[cfg(feature = "embedded-hal")]
use crate::constants::TIMEOUT_POLL_US;
#[cfg(feature = "embedded-hal")]
use embedded_hal::delay::DelayNs;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// No pool, nothing bound.
    Idle,
    /// Pool created and DMA configured; the trigger is not running.
    Armed,
    /// Trigger running, completions expected.
    Streaming,
}

/// Outcome of one transfer-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Input: the filled buffer was queued and replaced.
    Delivered,
    /// Input: no free buffer; the finished buffer stays bound and is flagged.
    Overrun,
    /// Output: the drained buffer was returned and the next one bound.
    Consumed,
    /// Output: nothing queued; the transfer was stopped.
    ///
    /// The buffer bound to the other target had not finished playing. It is
    /// returned to the pool with the drained one, so the rest of that block
    /// is never sent.
    Underrun,
    /// The stream was not streaming. Nothing changed.
    Ignored,
}

/// Event counters, reset by `begin()`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamStats {
    pub completions: u32,
    pub overruns: u32,
    pub underruns: u32,
}

struct Inner<T: Sample, D> {
    dma: D,
    pool: Option<Arc<BufferPool<T>>>,
    /// Buffers bound to DMA target 0 and 1.
    targets: [Option<SampleBuffer<T>>; 2],
    state: StreamState,
    /// Start the trigger as soon as both targets are bound.
    run: bool,
    /// Output buffers queued before the transfer is armed.
    prime: usize,
    interleaved: bool,
    stats: StreamStats,
    callback: Option<fn(Completion)>,
}

impl<T: Sample, D: DoubleBufferDma> Inner<T, D> {
    fn in_flight(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    /// Return bound buffers to the write queue.
    fn unbind(&mut self) {
        for target in self.targets.iter_mut() {
            if let (Some(buf), Some(pool)) = (target.take(), self.pool.as_ref()) {
                let _ = pool.release(buf);
            }
        }
    }

    fn teardown(&mut self) {
        self.dma.stop();
        self.unbind();
        self.pool = None;
        self.state = StreamState::Idle;
    }

    /// Take two buffers from `take`, or none at all.
    fn take_pair(
        &self,
        take: fn(&BufferPool<T>) -> Option<SampleBuffer<T>>,
    ) -> Option<(SampleBuffer<T>, SampleBuffer<T>)> {
        let pool = self.pool.as_ref()?;
        let first = take(pool)?;
        match take(pool) {
            Some(second) => Some((first, second)),
            None => {
                let _ = pool.release(first);
                None
            }
        }
    }

    /// Program both targets. If the hardware refuses, the buffers are handed
    /// back untouched.
    fn bind(
        &mut self,
        first: SampleBuffer<T>,
        second: SampleBuffer<T>,
    ) -> Result<(), (SampleBuffer<T>, SampleBuffer<T>)> {
        if self.dma.arm(first.dma_target(), second.dma_target()).is_err() {
            return Err((first, second));
        }
        self.targets = [Some(first), Some(second)];
        self.state = StreamState::Armed;
        Ok(())
    }

    fn launch_if_running(&mut self) -> Result<(), Error> {
        if self.run {
            self.launch()
        } else {
            Ok(())
        }
    }

    fn launch(&mut self) -> Result<(), Error> {
        if self.dma.start().is_err() {
            self.dma.stop();
            return Err(Error::Hardware);
        }
        self.state = StreamState::Streaming;
        Ok(())
    }

    fn prime_input(&mut self) -> Result<(), Error> {
        let (mut first, mut second) = self
            .take_pair(BufferPool::allocate)
            .ok_or(Error::OutOfMemory)?;
        if self.interleaved {
            first.set_flags(BufferFlags::INTERLEAVED);
            second.set_flags(BufferFlags::INTERLEAVED);
        }
        if let Err((first, second)) = self.bind(first, second) {
            if let Some(pool) = self.pool.as_ref() {
                let _ = pool.release(first);
                let _ = pool.release(second);
            }
            return Err(Error::Hardware);
        }
        self.launch_if_running()
    }

    fn prime_output(&mut self) -> Result<(), Error> {
        if self.state != StreamState::Armed || self.in_flight() != 0 {
            return Ok(());
        }
        match self.pool.as_ref() {
            Some(pool) if pool.readable() >= self.prime => {}
            _ => return Ok(()),
        }
        let Some((first, second)) = self.take_pair(BufferPool::dequeue) else {
            return Ok(());
        };
        match self.bind(first, second) {
            Ok(()) => self.launch_if_running(),
            Err((first, second)) => {
                self.requeue(first, second);
                warn!("stream: arm failed, output kept queued");
                Err(Error::Hardware)
            }
        }
    }

    /// Put two dequeued output buffers back at the head of the ready queue,
    /// ahead of everything written after them.
    fn requeue(&self, first: SampleBuffer<T>, second: SampleBuffer<T>) {
        let Some(pool) = self.pool.as_ref() else {
            return;
        };
        let behind = pool.readable();
        for buf in [first, second] {
            if pool.enqueue(buf).is_err() {
                unreachable!();
            }
        }
        for _ in 0..behind {
            if let Some(buf) = pool.dequeue() {
                if pool.enqueue(buf).is_err() {
                    unreachable!();
                }
            }
        }
    }

    fn complete_input(&mut self, now: u64) -> Completion {
        // The hardware has already switched; the other target just finished.
        let slot = self.dma.current_target().other();
        let Some(pool) = self.pool.as_ref() else {
            return Completion::Ignored;
        };
        let target = &mut self.targets[slot.index()];
        let Some(mut done) = target.take() else {
            return Completion::Ignored;
        };
        done.set_timestamp(now);

        match pool.allocate() {
            Some(mut fresh) => {
                if self.interleaved {
                    fresh.set_flags(BufferFlags::INTERLEAVED);
                }
                self.dma.set_target(slot, fresh.dma_target());
                *target = Some(fresh);

                done.invalidate_for_cpu();
                if pool.enqueue(done).is_err() {
                    // The ready queue can hold every buffer of the pool.
                    unreachable!();
                }
                Completion::Delivered
            }
            None => {
                // Leave the target pointing at the same memory.
                done.set_flags(BufferFlags::DISCONTINUOUS);
                *target = Some(done);
                self.stats.overruns = self.stats.overruns.wrapping_add(1);
                trace!("stream: overrun on target {=usize}", slot.index());
                Completion::Overrun
            }
        }
    }

    fn complete_output(&mut self) -> Completion {
        let slot = self.dma.current_target().other();
        let Some(pool) = self.pool.as_ref() else {
            return Completion::Ignored;
        };

        match pool.dequeue() {
            Some(next) => {
                self.dma.set_target(slot, next.dma_target());
                if let Some(done) = self.targets[slot.index()].replace(next) {
                    let _ = pool.release(done);
                }
                Completion::Consumed
            }
            None => {
                self.dma.stop();
                self.unbind();
                self.state = StreamState::Armed;
                self.stats.underruns = self.stats.underruns.wrapping_add(1);
                warn!("stream: underrun, transfer stopped");
                Completion::Underrun
            }
        }
    }
}

/// One DMA stream in double-buffer mode together with its buffer pool.
pub struct DoubleBuffer<T: Sample, D: DoubleBufferDma> {
    direction: Direction,
    inner: Mutex<RefCell<Inner<T, D>>>,
}

impl<T: Sample, D: DoubleBufferDma> DoubleBuffer<T, D> {
    pub const fn new(dma: D, direction: Direction) -> Self {
        DoubleBuffer {
            direction,
            inner: Mutex::new(RefCell::new(Inner {
                dma,
                pool: None,
                targets: [None, None],
                state: StreamState::Idle,
                run: false,
                prime: MIN_BUFFERS,
                interleaved: false,
                stats: StreamStats {
                    completions: 0,
                    overruns: 0,
                    underruns: 0,
                },
                callback: None,
            })),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Create the pool, configure the hardware and, for input streams, bind
    /// the first two buffers.
    ///
    /// Configuration is checked before anything is allocated or programmed.
    /// On failure the stream is left `Idle`.
    pub fn begin(&self, config: &StreamConfig, setup: &StreamSetup<'_>) -> Result<(), Error> {
        config.validate()?;
        if self.state() != StreamState::Idle {
            return Err(Error::AlreadyStarted);
        }

        let pool = Arc::new(BufferPool::with_alignment(
            config.samples,
            config.channels,
            config.buffers,
            config.alignment,
        )?);

        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.state != StreamState::Idle {
                return Err(Error::AlreadyStarted);
            }
            inner.dma.configure(setup).map_err(|_| Error::Hardware)?;

            inner.pool = Some(pool);
            inner.stats = StreamStats::default();
            inner.run = config.start_on_begin;
            inner.prime = config.prime_depth;
            inner.interleaved = config.channels > 1;

            let result = match self.direction {
                Direction::Input => inner.prime_input(),
                Direction::Output => {
                    inner.state = StreamState::Armed;
                    Ok(())
                }
            };
            if result.is_err() {
                inner.teardown();
            }
            result
        })
        .inspect_err(|_e| warn!("stream: begin failed"))?;

        debug!(
            "stream: begin {=usize} x {=usize} samples at {=u32} Hz",
            config.buffers,
            config.samples,
            config.sample_rate
        );
        Ok(())
    }

    /// Start the trigger of an armed stream.
    ///
    /// Needed only when the configuration used
    /// [`deferred_start`](StreamConfig::deferred_start). An output stream that
    /// is not primed yet starts as soon as it is.
    pub fn start(&self) -> Result<(), Error> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            match inner.state {
                StreamState::Idle => Err(Error::NotStarted),
                StreamState::Streaming => Err(Error::AlreadyStarted),
                StreamState::Armed => {
                    inner.run = true;
                    if inner.in_flight() == 2 {
                        inner.launch()
                    } else {
                        Ok(())
                    }
                }
            }
        })
    }

    /// Halt the hardware, return bound buffers and drop the pool.
    ///
    /// Safe to call at any time, including mid-transfer and when already idle.
    /// Buffers the application still holds stay valid until dropped.
    pub fn stop(&self) {
        let stopped = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let was_running = inner.state != StreamState::Idle;
            inner.teardown();
            was_running
        });
        if stopped {
            debug!("stream: stopped");
        }
    }

    /// Discard every buffer waiting in the ready queue.
    pub fn clear(&self) {
        critical_section::with(|cs| {
            if let Some(pool) = self.inner.borrow_ref(cs).pool.as_ref() {
                pool.flush();
            }
        });
    }

    pub fn state(&self) -> StreamState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).state)
    }

    /// Whether `begin()` succeeded and `stop()` has not been called since.
    pub fn is_active(&self) -> bool {
        self.state() != StreamState::Idle
    }

    /// Whether the DMA transfer is running. False while armed, including
    /// after an output underrun.
    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    pub fn stats(&self) -> StreamStats {
        critical_section::with(|cs| self.inner.borrow_ref(cs).stats)
    }

    /// Buffers currently bound to DMA targets (0, 1 or 2).
    pub fn in_flight(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).in_flight())
    }

    /// Shared handle to the current pool.
    pub fn pool(&self) -> Option<Arc<BufferPool<T>>> {
        critical_section::with(|cs| self.inner.borrow_ref(cs).pool.clone())
    }

    /// Function called from interrupt context after every handled completion.
    pub fn set_callback(&self, callback: Option<fn(Completion)>) {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).callback = callback);
    }

    /// Run `f` with exclusive access to the DMA handle.
    pub fn with_dma<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).dma))
    }

    /// Transfer-complete interrupt entry point.
    ///
    /// `now` is stored as the timestamp of a finished input buffer. Never
    /// blocks and never allocates.
    pub fn on_transfer_complete(&self, now: u64) -> Completion {
        let (completion, callback) = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.state != StreamState::Streaming {
                return (Completion::Ignored, None);
            }
            inner.stats.completions = inner.stats.completions.wrapping_add(1);
            let completion = match self.direction {
                Direction::Input => inner.complete_input(now),
                Direction::Output => inner.complete_output(),
            };
            (completion, inner.callback)
        });
        if let Some(callback) = callback {
            callback(completion);
        }
        completion
    }

    /// Input: filled buffers waiting. Output: free buffers to fill.
    pub fn available(&self) -> usize {
        match (self.pool(), self.direction) {
            (Some(pool), Direction::Input) => pool.readable(),
            (Some(pool), Direction::Output) => pool.writable(),
            (None, _) => 0,
        }
    }

    fn pool_for(&self, direction: Direction) -> Result<Arc<BufferPool<T>>, Error> {
        if self.direction != direction {
            return Err(Error::WrongDirection);
        }
        self.pool().ok_or(Error::NotStarted)
    }

    fn wait(
        &self,
        direction: Direction,
        take: fn(&BufferPool<T>) -> Option<SampleBuffer<T>>,
    ) -> Result<SampleBuffer<T>, Error> {
        let pool = self.pool_for(direction)?;
        loop {
            if let Some(buf) = take(&pool) {
                return Ok(buf);
            }
            if !self.is_active() {
                return Err(Error::NotStarted);
            }
            hal::wait_for_interrupt();
        }
    }

    #[cfg(feature = "embedded-hal")]
    fn wait_timeout(
        &self,
        direction: Direction,
        take: fn(&BufferPool<T>) -> Option<SampleBuffer<T>>,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<T>, Error> {
        let pool = self.pool_for(direction)?;
        let mut waited = 0u32;
        loop {
            if let Some(buf) = take(&pool) {
                return Ok(buf);
            }
            if !self.is_active() {
                return Err(Error::NotStarted);
            }
            if waited >= timeout_us {
                return Err(Error::Timeout);
            }
            delay.delay_us(TIMEOUT_POLL_US);
            waited = waited.saturating_add(TIMEOUT_POLL_US);
        }
    }

    // --- input side ---

    /// Take the oldest filled buffer, if any.
    pub fn try_read(&self) -> Result<Option<SampleBuffer<T>>, Error> {
        Ok(self.pool_for(Direction::Input)?.dequeue())
    }

    /// Wait for a filled buffer. Application context only.
    pub fn read(&self) -> Result<SampleBuffer<T>, Error> {
        self.wait(Direction::Input, BufferPool::dequeue)
    }

    /// Like [`read()`](Self::read), giving up after `timeout_us`.
    #[cfg(feature = "embedded-hal")]
    pub fn read_timeout(
        &self,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<T>, Error> {
        self.wait_timeout(Direction::Input, BufferPool::dequeue, delay, timeout_us)
    }

    /// Hand a consumed buffer back to the pool.
    ///
    /// A buffer from an earlier session is simply dropped. A buffer from
    /// another stream is reported as [`Error::ForeignBuffer`] and goes back
    /// to its own pool.
    pub fn release(&self, buf: SampleBuffer<T>) -> Result<(), Error> {
        if self.direction != Direction::Input {
            return Err(Error::WrongDirection);
        }
        match self.pool() {
            Some(pool) => pool.release(buf).map_err(|_| Error::ForeignBuffer),
            None => Ok(()),
        }
    }

    /// Give a buffer back without using it, for either direction.
    ///
    /// An output buffer taken with [`dequeue()`](Self::dequeue) that will not
    /// be written returns to the free queue; so does an input buffer that will
    /// not be processed. Dropping the buffer has the same effect, but only
    /// this call reports a buffer of another stream.
    pub fn discard(&self, buf: SampleBuffer<T>) -> Result<(), Error> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        // An output stream's interrupt handler pushes the same queue.
        critical_section::with(|_| pool.release(buf)).map_err(|_| Error::ForeignBuffer)
    }

    // --- output side ---

    /// Take a free buffer to fill, if any.
    pub fn try_dequeue(&self) -> Result<Option<SampleBuffer<T>>, Error> {
        Ok(self.pool_for(Direction::Output)?.allocate())
    }

    /// Wait for a free buffer. Application context only.
    pub fn dequeue(&self) -> Result<SampleBuffer<T>, Error> {
        self.wait(Direction::Output, BufferPool::allocate)
    }

    /// Like [`dequeue()`](Self::dequeue), giving up after `timeout_us`.
    #[cfg(feature = "embedded-hal")]
    pub fn dequeue_timeout(
        &self,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<T>, Error> {
        self.wait_timeout(Direction::Output, BufferPool::allocate, delay, timeout_us)
    }

    /// Queue a filled buffer for transmission.
    ///
    /// Binds and starts the transfer once
    /// [`prime_depth`](StreamConfig::prime_depth) buffers are queued, both
    /// after `begin()` and after an underrun. An underrun cuts off the block
    /// that was playing at the time; see [`Completion::Underrun`].
    ///
    /// If the hardware refuses to arm, the queued buffers stay in the ready
    /// queue in order and [`Error::Hardware`] is returned.
    pub fn write(&self, buf: SampleBuffer<T>) -> Result<(), Error> {
        let pool = self.pool_for(Direction::Output)?;
        buf.flush_for_device();
        pool.enqueue(buf).map_err(|_| Error::ForeignBuffer)?;
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).prime_output())
    }
}

impl<T: Sample, D: DoubleBufferDma> Drop for DoubleBuffer<T, D> {
    fn drop(&mut self) {
        self.inner.get_mut().get_mut().teardown();
    }
}
