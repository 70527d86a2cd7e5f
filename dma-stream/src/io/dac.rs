//! Single-channel DAC output.
//!
//! [`AdvancedDac`] drives one DAC channel from queued buffers, paced by a
//! trigger timer. The application takes a free buffer with
//! [`dequeue()`](AdvancedDac::dequeue), fills it and hands it back with
//! [`write()`](AdvancedDac::write). Output starts once two buffers are queued.
//!
//! If the queue runs dry the channel stops rather than replay stale samples.
//! It restarts by itself after two more writes.
//!
//! ```ignore
//! static DACS: ChannelRegistry<DacChannel> = ChannelRegistry::new();
//!
//! let dac = AdvancedDac::new(&DACS, dac1_dma, DacChannel::Channel1);
//! dac.begin(Resolution::Bits12, 32_000, 64, 4)?;
//!
//! loop {
//!     let mut buf = dac.dequeue()?;
//!     synth.render(&mut buf);
//!     dac.write(buf)?;
//! }
//! ```

use core::cell::Cell;

use critical_section::Mutex;

use crate::buffer::SampleBuffer;
use crate::config::{Direction, Resolution, StreamConfig};
use crate::constants::{DAC_TIMER_BASE_HZ, MAX_DAC_CHANNELS};
use crate::error::{ConfigError, Error};
use crate::hal::{DoubleBufferDma, StreamSetup};
use crate::registry::{ChannelRegistry, DacChannel, HardwareId};

use super::double_buffer::{Completion, DoubleBuffer, StreamState, StreamStats};

#[cfg(feature = "embedded-hal")]
use embedded_hal::delay::DelayNs;

/// DMA-driven DAC output.
pub struct AdvancedDac<'r, D: DoubleBufferDma> {
    registry: &'r ChannelRegistry<DacChannel>,
    channel: DacChannel,
    active: Mutex<Cell<bool>>,
    stream: DoubleBuffer<u16, D>,
}

impl<'r, D: DoubleBufferDma> AdvancedDac<'r, D> {
    pub const fn new(registry: &'r ChannelRegistry<DacChannel>, dma: D, channel: DacChannel) -> Self {
        AdvancedDac {
            registry,
            channel,
            active: Mutex::new(Cell::new(false)),
            stream: DoubleBuffer::new(dma, Direction::Output),
        }
    }

    pub fn channel(&self) -> DacChannel {
        self.channel
    }

    pub fn begin(
        &self,
        resolution: Resolution,
        sample_rate: u32,
        samples: usize,
        buffers: usize,
    ) -> Result<(), Error> {
        self.begin_with(StreamConfig::new(resolution, sample_rate, samples, buffers))
    }

    /// Validate, claim the channel, create the pool and configure the timer.
    pub fn begin_with(&self, config: StreamConfig) -> Result<(), Error> {
        if self.is_active() {
            return Err(Error::AlreadyStarted);
        }
        if config.channels != MAX_DAC_CHANNELS {
            return Err(ConfigError::ChannelCount.into());
        }
        if !matches!(config.resolution, Resolution::Bits8 | Resolution::Bits12) {
            return Err(ConfigError::Resolution.into());
        }
        // The timer divides a fixed base clock by the rate.
        if config.sample_rate == 0 || config.sample_rate > DAC_TIMER_BASE_HZ {
            return Err(ConfigError::SampleRate.into());
        }
        config.validate()?;

        let channels = [self.channel.index() as u8];
        let setup = StreamSetup {
            instance: self.channel.index(),
            channels: &channels,
            resolution: config.resolution,
            sample_rate: config.sample_rate,
            direction: Direction::Output,
            master_clock: false,
        };

        self.registry.claim(self.channel)?;
        if let Err(e) = self.stream.begin(&config, &setup) {
            self.registry.release(self.channel);
            return Err(e);
        }
        critical_section::with(|cs| self.active.borrow(cs).set(true));
        Ok(())
    }

    /// Start output begun with a deferred start.
    pub fn start(&self) -> Result<(), Error> {
        self.stream.start()
    }

    /// Stop output, return all buffers and give the channel back.
    pub fn stop(&self) {
        self.stream.stop();
        if critical_section::with(|cs| self.active.borrow(cs).replace(false)) {
            self.registry.release(self.channel);
        }
    }

    /// Drop every queued buffer that has not been played yet.
    pub fn clear(&self) {
        self.stream.clear();
    }

    pub fn is_active(&self) -> bool {
        critical_section::with(|cs| self.active.borrow(cs).get())
    }

    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn stats(&self) -> StreamStats {
        self.stream.stats()
    }

    /// Free buffers ready to be filled.
    pub fn available(&self) -> usize {
        self.stream.available()
    }

    pub fn try_dequeue(&self) -> Result<Option<SampleBuffer<u16>>, Error> {
        self.stream.try_dequeue()
    }

    /// Wait for a free buffer.
    pub fn dequeue(&self) -> Result<SampleBuffer<u16>, Error> {
        self.stream.dequeue()
    }

    #[cfg(feature = "embedded-hal")]
    pub fn dequeue_timeout(
        &self,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<u16>, Error> {
        self.stream.dequeue_timeout(delay, timeout_us)
    }

    /// Return a dequeued buffer that will not be written.
    pub fn discard(&self, buf: SampleBuffer<u16>) -> Result<(), Error> {
        self.stream.discard(buf)
    }

    /// Queue a filled buffer.
    ///
    /// When the queue runs dry the transfer stops and the block still
    /// playing is cut off; see [`Completion::Underrun`].
    pub fn write(&self, buf: SampleBuffer<u16>) -> Result<(), Error> {
        self.stream.write(buf)
    }

    /// DMA transfer-complete interrupt entry point.
    pub fn on_transfer_complete(&self) -> Completion {
        self.stream.on_transfer_complete(0)
    }

    pub fn stream(&self) -> &DoubleBuffer<u16, D> {
        &self.stream
    }
}

impl<D: DoubleBufferDma> Drop for AdvancedDac<'_, D> {
    fn drop(&mut self) {
        self.stop();
    }
}
