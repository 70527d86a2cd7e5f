//! Multi-channel ADC input.
//!
//! [`AdvancedAdc`] samples up to [`MAX_ADC_CHANNELS`] inputs of one ADC
//! instance in a scan sequence, paced by a trigger timer. Each buffer holds
//! `samples` frames of one reading per channel, interleaved.
//!
//! ## Usage
//!
//! ```ignore
//! static ADCS: ChannelRegistry<AdcInstance> = ChannelRegistry::new();
//!
//! let adc = AdvancedAdc::new(&ADCS, adc1_dma, &[
//!     AdcPin::new(AdcInstance::Adc1, 4),
//!     AdcPin::new(AdcInstance::Adc1, 5),
//! ]);
//! adc.begin(Resolution::Bits12, 16_000, 32, 8)?;
//!
//! // DMA interrupt:
//! adc.on_transfer_complete(ticks());
//!
//! // Main loop:
//! if adc.available() > 0 {
//!     let buf = adc.read()?;
//!     for frame in buf.frames() { /* frame[0] = pin 4, frame[1] = pin 5 */ }
//!     adc.release(buf)?;
//! }
//! ```

use core::cell::Cell;

use critical_section::Mutex;

use crate::buffer::SampleBuffer;
use crate::config::{Direction, Resolution, StreamConfig};
use crate::constants::MAX_ADC_CHANNELS;
use crate::error::{ConfigError, Error};
use crate::hal::{DoubleBufferDma, StreamSetup};
use crate::registry::{AdcInstance, ChannelRegistry, HardwareId};

use super::double_buffer::{Completion, DoubleBuffer, StreamState, StreamStats};

#[cfg(feature = "embedded-hal")]
use embedded_hal::delay::DelayNs;

/// An analog input: the ADC instance it is routed to and its channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcPin {
    pub instance: AdcInstance,
    pub channel: u8,
}

impl AdcPin {
    pub const fn new(instance: AdcInstance, channel: u8) -> Self {
        AdcPin { instance, channel }
    }
}

/// DMA-driven ADC scan over one or more inputs.
pub struct AdvancedAdc<'r, D: DoubleBufferDma> {
    registry: &'r ChannelRegistry<AdcInstance>,
    pins: [Option<AdcPin>; MAX_ADC_CHANNELS],
    /// Number of pins passed to `new`, which may exceed what is stored.
    pin_count: usize,
    claimed: Mutex<Cell<Option<AdcInstance>>>,
    stream: DoubleBuffer<u16, D>,
}

impl<'r, D: DoubleBufferDma> AdvancedAdc<'r, D> {
    /// Bind `pins` to a DMA stream. Nothing is checked or programmed until
    /// [`begin()`](Self::begin).
    pub const fn new(registry: &'r ChannelRegistry<AdcInstance>, dma: D, pins: &[AdcPin]) -> Self {
        let mut stored = [None; MAX_ADC_CHANNELS];
        let mut i = 0;
        while i < pins.len() && i < MAX_ADC_CHANNELS {
            stored[i] = Some(pins[i]);
            i += 1;
        }
        AdvancedAdc {
            registry,
            pins: stored,
            pin_count: pins.len(),
            claimed: Mutex::new(Cell::new(None)),
            stream: DoubleBuffer::new(dma, Direction::Input),
        }
    }

    /// Number of inputs sampled per frame.
    pub fn channels(&self) -> usize {
        self.pin_count
    }

    /// The ADC instance all pins share.
    fn instance(&self) -> Result<AdcInstance, Error> {
        if self.pin_count == 0 {
            return Err(ConfigError::MissingPin.into());
        }
        if self.pin_count > MAX_ADC_CHANNELS {
            return Err(ConfigError::ChannelCount.into());
        }
        let mut pins = self.pins.iter().flatten();
        let first = pins.next().ok_or(ConfigError::MissingPin)?.instance;
        if pins.any(|p| p.instance != first) {
            return Err(ConfigError::PinMismatch.into());
        }
        Ok(first)
    }

    /// Start sampling with a single-pin-style argument list.
    pub fn begin(
        &self,
        resolution: Resolution,
        sample_rate: u32,
        samples: usize,
        buffers: usize,
    ) -> Result<(), Error> {
        self.begin_with(StreamConfig::new(resolution, sample_rate, samples, buffers))
    }

    /// Validate, claim the ADC instance, create the pool and start sampling.
    ///
    /// The channel count of `config` is taken from the pins.
    pub fn begin_with(&self, config: StreamConfig) -> Result<(), Error> {
        if self.is_active() {
            return Err(Error::AlreadyStarted);
        }
        let instance = self.instance()?;
        let config = config.with_channels(self.pin_count);
        config.validate()?;

        let mut channels = [0u8; MAX_ADC_CHANNELS];
        for (dst, pin) in channels.iter_mut().zip(self.pins.iter().flatten()) {
            *dst = pin.channel;
        }
        let setup = StreamSetup {
            instance: instance.index(),
            channels: &channels[..self.pin_count],
            resolution: config.resolution,
            sample_rate: config.sample_rate,
            direction: Direction::Input,
            master_clock: false,
        };

        self.registry.claim(instance)?;
        if let Err(e) = self.stream.begin(&config, &setup) {
            self.registry.release(instance);
            return Err(e);
        }
        critical_section::with(|cs| self.claimed.borrow(cs).set(Some(instance)));
        Ok(())
    }

    /// Start an ADC begun with a deferred start. Several ADCs armed this way
    /// can be started back to back to sample in step.
    pub fn start(&self) -> Result<(), Error> {
        self.stream.start()
    }

    /// Stop sampling and give the ADC instance back.
    pub fn stop(&self) {
        self.stream.stop();
        if let Some(instance) = critical_section::with(|cs| self.claimed.borrow(cs).take()) {
            self.registry.release(instance);
        }
    }

    /// Drop every buffer not yet read.
    pub fn clear(&self) {
        self.stream.clear();
    }

    pub fn is_active(&self) -> bool {
        critical_section::with(|cs| self.claimed.borrow(cs).get().is_some())
    }

    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn stats(&self) -> StreamStats {
        self.stream.stats()
    }

    /// Filled buffers waiting to be read.
    pub fn available(&self) -> usize {
        self.stream.available()
    }

    pub fn try_read(&self) -> Result<Option<SampleBuffer<u16>>, Error> {
        self.stream.try_read()
    }

    /// Wait for the next filled buffer.
    pub fn read(&self) -> Result<SampleBuffer<u16>, Error> {
        self.stream.read()
    }

    #[cfg(feature = "embedded-hal")]
    pub fn read_timeout(
        &self,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<u16>, Error> {
        self.stream.read_timeout(delay, timeout_us)
    }

    pub fn release(&self, buf: SampleBuffer<u16>) -> Result<(), Error> {
        self.stream.release(buf)
    }

    /// DMA transfer-complete interrupt entry point.
    pub fn on_transfer_complete(&self, now: u64) -> Completion {
        self.stream.on_transfer_complete(now)
    }

    /// The underlying stream.
    pub fn stream(&self) -> &DoubleBuffer<u16, D> {
        &self.stream
    }
}

impl<D: DoubleBufferDma> Drop for AdvancedAdc<'_, D> {
    fn drop(&mut self) {
        self.stop();
    }
}
