//! Stream configuration.
//!
//! [`StreamConfig`] carries everything the generic double-buffer engine needs
//! (buffer geometry, rate, resolution, start policy). Peripheral front-ends
//! apply their own, narrower bounds on top of [`StreamConfig::validate`].
//!
//! ```ignore
//! let config = StreamConfig::new(Resolution::Bits12, 16_000, 64, 4)
//!     .with_channels(2)
//!     .deferred_start();
//! config.validate()?;
//! ```

use crate::constants::{DCACHE_LINE_SIZE, MIN_BUFFERS};
use crate::error::{ConfigError, Error};

/// Converter resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits8,
    Bits10,
    Bits12,
    Bits14,
    Bits16,
}

impl Resolution {
    /// Number of significant bits per sample.
    pub const fn bits(self) -> u8 {
        match self {
            Resolution::Bits8 => 8,
            Resolution::Bits10 => 10,
            Resolution::Bits12 => 12,
            Resolution::Bits14 => 14,
            Resolution::Bits16 => 16,
        }
    }

    /// Largest code a sample can hold at this resolution.
    pub const fn max_value(self) -> u16 {
        ((1u32 << self.bits()) - 1) as u16
    }
}

/// Which way samples flow relative to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Peripheral to memory (ADC, I2S receive). DMA fills buffers.
    Input,
    /// Memory to peripheral (DAC, I2S transmit). DMA drains buffers.
    Output,
}

/// Parameters for one streaming channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamConfig {
    /// Converter resolution.
    pub resolution: Resolution,
    /// Sample (frame) rate in Hz.
    pub sample_rate: u32,
    /// Samples per channel in each buffer.
    pub samples: usize,
    /// Interleaved channels per buffer.
    pub channels: usize,
    /// Total buffers in the pool, including the two bound to DMA.
    pub buffers: usize,
    /// Byte alignment of every buffer (power of two).
    pub alignment: usize,
    /// Start the trigger as soon as the transfer is armed.
    pub start_on_begin: bool,
    /// Output only: buffers that must be queued before the transfer is
    /// armed. Two are bound, the rest wait in the ready queue as headroom
    /// for the first completion.
    pub prime_depth: usize,
}

impl StreamConfig {
    /// Single-channel configuration aligned to the data-cache line.
    pub const fn new(resolution: Resolution, sample_rate: u32, samples: usize, buffers: usize) -> Self {
        StreamConfig {
            resolution,
            sample_rate,
            samples,
            channels: 1,
            buffers,
            alignment: DCACHE_LINE_SIZE,
            start_on_begin: true,
            prime_depth: MIN_BUFFERS,
        }
    }

    pub const fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub const fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Arm the transfer in `begin()` but wait for an explicit `start()`.
    ///
    /// Used to line up several peripherals on one trigger.
    pub const fn deferred_start(mut self) -> Self {
        self.start_on_begin = false;
        self
    }

    /// Queue `depth` output buffers before arming the transfer.
    pub const fn with_prime_depth(mut self, depth: usize) -> Self {
        self.prime_depth = depth;
        self
    }

    /// Elements per buffer across all channels.
    pub const fn frame_len(&self) -> usize {
        self.samples * self.channels
    }

    /// Time covered by one buffer, in microseconds (0 if the rate is 0).
    pub fn buffer_period_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples as u64 * 1_000_000) / self.sample_rate as u64
    }

    /// Check the peripheral-independent bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if self.samples == 0 {
            return Err(ConfigError::SampleCount.into());
        }
        if self.channels == 0 {
            return Err(ConfigError::ChannelCount.into());
        }
        if self.buffers < MIN_BUFFERS {
            return Err(ConfigError::BufferCount.into());
        }
        if self.prime_depth < MIN_BUFFERS || self.prime_depth > self.buffers {
            return Err(ConfigError::BufferCount.into());
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::SampleRate.into());
        }
        if !self.alignment.is_power_of_two() {
            return Err(Error::InvalidAlignment(self.alignment));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_max_values() {
        assert_eq!(Resolution::Bits8.max_value(), 0xFF);
        assert_eq!(Resolution::Bits12.max_value(), 0x0FFF);
        assert_eq!(Resolution::Bits16.max_value(), 0xFFFF);
    }

    #[test]
    fn builder_defaults() {
        let c = StreamConfig::new(Resolution::Bits12, 48_000, 128, 4);
        assert_eq!(c.channels, 1);
        assert_eq!(c.alignment, DCACHE_LINE_SIZE);
        assert!(c.start_on_begin);
        assert_eq!(c.prime_depth, MIN_BUFFERS);

        let c = c.with_channels(2).deferred_start();
        assert_eq!(c.frame_len(), 256);
        assert!(!c.start_on_begin);
    }

    #[test]
    fn buffer_period() {
        let c = StreamConfig::new(Resolution::Bits16, 48_000, 480, 2);
        assert_eq!(c.buffer_period_us(), 10_000);
    }

    #[test]
    fn validate_rejects_bad_geometry() {
        let ok = StreamConfig::new(Resolution::Bits12, 8_000, 16, 2);
        assert!(ok.validate().is_ok());

        let zero_samples = StreamConfig { samples: 0, ..ok };
        assert_eq!(zero_samples.validate(), Err(Error::Config(ConfigError::SampleCount)));

        let one_buffer = StreamConfig { buffers: 1, ..ok };
        assert_eq!(one_buffer.validate(), Err(Error::Config(ConfigError::BufferCount)));

        let no_channels = ok.with_channels(0);
        assert_eq!(no_channels.validate(), Err(Error::Config(ConfigError::ChannelCount)));

        let bad_align = ok.with_alignment(24);
        assert_eq!(bad_align.validate(), Err(Error::InvalidAlignment(24)));

        let no_rate = StreamConfig { sample_rate: 0, ..ok };
        assert_eq!(no_rate.validate(), Err(Error::Config(ConfigError::SampleRate)));
    }

    #[test]
    fn prime_depth_must_fit_the_pool() {
        let c = StreamConfig::new(Resolution::Bits16, 48_000, 16, 3);
        assert!(c.with_prime_depth(3).validate().is_ok());
        assert_eq!(
            c.with_prime_depth(4).validate(),
            Err(Error::Config(ConfigError::BufferCount))
        );
        assert_eq!(
            c.with_prime_depth(1).validate(),
            Err(Error::Config(ConfigError::BufferCount))
        );
    }
}
