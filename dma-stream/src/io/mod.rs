//! Streaming drivers.
//!
//! The generic [`DoubleBuffer`] engine does the ping-pong bookkeeping; the
//! peripheral front-ends add parameter checks, hardware-instance claiming
//! and a peripheral-shaped API on top of it.
//!
//! ## Components
//!
//! | Type | Direction | Sample | Description |
//! |------|-----------|--------|-------------|
//! | [`DoubleBuffer`] | either | any [`Sample`](crate::buffer::Sample) | Double-buffer DMA state machine |
//! | [`AdvancedAdc`] | in | `u16` | Scan of 1-5 ADC inputs, interleaved |
//! | [`AdvancedDac`] | out | `u16` | One DAC channel, stops on underrun |
//! | [`AdvancedI2s`] | in / out / both | `u16` | Stereo I2S master |
//! | `WavReader` | in | `u16` | WAV file source (feature `wav`) |
//!
//! ## Utilities
//!
//! - [`interleave`]: frame interleave/deinterleave for multi-channel buffers

pub mod double_buffer;
pub mod interleave;

#[cfg(feature = "adc")]
pub mod adc;
#[cfg(feature = "dac")]
pub mod dac;
#[cfg(feature = "i2s")]
pub mod i2s;
#[cfg(feature = "wav")]
pub mod wav;

pub use double_buffer::{Completion, DoubleBuffer, StreamState, StreamStats};

#[cfg(feature = "adc")]
pub use adc::{AdcPin, AdvancedAdc};
#[cfg(feature = "dac")]
pub use dac::AdvancedDac;
#[cfg(feature = "i2s")]
pub use i2s::{AdvancedI2s, I2sMode, I2sPin, I2sPins};
#[cfg(feature = "wav")]
pub use wav::{WavError, WavReader};

#[cfg(test)]
pub(crate) mod mock;

#[cfg(test)]
mod integration_tests;
