//! # dma-stream
//!
//! A `no_std` library for streaming samples between memory and converter
//! peripherals (ADC, DAC, I2S) with double-buffered DMA. The application
//! works with whole buffers taken from a fixed pool; the DMA interrupt swaps
//! buffers in and out of the two hardware targets without copying.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Memory | [`buffer`] | Aligned buffer pool with lock-free free/ready queues |
//! | Hardware | [`hal`] / [`registry`] | Double-buffer DMA trait, exclusive instance claims |
//! | Engine | [`io::DoubleBuffer`] | Ping-pong state machine, overrun/underrun policy |
//! | Drivers | [`io`] | ADC scan, DAC, I2S front-ends and a WAV file source |
//! | Setup | [`config`] / [`error`] | Stream parameters and failure codes |
//!
//! ## Quick start
//!
//! ```ignore
//! use dma_stream::io::{AdcPin, AdvancedAdc};
//! use dma_stream::registry::{AdcInstance, ChannelRegistry};
//! use dma_stream::Resolution;
//!
//! static ADCS: ChannelRegistry<AdcInstance> = ChannelRegistry::new();
//!
//! let adc = AdvancedAdc::new(
//!     &ADCS,
//!     adc1_dma,
//!     &[AdcPin::new(AdcInstance::Adc1, 3), AdcPin::new(AdcInstance::Adc1, 4)],
//! );
//! adc.begin(Resolution::Bits12, 16_000, 128, 4)?;
//!
//! // In the DMA interrupt:
//! adc.on_transfer_complete(ticks());
//!
//! // In the application:
//! let buf = adc.read()?;
//! for frame in buf.frames() {
//!     process(frame[0], frame[1]);
//! }
//! adc.release(buf)?;
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `adc` | yes | [`io::AdvancedAdc`] |
//! | `dac` | yes | [`io::AdvancedDac`] |
//! | `i2s` | yes | [`io::AdvancedI2s`] |
//! | `embedded-hal` | yes | `*_timeout` reads and dequeues using `DelayNs` |
//! | `std` | no | Links `std` and the hosted `critical-section` implementation |
//! | `wav` | no | `io::WavReader` (requires `std`) |
//! | `cortex-m7` | no | Data-cache maintenance and `wfi` while waiting |
//! | `defmt` | no | Log output through `defmt` |
//!
//! ## Buffer lifecycle
//!
//! - **Input:** DMA fills a bound buffer, the interrupt moves it to the ready
//!   queue, [`read()`](io::DoubleBuffer::read) hands it out and
//!   [`release()`](io::DoubleBuffer::release) returns it to the free queue.
//! - **Output:** [`dequeue()`](io::DoubleBuffer::dequeue) hands out a free
//!   buffer, [`write()`](io::DoubleBuffer::write) queues it, the interrupt
//!   binds it and returns it once drained.
//! - A buffer dropped by the application returns to the free queue by
//!   itself; [`discard()`](io::DoubleBuffer::discard) does the same
//!   explicitly for either direction.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// Must come first so the logging macros are visible everywhere.
mod fmt;

pub mod buffer;
pub mod config;
pub mod constants;
pub mod error;
pub mod hal;
pub mod io;
pub mod registry;

pub use buffer::{BufferFlags, BufferPool, Sample, SampleBuffer};
pub use config::{Direction, Resolution, StreamConfig};
pub use error::{ConfigError, Error};
pub use hal::{DmaTarget, DoubleBufferDma, Slot, StreamSetup};
pub use io::{Completion, DoubleBuffer, StreamState, StreamStats};
pub use registry::ChannelRegistry;
