//! I2S stereo input, output and full duplex.
//!
//! [`AdvancedI2s`] runs one SPI/I2S block as bus master. Receive and transmit
//! each get their own DMA stream and pool of 16-bit stereo buffers (two
//! interleaved channels per frame).
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────── AdvancedI2s ────────────┐
//!  SDI ─────►│ rx: DoubleBuffer<u16, Rx> ──► read() │
//!  SDO ◄─────│ tx: DoubleBuffer<u16, Tx> ◄── write()│
//!            └──────────────────────────────────────┘
//! ```
//!
//! The transmitter starts once [`I2S_PRIME_BUFFERS`] buffers are queued: two
//! bound to the DMA targets and one waiting, so the first completion never
//! finds the queue empty. In [`I2sMode::InOut`] those buffers are silence,
//! written before both streams start, so the first received frame lines up
//! with the first transmitted one.
//!
//! ## Usage
//!
//! ```ignore
//! static I2S: ChannelRegistry<I2sInstance> = ChannelRegistry::new();
//!
//! let pins = I2sPins::new(ws, ck).sdi(sdi).sdo(sdo);
//! let i2s = AdvancedI2s::new(&I2S, pins, rx_dma, tx_dma);
//! i2s.begin(I2sMode::InOut, 48_000, 128, 8)?;
//!
//! loop {
//!     let rx = i2s.read()?;
//!     let mut tx = i2s.dequeue()?;
//!     tx.copy_from_slice(&rx);
//!     i2s.write(tx)?;
//!     i2s.release(rx)?;
//! }
//! ```

use core::cell::Cell;

use critical_section::Mutex;

use crate::buffer::SampleBuffer;
use crate::config::{Direction, Resolution, StreamConfig};
use crate::constants::{I2S_MAX_SAMPLE_RATE, I2S_MIN_SAMPLE_RATE, I2S_PRIME_BUFFERS};
use crate::error::{ConfigError, Error};
use crate::hal::{DoubleBufferDma, StreamSetup};
use crate::registry::{ChannelRegistry, HardwareId, I2sInstance};

use super::double_buffer::{Completion, DoubleBuffer, StreamState};
use super::interleave::silence;

#[cfg(feature = "embedded-hal")]
use embedded_hal::delay::DelayNs;

/// Which directions are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sMode {
    In,
    Out,
    InOut,
}

impl I2sMode {
    pub const fn receives(self) -> bool {
        matches!(self, I2sMode::In | I2sMode::InOut)
    }

    pub const fn transmits(self) -> bool {
        matches!(self, I2sMode::Out | I2sMode::InOut)
    }
}

/// A pin and the I2S block it is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2sPin {
    pub instance: I2sInstance,
    pub pin: u8,
}

impl I2sPin {
    pub const fn new(instance: I2sInstance, pin: u8) -> Self {
        I2sPin { instance, pin }
    }
}

/// Bus pins. Word select and bit clock are always needed; the data lines
/// depend on the mode and the master clock output is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2sPins {
    pub ws: I2sPin,
    pub ck: I2sPin,
    pub sdi: Option<I2sPin>,
    pub sdo: Option<I2sPin>,
    pub mck: Option<I2sPin>,
}

impl I2sPins {
    pub const fn new(ws: I2sPin, ck: I2sPin) -> Self {
        I2sPins {
            ws,
            ck,
            sdi: None,
            sdo: None,
            mck: None,
        }
    }

    pub const fn sdi(mut self, pin: I2sPin) -> Self {
        self.sdi = Some(pin);
        self
    }

    pub const fn sdo(mut self, pin: I2sPin) -> Self {
        self.sdo = Some(pin);
        self
    }

    pub const fn mck(mut self, pin: I2sPin) -> Self {
        self.mck = Some(pin);
        self
    }

    fn iter(&self) -> impl Iterator<Item = I2sPin> + '_ {
        [Some(self.ws), Some(self.ck), self.sdi, self.sdo, self.mck]
            .into_iter()
            .flatten()
    }

    /// The block every pin is routed to.
    fn resolve(&self, mode: I2sMode) -> Result<I2sInstance, ConfigError> {
        if (mode.receives() && self.sdi.is_none()) || (mode.transmits() && self.sdo.is_none()) {
            return Err(ConfigError::MissingPin);
        }
        let instance = self.ws.instance;
        if self.iter().any(|p| p.instance != instance) {
            return Err(ConfigError::PinMismatch);
        }
        Ok(instance)
    }
}

/// DMA-driven I2S master with independent receive and transmit streams.
///
/// Use [`Unused`](crate::hal::Unused) for the DMA of a direction the
/// application never enables.
pub struct AdvancedI2s<'r, Rx: DoubleBufferDma, Tx: DoubleBufferDma> {
    registry: &'r ChannelRegistry<I2sInstance>,
    pins: I2sPins,
    /// Mode and claimed block while active.
    active: Mutex<Cell<Option<(I2sMode, I2sInstance)>>>,
    rx: DoubleBuffer<u16, Rx>,
    tx: DoubleBuffer<u16, Tx>,
}

impl<'r, Rx: DoubleBufferDma, Tx: DoubleBufferDma> AdvancedI2s<'r, Rx, Tx> {
    pub const fn new(
        registry: &'r ChannelRegistry<I2sInstance>,
        pins: I2sPins,
        rx_dma: Rx,
        tx_dma: Tx,
    ) -> Self {
        AdvancedI2s {
            registry,
            pins,
            active: Mutex::new(Cell::new(None)),
            rx: DoubleBuffer::new(rx_dma, Direction::Input),
            tx: DoubleBuffer::new(tx_dma, Direction::Output),
        }
    }

    /// Current mode, if started.
    pub fn mode(&self) -> Option<I2sMode> {
        critical_section::with(|cs| self.active.borrow(cs).get()).map(|(mode, _)| mode)
    }

    pub fn is_active(&self) -> bool {
        self.mode().is_some()
    }

    /// Validate, claim the I2S block and start the requested directions.
    ///
    /// `sample_rate` must lie in
    /// [`I2S_MIN_SAMPLE_RATE`]`..=`[`I2S_MAX_SAMPLE_RATE`]. Each direction
    /// gets a pool of `buffers` stereo buffers of `samples` frames; a
    /// transmitting mode needs at least [`I2S_PRIME_BUFFERS`].
    pub fn begin(
        &self,
        mode: I2sMode,
        sample_rate: u32,
        samples: usize,
        buffers: usize,
    ) -> Result<(), Error> {
        if self.is_active() {
            return Err(Error::AlreadyStarted);
        }
        if !(I2S_MIN_SAMPLE_RATE..=I2S_MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(ConfigError::SampleRate.into());
        }
        let instance = self.pins.resolve(mode)?;
        let mut config = StreamConfig::new(Resolution::Bits16, sample_rate, samples, buffers).with_channels(2);
        if mode.transmits() {
            config = config.with_prime_depth(I2S_PRIME_BUFFERS);
        }
        config.validate()?;

        self.registry.claim(instance)?;
        if let Err(e) = self.start_streams(mode, instance, &config) {
            self.rx.stop();
            self.tx.stop();
            self.registry.release(instance);
            return Err(e);
        }
        critical_section::with(|cs| self.active.borrow(cs).set(Some((mode, instance))));
        debug!("i2s: started on block {=usize}", instance.index());
        Ok(())
    }

    fn start_streams(&self, mode: I2sMode, instance: I2sInstance, config: &StreamConfig) -> Result<(), Error> {
        let mut pins = [0u8; 5];
        let mut n = 0;
        for (dst, pin) in pins.iter_mut().zip(self.pins.iter()) {
            *dst = pin.pin;
            n += 1;
        }
        let setup = |direction| StreamSetup {
            instance: instance.index(),
            channels: &pins[..n],
            resolution: config.resolution,
            sample_rate: config.sample_rate,
            direction,
            master_clock: self.pins.mck.is_some(),
        };

        match mode {
            I2sMode::In => self.rx.begin(config, &setup(Direction::Input)),
            I2sMode::Out => self.tx.begin(config, &setup(Direction::Output)),
            I2sMode::InOut => {
                // Receive waits for the transmitter so both run in step.
                self.rx.begin(&config.deferred_start(), &setup(Direction::Input))?;
                self.tx.begin(config, &setup(Direction::Output))?;
                for _ in 0..I2S_PRIME_BUFFERS {
                    let mut buf = self.tx.try_dequeue()?.ok_or(Error::OutOfMemory)?;
                    silence(&mut buf[..]);
                    self.tx.write(buf)?;
                }
                self.rx.start()
            }
        }
    }

    /// Stop both directions and give the block back.
    pub fn stop(&self) {
        self.rx.stop();
        self.tx.stop();
        if let Some((_, instance)) = critical_section::with(|cs| self.active.borrow(cs).take()) {
            self.registry.release(instance);
        }
    }

    /// Drop every received buffer not yet read and every queued buffer not
    /// yet sent.
    pub fn clear(&self) {
        self.rx.clear();
        self.tx.clear();
    }

    /// Input: received buffers waiting. Output: free transmit buffers.
    /// Full duplex: the smaller of the two.
    pub fn available(&self) -> usize {
        match self.mode() {
            Some(I2sMode::In) => self.rx.available(),
            Some(I2sMode::Out) => self.tx.available(),
            Some(I2sMode::InOut) => self.rx.available().min(self.tx.available()),
            None => 0,
        }
    }

    pub fn try_read(&self) -> Result<Option<SampleBuffer<u16>>, Error> {
        self.rx.try_read()
    }

    /// Wait for the next received buffer.
    pub fn read(&self) -> Result<SampleBuffer<u16>, Error> {
        self.rx.read()
    }

    #[cfg(feature = "embedded-hal")]
    pub fn read_timeout(
        &self,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<u16>, Error> {
        self.rx.read_timeout(delay, timeout_us)
    }

    pub fn release(&self, buf: SampleBuffer<u16>) -> Result<(), Error> {
        self.rx.release(buf)
    }

    pub fn try_dequeue(&self) -> Result<Option<SampleBuffer<u16>>, Error> {
        self.tx.try_dequeue()
    }

    /// Wait for a free transmit buffer.
    pub fn dequeue(&self) -> Result<SampleBuffer<u16>, Error> {
        self.tx.dequeue()
    }

    #[cfg(feature = "embedded-hal")]
    pub fn dequeue_timeout(
        &self,
        delay: &mut impl DelayNs,
        timeout_us: u32,
    ) -> Result<SampleBuffer<u16>, Error> {
        self.tx.dequeue_timeout(delay, timeout_us)
    }

    /// Give back a received or transmit buffer without using it.
    pub fn discard(&self, buf: SampleBuffer<u16>) -> Result<(), Error> {
        match self.rx.pool() {
            Some(pool) if pool.owns(&buf) => self.rx.discard(buf),
            _ => self.tx.discard(buf),
        }
    }

    /// Queue a filled transmit buffer.
    ///
    /// If the transmitter runs dry the block still playing is cut off; see
    /// [`Completion::Underrun`].
    pub fn write(&self, buf: SampleBuffer<u16>) -> Result<(), Error> {
        self.tx.write(buf)
    }

    /// Receive DMA interrupt entry point.
    pub fn on_rx_complete(&self, now: u64) -> Completion {
        self.rx.on_transfer_complete(now)
    }

    /// Transmit DMA interrupt entry point.
    pub fn on_tx_complete(&self) -> Completion {
        self.tx.on_transfer_complete(0)
    }

    /// Entry point for hardware that raises one interrupt for both streams.
    pub fn on_duplex_complete(&self, now: u64) -> (Completion, Completion) {
        (self.on_rx_complete(now), self.on_tx_complete())
    }

    pub fn rx_state(&self) -> StreamState {
        self.rx.state()
    }

    pub fn tx_state(&self) -> StreamState {
        self.tx.state()
    }

    pub fn rx(&self) -> &DoubleBuffer<u16, Rx> {
        &self.rx
    }

    pub fn tx(&self) -> &DoubleBuffer<u16, Tx> {
        &self.tx
    }
}

impl<Rx: DoubleBufferDma, Tx: DoubleBufferDma> Drop for AdvancedI2s<'_, Rx, Tx> {
    fn drop(&mut self) {
        self.stop();
    }
}
