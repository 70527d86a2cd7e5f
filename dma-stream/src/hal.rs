//! Hardware abstraction boundary.
//!
//! The streaming engine never touches registers. A board support layer
//! implements [`DoubleBufferDma`] for each DMA stream it wires up: program two
//! memory targets, report which one the hardware is currently using, and
//! swap the address of the idle one.
//!
//! ## Double-buffer mode
//!
//! ```text
//!             ┌───────────┐   transfer complete   ┌───────────┐
//! DMA ──────► │ target 0  │ ────── (IRQ) ───────► │ target 1  │ ──► ...
//!             └───────────┘                       └───────────┘
//!   current_target() == Zero                 current_target() == One
//!   ISR rebinds One's buffer                  ISR rebinds Zero's buffer
//! ```
//!
//! When the transfer-complete interrupt fires the hardware has already moved
//! on, so the target that just finished is `current_target().other()`. Only
//! that target is ever reprogrammed.

use crate::config::{Direction, Resolution};

/// One of the two DMA memory targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    Zero,
    One,
}

impl Slot {
    /// The opposite target.
    pub const fn other(self) -> Slot {
        match self {
            Slot::Zero => Slot::One,
            Slot::One => Slot::Zero,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Slot::Zero => 0,
            Slot::One => 1,
        }
    }
}

/// Memory region to program into a DMA target register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaTarget {
    /// Start address of the buffer.
    pub address: usize,
    /// Transfer length in elements.
    pub len: usize,
    /// Transfer length in bytes.
    pub bytes: usize,
}

/// Peripheral parameters handed to [`DoubleBufferDma::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamSetup<'a> {
    /// Index of the hardware instance (see [`crate::registry::HardwareId`]).
    pub instance: usize,
    /// Peripheral channel numbers, in conversion order.
    pub channels: &'a [u8],
    pub resolution: Resolution,
    pub sample_rate: u32,
    pub direction: Direction,
    /// Drive a master clock output (I2S only).
    pub master_clock: bool,
}

/// A DMA stream in double-buffer ("ping-pong") mode plus the trigger that
/// paces it.
///
/// `arm`, `start`, `configure` and `stop` are called from application context
/// inside a critical section. `current_target` and `set_target` are called
/// from the transfer-complete interrupt and must not block.
pub trait DoubleBufferDma {
    /// Error reported by the hardware layer.
    type Error;

    /// Program clocks, pins and peripheral registers. Called once per
    /// `begin()` before any buffer is bound.
    fn configure(&mut self, setup: &StreamSetup<'_>) -> Result<(), Self::Error> {
        let _ = setup;
        Ok(())
    }

    /// Enable double-buffer mode with the given targets. The first transfer
    /// goes to `first`.
    fn arm(&mut self, first: DmaTarget, second: DmaTarget) -> Result<(), Self::Error>;

    /// Start the trigger that paces transfers.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Target the hardware is using now (the "current target" bit).
    fn current_target(&self) -> Slot;

    /// Point an idle target at a new buffer.
    fn set_target(&mut self, slot: Slot, target: DmaTarget);

    /// Halt the trigger and the DMA stream. Must be safe mid-transfer.
    fn stop(&mut self);
}

/// Stand-in for the unused direction of an I2S instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Unused;

impl DoubleBufferDma for Unused {
    type Error = ();

    fn arm(&mut self, _first: DmaTarget, _second: DmaTarget) -> Result<(), ()> {
        Err(())
    }

    fn start(&mut self) -> Result<(), ()> {
        Err(())
    }

    fn current_target(&self) -> Slot {
        Slot::Zero
    }

    fn set_target(&mut self, _slot: Slot, _target: DmaTarget) {}

    fn stop(&mut self) {}
}

/// Idle until something may have changed (an interrupt fired).
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(feature = "cortex-m7")]
    cortex_m::asm::wfi();
    #[cfg(not(feature = "cortex-m7"))]
    core::hint::spin_loop();
}
