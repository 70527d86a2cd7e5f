//! Hardware-instance claim table.
//!
//! A board has a small, fixed set of converters and serial audio blocks. A
//! [`ChannelRegistry`] records which of them are currently streaming so two
//! drivers never program the same instance. Create one registry per
//! peripheral kind at startup (they are `const`-constructible, so a `static`
//! works) and pass it to each driver.
//!
//! ```ignore
//! static ADCS: ChannelRegistry<AdcInstance> = ChannelRegistry::new();
//!
//! let adc = AdvancedAdc::new(&ADCS, dma, &[AdcPin::new(AdcInstance::Adc1, 4)]);
//! ```

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::Error;

/// A hardware instance that can be claimed.
pub trait HardwareId: Copy + Eq {
    /// Number of instances of this kind (at most 32).
    const COUNT: usize;

    /// Dense index in `0..COUNT`.
    fn index(self) -> usize;
}

/// ADC instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcInstance {
    Adc1,
    Adc2,
    Adc3,
}

impl HardwareId for AdcInstance {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

/// DAC output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DacChannel {
    Channel1,
    Channel2,
}

impl HardwareId for DacChannel {
    const COUNT: usize = 2;

    fn index(self) -> usize {
        self as usize
    }
}

/// SPI/I2S blocks usable for audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sInstance {
    Spi1,
    Spi2,
    Spi3,
}

impl HardwareId for I2sInstance {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

/// Lock-free claim bitmap over the instances of `K`.
pub struct ChannelRegistry<K: HardwareId> {
    /// Bit N = 1 means instance N is claimed.
    bitmap: AtomicU32,
    _kind: PhantomData<K>,
}

impl<K: HardwareId> ChannelRegistry<K> {
    pub const fn new() -> Self {
        assert!(K::COUNT <= 32, "registry supports at most 32 instances");
        ChannelRegistry {
            bitmap: AtomicU32::new(0),
            _kind: PhantomData,
        }
    }

    /// Mark `id` as in use. Fails with [`Error::ChannelBusy`] if it already is.
    pub fn claim(&self, id: K) -> Result<(), Error> {
        let bit = 1u32 << id.index();
        let previous = self.bitmap.fetch_or(bit, Ordering::AcqRel);
        if previous & bit != 0 {
            warn!("registry: instance {=usize} already claimed", id.index());
            return Err(Error::ChannelBusy);
        }
        Ok(())
    }

    /// Give `id` back. Releasing an unclaimed instance is a no-op.
    pub fn release(&self, id: K) {
        let bit = 1u32 << id.index();
        self.bitmap.fetch_and(!bit, Ordering::Release);
    }

    pub fn is_claimed(&self, id: K) -> bool {
        self.bitmap.load(Ordering::Acquire) & (1u32 << id.index()) != 0
    }

    /// Number of instances currently claimed.
    pub fn claimed_count(&self) -> u32 {
        self.bitmap.load(Ordering::Acquire).count_ones()
    }
}

impl<K: HardwareId> Default for ChannelRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
