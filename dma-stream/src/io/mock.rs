//! Software stand-in for a double-buffered DMA stream.
//!
//! `fill()` plays the part of a peripheral-to-memory transfer into the current
//! target, `drain()` a memory-to-peripheral transfer out of it. Both flip the
//! current-target bit the way the hardware does at the end of a transfer.

use alloc::vec::Vec;

use crate::hal::{DmaTarget, DoubleBufferDma, Slot, StreamSetup};

pub(crate) struct MockDma {
    pub targets: [Option<DmaTarget>; 2],
    pub current: Slot,
    pub running: bool,
    pub arm_count: usize,
    pub set_target_count: usize,
    /// (instance, sample rate, channel count) from the last `configure`.
    pub configured: Option<(usize, u32, usize)>,
    pub master_clock: bool,
    pub fail_configure: bool,
    pub fail_arm: bool,
    pub fail_start: bool,
    /// Everything drained so far.
    pub sent: Vec<u16>,
}

impl MockDma {
    pub const fn new() -> Self {
        MockDma {
            targets: [None, None],
            current: Slot::Zero,
            running: false,
            arm_count: 0,
            set_target_count: 0,
            configured: None,
            master_clock: false,
            fail_configure: false,
            fail_arm: false,
            fail_start: false,
            sent: Vec::new(),
        }
    }

    fn current_region(&self) -> Option<DmaTarget> {
        if !self.running {
            return None;
        }
        self.targets[self.current.index()]
    }

    /// Write `value` to every element of the current target and switch.
    pub fn fill(&mut self, value: u16) -> bool {
        let Some(target) = self.current_region() else {
            return false;
        };
        // SAFETY: the target was programmed from a live `SampleBuffer<u16>`
        // that the stream keeps bound until it is reprogrammed or stopped.
        let dst = unsafe { core::slice::from_raw_parts_mut(target.address as *mut u16, target.len) };
        dst.fill(value);
        self.current = self.current.other();
        true
    }

    /// Copy `src` into the current target and switch. Elements past the end
    /// of `src` are left untouched.
    pub fn load(&mut self, src: &[u16]) -> bool {
        let Some(target) = self.current_region() else {
            return false;
        };
        // SAFETY: as in `fill`.
        let dst = unsafe { core::slice::from_raw_parts_mut(target.address as *mut u16, target.len) };
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        self.current = self.current.other();
        true
    }

    /// Copy the current target into `sent` and switch.
    pub fn drain(&mut self) -> bool {
        let Some(target) = self.current_region() else {
            return false;
        };
        // SAFETY: as in `fill`.
        let src = unsafe { core::slice::from_raw_parts(target.address as *const u16, target.len) };
        self.sent.extend_from_slice(src);
        self.current = self.current.other();
        true
    }
}

impl DoubleBufferDma for MockDma {
    type Error = ();

    fn configure(&mut self, setup: &StreamSetup<'_>) -> Result<(), ()> {
        if self.fail_configure {
            return Err(());
        }
        self.configured = Some((setup.instance, setup.sample_rate, setup.channels.len()));
        self.master_clock = setup.master_clock;
        Ok(())
    }

    fn arm(&mut self, first: DmaTarget, second: DmaTarget) -> Result<(), ()> {
        assert_eq!(first.bytes, first.len * 2);
        if self.fail_arm {
            return Err(());
        }
        self.targets = [Some(first), Some(second)];
        self.current = Slot::Zero;
        self.arm_count += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), ()> {
        if self.fail_start {
            return Err(());
        }
        self.running = true;
        Ok(())
    }

    fn current_target(&self) -> Slot {
        self.current
    }

    fn set_target(&mut self, slot: Slot, target: DmaTarget) {
        assert!(
            !self.running || slot != self.current,
            "reprogrammed the target in use"
        );
        self.targets[slot.index()] = Some(target);
        self.set_target_count += 1;
    }

    fn stop(&mut self) {
        self.running = false;
        self.targets = [None, None];
    }
}
