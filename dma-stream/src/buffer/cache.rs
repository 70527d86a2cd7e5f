//! Data-cache maintenance for DMA buffers.
//!
//! With the `cortex-m7` feature these issue SCB clean/invalidate by address.
//! Otherwise they compile to nothing (no data cache, or memory mapped
//! non-cacheable by the MPU).

/// Write back cached lines covering `[addr, addr + len)` so the DMA engine
/// reads what the CPU wrote.
#[inline]
pub fn clean(addr: usize, len: usize) {
    #[cfg(feature = "cortex-m7")]
    {
        // SAFETY: only SCB cache maintenance is used from the stolen handle.
        // Those operations are by-address and stateless, so they cannot
        // disturb another owner of the peripherals.
        let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
        // Cleaning only writes back dirty lines; it never discards data.
        peripherals.SCB.clean_dcache_by_address(addr, len);
    }
    #[cfg(not(feature = "cortex-m7"))]
    let _ = (addr, len);
}

/// Discard cached lines covering `[addr, addr + len)` so the CPU reads what
/// the DMA engine wrote.
///
/// `addr` and `len` must cover whole cache lines owned by the caller; buffer
/// pools guarantee this by aligning and padding every buffer.
#[inline]
pub fn invalidate(addr: usize, len: usize) {
    #[cfg(feature = "cortex-m7")]
    {
        // SAFETY: as in `clean`, the stolen handle is used for SCB cache
        // maintenance only.
        let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
        // SAFETY: the range is line-aligned and owned by the caller, so no
        // unrelated data shares the discarded lines.
        unsafe { peripherals.SCB.invalidate_dcache_by_address(addr, len) };
    }
    #[cfg(not(feature = "cortex-m7"))]
    let _ = (addr, len);
}
