/// Data-cache line size in bytes (Cortex-M7). Default alignment for DMA buffers.
pub const DCACHE_LINE_SIZE: usize = 32;

/// Minimum number of buffers in a pool: one per DMA target.
pub const MIN_BUFFERS: usize = 2;

/// Maximum number of ADC inputs sampled successively by one instance.
pub const MAX_ADC_CHANNELS: usize = 5;

/// Maximum number of DAC outputs driven by one stream.
pub const MAX_DAC_CHANNELS: usize = 1;

/// DAC trigger timer base frequency; also the highest supported DAC rate.
pub const DAC_TIMER_BASE_HZ: u32 = 64_000;

/// Lowest I2S sample rate accepted by `begin()`.
pub const I2S_MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest I2S sample rate accepted by `begin()`.
pub const I2S_MAX_SAMPLE_RATE: u32 = 192_000;

/// Buffers an I2S transmit stream queues before it starts: two bound and one
/// waiting, so the first completion always finds a successor. Full duplex
/// writes this many silent buffers.
pub const I2S_PRIME_BUFFERS: usize = 3;

/// Polling step of the bounded waits (`read_timeout`, `dequeue_timeout`).
pub const TIMEOUT_POLL_US: u32 = 10;
