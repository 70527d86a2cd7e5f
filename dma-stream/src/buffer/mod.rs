//! Buffer memory, handles, queues and the pool that ties them together.
//!
//! | Type | Role |
//! |------|------|
//! | [`AlignedStorage`] | One cache-line aligned heap block |
//! | [`SampleBuffer`] | Owned handle to one slot of a pool |
//! | [`BoundedQueue`] | Lock-free SPSC ring of handles |
//! | [`BufferPool`] | N slots plus write and ready queues |

pub mod aligned;
pub mod cache;
pub mod pool;
pub mod queue;
pub mod sample;

pub use aligned::AlignedStorage;
pub use pool::BufferPool;
pub use queue::BoundedQueue;
pub use sample::{BufferFlags, Sample, SampleBuffer};
