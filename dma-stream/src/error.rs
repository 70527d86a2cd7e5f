//! Error types.
//!
//! Only application-context calls return these. The interrupt entry points
//! never fail; they report what happened through
//! [`Completion`](crate::io::Completion) and buffer flags instead.

use thiserror::Error;

/// Reasons a stream configuration is rejected by `begin()`.
///
/// All of these are detected before any hardware register is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("sample count must be non-zero")]
    SampleCount,
    #[error("channel count is zero or exceeds what the peripheral supports")]
    ChannelCount,
    #[error("a pool needs at least two buffers")]
    BufferCount,
    #[error("resolution not supported by this peripheral")]
    Resolution,
    #[error("sample rate outside the supported range")]
    SampleRate,
    #[error("pins map to different peripheral instances")]
    PinMismatch,
    #[error("a required pin is missing")]
    MissingPin,
}

/// Errors returned by pool construction and stream control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("out of memory")]
    OutOfMemory,
    #[error("hardware channel is already in use")]
    ChannelBusy,
    #[error("stream is already started")]
    AlreadyStarted,
    #[error("stream is not started")]
    NotStarted,
    #[error("operation not valid for this stream direction")]
    WrongDirection,
    #[error("hardware abstraction reported a failure")]
    Hardware,
    #[error("timed out waiting for a buffer")]
    Timeout,
    #[error("buffer does not belong to this pool")]
    ForeignBuffer,
}
