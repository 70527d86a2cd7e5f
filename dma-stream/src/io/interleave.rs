//! Frame interleave/deinterleave utilities.
//!
//! Multi-channel buffers hold samples frame by frame: for `C` channels the
//! element at `frame * C + ch` is channel `ch` of `frame`. ADC scan sequences
//! and I2S stereo both produce this layout, and buffers carrying it are
//! flagged [`INTERLEAVED`](crate::buffer::BufferFlags::INTERLEAVED).
//!
//! ```text
//! [ L0 R0 | L1 R1 | L2 R2 | ... ]   (C = 2)
//! ```

use crate::buffer::Sample;

/// Interleave per-channel slices into `dest`.
///
/// # Panics
///
/// Debug-asserts that every channel holds `dest.len() / channels.len()`
/// samples.
pub fn interleave<T: Sample>(dest: &mut [T], channels: &[&[T]]) {
    let n = channels.len();
    if n == 0 {
        return;
    }
    debug_assert_eq!(dest.len() % n, 0);
    for (ch, src) in channels.iter().enumerate() {
        debug_assert_eq!(src.len(), dest.len() / n);
        for (frame, &s) in src.iter().enumerate() {
            dest[frame * n + ch] = s;
        }
    }
}

/// Split an interleaved buffer into per-channel slices.
///
/// # Panics
///
/// Debug-asserts that every channel has room for `src.len() / channels.len()`
/// samples.
pub fn deinterleave<T: Sample>(src: &[T], channels: &mut [&mut [T]]) {
    let n = channels.len();
    if n == 0 {
        return;
    }
    debug_assert_eq!(src.len() % n, 0);
    for (ch, dst) in channels.iter_mut().enumerate() {
        debug_assert_eq!(dst.len(), src.len() / n);
        for (d, &s) in dst.iter_mut().zip(src[ch..].iter().step_by(n)) {
            *d = s;
        }
    }
}

/// Interleave a left/right pair into a stereo buffer.
pub fn interleave_stereo<T: Sample>(dest: &mut [T], left: &[T], right: &[T]) {
    debug_assert_eq!(dest.len(), left.len() * 2);
    debug_assert_eq!(left.len(), right.len());

    for (frame, (&l, &r)) in dest.chunks_exact_mut(2).zip(left.iter().zip(right)) {
        frame[0] = l;
        frame[1] = r;
    }
}

/// Split a stereo buffer into left and right.
pub fn deinterleave_stereo<T: Sample>(src: &[T], left: &mut [T], right: &mut [T]) {
    debug_assert_eq!(src.len(), left.len() * 2);
    debug_assert_eq!(left.len(), right.len());

    for (frame, (l, r)) in src.chunks_exact(2).zip(left.iter_mut().zip(right.iter_mut())) {
        *l = frame[0];
        *r = frame[1];
    }
}

/// Fill a buffer with the zero sample.
pub fn silence<T: Sample>(dest: &mut [T]) {
    dest.fill(T::default());
}
