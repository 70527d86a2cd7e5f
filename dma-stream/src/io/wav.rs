//! WAV file source.
//!
//! [`WavReader`] fills buffers of the same pool abstraction the peripherals
//! use, from a RIFF/WAVE stream instead of a DMA transfer. A typical player
//! copies each buffer into a DAC or I2S transmit buffer and releases it.
//!
//! ```ignore
//! let mut wav = WavReader::new();
//! wav.begin(File::open("tone.wav")?, 256, 4, true)?;
//! dac.begin(Resolution::Bits12, wav.sample_rate(), 256, 4)?;
//!
//! while wav.available() > 0 {
//!     let src = wav.read()?;
//!     let mut dst = dac.dequeue()?;
//!     for (d, s) in dst.iter_mut().zip(src.iter()) {
//!         *d = (s ^ 0x8000) >> 4;
//!     }
//!     dac.write(dst)?;
//!     wav.release(src)?;
//! }
//! ```
//!
//! Parsing is done by `hound`. Integer samples up to 16 bits are supported;
//! they are delivered as the two's-complement bit pattern in a `u16`.

use std::io::{Read, Seek};

use hound::{SampleFormat, WavSpec};

use crate::buffer::{BufferFlags, BufferPool, SampleBuffer};
use crate::error::Error;

/// Errors from [`WavReader`].
#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("wav decode error: {0}")]
    Decode(#[from] hound::Error),
    #[error(transparent)]
    Stream(#[from] Error),
    #[error("unsupported sample format ({0} bits)")]
    Unsupported(u16),
    #[error("file holds fewer samples than one buffer")]
    TooShort,
    #[error("no free buffer")]
    NoFreeBuffer,
    #[error("end of file reached")]
    EndOfStream,
}

/// Reads a WAV stream into pool buffers.
pub struct WavReader<R: Read + Seek> {
    reader: Option<hound::WavReader<R>>,
    spec: Option<WavSpec>,
    sample_count: u32,
    looping: bool,
    pool: Option<BufferPool<u16>>,
}

impl<R: Read + Seek> Default for WavReader<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read + Seek> WavReader<R> {
    pub const fn new() -> Self {
        WavReader {
            reader: None,
            spec: None,
            sample_count: 0,
            looping: false,
            pool: None,
        }
    }

    /// Parse the header of `source` and create a pool of `buffers` buffers of
    /// `samples` frames each, one channel per channel of the file.
    ///
    /// With `looping` set, reading past the end starts over from the first
    /// sample; otherwise the last buffer is padded with zeros and the stream
    /// is closed.
    pub fn begin(
        &mut self,
        source: R,
        samples: usize,
        buffers: usize,
        looping: bool,
    ) -> Result<(), WavError> {
        if self.pool.is_some() {
            return Err(Error::AlreadyStarted.into());
        }
        let reader = hound::WavReader::new(source)?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample > 16 {
            return Err(WavError::Unsupported(spec.bits_per_sample));
        }

        let channels = spec.channels as usize;
        let needed = samples.checked_mul(channels).ok_or(Error::OutOfMemory)?;
        if needed > reader.len() as usize {
            return Err(WavError::TooShort);
        }

        self.pool = Some(BufferPool::new(samples, channels, buffers)?);
        self.sample_count = reader.len();
        self.spec = Some(spec);
        self.looping = looping;
        self.reader = Some(reader);
        debug!(
            "wav: {=u16} ch, {=u32} Hz, {=u16} bits",
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample
        );
        Ok(())
    }

    /// Close the stream and drop the pool.
    pub fn stop(&mut self) {
        self.reader = None;
        self.pool = None;
    }

    /// Buffers that can be read right now. Zero once a non-looping stream
    /// reached its end.
    pub fn available(&self) -> usize {
        match (&self.reader, &self.pool) {
            (Some(_), Some(pool)) => pool.writable(),
            _ => 0,
        }
    }

    /// Fill the next buffer from the file.
    pub fn read(&mut self) -> Result<SampleBuffer<u16>, WavError> {
        let pool = self.pool.as_ref().ok_or(Error::NotStarted)?;
        if self.reader.is_none() {
            return Err(WavError::EndOfStream);
        }
        let mut buf = pool.allocate().ok_or(WavError::NoFreeBuffer)?;

        if let Err(e) = fill(&mut self.reader, self.looping, &mut buf) {
            let _ = pool.release(buf);
            return Err(e);
        }

        buf.clear_flags();
        buf.set_flags(BufferFlags::READ);
        if buf.channels() > 1 {
            buf.set_flags(BufferFlags::INTERLEAVED);
        }
        Ok(buf)
    }

    /// Return a buffer obtained from [`read()`](Self::read).
    pub fn release(&self, buf: SampleBuffer<u16>) -> Result<(), WavError> {
        match &self.pool {
            Some(pool) => pool
                .release(buf)
                .map_err(|_| WavError::Stream(Error::ForeignBuffer)),
            None => Ok(()),
        }
    }

    /// Seek back to the first sample.
    pub fn rewind(&mut self) -> Result<(), WavError> {
        let reader = self.reader.as_mut().ok_or(Error::NotStarted)?;
        reader.seek(0).map_err(hound::Error::IoError)?;
        Ok(())
    }

    pub fn channels(&self) -> u16 {
        self.spec.map_or(0, |s| s.channels)
    }

    /// Bits per sample.
    pub fn resolution(&self) -> u16 {
        self.spec.map_or(0, |s| s.bits_per_sample)
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.map_or(0, |s| s.sample_rate)
    }

    /// Total samples in the file, all channels counted.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

/// Read `dst.len()` samples, wrapping or zero-padding at the end of the data.
fn fill<R: Read + Seek>(
    slot: &mut Option<hound::WavReader<R>>,
    looping: bool,
    dst: &mut [u16],
) -> Result<(), WavError> {
    let mut offset = 0;
    while offset < dst.len() {
        let Some(reader) = slot.as_mut() else {
            break;
        };
        for sample in reader.samples::<i16>().take(dst.len() - offset) {
            dst[offset] = sample? as u16;
            offset += 1;
        }
        if offset == dst.len() {
            break;
        }
        if looping {
            reader.seek(0).map_err(hound::Error::IoError)?;
        } else {
            dst[offset..].fill(0);
            *slot = None;
            trace!("wav: end of data");
        }
    }
    Ok(())
}
