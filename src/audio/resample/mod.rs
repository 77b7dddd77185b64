//! PCM rate conversion for the outbound feed.
//!
//! | Input | Frame bytes | Conversion |
//! |---|---|---|
//! | 8-bit mono | 1 | unsigned → signed, duplicated to both channels |
//! | 8-bit stereo | 2 | unsigned → signed |
//! | 16-bit mono | 2 | duplicated to both channels |
//! | 16-bit stereo | 4 | copied |
//!
//! Output is always interleaved stereo 16-bit little-endian, which is what
//! the SBC encoder consumes.

pub mod dda;

pub use dda::{DdaConverter, OUTPUT_FRAME_BYTES};

use byteorder::{ByteOrder, LittleEndian};

use crate::common::{MediaError, MediaResult};

/// Promotes unsigned 8-bit PCM to the signed 16-bit range.
#[inline]
fn widen(sample: u8) -> i16 {
    ((sample as i16) - 0x80) << 8
}

fn load_mono8(frame: &[u8]) -> [i16; 2] {
    let s = widen(frame[0]);
    [s, s]
}

fn load_stereo8(frame: &[u8]) -> [i16; 2] {
    [widen(frame[0]), widen(frame[1])]
}

fn load_mono16(frame: &[u8]) -> [i16; 2] {
    let s = LittleEndian::read_i16(frame);
    [s, s]
}

fn load_stereo16(frame: &[u8]) -> [i16; 2] {
    [
        LittleEndian::read_i16(&frame[0..2]),
        LittleEndian::read_i16(&frame[2..4]),
    ]
}

/// Rate converter, one variant per input layout.
#[derive(Debug, Clone)]
pub enum Resampler {
    Mono8(DdaConverter),
    Stereo8(DdaConverter),
    Mono16(DdaConverter),
    Stereo16(DdaConverter),
}

impl Resampler {
    /// Selects the variant for the given input layout. Both rates must be
    /// non-zero, `bits_per_sample` 8 or 16, and `channels` 1 or 2.
    pub fn new(src_rate: u32, dst_rate: u32, bits_per_sample: u8, channels: u8) -> MediaResult<Self> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(MediaError::invalid_config("resampler rates must be non-zero"));
        }
        let dda = DdaConverter::new(src_rate, dst_rate);
        match (bits_per_sample, channels) {
            (8, 1) => Ok(Self::Mono8(dda)),
            (8, 2) => Ok(Self::Stereo8(dda)),
            (16, 1) => Ok(Self::Mono16(dda)),
            (16, 2) => Ok(Self::Stereo16(dda)),
            _ => Err(MediaError::invalid_config(format!(
                "unsupported PCM layout: {} bits x {} channels",
                bits_per_sample, channels
            ))),
        }
    }

    fn dda(&self) -> &DdaConverter {
        match self {
            Self::Mono8(d) | Self::Stereo8(d) | Self::Mono16(d) | Self::Stereo16(d) => d,
        }
    }

    /// Bytes per source frame for this variant.
    pub fn input_frame_bytes(&self) -> usize {
        match self {
            Self::Mono8(_) => 1,
            Self::Stereo8(_) | Self::Mono16(_) => 2,
            Self::Stereo16(_) => 4,
        }
    }

    /// Returns `true` when output equals input byte for byte.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Stereo16(_)) && self.dda().src_rate() == self.dda().dst_rate()
    }

    /// Accumulator value; `None` before the first conversion.
    pub fn position(&self) -> Option<i64> {
        self.dda().position()
    }

    /// Converts as much of `src` as fits into `dst`.
    /// Returns `(dst_bytes_written, src_bytes_consumed)`.
    pub fn convert(&mut self, src: &[u8], dst: &mut [u8]) -> (usize, usize) {
        let frame_bytes = self.input_frame_bytes();
        match self {
            Self::Mono8(d) => d.convert(src, dst, frame_bytes, load_mono8),
            Self::Stereo8(d) => d.convert(src, dst, frame_bytes, load_stereo8),
            Self::Mono16(d) => d.convert(src, dst, frame_bytes, load_mono16),
            Self::Stereo16(d) => d.convert(src, dst, frame_bytes, load_stereo16),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Mono8(d) | Self::Stereo8(d) | Self::Mono16(d) | Self::Stereo16(d) => d.reset(),
        }
    }
}
