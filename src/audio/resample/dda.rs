//! `DdaConverter`: digital differential analyzer rate converter.
//!
//! Each source frame is repeated while the accumulator stays positive; every
//! emission costs `src_rate`, every consumed source frame refunds `dst_rate`.
//! Integer arithmetic only, so the output count is exact over any run of
//! `src_rate / gcd(src_rate, dst_rate)` source frames.

use byteorder::{ByteOrder, LittleEndian};

/// Bytes per output frame: interleaved stereo, signed 16-bit little-endian.
pub const OUTPUT_FRAME_BYTES: usize = 4;

/// Decodes one source frame into a left/right pair.
pub type FrameLoader = fn(&[u8]) -> [i16; 2];

#[derive(Debug, Clone)]
pub struct DdaConverter {
    src_rate: i64,
    dst_rate: i64,
    /// `None` until the first conversion.
    cur_pos: Option<i64>,
    /// The previous call ran out of destination room before the held frame
    /// had been emitted as often as the accumulator asked for.
    mid_sample: bool,
    held: [i16; 2],
}

impl DdaConverter {
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate: src_rate as i64,
            dst_rate: dst_rate as i64,
            cur_pos: None,
            mid_sample: false,
            held: [0; 2],
        }
    }

    pub fn reset(&mut self) {
        self.cur_pos = None;
        self.mid_sample = false;
        self.held = [0; 2];
    }

    pub fn position(&self) -> Option<i64> {
        self.cur_pos
    }

    pub fn src_rate(&self) -> u32 {
        self.src_rate as u32
    }

    pub fn dst_rate(&self) -> u32 {
        self.dst_rate as u32
    }

    #[inline]
    fn emit(&self, dst: &mut [u8], frame: usize) {
        let at = frame * OUTPUT_FRAME_BYTES;
        LittleEndian::write_i16(&mut dst[at..at + 2], self.held[0]);
        LittleEndian::write_i16(&mut dst[at + 2..at + 4], self.held[1]);
    }

    /// Converts whole frames of `src` into `dst`. Returns
    /// `(dst_bytes_written, src_bytes_consumed)`; trailing partial frames on
    /// either side are left untouched.
    pub fn convert(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        frame_bytes: usize,
        load: FrameLoader,
    ) -> (usize, usize) {
        let src_frames = src.len() / frame_bytes;
        let dst_frames = dst.len() / OUTPUT_FRAME_BYTES;
        let mut written = 0;
        let mut consumed = 0;

        let mut pos = match self.cur_pos {
            Some(pos) => pos,
            None => self.dst_rate,
        };

        if self.mid_sample {
            while pos > 0 && written < dst_frames {
                self.emit(dst, written);
                written += 1;
                pos -= self.src_rate;
            }
            if pos > 0 {
                self.cur_pos = Some(pos);
                return (written * OUTPUT_FRAME_BYTES, 0);
            }
            pos += self.dst_rate;
            self.mid_sample = false;
        }

        while consumed < src_frames && written < dst_frames {
            let at = consumed * frame_bytes;
            self.held = load(&src[at..at + frame_bytes]);
            consumed += 1;

            while pos > 0 && written < dst_frames {
                self.emit(dst, written);
                written += 1;
                pos -= self.src_rate;
            }
            if pos > 0 {
                self.mid_sample = true;
                break;
            }
            pos += self.dst_rate;
        }

        // A position landing on dst_rate is not wrapped to 0; the phase carries into the next call.
        self.cur_pos = Some(pos);
        (written * OUTPUT_FRAME_BYTES, consumed * frame_bytes)
    }
}
