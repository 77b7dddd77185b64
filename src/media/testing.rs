//! Stand-in codec and PCM endpoints for worker tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{BoxedSink, PcmSource};
use crate::audio::codec::{DecodeOutput, DecodeStatus, EncoderParams, FrameDecoder, FrameEncoder};
use crate::audio::sbc::{CodecSessionConfig, SbcFrameHeader, seal_crc};
use crate::common::{MediaError, MediaResult};

/// Decodes any well-formed frame to `samples_per_frame × channels` copies of
/// `10 × byte 4` of the frame.
#[derive(Default)]
pub struct FakeDecoder {
    pub resets: Arc<AtomicUsize>,
}

impl FrameDecoder for FakeDecoder {
    fn reset(&mut self, _max_channels: usize, _pcm_stride: usize, _enhanced: bool) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn decode_frame(&mut self, input: &[u8], pcm_out: &mut [i16]) -> DecodeOutput {
        let header = match SbcFrameHeader::parse(input) {
            Ok(h) => h,
            Err(status) => return DecodeOutput::failed(status),
        };
        let len = header.frame_length();
        if input.len() < len {
            return DecodeOutput::failed(DecodeStatus::NotEnoughBody);
        }
        let cfg = header.session_config();
        let n = (cfg.samples_per_frame() * cfg.channels()).min(pcm_out.len());
        pcm_out[..n].fill(input[4] as i16 * 10);
        DecodeOutput {
            pcm_samples: n,
            consumed: len,
            status: DecodeStatus::Success,
        }
    }
}

/// Emits a valid all-zero frame of the configured length and keeps the
/// last PCM block it was given.
#[derive(Default)]
pub struct FakeEncoder {
    params: Option<EncoderParams>,
    pub configured: Arc<Mutex<Vec<EncoderParams>>>,
    pub last_pcm: Arc<Mutex<Vec<i16>>>,
    fail_after: Option<usize>,
    encoded: usize,
}

impl FakeEncoder {
    /// Encodes `frames` frames, then fails every call.
    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::default()
        }
    }
}

impl FrameEncoder for FakeEncoder {
    fn configure(&mut self, params: &EncoderParams) -> MediaResult<()> {
        self.params = Some(*params);
        self.configured.lock().push(*params);
        Ok(())
    }

    fn encode_frame(&mut self, pcm: &[i16], out: &mut [u8]) -> MediaResult<usize> {
        let params = self.params.ok_or_else(|| MediaError::Codec("not configured".into()))?;
        if pcm.len() != params.pcm_samples_per_frame() {
            return Err(MediaError::Codec(format!("got {} samples", pcm.len())));
        }
        if self.fail_after.is_some_and(|n| self.encoded >= n) {
            return Err(MediaError::Codec("encoder failure".into()));
        }
        self.encoded += 1;
        *self.last_pcm.lock() = pcm.to_vec();
        let frame = sbc_frame(&params.config, params.bitpool, 0);
        out[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }
}

/// A complete frame with a valid CRC and `first_scale` in byte 4.
pub fn sbc_frame(config: &CodecSessionConfig, bitpool: u8, first_scale: u8) -> Vec<u8> {
    let header = SbcFrameHeader::for_config(config, bitpool);
    let mut frame = vec![0u8; header.frame_length()];
    frame[..4].copy_from_slice(&header.to_bytes());
    frame[4] = first_scale;
    let _ = seal_crc(&mut frame);
    frame
}

/// Media payload header byte followed by `frames`.
pub fn media_payload(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![frames.len() as u8];
    for f in frames {
        out.extend_from_slice(f);
    }
    out
}

pub fn collecting_sink() -> (Arc<Mutex<Vec<u8>>>, BoxedSink) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let clone = collected.clone();
    let sink = move |pcm: &[u8]| clone.lock().extend_from_slice(pcm);
    (collected, Box::new(sink))
}

/// PCM source producing a constant sample, optionally limited in total.
pub struct ToneSource {
    pub sample: i16,
    pub remaining: Option<usize>,
    pub pulled: Arc<AtomicUsize>,
}

impl ToneSource {
    pub fn endless(sample: i16) -> Self {
        Self {
            sample,
            remaining: None,
            pulled: Arc::default(),
        }
    }
}

impl PcmSource for ToneSource {
    fn pull(&mut self, buf: &mut [u8]) -> usize {
        let mut n = buf.len() & !1;
        if let Some(remaining) = self.remaining.as_mut() {
            n = n.min(*remaining);
            *remaining -= n;
        }
        for chunk in buf[..n].chunks_exact_mut(2) {
            chunk.copy_from_slice(&self.sample.to_le_bytes());
        }
        self.pulled.fetch_add(n, Ordering::SeqCst);
        n
    }
}
