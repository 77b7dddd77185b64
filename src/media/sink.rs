//! `SinkPipeline`: RX side of the media task.
//!
//! Each RX tick decodes up to `frames_per_tick` frames. Packets are taken
//! off the inbound queue before decoding so producers never wait on the
//! decoder. A2DP packets carry several SBC frames; a packet that is only
//! partly decoded is held by the pipeline, with its offset and remaining
//! frame count updated, and resumed on the next tick. Voice frames carry
//! one mSBC frame each and go through the PLC engine whether or not they
//! decode.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{Level, debug, info, span, trace, warn};

use super::context::MediaContext;
use super::stats::bump;
use super::{BoxedSink, PcmSink};
use crate::audio::buffer::{AudioFrame, PACKET_STATUS_GOOD};
use crate::audio::codec::{BoxedDecoder, DecodeOutput, DecodeStatus, FrameDecoder};
use crate::audio::constants::{PLC_FS, SBC_MAX_PCM_SAMPLES};
use crate::audio::plc::{MSBC_ZERO_FRAME, MSBC_ZERO_PCM, PlcEngine};
use crate::audio::sbc::{CodecSessionConfig, SbcFrame};
use crate::common::MediaResult;

/// Frames to decode per tick so playback keeps up with the stream:
/// `(rate × tick_ms / 1000) / (blocks × subbands) + 1`.
pub fn frames_per_tick(config: &CodecSessionConfig, tick_ms: u64) -> usize {
    let samples_per_tick = config.frequency.hz() as u64 * tick_ms / 1000;
    (samples_per_tick / config.samples_per_frame() as u64) as usize + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Idle,
    Audio(CodecSessionConfig),
    Voice,
}

pub struct SinkPipeline {
    ctx: Arc<MediaContext>,
    decoder: BoxedDecoder,
    sink: BoxedSink,
    plc: PlcEngine,
    mode: SinkMode,
    /// Packet taken off the inbound queue with frames left to decode.
    current: Option<AudioFrame>,
    frames_per_tick: usize,
    reset_pending: bool,
    awaiting_start: bool,
    pcm: Vec<i16>,
    pcm_bytes: Vec<u8>,
}

impl SinkPipeline {
    pub fn new(ctx: Arc<MediaContext>, decoder: BoxedDecoder, sink: BoxedSink) -> Self {
        Self {
            ctx,
            decoder,
            sink,
            plc: PlcEngine::new(),
            mode: SinkMode::Idle,
            current: None,
            frames_per_tick: 0,
            reset_pending: false,
            awaiting_start: false,
            pcm: vec![0; SBC_MAX_PCM_SAMPLES],
            pcm_bytes: vec![0; SBC_MAX_PCM_SAMPLES * 2],
        }
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    pub fn frames_per_tick(&self) -> usize {
        self.frames_per_tick
    }

    /// Configures A2DP decoding from a codec information element. Decoding
    /// waits for the delayed-start threshold afterwards.
    pub fn configure(&mut self, codec_info: &[u8]) -> MediaResult<()> {
        let config = CodecSessionConfig::from_codec_info(codec_info)?;
        self.frames_per_tick = frames_per_tick(&config, self.ctx.config.tick_ms);
        self.mode = SinkMode::Audio(config);
        self.current = None;
        self.reset_decoder();
        self.awaiting_start = true;
        info!(
            "sink configured: {} Hz, {:?}, {} blocks, {} subbands, {} frames per tick",
            config.frequency.hz(),
            config.channel_mode,
            config.blocks(),
            config.subband_count(),
            self.frames_per_tick
        );
        Ok(())
    }

    /// Switches to mSBC voice frames. Voice decoding starts immediately.
    pub fn configure_voice(&mut self) {
        let config = CodecSessionConfig::msbc();
        self.frames_per_tick = frames_per_tick(&config, self.ctx.config.tick_ms);
        self.mode = SinkMode::Voice;
        self.reset_decoder();
        self.plc.reset();
        self.awaiting_start = false;
        info!("sink configured for mSBC voice, {} frames per tick", self.frames_per_tick);
    }

    fn reset_decoder(&mut self) {
        let (channels, enhanced) = match self.mode {
            SinkMode::Audio(config) => (config.channels(), false),
            SinkMode::Voice => (1, true),
            SinkMode::Idle => return,
        };
        self.decoder.reset(channels, channels, enhanced);
        self.reset_pending = false;
        bump(&self.ctx.stats.decoder_resets, 1);
        debug!("decoder reset ({} channels, enhanced {})", channels, enhanced);
    }

    /// Returns `true` once, when enough frames are buffered after a
    /// (re)configuration to start the RX tick.
    pub fn poll_delayed_start(&mut self) -> bool {
        if !self.awaiting_start {
            return false;
        }
        let buffered = match self.ctx.inbound() {
            Ok(queue) => queue.len() + usize::from(self.current.is_some()),
            Err(_) => return false,
        };
        if buffered < self.ctx.config.sink.delayed_start_frames {
            return false;
        }
        self.awaiting_start = false;
        debug!("delayed start reached with {} frames buffered", buffered);
        true
    }

    /// Stops decoding the current track: drops buffered frames and waits
    /// for the delayed-start threshold again.
    pub fn clear_track(&mut self) {
        self.flush();
        if matches!(self.mode, SinkMode::Audio(_)) {
            self.awaiting_start = true;
        }
        self.reset_pending = true;
    }

    pub fn flush(&mut self) {
        let mut dropped = usize::from(self.current.take().is_some());
        if let Ok(mut queue) = self.ctx.inbound() {
            dropped += queue.flush();
        }
        if let Ok(mut queue) = self.ctx.voice() {
            dropped += queue.flush();
        }
        debug!("sink flushed {} frames", dropped);
    }

    pub fn rx_tick(&mut self) {
        let _span = span!(Level::TRACE, "rx_tick").entered();
        bump(&self.ctx.stats.rx_ticks, 1);

        if self.ctx.rx_discard() {
            self.flush();
            return;
        }

        match self.mode {
            SinkMode::Idle => {}
            SinkMode::Audio(config) => self.decode_audio(config),
            SinkMode::Voice => self.decode_voice(),
        }
    }

    fn decode_audio(&mut self, config: CodecSessionConfig) {
        let mut budget = self.frames_per_tick;

        while budget > 0 {
            let mut packet = match self.current.take() {
                Some(packet) => packet,
                None => match self.ctx.inbound() {
                    Ok(mut queue) => match queue.try_dequeue() {
                        Some(packet) => packet,
                        None => break,
                    },
                    Err(e) => {
                        warn!("rx tick skipped: {}", e);
                        return;
                    }
                },
            };
            if packet.is_exhausted() {
                continue;
            }
            if self.reset_pending {
                self.reset_decoder();
            }

            match decode_checked(&mut *self.decoder, packet.remaining(), &mut self.pcm, Some(&config)) {
                Ok(out) => {
                    packet.consume(out.consumed);
                    budget -= 1;
                    if out.pcm_samples > 0 {
                        bump(&self.ctx.stats.frames_decoded, 1);
                        deliver(&mut *self.sink, &mut self.pcm_bytes, &self.pcm[..out.pcm_samples]);
                    }
                    if !packet.is_exhausted() {
                        self.current = Some(packet);
                    }
                }
                Err(status) => self.on_decode_error(status),
            }
        }
        trace!("rx tick done, {} of {} frames unused", budget, self.frames_per_tick);
    }

    fn decode_voice(&mut self) {
        let ctx = self.ctx.clone();

        for _ in 0..self.frames_per_tick {
            let frame = match ctx.voice() {
                Ok(mut queue) => queue.try_dequeue(),
                Err(e) => {
                    warn!("rx tick skipped: {}", e);
                    return;
                }
            };
            let Some(frame) = frame else {
                break;
            };

            if self.reset_pending {
                self.reset_decoder();
            }

            let mut out = [0i16; PLC_FS];
            let status = frame.header().layer_specific;
            let decoded = if status == PACKET_STATUS_GOOD {
                decode_checked(&mut *self.decoder, frame.remaining(), &mut self.pcm, None)
                    .and_then(|d| {
                        if d.pcm_samples < PLC_FS {
                            Err(DecodeStatus::NotEnoughAudio)
                        } else {
                            Ok(d)
                        }
                    })
            } else {
                trace!("voice frame arrived with packet status {}", status);
                Err(DecodeStatus::NotEnoughBody)
            };

            match decoded {
                Ok(_) => {
                    let mut input = [0i16; PLC_FS];
                    input.copy_from_slice(&self.pcm[..PLC_FS]);
                    self.plc.good_frame(&input, &mut out);
                    bump(&ctx.stats.frames_decoded, 1);
                }
                Err(err) => {
                    if status == PACKET_STATUS_GOOD {
                        self.on_decode_error(err);
                    }
                    let zir = self.zero_input_response();
                    self.plc.bad_frame(&zir, &mut out);
                    bump(&ctx.stats.frames_concealed, 1);
                }
            }
            deliver(&mut *self.sink, &mut self.pcm_bytes, &out);
        }
    }

    /// Decoder output for the silent mSBC frame, continuing its current
    /// filter state.
    fn zero_input_response(&mut self) -> [i16; PLC_FS] {
        let mut zir = MSBC_ZERO_PCM;
        let out = self.decoder.decode_frame(&MSBC_ZERO_FRAME, &mut self.pcm);
        if out.status.is_success() && out.pcm_samples >= PLC_FS {
            zir.copy_from_slice(&self.pcm[..PLC_FS]);
        }
        zir
    }

    fn on_decode_error(&mut self, status: DecodeStatus) {
        bump(&self.ctx.stats.decode_errors, 1);
        if status.is_transient() {
            warn!("decode failed ({}), skipping rest of packet", status);
        } else {
            warn!("decode failed ({}), decoder reset pending", status);
            self.reset_pending = true;
        }
    }
}

/// Validates the frame at the start of `input`, then hands it to the
/// decoder. With `expected` set, a header that disagrees with the stream
/// configuration is rejected as invalid.
fn decode_checked(
    decoder: &mut dyn FrameDecoder,
    input: &[u8],
    pcm: &mut [i16],
    expected: Option<&CodecSessionConfig>,
) -> Result<DecodeOutput, DecodeStatus> {
    let frame = SbcFrame::parse(input)?;
    frame.verify_crc()?;

    if let Some(config) = expected {
        let header = frame.header();
        if header.frequency != config.frequency
            || header.channel_mode != config.channel_mode
            || header.block_length != config.block_length
            || header.subbands != config.subbands
        {
            return Err(DecodeStatus::InvalidParameters);
        }
    }

    let mut out = decoder.decode_frame(&input[..frame.len()], pcm);
    if !out.status.is_success() {
        return Err(out.status);
    }
    if out.consumed == 0 {
        return Err(DecodeStatus::NotEnoughBody);
    }
    out.consumed = out.consumed.min(frame.len());
    out.pcm_samples = out.pcm_samples.min(pcm.len());
    Ok(out)
}

fn deliver(sink: &mut dyn PcmSink, scratch: &mut [u8], samples: &[i16]) {
    let bytes = samples.len() * 2;
    LittleEndian::write_i16_into(samples, &mut scratch[..bytes]);
    sink.deliver(&scratch[..bytes]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::PACKET_STATUS_LOST;
    use crate::audio::sbc::SamplingFrequency;
    use crate::configs::MediaConfig;
    use crate::media::testing::{FakeDecoder, collecting_sink, media_payload, sbc_frame};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        ctx: Arc<MediaContext>,
        sink: SinkPipeline,
        pcm: Arc<Mutex<Vec<u8>>>,
        resets: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let ctx = Arc::new(MediaContext::new(MediaConfig::default()));
        let decoder = FakeDecoder::default();
        let resets = decoder.resets.clone();
        let (pcm, out) = collecting_sink();
        let sink = SinkPipeline::new(ctx.clone(), Box::new(decoder), out);
        Harness { ctx, sink, pcm, resets }
    }

    fn push_packet(ctx: &MediaContext, frames: usize, first_scale: u8) {
        let config = CodecSessionConfig::default();
        let payload = media_payload(&vec![sbc_frame(&config, 53, first_scale); frames]);
        let frame = AudioFrame::from_media_payload(&ctx.pool, &payload).unwrap();
        let mut queue = ctx.inbound().unwrap();
        MediaContext::push(&mut queue, frame, &ctx.stats.inbound_dropped);
    }

    fn default_info() -> [u8; 7] {
        CodecSessionConfig::default().to_codec_info().unwrap()
    }

    #[test]
    fn budget_formula() {
        assert_eq!(frames_per_tick(&CodecSessionConfig::default(), 20), 7);
        assert_eq!(frames_per_tick(&CodecSessionConfig::msbc(), 20), 3);
        let hz48 = CodecSessionConfig {
            frequency: SamplingFrequency::Hz48000,
            ..CodecSessionConfig::default()
        };
        assert_eq!(frames_per_tick(&hz48, 20), 8);
    }

    #[test]
    fn bad_codec_info_leaves_sink_idle() {
        let mut h = harness();
        assert!(h.sink.configure(&[0x06, 0, 0, 0x30, 0x15, 2, 53]).is_err());
        assert_eq!(h.sink.mode(), SinkMode::Idle);
    }

    #[test]
    fn delayed_start_waits_for_threshold() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        for _ in 0..4 {
            push_packet(&h.ctx, 1, 1);
        }
        assert!(!h.sink.poll_delayed_start());
        push_packet(&h.ctx, 1, 1);
        assert!(h.sink.poll_delayed_start());
        assert!(!h.sink.poll_delayed_start());
    }

    #[test]
    fn tick_budget_spans_packets_and_keeps_partial_packet() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        push_packet(&h.ctx, 5, 1);
        push_packet(&h.ctx, 5, 2);

        h.sink.rx_tick();

        assert!(h.ctx.inbound().unwrap().is_empty());
        let held = h.sink.current.as_ref().unwrap();
        assert_eq!(held.frames_to_process(), 3);
        assert_eq!(held.header().offset as usize, 1 + 2 * 119);

        let pcm = h.pcm.lock();
        assert_eq!(pcm.len(), 7 * 256 * 2);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 10);
        assert_eq!(i16::from_le_bytes([pcm[pcm.len() - 2], pcm[pcm.len() - 1]]), 20);
        assert_eq!(h.ctx.stats.snapshot().frames_decoded, 7);
    }

    #[test]
    fn held_packet_resumes_next_tick() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        push_packet(&h.ctx, 9, 1);

        h.sink.rx_tick();
        assert_eq!(h.sink.current.as_ref().unwrap().frames_to_process(), 2);
        h.sink.rx_tick();
        assert!(h.sink.current.is_none());
        assert_eq!(h.ctx.stats.snapshot().frames_decoded, 9);
    }

    /// Counts how often the inbound queue could be locked mid-decode.
    struct LockCheckingDecoder {
        inner: FakeDecoder,
        ctx: Arc<MediaContext>,
        unlocked: Arc<AtomicUsize>,
    }

    impl FrameDecoder for LockCheckingDecoder {
        fn reset(&mut self, max_channels: usize, pcm_stride: usize, enhanced: bool) {
            self.inner.reset(max_channels, pcm_stride, enhanced);
        }

        fn decode_frame(&mut self, input: &[u8], pcm_out: &mut [i16]) -> DecodeOutput {
            if self.ctx.inbound().is_ok() {
                self.unlocked.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.decode_frame(input, pcm_out)
        }
    }

    #[test]
    fn inbound_queue_is_free_while_decoding() {
        let config = MediaConfig {
            enqueue_timeout_ms: 1,
            ..MediaConfig::default()
        };
        let ctx = Arc::new(MediaContext::new(config));
        let unlocked = Arc::new(AtomicUsize::new(0));
        let decoder = LockCheckingDecoder {
            inner: FakeDecoder::default(),
            ctx: ctx.clone(),
            unlocked: unlocked.clone(),
        };
        let (_pcm, out) = collecting_sink();
        let mut sink = SinkPipeline::new(ctx.clone(), Box::new(decoder), out);
        sink.configure(&default_info()).unwrap();
        push_packet(&ctx, 5, 1);
        push_packet(&ctx, 5, 2);

        sink.rx_tick();

        assert_eq!(unlocked.load(Ordering::SeqCst), 7);
        assert_eq!(ctx.stats.snapshot().frames_decoded, 7);
    }

    #[test]
    fn checksum_error_skips_rest_of_packet() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        let config = CodecSessionConfig::default();
        let good = sbc_frame(&config, 53, 1);
        let mut bad = good.clone();
        bad[5] ^= 0xFF;
        let payload = media_payload(&[good.clone(), bad, good]);
        let frame = AudioFrame::from_media_payload(&h.ctx.pool, &payload).unwrap();
        h.ctx.inbound().unwrap().try_enqueue(frame);
        push_packet(&h.ctx, 1, 3);

        h.sink.rx_tick();

        assert!(h.ctx.inbound().unwrap().is_empty());
        let snap = h.ctx.stats.snapshot();
        assert_eq!(snap.frames_decoded, 2);
        assert_eq!(snap.decode_errors, 1);
        assert!(!h.sink.reset_pending);
    }

    #[test]
    fn mismatched_stream_parameters_reset_decoder() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        assert_eq!(h.resets.load(Ordering::SeqCst), 1);

        let other = CodecSessionConfig {
            frequency: SamplingFrequency::Hz48000,
            ..CodecSessionConfig::default()
        };
        let payload = media_payload(&[sbc_frame(&other, 53, 1)]);
        let frame = AudioFrame::from_media_payload(&h.ctx.pool, &payload).unwrap();
        h.ctx.inbound().unwrap().try_enqueue(frame);
        h.sink.rx_tick();
        assert!(h.sink.reset_pending);

        push_packet(&h.ctx, 1, 1);
        h.sink.rx_tick();
        assert_eq!(h.resets.load(Ordering::SeqCst), 2);
        assert_eq!(h.ctx.stats.snapshot().frames_decoded, 1);
    }

    #[test]
    fn discard_flag_flushes_without_decoding() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        push_packet(&h.ctx, 3, 1);
        h.ctx.set_rx_discard(true);
        h.sink.rx_tick();
        assert!(h.ctx.inbound().unwrap().is_empty());
        assert!(h.pcm.lock().is_empty());
    }

    #[test]
    fn voice_frames_pass_through_or_get_concealed() {
        let mut h = harness();
        h.sink.configure_voice();
        let msbc = CodecSessionConfig::msbc();
        let good = sbc_frame(&msbc, 26, 5);
        {
            let mut queue = h.ctx.voice().unwrap();
            queue.try_enqueue(AudioFrame::voice(&h.ctx.pool, &good, PACKET_STATUS_GOOD).unwrap());
            queue.try_enqueue(AudioFrame::voice(&h.ctx.pool, &[], PACKET_STATUS_LOST).unwrap());
            queue.try_enqueue(AudioFrame::voice(&h.ctx.pool, &[0x12; 57], PACKET_STATUS_GOOD).unwrap());
        }

        h.sink.rx_tick();

        let pcm = h.pcm.lock();
        assert_eq!(pcm.len(), 3 * PLC_FS * 2);
        assert!(pcm[..PLC_FS * 2].chunks(2).all(|c| i16::from_le_bytes([c[0], c[1]]) == 50));
        let snap = h.ctx.stats.snapshot();
        assert_eq!(snap.frames_decoded, 1);
        assert_eq!(snap.frames_concealed, 2);
        assert_eq!(snap.decode_errors, 1);
    }

    #[test]
    fn clear_track_rearms_delayed_start() {
        let mut h = harness();
        h.sink.configure(&default_info()).unwrap();
        for _ in 0..5 {
            push_packet(&h.ctx, 1, 1);
        }
        assert!(h.sink.poll_delayed_start());
        h.sink.clear_track();
        assert!(h.ctx.inbound().unwrap().is_empty());
        for _ in 0..5 {
            push_packet(&h.ctx, 1, 1);
        }
        assert!(h.sink.poll_delayed_start());
    }
}
