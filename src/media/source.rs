//! `SourcePipeline`: TX side of the media task.
//!
//! Every TX tick works out how many SBC frames of PCM are due since the
//! previous tick, pulls that much from the application feed, converts it
//! to stereo 16-bit at the encoder rate, encodes it and packs the frames
//! into MTU-sized media packets on the outbound queue.

use std::sync::Arc;

use tracing::{Level, debug, info, span, trace, warn};

use super::context::MediaContext;
use super::stats::bump;
use super::{BoxedSource, FeedingMode, FeedingParams};
use crate::audio::buffer::{AudioFrame, MediaPayloadHeader};
use crate::audio::codec::{BoxedEncoder, EncoderParams};
use crate::audio::constants::{MEDIA_PAYLOAD_HEADER_LEN, SBC_MAX_FRAME_LEN, SBC_MAX_PCM_SAMPLES};
use crate::audio::resample::{OUTPUT_FRAME_BYTES, Resampler};
use crate::audio::sbc::{BitrateController, ChannelMode, CodecSessionConfig, SamplingFrequency};
use crate::common::{MediaError, MediaResult};

/// SBC sampling frequency used for a feed at `rate` Hz.
pub fn sbc_frequency_for_feed(rate: u32) -> MediaResult<SamplingFrequency> {
    match rate {
        8_000 | 12_000 | 16_000 | 24_000 | 32_000 | 48_000 => Ok(SamplingFrequency::Hz48000),
        11_025 | 22_050 | 44_100 => Ok(SamplingFrequency::Hz44100),
        _ => Err(MediaError::invalid_config(format!(
            "unsupported feeding rate {} Hz",
            rate
        ))),
    }
}

pub struct SourcePipeline {
    ctx: Arc<MediaContext>,
    encoder: BoxedEncoder,
    source: BoxedSource,
    bitrate: Option<BitrateController>,
    params: Option<EncoderParams>,
    mtu: usize,
    feeding: FeedingParams,
    resampler: Option<Resampler>,
    running: bool,
    /// PCM bytes owed to the encoder, in feed layout.
    counter: u64,
    timestamp: u32,
    /// Feed bytes pulled but not yet converted.
    src_pending: Vec<u8>,
    /// Converted stereo 16-bit bytes not yet encoded.
    residue: Vec<u8>,
    convert_buf: Vec<u8>,
    pcm: Vec<i16>,
    encoded: Vec<u8>,
}

impl SourcePipeline {
    pub fn new(ctx: Arc<MediaContext>, encoder: BoxedEncoder, source: BoxedSource) -> Self {
        Self {
            ctx,
            encoder,
            source,
            bitrate: None,
            params: None,
            mtu: 0,
            feeding: FeedingParams::default(),
            resampler: None,
            running: false,
            counter: 0,
            timestamp: 0,
            src_pending: Vec::new(),
            residue: Vec::new(),
            convert_buf: vec![0; SBC_MAX_PCM_SAMPLES * 2],
            pcm: vec![0; SBC_MAX_PCM_SAMPLES],
            encoded: vec![0; SBC_MAX_FRAME_LEN],
        }
    }

    pub fn params(&self) -> Option<EncoderParams> {
        self.params
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Sets up the encoder for a newly opened stream. The bitpool comes from
    /// the configured target bitrate, capped for links without EDR.
    pub fn init_encoder(&mut self, config: CodecSessionConfig, mtu: usize, edr: bool) -> MediaResult<()> {
        let source = &self.ctx.config.source;
        let mut controller = BitrateController::for_link(
            source.default_bitrate,
            source.bitrate_step,
            source.non_edr_max_rate,
            edr,
        );
        let choice = controller.select(&config)?;
        let params = EncoderParams {
            config,
            bitpool: choice.bitpool,
        };
        self.encoder.configure(&params)?;

        self.bitrate = Some(controller);
        self.params = Some(params);
        self.mtu = mtu;
        self.rebuild_resampler()?;
        info!(
            "encoder initialized: {} Hz, {:?}, bitpool {} ({} kbps), mtu {}",
            config.frequency.hz(),
            config.channel_mode,
            choice.bitpool,
            choice.bitrate,
            mtu
        );
        Ok(())
    }

    /// Applies new peer bitpool limits and MTU to the running encoder.
    pub fn update_encoder(&mut self, min_bitpool: u8, max_bitpool: u8, mtu: usize) -> MediaResult<()> {
        let params = self.params.ok_or(MediaError::NotRunning)?;
        let config = CodecSessionConfig {
            min_bitpool,
            max_bitpool,
            ..params.config
        };
        self.reconfigure(config)?;
        self.mtu = mtu;
        Ok(())
    }

    /// Sets the PCM layout of the feed. The encoder follows the feed's rate
    /// family; a mono feed is encoded as joint stereo.
    pub fn init_feeding(&mut self, feeding: FeedingParams) -> MediaResult<()> {
        let frequency = sbc_frequency_for_feed(feeding.sample_rate)?;
        Resampler::new(
            feeding.sample_rate,
            frequency.hz(),
            feeding.bits_per_sample,
            feeding.channels,
        )?;
        self.feeding = feeding;
        debug!(
            "feeding: {} Hz, {} bits, {} channels",
            feeding.sample_rate, feeding.bits_per_sample, feeding.channels
        );

        if let Some(params) = self.params {
            let mut config = CodecSessionConfig {
                frequency,
                ..params.config
            };
            if feeding.channels == 1 {
                config.channel_mode = ChannelMode::JointStereo;
            }
            self.reconfigure(config)?;
        }
        self.rebuild_resampler()
    }

    fn reconfigure(&mut self, config: CodecSessionConfig) -> MediaResult<()> {
        let controller = self.bitrate.as_mut().ok_or(MediaError::NotRunning)?;
        let choice = controller.select(&config)?;
        let params = EncoderParams {
            config,
            bitpool: choice.bitpool,
        };
        self.encoder.configure(&params)?;
        self.params = Some(params);
        debug!(
            "encoder updated: {} Hz, {:?}, bitpool {} ({} kbps)",
            config.frequency.hz(),
            config.channel_mode,
            choice.bitpool,
            choice.bitrate
        );
        Ok(())
    }

    fn rebuild_resampler(&mut self) -> MediaResult<()> {
        let Some(params) = self.params else {
            return Ok(());
        };
        self.resampler = Some(Resampler::new(
            self.feeding.sample_rate,
            params.config.frequency.hz(),
            self.feeding.bits_per_sample,
            self.feeding.channels,
        )?);
        self.src_pending.clear();
        self.residue.clear();
        Ok(())
    }

    pub fn start(&mut self) {
        if self.params.is_none() {
            warn!("tx start ignored, encoder not initialized");
            return;
        }
        self.running = true;
        self.counter = 0;
        info!("tx started");
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.counter = 0;
        self.src_pending.clear();
        self.residue.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        info!("tx stopped");
    }

    pub fn flush(&mut self) {
        match self.ctx.outbound() {
            Ok(mut queue) => {
                let dropped = queue.flush();
                debug!("source flushed {} packets", dropped);
            }
            Err(e) => warn!("outbound flush skipped: {}", e),
        }
        self.counter = 0;
    }

    /// Feed bytes corresponding to one tick of audio at the encoder rate.
    fn bytes_per_tick(&self, params: &EncoderParams) -> u64 {
        params.config.frequency.hz() as u64
            * self.feeding.bits_per_sample as u64
            / 8
            * self.feeding.channels as u64
            * self.ctx.config.tick_ms
            / 1000
    }

    fn pcm_bytes_per_frame(&self, params: &EncoderParams) -> u64 {
        (params.config.samples_per_frame() * self.feeding.bytes_per_frame()) as u64
    }

    /// Frames due after `elapsed_us`, capped per tick. The budget for the
    /// returned frames is taken out of the counter.
    fn frames_due(&mut self, params: &EncoderParams, elapsed_us: u64) -> usize {
        let tick_us = self.ctx.config.tick_ms * 1000;
        self.counter += self.bytes_per_tick(params) * elapsed_us / tick_us;

        let per_frame = self.pcm_bytes_per_frame(params);
        let mut frames = (self.counter / per_frame) as usize;
        let max = self.ctx.config.source.max_frames_per_tick;
        if frames > max {
            warn!("tx budget of {} frames limited to {}", frames, max);
            frames = max;
        }
        self.counter -= frames as u64 * per_frame;
        frames
    }

    fn frames_per_packet(&self, params: &EncoderParams) -> usize {
        let by_mtu = self.mtu.saturating_sub(MEDIA_PAYLOAD_HEADER_LEN) / params.frame_length();
        self.ctx.config.source.max_frames_per_packet.min(by_mtu).max(1)
    }

    pub fn tx_tick(&mut self, elapsed_us: u64) {
        let _span = span!(Level::TRACE, "tx_tick").entered();
        bump(&self.ctx.stats.tx_ticks, 1);

        let Some(params) = self.params else {
            return;
        };
        if !self.running {
            return;
        }

        let discard = self.ctx.tx_discard();
        let frames = self.frames_due(&params, elapsed_us);
        if frames == 0 {
            return;
        }
        let per_packet = self.frames_per_packet(&params);
        let packets = frames.div_ceil(per_packet);

        match self.ctx.outbound() {
            Ok(mut queue) => {
                if discard {
                    queue.flush();
                } else {
                    let evicted = queue.make_room(packets);
                    bump(&self.ctx.stats.outbound_dropped, evicted as u64);
                }
            }
            Err(e) => {
                warn!("tx tick skipped: {}", e);
                self.counter += frames as u64 * self.pcm_bytes_per_frame(&params);
                return;
            }
        }

        let mut remaining = frames;
        while remaining > 0 {
            let count = remaining.min(per_packet);
            let produced = match self.produce_packet(&params, count, discard) {
                Ok(produced) => produced,
                Err(e) => {
                    warn!("tx packet dropped: {}", e);
                    0
                }
            };
            remaining -= produced;
            if produced < count {
                break;
            }
        }

        if remaining > 0 {
            bump(&self.ctx.stats.underruns, 1);
            self.counter += remaining as u64 * self.pcm_bytes_per_frame(&params);
            warn!("tx underrun, {} of {} frames not sent", remaining, frames);
        }
        trace!("tx tick produced {} frames", frames - remaining);
    }

    /// Encodes up to `count` frames into one media packet. Returns how many
    /// frames made it into the packet.
    fn produce_packet(&mut self, params: &EncoderParams, count: usize, discard: bool) -> MediaResult<usize> {
        let frame_len = params.frame_length();
        let samples = params.pcm_samples_per_frame();
        let mut buf = self.ctx.pool.acquire(MEDIA_PAYLOAD_HEADER_LEN + count * frame_len)?;
        buf.push(MediaPayloadHeader::new(count as u8).to_byte());

        let mut produced = 0;
        while produced < count {
            if !self.read_frame(params) {
                break;
            }
            let written = match self.encoder.encode_frame(&self.pcm[..samples], &mut self.encoded) {
                Ok(written) => written,
                Err(e) if produced > 0 => {
                    warn!("encode failed after {} frames, sending partial packet: {}", produced, e);
                    break;
                }
                Err(e) => return Err(e),
            };
            buf.extend_from_slice(&self.encoded[..written]);
            produced += 1;
        }
        if produced == 0 {
            return Ok(0);
        }

        buf[0] = MediaPayloadHeader::new(produced as u8).to_byte();
        let frame = AudioFrame::outbound(buf, produced as u16, self.timestamp)?;
        let spf = params.config.samples_per_frame() as u32;
        self.timestamp = self.timestamp.wrapping_add(produced as u32 * spf);
        bump(&self.ctx.stats.frames_encoded, produced as u64);

        if discard {
            bump(&self.ctx.stats.outbound_dropped, 1);
            return Ok(produced);
        }
        let mut queue = self.ctx.outbound()?;
        MediaContext::push(&mut queue, frame, &self.ctx.stats.outbound_dropped);
        bump(&self.ctx.stats.packets_sent, 1);
        Ok(produced)
    }

    /// Fills `self.pcm` with one frame of encoder input. Returns `false` on
    /// an underrun in synchronous feeding mode; what was read is kept for
    /// the next attempt.
    fn read_frame(&mut self, params: &EncoderParams) -> bool {
        let Some(resampler) = self.resampler.as_mut() else {
            return false;
        };
        let spf = params.config.samples_per_frame();
        let need = spf * OUTPUT_FRAME_BYTES;
        let in_frame = resampler.input_frame_bytes();
        let src_rate = self.feeding.sample_rate as usize;
        let dst_rate = params.config.frequency.hz() as usize;
        let asynchronous = self.ctx.config.source.feeding_mode == FeedingMode::Asynchronous;

        while self.residue.len() < need {
            let missing = (need - self.residue.len()) / OUTPUT_FRAME_BYTES;
            let wanted = (missing * src_rate).div_ceil(dst_rate) * in_frame;
            let have = self.src_pending.len();
            if have < wanted {
                self.src_pending.resize(wanted, 0);
                let read = self.source.pull(&mut self.src_pending[have..]);
                if have + read < wanted {
                    if !asynchronous {
                        self.src_pending.truncate(have + read);
                        return false;
                    }
                    let silence = if self.feeding.bits_per_sample == 8 { 0x80 } else { 0 };
                    self.src_pending[have + read..].fill(silence);
                }
            }

            let room = missing * OUTPUT_FRAME_BYTES;
            let (written, consumed) = resampler.convert(&self.src_pending, &mut self.convert_buf[..room]);
            self.residue.extend_from_slice(&self.convert_buf[..written]);
            self.src_pending.drain(..consumed);
            if written == 0 && consumed == 0 {
                return false;
            }
        }

        let stereo = &self.residue[..need];
        if params.config.channels() == 1 {
            for (out, frame) in self.pcm.iter_mut().zip(stereo.chunks_exact(OUTPUT_FRAME_BYTES)) {
                let left = i16::from_le_bytes([frame[0], frame[1]]) as i32;
                let right = i16::from_le_bytes([frame[2], frame[3]]) as i32;
                *out = ((left + right) / 2) as i16;
            }
        } else {
            for (out, sample) in self.pcm.iter_mut().zip(stereo.chunks_exact(2)) {
                *out = i16::from_le_bytes([sample[0], sample[1]]);
            }
        }
        self.residue.drain(..need);
        true
    }
}
