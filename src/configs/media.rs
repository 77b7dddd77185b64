use serde::{Deserialize, Serialize};

use crate::audio::{
    buffer::OverflowPolicy,
    constants::{
        BITRATE_STEP, DEFAULT_SBC_BITRATE, DEFAULT_TICK_MS, MAX_A2DP_DELAYED_START_FRAME_COUNT,
        MAX_FRAMES_PER_PACKET, MAX_OUTPUT_A2DP_FRAME_QUEUE_SZ, MAX_PCM_FRAME_NUM_PER_TICK,
        MAX_VOICE_FRAME_QUEUE_SZ, NON_EDR_MAX_RATE,
    },
};
use crate::media::FeedingMode;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MediaConfig {
    /// Period of both the RX and TX tick timers.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Bounded wait used by producers when posting frames and commands.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    #[serde(default = "default_command_queue_len")]
    pub command_queue_len: usize,
    /// Upper bound on frame buffers alive at once across both queues.
    #[serde(default = "default_frame_pool_buffers")]
    pub frame_pool_buffers: usize,
    #[serde(default = "default_frame_pool_buffer_size")]
    pub frame_pool_buffer_size: usize,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SinkConfig {
    #[serde(default = "default_sink_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_voice_queue_capacity")]
    pub voice_queue_capacity: usize,
    #[serde(default = "default_sink_overflow")]
    pub overflow: OverflowPolicy,
    /// Frames that must be buffered after a (re)configuration before the
    /// RX tick starts decoding.
    #[serde(default = "default_delayed_start_frames")]
    pub delayed_start_frames: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_frames_per_tick")]
    pub max_frames_per_tick: usize,
    #[serde(default = "default_max_frames_per_packet")]
    pub max_frames_per_packet: usize,
    /// Target encoder rate in kbps.
    #[serde(default = "default_bitrate")]
    pub default_bitrate: u32,
    #[serde(default = "default_bitrate_step")]
    pub bitrate_step: u32,
    /// Rate cap applied when the link has no EDR support.
    #[serde(default = "default_non_edr_max_rate")]
    pub non_edr_max_rate: u32,
    #[serde(default)]
    pub feeding_mode: FeedingMode,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            command_queue_len: default_command_queue_len(),
            frame_pool_buffers: default_frame_pool_buffers(),
            frame_pool_buffer_size: default_frame_pool_buffer_size(),
            sink: SinkConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_sink_queue_capacity(),
            voice_queue_capacity: default_voice_queue_capacity(),
            overflow: default_sink_overflow(),
            delayed_start_frames: default_delayed_start_frames(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_source_queue_capacity(),
            max_frames_per_tick: default_max_frames_per_tick(),
            max_frames_per_packet: default_max_frames_per_packet(),
            default_bitrate: default_bitrate(),
            bitrate_step: default_bitrate_step(),
            non_edr_max_rate: default_non_edr_max_rate(),
            feeding_mode: FeedingMode::default(),
        }
    }
}

impl MediaConfig {
    /// Rejects values that would make the tick math divide by zero or
    /// build zero-capacity queues.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_ms == 0 {
            return Err("media.tick_ms must be non-zero".into());
        }
        if self.command_queue_len == 0 {
            return Err("media.command_queue_len must be non-zero".into());
        }
        if self.frame_pool_buffers == 0 || self.frame_pool_buffer_size == 0 {
            return Err("media.frame_pool_* must be non-zero".into());
        }
        if self.sink.queue_capacity == 0 || self.sink.voice_queue_capacity == 0 {
            return Err("media.sink queue capacities must be non-zero".into());
        }
        if self.source.queue_capacity == 0 || self.source.max_frames_per_tick == 0 {
            return Err("media.source.queue_capacity and max_frames_per_tick must be non-zero".into());
        }
        if !(1..=MAX_FRAMES_PER_PACKET).contains(&self.source.max_frames_per_packet) {
            return Err(format!(
                "media.source.max_frames_per_packet must be in 1..={}",
                MAX_FRAMES_PER_PACKET
            ));
        }
        if self.source.bitrate_step == 0 {
            return Err("media.source.bitrate_step must be non-zero".into());
        }
        Ok(())
    }
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_enqueue_timeout_ms() -> u64 {
    10
}

fn default_command_queue_len() -> usize {
    32
}

fn default_frame_pool_buffers() -> usize {
    64
}

fn default_frame_pool_buffer_size() -> usize {
    1024
}

fn default_sink_queue_capacity() -> usize {
    MAX_OUTPUT_A2DP_FRAME_QUEUE_SZ
}

fn default_voice_queue_capacity() -> usize {
    MAX_VOICE_FRAME_QUEUE_SZ
}

fn default_sink_overflow() -> OverflowPolicy {
    OverflowPolicy::EvictOldest
}

fn default_delayed_start_frames() -> usize {
    MAX_A2DP_DELAYED_START_FRAME_COUNT
}

fn default_source_queue_capacity() -> usize {
    MAX_OUTPUT_A2DP_FRAME_QUEUE_SZ
}

fn default_max_frames_per_tick() -> usize {
    MAX_PCM_FRAME_NUM_PER_TICK
}

fn default_max_frames_per_packet() -> usize {
    MAX_FRAMES_PER_PACKET
}

fn default_bitrate() -> u32 {
    DEFAULT_SBC_BITRATE
}

fn default_bitrate_step() -> u32 {
    BITRATE_STEP
}

fn default_non_edr_max_rate() -> u32 {
    NON_EDR_MAX_RATE
}
