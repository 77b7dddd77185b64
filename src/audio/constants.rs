//! Central constants for the media path.
//!
//! Magic numbers used under `src/audio/**` and `src/media/**` live here so
//! the tick math, queue sizing and codec limits stay consistent.

// ── Scheduling ───────────────────────────────────────────────────────────────

/// Default period of the RX and TX tick timers (ms).
pub const DEFAULT_TICK_MS: u64 = 20;

/// Upper bound on PCM frames encoded in one TX tick (20 ms tick).
pub const MAX_PCM_FRAME_NUM_PER_TICK: usize = 14;

/// Inbound frames buffered after a (re)configuration before decoding starts.
pub const MAX_A2DP_DELAYED_START_FRAME_COUNT: usize = 5;

// ── Queues ───────────────────────────────────────────────────────────────────

/// Capacity of the audio sink ring and the outbound media queue.
pub const MAX_OUTPUT_A2DP_FRAME_QUEUE_SZ: usize = 18;

/// Capacity of the voice sink jitter buffer.
pub const MAX_VOICE_FRAME_QUEUE_SZ: usize = 5;

// ── Media packets ────────────────────────────────────────────────────────────

/// The frame-count field of the media payload header is a nibble.
pub const MAX_FRAMES_PER_PACKET: usize = 15;

/// Mask for the frame-count nibble in the first payload byte.
pub const MEDIA_FRAME_COUNT_MASK: u8 = 0x0F;

/// Bytes in front of the first SBC frame of a media payload.
pub const MEDIA_PAYLOAD_HEADER_LEN: usize = 1;

/// Wire size of a serialized [`crate::audio::buffer::FrameHeader`].
pub const FRAME_HEADER_WIRE_LEN: usize = 8;

// ── SBC ──────────────────────────────────────────────────────────────────────

pub const SBC_SYNCWORD: u8 = 0x9C;
pub const MSBC_SYNCWORD: u8 = 0xAD;

/// Largest allocation a single subband can receive.
pub const SBC_MAX_BITS_PER_SUBBAND: i32 = 16;

pub const SBC_MAX_SUBBANDS: usize = 8;
pub const SBC_MAX_CHANNELS: usize = 2;

/// Largest SBC frame: 8 subbands, 16 blocks, dual channel, bitpool 250.
pub const SBC_MAX_FRAME_LEN: usize = 4 + (4 * 8 * 2) / 8 + (16 * 2 * 250) / 8;

/// Decoded PCM samples (all channels) of the largest SBC frame.
pub const SBC_MAX_PCM_SAMPLES: usize = 16 * 8 * 2;

pub const SBC_MIN_BITPOOL: u8 = 2;
pub const SBC_MAX_BITPOOL: u8 = 250;

/// Max bitpool advertised in the local source capability.
pub const SBC_CAPS_MAX_BITPOOL: u8 = 53;

// ── Bitrate control ──────────────────────────────────────────────────────────

/// Target SBC encoder rate (kbps) for an EDR link.
pub const DEFAULT_SBC_BITRATE: u32 = 328;

/// kbps step applied while searching for a bitpool in range.
pub const BITRATE_STEP: u32 = 5;

/// Rate cap (kbps) when the link lacks EDR.
pub const NON_EDR_MAX_RATE: u32 = 229;

// ── mSBC ─────────────────────────────────────────────────────────────────────

pub const MSBC_BITPOOL: u8 = 26;

/// Encoded length of one mSBC frame.
pub const MSBC_FRAME_LEN: usize = 57;

// ── Packet loss concealment ──────────────────────────────────────────────────

/// Samples per mSBC frame.
pub const PLC_FS: usize = 120;

/// Pattern-matching analysis window (16 ms at 16 kHz).
pub const PLC_N: usize = 256;

/// Template length for matching (4 ms).
pub const PLC_M: usize = 64;

/// History needed to cover the analysis window plus one frame.
pub const PLC_LHIST: usize = PLC_N + PLC_FS - 1;

/// Reconvergence tail (samples).
pub const PLC_RT: usize = 36;

/// Overlap-add length (samples).
pub const PLC_OLAL: usize = 16;

/// Amplitude-match scale bounds.
pub const PLC_SCALE_MIN: f32 = 0.75;
pub const PLC_SCALE_MAX: f32 = 1.2;

// ── i16 PCM clip boundaries ──────────────────────────────────────────────────

pub const INT16_MAX_F: f32 = 32_767.0;
pub const INT16_MIN_F: f32 = -32_768.0;
