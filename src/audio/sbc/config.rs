//! SBC session parameters and the A2DP codec information element.

use crate::audio::constants::{
    MSBC_BITPOOL, SBC_CAPS_MAX_BITPOOL, SBC_MAX_BITPOOL, SBC_MIN_BITPOOL,
};
use crate::common::{MediaError, MediaResult};

/// LOSC of the SBC media codec information element.
pub const SBC_INFO_LOSC: u8 = 6;
/// Full element length including the LOSC byte.
pub const SBC_INFO_LEN: usize = SBC_INFO_LOSC as usize + 1;
pub const MEDIA_TYPE_AUDIO: u8 = 0x00;
pub const CODEC_TYPE_SBC: u8 = 0x00;

const FREQ_MASK: u8 = 0xF0;
const CH_MODE_MASK: u8 = 0x0F;
const BLOCKS_MASK: u8 = 0xF0;
const SUBBANDS_MASK: u8 = 0x0C;
const ALLOC_MASK: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingFrequency {
    Hz16000,
    Hz32000,
    Hz44100,
    Hz48000,
}

impl SamplingFrequency {
    /// Preference order used when picking from a capability set.
    const PREFERRED: [Self; 4] = [Self::Hz48000, Self::Hz44100, Self::Hz32000, Self::Hz16000];

    pub fn hz(self) -> u32 {
        match self {
            Self::Hz16000 => 16_000,
            Self::Hz32000 => 32_000,
            Self::Hz44100 => 44_100,
            Self::Hz48000 => 48_000,
        }
    }

    /// Row index into the loudness offset tables, and the 2-bit value in the
    /// SBC frame header.
    pub fn index(self) -> usize {
        match self {
            Self::Hz16000 => 0,
            Self::Hz32000 => 1,
            Self::Hz44100 => 2,
            Self::Hz48000 => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Hz16000),
            1 => Some(Self::Hz32000),
            2 => Some(Self::Hz44100),
            3 => Some(Self::Hz48000),
            _ => None,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|f| f.hz() == hz)
    }

    pub fn info_bit(self) -> u8 {
        match self {
            Self::Hz16000 => 0x80,
            Self::Hz32000 => 0x40,
            Self::Hz44100 => 0x20,
            Self::Hz48000 => 0x10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    Mono,
    DualChannel,
    Stereo,
    JointStereo,
}

impl ChannelMode {
    const PREFERRED: [Self; 4] = [Self::JointStereo, Self::Stereo, Self::DualChannel, Self::Mono];

    pub fn channels(self) -> usize {
        match self {
            Self::Mono => 1,
            _ => 2,
        }
    }

    /// Stereo and joint stereo share one bitpool across both channels.
    pub fn shares_bitpool(self) -> bool {
        matches!(self, Self::Stereo | Self::JointStereo)
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Mono => 0,
            Self::DualChannel => 1,
            Self::Stereo => 2,
            Self::JointStereo => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Mono),
            1 => Some(Self::DualChannel),
            2 => Some(Self::Stereo),
            3 => Some(Self::JointStereo),
            _ => None,
        }
    }

    pub fn info_bit(self) -> u8 {
        match self {
            Self::Mono => 0x08,
            Self::DualChannel => 0x04,
            Self::Stereo => 0x02,
            Self::JointStereo => 0x01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockLength {
    Four,
    Eight,
    Twelve,
    Sixteen,
    /// mSBC only; never negotiated through codec information.
    Fifteen,
}

impl BlockLength {
    const PREFERRED: [Self; 4] = [Self::Sixteen, Self::Twelve, Self::Eight, Self::Four];

    pub fn blocks(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
            Self::Twelve => 12,
            Self::Sixteen => 16,
            Self::Fifteen => 15,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Four),
            1 => Some(Self::Eight),
            2 => Some(Self::Twelve),
            3 => Some(Self::Sixteen),
            _ => None,
        }
    }

    pub fn info_bit(self) -> Option<u8> {
        match self {
            Self::Four => Some(0x80),
            Self::Eight => Some(0x40),
            Self::Twelve => Some(0x20),
            Self::Sixteen => Some(0x10),
            Self::Fifteen => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subbands {
    Four,
    Eight,
}

impl Subbands {
    const PREFERRED: [Self; 2] = [Self::Eight, Self::Four];

    pub fn count(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    pub fn info_bit(self) -> u8 {
        match self {
            Self::Four => 0x08,
            Self::Eight => 0x04,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationMethod {
    Loudness,
    Snr,
}

impl AllocationMethod {
    const PREFERRED: [Self; 2] = [Self::Loudness, Self::Snr];

    pub fn info_bit(self) -> u8 {
        match self {
            Self::Snr => 0x02,
            Self::Loudness => 0x01,
        }
    }
}

/// Parameters of one SBC stream. Replaced wholesale on reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSessionConfig {
    pub frequency: SamplingFrequency,
    pub channel_mode: ChannelMode,
    pub block_length: BlockLength,
    pub subbands: Subbands,
    pub allocation: AllocationMethod,
    pub min_bitpool: u8,
    pub max_bitpool: u8,
}

impl Default for CodecSessionConfig {
    /// 44.1 kHz joint stereo, 16 blocks, 8 subbands, loudness, bitpool 2..53.
    fn default() -> Self {
        Self {
            frequency: SamplingFrequency::Hz44100,
            channel_mode: ChannelMode::JointStereo,
            block_length: BlockLength::Sixteen,
            subbands: Subbands::Eight,
            allocation: AllocationMethod::Loudness,
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: SBC_CAPS_MAX_BITPOOL,
        }
    }
}

impl CodecSessionConfig {
    /// Wideband speech: 16 kHz mono, 15 blocks, 8 subbands, loudness,
    /// fixed bitpool 26.
    pub fn msbc() -> Self {
        Self {
            frequency: SamplingFrequency::Hz16000,
            channel_mode: ChannelMode::Mono,
            block_length: BlockLength::Fifteen,
            subbands: Subbands::Eight,
            allocation: AllocationMethod::Loudness,
            min_bitpool: MSBC_BITPOOL,
            max_bitpool: MSBC_BITPOOL,
        }
    }

    pub fn channels(&self) -> usize {
        self.channel_mode.channels()
    }

    pub fn blocks(&self) -> usize {
        self.block_length.blocks()
    }

    pub fn subband_count(&self) -> usize {
        self.subbands.count()
    }

    /// PCM samples per channel in one SBC frame.
    pub fn samples_per_frame(&self) -> usize {
        self.blocks() * self.subband_count()
    }

    pub fn validate(&self) -> MediaResult<()> {
        if !(SBC_MIN_BITPOOL..=SBC_MAX_BITPOOL).contains(&self.min_bitpool)
            || !(SBC_MIN_BITPOOL..=SBC_MAX_BITPOOL).contains(&self.max_bitpool)
        {
            return Err(MediaError::invalid_config(format!(
                "bitpool range {}..{} outside {}..{}",
                self.min_bitpool, self.max_bitpool, SBC_MIN_BITPOOL, SBC_MAX_BITPOOL
            )));
        }
        if self.min_bitpool > self.max_bitpool {
            return Err(MediaError::invalid_config(format!(
                "min bitpool {} above max bitpool {}",
                self.min_bitpool, self.max_bitpool
            )));
        }
        Ok(())
    }

    /// Encoded length in bytes of one frame at `bitpool`.
    pub fn frame_length(&self, bitpool: u8) -> usize {
        frame_length(
            self.channel_mode,
            self.blocks(),
            self.subband_count(),
            bitpool as usize,
        )
    }

    /// Stream rate in kbps at `bitpool`.
    pub fn bitrate_kbps(&self, bitpool: u8) -> u32 {
        let frame_bits = 8 * self.frame_length(bitpool) as u64;
        ((frame_bits * self.frequency.hz() as u64) / (self.samples_per_frame() as u64 * 1000)) as u32
    }

    /// Parses a configuration element: exactly one bit per field.
    pub fn from_codec_info(info: &[u8]) -> MediaResult<Self> {
        SbcCodecInfo::parse(info, false)?.to_config()
    }

    pub fn to_codec_info(&self) -> MediaResult<[u8; SBC_INFO_LEN]> {
        Ok(SbcCodecInfo::from_config(self)?.build())
    }
}

/// SBC frame length for the given layout.
pub fn frame_length(mode: ChannelMode, blocks: usize, subbands: usize, bitpool: usize) -> usize {
    let channels = mode.channels();
    let header = 4 + (4 * subbands * channels) / 8;
    let payload_bits = match mode {
        ChannelMode::Mono | ChannelMode::DualChannel => blocks * channels * bitpool,
        ChannelMode::Stereo => blocks * bitpool,
        ChannelMode::JointStereo => subbands + blocks * bitpool,
    };
    header + payload_bits.div_ceil(8)
}

/// The four SBC bytes of a codec information element, as bitmasks.
///
/// A capability may set several bits per field; a configuration sets
/// exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcCodecInfo {
    pub frequencies: u8,
    pub channel_modes: u8,
    pub block_lengths: u8,
    pub subbands: u8,
    pub allocation: u8,
    pub min_bitpool: u8,
    pub max_bitpool: u8,
}

fn single_bit(value: u8) -> bool {
    value.count_ones() == 1
}

fn pick<T: Copy>(preferred: &[T], mask: u8, bit: impl Fn(T) -> u8) -> Option<T> {
    preferred.iter().copied().find(|&v| mask & bit(v) != 0)
}

impl SbcCodecInfo {
    /// Parses a full element: LOSC, media type, codec type, four SBC bytes.
    pub fn parse(info: &[u8], for_caps: bool) -> MediaResult<Self> {
        if info.len() < SBC_INFO_LEN {
            return Err(MediaError::InvalidCodecInfo("element too short"));
        }
        if info[0] != SBC_INFO_LOSC {
            return Err(MediaError::InvalidCodecInfo("bad LOSC"));
        }
        if info[1] >> 4 != MEDIA_TYPE_AUDIO || info[2] != CODEC_TYPE_SBC {
            return Err(MediaError::InvalidCodecInfo("not an SBC audio codec"));
        }

        let parsed = Self {
            frequencies: info[3] & FREQ_MASK,
            channel_modes: info[3] & CH_MODE_MASK,
            block_lengths: info[4] & BLOCKS_MASK,
            subbands: info[4] & SUBBANDS_MASK,
            allocation: info[4] & ALLOC_MASK,
            min_bitpool: info[5],
            max_bitpool: info[6],
        };

        if !(SBC_MIN_BITPOOL..=SBC_MAX_BITPOOL).contains(&parsed.min_bitpool) {
            return Err(MediaError::InvalidCodecInfo("bad min bitpool"));
        }
        if !(SBC_MIN_BITPOOL..=SBC_MAX_BITPOOL).contains(&parsed.max_bitpool) {
            return Err(MediaError::InvalidCodecInfo("bad max bitpool"));
        }
        if parsed.min_bitpool > parsed.max_bitpool {
            return Err(MediaError::InvalidCodecInfo("min bitpool above max bitpool"));
        }

        let fields = [
            (parsed.frequencies, "bad sampling frequency"),
            (parsed.channel_modes, "bad channel mode"),
            (parsed.block_lengths, "bad block length"),
            (parsed.subbands, "bad subband count"),
            (parsed.allocation, "bad allocation method"),
        ];
        for (value, reason) in fields {
            if value == 0 || (!for_caps && !single_bit(value)) {
                return Err(MediaError::InvalidCodecInfo(reason));
            }
        }

        Ok(parsed)
    }

    pub fn build(&self) -> [u8; SBC_INFO_LEN] {
        [
            SBC_INFO_LOSC,
            MEDIA_TYPE_AUDIO << 4,
            CODEC_TYPE_SBC,
            (self.frequencies & FREQ_MASK) | (self.channel_modes & CH_MODE_MASK),
            (self.block_lengths & BLOCKS_MASK)
                | (self.subbands & SUBBANDS_MASK)
                | (self.allocation & ALLOC_MASK),
            self.min_bitpool,
            self.max_bitpool,
        ]
    }

    pub fn from_config(config: &CodecSessionConfig) -> MediaResult<Self> {
        config.validate()?;
        let block_lengths = config
            .block_length
            .info_bit()
            .ok_or(MediaError::InvalidCodecInfo("block length not negotiable"))?;
        Ok(Self {
            frequencies: config.frequency.info_bit(),
            channel_modes: config.channel_mode.info_bit(),
            block_lengths,
            subbands: config.subbands.info_bit(),
            allocation: config.allocation.info_bit(),
            min_bitpool: config.min_bitpool,
            max_bitpool: config.max_bitpool,
        })
    }

    /// Picks the preferred value of every field this element allows.
    fn to_config(self) -> MediaResult<CodecSessionConfig> {
        let config = CodecSessionConfig {
            frequency: pick(&SamplingFrequency::PREFERRED, self.frequencies, |f| f.info_bit())
                .ok_or(MediaError::InvalidCodecInfo("bad sampling frequency"))?,
            channel_mode: pick(&ChannelMode::PREFERRED, self.channel_modes, |m| m.info_bit())
                .ok_or(MediaError::InvalidCodecInfo("bad channel mode"))?,
            block_length: pick(&BlockLength::PREFERRED, self.block_lengths, |b| {
                b.info_bit().unwrap_or(0)
            })
            .ok_or(MediaError::InvalidCodecInfo("bad block length"))?,
            subbands: pick(&Subbands::PREFERRED, self.subbands, |s| s.info_bit())
                .ok_or(MediaError::InvalidCodecInfo("bad subband count"))?,
            allocation: pick(&AllocationMethod::PREFERRED, self.allocation, |a| a.info_bit())
                .ok_or(MediaError::InvalidCodecInfo("bad allocation method"))?,
            min_bitpool: self.min_bitpool,
            max_bitpool: self.max_bitpool,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Capabilities advertised by the local SBC source.
pub fn sbc_caps() -> SbcCodecInfo {
    SbcCodecInfo {
        frequencies: SamplingFrequency::Hz44100.info_bit() | SamplingFrequency::Hz48000.info_bit(),
        channel_modes: CH_MODE_MASK,
        block_lengths: BLOCKS_MASK,
        subbands: SUBBANDS_MASK,
        allocation: ALLOC_MASK,
        min_bitpool: SBC_MIN_BITPOOL,
        max_bitpool: SBC_CAPS_MAX_BITPOOL,
    }
}

/// Chooses a stream configuration from the intersection of the local
/// capabilities and a peer's capability element.
pub fn preferred_config(peer_caps: &[u8]) -> MediaResult<CodecSessionConfig> {
    let peer = SbcCodecInfo::parse(peer_caps, true)?;
    let local = sbc_caps();

    let common = SbcCodecInfo {
        frequencies: local.frequencies & peer.frequencies,
        channel_modes: local.channel_modes & peer.channel_modes,
        block_lengths: local.block_lengths & peer.block_lengths,
        subbands: local.subbands & peer.subbands,
        allocation: local.allocation & peer.allocation,
        min_bitpool: local.min_bitpool.max(peer.min_bitpool),
        max_bitpool: local.max_bitpool.min(peer.max_bitpool),
    };
    if common.min_bitpool > common.max_bitpool {
        return Err(MediaError::InvalidCodecInfo("no common bitpool range"));
    }
    common.to_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_INFO: [u8; 7] = [0x06, 0x00, 0x00, 0x21, 0x15, 0x02, 0x35];

    #[test]
    fn default_config_roundtrips_through_codec_info() {
        let bytes = CodecSessionConfig::default().to_codec_info().unwrap();
        assert_eq!(bytes, DEFAULT_INFO);
        assert_eq!(
            CodecSessionConfig::from_codec_info(&bytes).unwrap(),
            CodecSessionConfig::default()
        );
    }

    #[test]
    fn configuration_requires_single_bits() {
        let mut caps = DEFAULT_INFO;
        caps[3] = 0x31;
        assert!(matches!(
            CodecSessionConfig::from_codec_info(&caps),
            Err(MediaError::InvalidCodecInfo("bad sampling frequency"))
        ));
        assert!(SbcCodecInfo::parse(&caps, true).is_ok());
    }

    #[test]
    fn bitpool_bounds_are_enforced() {
        let mut info = DEFAULT_INFO;
        info[5] = 1;
        assert!(SbcCodecInfo::parse(&info, true).is_err());
        info[5] = 40;
        info[6] = 30;
        assert!(SbcCodecInfo::parse(&info, true).is_err());
        info[6] = 251;
        assert!(SbcCodecInfo::parse(&info, true).is_err());
    }

    #[test]
    fn malformed_elements_are_rejected() {
        assert!(SbcCodecInfo::parse(&DEFAULT_INFO[..5], true).is_err());
        let mut info = DEFAULT_INFO;
        info[2] = 0x02;
        assert!(SbcCodecInfo::parse(&info, true).is_err());
        let mut info = DEFAULT_INFO;
        info[4] = 0x10;
        assert!(SbcCodecInfo::parse(&info, true).is_err());
    }

    #[test]
    fn preferred_config_picks_highest_priority() {
        let peer = [0x06, 0x00, 0x00, 0xFF, 0xFF, 0x02, 0xFA];
        let config = preferred_config(&peer).unwrap();
        assert_eq!(config.frequency, SamplingFrequency::Hz48000);
        assert_eq!(config.channel_mode, ChannelMode::JointStereo);
        assert_eq!(config.block_length, BlockLength::Sixteen);
        assert_eq!(config.subbands, Subbands::Eight);
        assert_eq!(config.allocation, AllocationMethod::Loudness);
        assert_eq!((config.min_bitpool, config.max_bitpool), (2, 53));
    }

    #[test]
    fn preferred_config_respects_peer_limits() {
        let peer = [0x06, 0x00, 0x00, 0x2C, 0x46, 0x10, 0x20];
        let config = preferred_config(&peer).unwrap();
        assert_eq!(config.frequency, SamplingFrequency::Hz44100);
        assert_eq!(config.channel_mode, ChannelMode::DualChannel);
        assert_eq!(config.block_length, BlockLength::Eight);
        assert_eq!(config.subbands, Subbands::Eight);
        assert_eq!(config.allocation, AllocationMethod::Snr);
        assert_eq!((config.min_bitpool, config.max_bitpool), (16, 32));
    }

    #[test]
    fn preferred_config_without_overlap_fails() {
        let peer = [0x06, 0x00, 0x00, 0x88, 0x15, 0x02, 0x35];
        assert!(preferred_config(&peer).is_err());
    }

    #[test]
    fn frame_lengths_match_known_layouts() {
        let config = CodecSessionConfig::default();
        assert_eq!(config.frame_length(53), 119);
        assert_eq!(CodecSessionConfig::msbc().frame_length(26), 57);
        assert_eq!(frame_length(ChannelMode::Mono, 16, 8, 32), 4 + 4 + 64);
        assert_eq!(frame_length(ChannelMode::DualChannel, 16, 8, 32), 4 + 8 + 128);
        assert_eq!(frame_length(ChannelMode::Stereo, 16, 8, 32), 4 + 8 + 64);
    }

    #[test]
    fn bitrate_of_default_stream() {
        assert_eq!(CodecSessionConfig::default().bitrate_kbps(53), 327);
    }
}
