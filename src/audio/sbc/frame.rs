//! SBC and mSBC frame headers.
//!
//! ```text
//! byte 0   syncword (0x9C SBC, 0xAD mSBC)
//! byte 1   freq:2 blocks:2 mode:2 alloc:1 subbands:1   (reserved for mSBC)
//! byte 2   bitpool                                      (reserved for mSBC)
//! byte 3   CRC-8
//! ...      join bits (joint stereo only), then 4-bit scale factors
//! ```

use super::bitalloc::{Allocation, BitAllocator, ScaleFactors};
use super::config::{
    AllocationMethod, BlockLength, ChannelMode, CodecSessionConfig, SamplingFrequency, Subbands,
};
use crate::audio::codec::DecodeStatus;
use crate::audio::constants::{
    MSBC_BITPOOL, MSBC_SYNCWORD, SBC_MAX_BITPOOL, SBC_MAX_SUBBANDS, SBC_SYNCWORD,
};

pub const SBC_HEADER_LEN: usize = 4;

const CRC_POLY: u8 = 0x1D;
const CRC_INIT: u8 = 0x0F;

/// Parsed fixed header of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcFrameHeader {
    pub frequency: SamplingFrequency,
    pub channel_mode: ChannelMode,
    pub block_length: BlockLength,
    pub subbands: Subbands,
    pub allocation: AllocationMethod,
    pub bitpool: u8,
    pub crc: u8,
    /// Wideband speech framing with the implied mSBC configuration.
    pub msbc: bool,
}

impl SbcFrameHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeStatus> {
        if bytes.len() < SBC_HEADER_LEN {
            return Err(DecodeStatus::NotEnoughHeader);
        }

        match bytes[0] {
            MSBC_SYNCWORD => {
                let implied = CodecSessionConfig::msbc();
                Ok(Self {
                    frequency: implied.frequency,
                    channel_mode: implied.channel_mode,
                    block_length: implied.block_length,
                    subbands: implied.subbands,
                    allocation: implied.allocation,
                    bitpool: MSBC_BITPOOL,
                    crc: bytes[3],
                    msbc: true,
                })
            }
            SBC_SYNCWORD => {
                let b = bytes[1];
                let frequency =
                    SamplingFrequency::from_index(b >> 6).ok_or(DecodeStatus::InvalidParameters)?;
                let block_length =
                    BlockLength::from_index((b >> 4) & 0x03).ok_or(DecodeStatus::InvalidParameters)?;
                let channel_mode =
                    ChannelMode::from_index((b >> 2) & 0x03).ok_or(DecodeStatus::InvalidParameters)?;
                let allocation = if b & 0x02 != 0 {
                    AllocationMethod::Snr
                } else {
                    AllocationMethod::Loudness
                };
                let subbands = if b & 0x01 != 0 {
                    Subbands::Eight
                } else {
                    Subbands::Four
                };

                let header = Self {
                    frequency,
                    channel_mode,
                    block_length,
                    subbands,
                    allocation,
                    bitpool: bytes[2],
                    crc: bytes[3],
                    msbc: false,
                };
                if header.bitpool > header.max_bitpool() {
                    return Err(DecodeStatus::InvalidParameters);
                }
                Ok(header)
            }
            _ => Err(DecodeStatus::NoSyncword),
        }
    }

    /// Header for frames encoded with `config` at `bitpool`.
    pub fn for_config(config: &CodecSessionConfig, bitpool: u8) -> Self {
        Self {
            frequency: config.frequency,
            channel_mode: config.channel_mode,
            block_length: config.block_length,
            subbands: config.subbands,
            allocation: config.allocation,
            bitpool,
            crc: 0,
            msbc: config.block_length == BlockLength::Fifteen,
        }
    }

    pub fn to_bytes(&self) -> [u8; SBC_HEADER_LEN] {
        if self.msbc {
            return [MSBC_SYNCWORD, 0, 0, self.crc];
        }
        let blocks = match self.block_length {
            BlockLength::Four => 0,
            BlockLength::Eight => 1,
            BlockLength::Twelve => 2,
            BlockLength::Sixteen | BlockLength::Fifteen => 3,
        };
        let mut b = (self.frequency.index() as u8) << 6 | blocks << 4 | self.channel_mode.index() << 2;
        if self.allocation == AllocationMethod::Snr {
            b |= 0x02;
        }
        if self.subbands == Subbands::Eight {
            b |= 0x01;
        }
        [SBC_SYNCWORD, b, self.bitpool, self.crc]
    }

    /// Largest bitpool the layout can carry.
    pub fn max_bitpool(&self) -> u8 {
        let sb = self.subbands.count();
        let cap = if self.channel_mode.shares_bitpool() { 32 * sb } else { 16 * sb };
        cap.min(SBC_MAX_BITPOOL as usize) as u8
    }

    pub fn channels(&self) -> usize {
        self.channel_mode.channels()
    }

    pub fn frame_length(&self) -> usize {
        super::config::frame_length(
            self.channel_mode,
            self.block_length.blocks(),
            self.subbands.count(),
            self.bitpool as usize,
        )
    }

    /// Bits covered by the CRC after byte 3: join bits and scale factors.
    fn side_info_bits(&self) -> usize {
        let sb = self.subbands.count();
        let join = if self.channel_mode == ChannelMode::JointStereo { sb } else { 0 };
        join + 4 * sb * self.channels()
    }

    pub fn session_config(&self) -> CodecSessionConfig {
        CodecSessionConfig {
            frequency: self.frequency,
            channel_mode: self.channel_mode,
            block_length: self.block_length,
            subbands: self.subbands,
            allocation: self.allocation,
            min_bitpool: self.bitpool,
            max_bitpool: self.bitpool,
        }
    }
}

/// MSB-first bit reader.
struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read(&mut self, bits: usize) -> Option<u8> {
        let mut out = 0u8;
        for _ in 0..bits {
            let byte = *self.bytes.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            out = (out << 1) | bit;
            self.pos += 1;
        }
        Some(out)
    }
}

fn crc_update(mut crc: u8, data: u8, bits: usize) -> u8 {
    for i in 0..bits {
        let bit = (data >> (7 - i)) & 1;
        let top = crc >> 7;
        crc <<= 1;
        if top ^ bit != 0 {
            crc ^= CRC_POLY;
        }
    }
    crc
}

/// SBC CRC-8 over header bytes 1–2 and the first `side_bits` bits that
/// follow the CRC byte.
pub fn crc8(frame: &[u8], side_bits: usize) -> Option<u8> {
    let side_bytes = side_bits.div_ceil(8);
    if frame.len() < SBC_HEADER_LEN + side_bytes {
        return None;
    }

    let mut crc = crc_update(CRC_INIT, frame[1], 8);
    crc = crc_update(crc, frame[2], 8);
    let side = &frame[SBC_HEADER_LEN..SBC_HEADER_LEN + side_bytes];
    let mut remaining = side_bits;
    for &byte in side {
        let bits = remaining.min(8);
        crc = crc_update(crc, byte, bits);
        remaining -= bits;
    }
    Some(crc)
}

/// Computes the CRC of a complete frame and stores it in byte 3.
pub fn seal_crc(frame: &mut [u8]) -> Result<u8, DecodeStatus> {
    let header = SbcFrameHeader::parse(frame)?;
    let crc = crc8(frame, header.side_info_bits()).ok_or(DecodeStatus::NotEnoughBody)?;
    frame[3] = crc;
    Ok(crc)
}

/// One complete frame borrowed from an inbound packet.
#[derive(Debug, Clone, Copy)]
pub struct SbcFrame<'a> {
    header: SbcFrameHeader,
    bytes: &'a [u8],
}

impl<'a> SbcFrame<'a> {
    /// Parses the header and checks that the whole frame is present.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeStatus> {
        let header = SbcFrameHeader::parse(bytes)?;
        let len = header.frame_length();
        if bytes.len() < len {
            return Err(DecodeStatus::NotEnoughBody);
        }
        Ok(Self {
            header,
            bytes: &bytes[..len],
        })
    }

    pub fn header(&self) -> &SbcFrameHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn crc8(&self) -> u8 {
        crc8(self.bytes, self.header.side_info_bits()).unwrap_or(!self.header.crc)
    }

    pub fn verify_crc(&self) -> Result<(), DecodeStatus> {
        if self.crc8() == self.header.crc {
            Ok(())
        } else {
            Err(DecodeStatus::ChecksumMismatch)
        }
    }

    /// Join bits (bit 7 = subband 0) and the scale factors.
    pub fn scale_factors(&self) -> Result<(u8, ScaleFactors), DecodeStatus> {
        let sb = self.header.subbands.count();
        let mut reader = BitReader::new(&self.bytes[SBC_HEADER_LEN..]);

        let join = if self.header.channel_mode == ChannelMode::JointStereo {
            let bits = reader.read(sb).ok_or(DecodeStatus::NotEnoughBody)?;
            bits << (SBC_MAX_SUBBANDS - sb)
        } else {
            0
        };

        let mut scale_factors = [[0u8; SBC_MAX_SUBBANDS]; 2];
        for ch in scale_factors.iter_mut().take(self.header.channels()) {
            for sf in ch.iter_mut().take(sb) {
                *sf = reader.read(4).ok_or(DecodeStatus::NotEnoughBody)?;
            }
        }
        Ok((join, scale_factors))
    }

    /// Bit allocation the encoder used for this frame.
    pub fn allocation(&self) -> Result<Allocation, DecodeStatus> {
        let (_, scale_factors) = self.scale_factors()?;
        let allocator = BitAllocator::new(
            self.header.channel_mode,
            self.header.allocation,
            self.header.frequency,
            self.header.subbands.count(),
        )
        .map_err(|_| DecodeStatus::InvalidParameters)?;
        Ok(allocator.allocate(&scale_factors, self.header.bitpool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::plc::MSBC_ZERO_FRAME;

    const JOINT_FRAME_HEAD: [u8; 13] = [
        0x9C, 0xBD, 0x35, 0xC6, 0xA4, 0x87, 0x65, 0x43, 0x21, 0x12, 0x34, 0x56, 0x78,
    ];

    fn joint_frame() -> Vec<u8> {
        let mut frame = JOINT_FRAME_HEAD.to_vec();
        frame.resize(119, 0);
        frame
    }

    #[test]
    fn msbc_zero_frame_parses() {
        let frame = SbcFrame::parse(&MSBC_ZERO_FRAME).unwrap();
        let header = frame.header();
        assert!(header.msbc);
        assert_eq!(header.session_config(), CodecSessionConfig::msbc());
        assert_eq!(frame.len(), 57);
        assert_eq!(frame.crc8(), 0xC5);
        assert!(frame.verify_crc().is_ok());
        let alloc = frame.allocation().unwrap();
        assert_eq!(alloc.channel(0), &[4, 4, 3, 3, 3, 3, 3, 3]);
    }

    #[test]
    fn joint_stereo_header_and_side_info() {
        let bytes = joint_frame();
        let frame = SbcFrame::parse(&bytes).unwrap();
        let header = frame.header();
        assert_eq!(header.frequency, SamplingFrequency::Hz44100);
        assert_eq!(header.block_length, BlockLength::Sixteen);
        assert_eq!(header.channel_mode, ChannelMode::JointStereo);
        assert_eq!(header.allocation, AllocationMethod::Loudness);
        assert_eq!(header.subbands, Subbands::Eight);
        assert_eq!(header.bitpool, 53);
        assert_eq!(header.frame_length(), 119);
        assert!(frame.verify_crc().is_ok());

        let (join, sf) = frame.scale_factors().unwrap();
        assert_eq!(join, 0xA4);
        assert_eq!(sf[0], [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(sf[1], [1, 2, 3, 4, 5, 6, 7, 8]);

        let alloc = frame.allocation().unwrap();
        assert!(alloc.total_bits() <= 53);
    }

    #[test]
    fn mono_four_subband_frame() {
        let mut bytes = vec![0x9C, 0x02, 0x10, 0xC3, 0xF0, 0x1F];
        bytes.resize(14, 0);
        let frame = SbcFrame::parse(&bytes).unwrap();
        assert_eq!(frame.header().channel_mode, ChannelMode::Mono);
        assert_eq!(frame.header().allocation, AllocationMethod::Snr);
        assert_eq!(frame.len(), 14);
        assert!(frame.verify_crc().is_ok());
        let (join, sf) = frame.scale_factors().unwrap();
        assert_eq!(join, 0);
        assert_eq!(&sf[0][..4], &[15, 0, 1, 15]);
    }

    #[test]
    fn corrupted_side_info_fails_crc() {
        let mut bytes = joint_frame();
        bytes[6] ^= 0x10;
        assert_eq!(
            SbcFrame::parse(&bytes).unwrap().verify_crc(),
            Err(DecodeStatus::ChecksumMismatch)
        );
    }

    #[test]
    fn truncated_and_malformed_frames() {
        let bytes = joint_frame();
        assert_eq!(
            SbcFrame::parse(&bytes[..3]).unwrap_err(),
            DecodeStatus::NotEnoughHeader
        );
        assert_eq!(
            SbcFrame::parse(&bytes[..118]).unwrap_err(),
            DecodeStatus::NotEnoughBody
        );

        let mut bad = bytes.clone();
        bad[0] = 0x00;
        assert_eq!(SbcFrame::parse(&bad).unwrap_err(), DecodeStatus::NoSyncword);

        // mono, 4 subbands: bitpool limited to 64
        let too_big = [0x9C, 0x02, 0x41, 0x00];
        assert_eq!(
            SbcFrameHeader::parse(&too_big).unwrap_err(),
            DecodeStatus::InvalidParameters
        );
    }

    #[test]
    fn stereo_bitpool_stops_at_250() {
        let mut head = JOINT_FRAME_HEAD;
        head[2] = 250;
        let header = SbcFrameHeader::parse(&head).unwrap();
        assert_eq!(header.max_bitpool(), 250);

        for bitpool in 251..=255u8 {
            head[2] = bitpool;
            assert_eq!(
                SbcFrameHeader::parse(&head).unwrap_err(),
                DecodeStatus::InvalidParameters,
                "bitpool {bitpool}"
            );
        }
    }

    #[test]
    fn header_bytes_follow_config() {
        let parsed = SbcFrameHeader::parse(&JOINT_FRAME_HEAD).unwrap();
        let built = SbcFrameHeader {
            crc: 0xC6,
            ..SbcFrameHeader::for_config(&CodecSessionConfig::default(), 53)
        };
        assert_eq!(built, parsed);
        assert_eq!(built.to_bytes(), [0x9C, 0xBD, 0x35, 0xC6]);

        let msbc = SbcFrameHeader::for_config(&CodecSessionConfig::msbc(), 26);
        assert_eq!(msbc.to_bytes(), [0xAD, 0, 0, 0]);
    }

    #[test]
    fn sealing_recomputes_crc() {
        let mut zero = MSBC_ZERO_FRAME;
        zero[3] = 0;
        assert_eq!(seal_crc(&mut zero), Ok(0xC5));
        assert_eq!(zero, MSBC_ZERO_FRAME);
    }

    #[test]
    fn crc_needs_side_info() {
        assert_eq!(crc8(&JOINT_FRAME_HEAD[..6], 72), None);
        assert_eq!(crc8(&JOINT_FRAME_HEAD, 72), Some(0xC6));
    }
}
