//! `AudioFrame`: one encoded media unit travelling through a `MediaQueue`.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

use super::pool::{FramePool, PoolBuf};
use crate::audio::constants::{
    FRAME_HEADER_WIRE_LEN, MEDIA_FRAME_COUNT_MASK, MEDIA_PAYLOAD_HEADER_LEN,
};
use crate::common::{MediaError, MediaResult};

/// Packet status carried in `layer_specific` for voice frames.
pub const PACKET_STATUS_GOOD: u16 = 0;
pub const PACKET_STATUS_ERRONEOUS: u16 = 1;
pub const PACKET_STATUS_LOST: u16 = 2;

/// The one-byte header in front of the SBC frames of a media payload.
///
/// Bit 7 marks a fragmented frame, bit 6 the first fragment, bit 5 the last
/// fragment; the low nibble is the number of frames in the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaPayloadHeader {
    pub fragmented: bool,
    pub start: bool,
    pub last: bool,
    pub frame_count: u8,
}

impl MediaPayloadHeader {
    pub fn new(frame_count: u8) -> Self {
        Self {
            frame_count: frame_count & MEDIA_FRAME_COUNT_MASK,
            ..Default::default()
        }
    }

    pub fn parse(byte: u8) -> Self {
        Self {
            fragmented: byte & 0x80 != 0,
            start: byte & 0x40 != 0,
            last: byte & 0x20 != 0,
            frame_count: byte & MEDIA_FRAME_COUNT_MASK,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.frame_count & MEDIA_FRAME_COUNT_MASK;
        if self.fragmented {
            byte |= 0x80;
        }
        if self.start {
            byte |= 0x40;
        }
        if self.last {
            byte |= 0x20;
        }
        byte
    }
}

/// Bookkeeping header of an [`AudioFrame`].
///
/// `offset` and `len` describe the part of the payload that has not been
/// decoded yet; a partially consumed frame keeps its place at the head of the
/// queue with `frames_to_process` counting what is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub frames_to_process: u16,
    pub len: u16,
    pub offset: u16,
    pub layer_specific: u16,
}

impl FrameHeader {
    /// Reads the four little-endian `u16` fields in declaration order.
    pub fn parse(bytes: &[u8]) -> MediaResult<Self> {
        if bytes.len() < FRAME_HEADER_WIRE_LEN {
            return Err(MediaError::Codec(format!(
                "frame header needs {} bytes, got {}",
                FRAME_HEADER_WIRE_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            frames_to_process: LittleEndian::read_u16(&bytes[0..2]),
            len: LittleEndian::read_u16(&bytes[2..4]),
            offset: LittleEndian::read_u16(&bytes[4..6]),
            layer_specific: LittleEndian::read_u16(&bytes[6..8]),
        })
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_WIRE_LEN] {
        let mut out = [0u8; FRAME_HEADER_WIRE_LEN];
        LittleEndian::write_u16(&mut out[0..2], self.frames_to_process);
        LittleEndian::write_u16(&mut out[2..4], self.len);
        LittleEndian::write_u16(&mut out[4..6], self.offset);
        LittleEndian::write_u16(&mut out[6..8], self.layer_specific);
        out
    }

    /// Checks that `offset..offset + len` lies inside a payload of
    /// `payload_len` bytes.
    pub fn validate(&self, payload_len: usize) -> MediaResult<()> {
        let end = self.offset as usize + self.len as usize;
        if end > payload_len {
            return Err(MediaError::Codec(format!(
                "frame header range {}..{} exceeds payload of {} bytes",
                self.offset, end, payload_len
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct AudioFrame {
    header: FrameHeader,
    timestamp: u32,
    payload: PoolBuf,
}

impl AudioFrame {
    fn from_parts(header: FrameHeader, timestamp: u32, payload: PoolBuf) -> MediaResult<Self> {
        header.validate(payload.len())?;
        Ok(Self {
            header,
            timestamp,
            payload,
        })
    }

    /// Wraps an inbound A2DP media payload: a [`MediaPayloadHeader`] byte
    /// followed by `frame_count` SBC frames.
    pub fn from_media_payload(pool: &FramePool, bytes: &[u8]) -> MediaResult<Self> {
        let (&first, frames) = bytes
            .split_first()
            .ok_or_else(|| MediaError::Codec("empty media payload".into()))?;

        let media = MediaPayloadHeader::parse(first);
        if media.fragmented {
            return Err(MediaError::Codec(
                "fragmented media payloads are not supported".into(),
            ));
        }
        if media.frame_count == 0 || frames.is_empty() {
            return Err(MediaError::Codec("media payload carries no frames".into()));
        }

        let len = u16::try_from(frames.len())
            .map_err(|_| MediaError::Codec("media payload too large".into()))?;
        let header = FrameHeader {
            frames_to_process: media.frame_count as u16,
            len,
            offset: MEDIA_PAYLOAD_HEADER_LEN as u16,
            layer_specific: 0,
        };
        Self::from_parts(header, 0, pool.acquire_from(bytes)?)
    }

    /// Wraps one received voice frame together with its packet status.
    /// Lost packets may arrive with an empty payload.
    pub fn voice(pool: &FramePool, bytes: &[u8], status: u16) -> MediaResult<Self> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| MediaError::Codec("voice frame too large".into()))?;
        let header = FrameHeader {
            frames_to_process: 1,
            len,
            offset: 0,
            layer_specific: status,
        };
        Self::from_parts(header, 0, pool.acquire_from(bytes)?)
    }

    /// Builds an outbound frame from an already packed media payload.
    pub fn outbound(payload: PoolBuf, frame_count: u16, timestamp: u32) -> MediaResult<Self> {
        let len = payload
            .len()
            .checked_sub(MEDIA_PAYLOAD_HEADER_LEN)
            .and_then(|l| u16::try_from(l).ok())
            .ok_or_else(|| MediaError::Codec("outbound payload length out of range".into()))?;
        let header = FrameHeader {
            frames_to_process: frame_count,
            len,
            offset: MEDIA_PAYLOAD_HEADER_LEN as u16,
            layer_specific: 0,
        };
        Self::from_parts(header, timestamp, payload)
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn frames_to_process(&self) -> u16 {
        self.header.frames_to_process
    }

    pub fn is_exhausted(&self) -> bool {
        self.header.frames_to_process == 0 || self.header.len == 0
    }

    /// The whole payload as received or packed, header byte included.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The unconsumed part of the payload.
    pub fn remaining(&self) -> &[u8] {
        let start = self.header.offset as usize;
        let end = start + self.header.len as usize;
        self.payload.get(start..end).unwrap_or(&[])
    }

    /// Marks `bytes` of the remaining payload and one frame as consumed.
    pub fn consume(&mut self, bytes: usize) {
        let bytes = bytes.min(self.header.len as usize) as u16;
        self.header.offset += bytes;
        self.header.len -= bytes;
        self.header.frames_to_process = self.header.frames_to_process.saturating_sub(1);
    }

    /// Drops whatever has not been decoded yet.
    pub fn discard_remaining(&mut self) {
        self.header.offset += self.header.len;
        self.header.len = 0;
        self.header.frames_to_process = 0;
    }

    /// Serializes the frame for the transport: big-endian media timestamp
    /// followed by the media payload.
    pub fn to_transport(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + self.payload.len());
        out.put_u32(self.timestamp);
        out.put_slice(&self.payload);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> FramePool {
        FramePool::new(16, 64)
    }

    #[test]
    fn frame_header_wire_layout() {
        let header = FrameHeader {
            frames_to_process: 3,
            len: 0x0102,
            offset: 1,
            layer_specific: PACKET_STATUS_LOST,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [3, 0, 0x02, 0x01, 1, 0, 2, 0]);
        assert_eq!(FrameHeader::parse(&bytes).unwrap(), header);
        assert!(FrameHeader::parse(&bytes[..7]).is_err());
    }

    #[test]
    fn payload_header_roundtrips_flags() {
        let header = MediaPayloadHeader::parse(0xE7);
        assert!(header.fragmented && header.start && header.last);
        assert_eq!(header.frame_count, 7);
        assert_eq!(header.to_byte(), 0xE7);
        assert_eq!(MediaPayloadHeader::new(0x1F).frame_count, 0x0F);
    }

    #[test]
    fn media_payload_reads_frame_count_from_low_nibble() {
        let frame = AudioFrame::from_media_payload(&pool(), &[0x03, 1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.frames_to_process(), 3);
        assert_eq!(frame.header().offset, 1);
        assert_eq!(frame.remaining(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_or_fragmented_payloads_are_rejected() {
        assert!(AudioFrame::from_media_payload(&pool(), &[]).is_err());
        assert!(AudioFrame::from_media_payload(&pool(), &[0x00, 1]).is_err());
        assert!(AudioFrame::from_media_payload(&pool(), &[0x02]).is_err());
        assert!(AudioFrame::from_media_payload(&pool(), &[0xC1, 1, 2]).is_err());
    }

    #[test]
    fn consume_advances_and_counts_down() {
        let mut frame = AudioFrame::from_media_payload(&pool(), &[0x02, 1, 2, 3, 4]).unwrap();
        frame.consume(3);
        assert_eq!(frame.frames_to_process(), 1);
        assert_eq!(frame.remaining(), &[4]);
        frame.consume(10);
        assert!(frame.is_exhausted());
        assert!(frame.remaining().is_empty());
    }

    #[test]
    fn header_range_is_bounds_checked() {
        let header = FrameHeader {
            frames_to_process: 1,
            len: 10,
            offset: 5,
            layer_specific: 0,
        };
        assert!(header.validate(15).is_ok());
        assert!(header.validate(14).is_err());
    }

    #[test]
    fn transport_bytes_lead_with_timestamp() {
        let pool = pool();
        let payload = pool.acquire_from(&[0x01, 0x9C, 0xAA]).unwrap();
        let frame = AudioFrame::outbound(payload, 1, 0x0102_0304).unwrap();
        assert_eq!(&frame.to_transport()[..], &[1, 2, 3, 4, 0x01, 0x9C, 0xAA]);
    }

    #[test]
    fn voice_frame_keeps_packet_status() {
        let frame = AudioFrame::voice(&pool(), &[], PACKET_STATUS_LOST).unwrap();
        assert_eq!(frame.header().layer_specific, PACKET_STATUS_LOST);
        assert_eq!(frame.frames_to_process(), 1);
        assert!(frame.remaining().is_empty());
    }
}
