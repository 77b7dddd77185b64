//! Encode/decode contract for the SBC frame codec.
//!
//! The analysis/synthesis filterbank and quantizer live outside this crate.
//! The scheduler only sees these two traits:
//!
//! | Trait | Caller | Direction |
//! |---|---|---|
//! | [`FrameEncoder`] | TX tick | PCM → SBC frame |
//! | [`FrameDecoder`] | RX tick | SBC / mSBC frame → PCM |

use std::fmt;

use crate::audio::sbc::CodecSessionConfig;
use crate::common::MediaResult;

/// Outcome of decoding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Success,
    NotEnoughHeader,
    NotEnoughBody,
    NotEnoughAudio,
    NoSyncword,
    ChecksumMismatch,
    InvalidParameters,
}

impl DecodeStatus {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Errors that only invalidate the current frame group; the decoder
    /// state is still usable.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::NotEnoughHeader
                | Self::NotEnoughBody
                | Self::NotEnoughAudio
                | Self::NoSyncword
                | Self::ChecksumMismatch
        )
    }
}

impl fmt::Display for DecodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::NotEnoughHeader => "not enough header",
            Self::NotEnoughBody => "not enough body",
            Self::NotEnoughAudio => "not enough audio",
            Self::NoSyncword => "no syncword",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

/// Result of [`FrameDecoder::decode_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutput {
    /// Interleaved samples written to `pcm_out`.
    pub pcm_samples: usize,
    /// Input bytes the frame occupied.
    pub consumed: usize,
    pub status: DecodeStatus,
}

impl DecodeOutput {
    pub fn failed(status: DecodeStatus) -> Self {
        Self {
            pcm_samples: 0,
            consumed: 0,
            status,
        }
    }
}

/// Encoder parameters pushed by encoder init/update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub config: CodecSessionConfig,
    pub bitpool: u8,
}

impl EncoderParams {
    /// Encoded bytes per frame at the current bitpool.
    pub fn frame_length(&self) -> usize {
        self.config.frame_length(self.bitpool)
    }

    /// Interleaved PCM samples consumed per frame.
    pub fn pcm_samples_per_frame(&self) -> usize {
        self.config.samples_per_frame() * self.config.channels()
    }
}

/// PCM → SBC frame encoder.
pub trait FrameEncoder: Send {
    fn configure(&mut self, params: &EncoderParams) -> MediaResult<()>;

    /// Encodes one frame of interleaved PCM into `out`. Returns the number of
    /// bytes written.
    fn encode_frame(&mut self, pcm: &[i16], out: &mut [u8]) -> MediaResult<usize>;
}

/// SBC / mSBC frame → PCM decoder.
pub trait FrameDecoder: Send {
    /// Drops all stream state. `enhanced` selects the mSBC framing.
    fn reset(&mut self, max_channels: usize, pcm_stride: usize, enhanced: bool);

    /// Decodes the first frame of `input` into interleaved `pcm_out`.
    fn decode_frame(&mut self, input: &[u8], pcm_out: &mut [i16]) -> DecodeOutput;
}

pub type BoxedEncoder = Box<dyn FrameEncoder>;
pub type BoxedDecoder = Box<dyn FrameDecoder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        assert!(DecodeStatus::ChecksumMismatch.is_transient());
        assert!(DecodeStatus::NoSyncword.is_transient());
        assert!(!DecodeStatus::InvalidParameters.is_transient());
        assert!(!DecodeStatus::Success.is_transient());
        assert!(DecodeStatus::Success.is_success());
    }

    #[test]
    fn encoder_params_sizes() {
        let params = EncoderParams {
            config: CodecSessionConfig::default(),
            bitpool: 53,
        };
        assert_eq!(params.frame_length(), 119);
        assert_eq!(params.pcm_samples_per_frame(), 256);
        assert_eq!(DecodeOutput::failed(DecodeStatus::NotEnoughBody).consumed, 0);
    }
}
