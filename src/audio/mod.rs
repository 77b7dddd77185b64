pub mod buffer;
pub mod codec;
pub mod constants;
pub mod plc;
pub mod resample;
pub mod sbc;

pub use buffer::{AudioFrame, FramePool, MediaQueue, OverflowPolicy};
pub use codec::{DecodeOutput, DecodeStatus, EncoderParams, FrameDecoder, FrameEncoder};
pub use plc::{PlcEngine, PlcState};
pub use resample::Resampler;
pub use sbc::{BitAllocator, CodecSessionConfig};
