//! SBC support that lives on this side of the codec boundary: session
//! parameters, frame headers, bit allocation and bitpool selection.

pub mod bitalloc;
pub mod bitrate;
pub mod config;
pub mod frame;

pub use bitalloc::{Allocation, BitAllocator, ScaleFactors, allocate};
pub use bitrate::{BitpoolChoice, BitrateController};
pub use config::{
    AllocationMethod, BlockLength, ChannelMode, CodecSessionConfig, SamplingFrequency,
    SbcCodecInfo, Subbands, preferred_config, sbc_caps,
};
pub use frame::{SbcFrame, SbcFrameHeader, crc8, seal_crc};
