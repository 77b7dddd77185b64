pub mod frame;
pub mod pool;
pub mod queue;

pub use frame::{
    AudioFrame, FrameHeader, MediaPayloadHeader, PACKET_STATUS_ERRONEOUS, PACKET_STATUS_GOOD,
    PACKET_STATUS_LOST,
};
pub use pool::{FramePool, PoolBuf, PoolStats};
pub use queue::{MediaQueue, OverflowPolicy};
