//! Commands posted to the media workers, and the single-slot gate for
//! control requests awaiting acknowledgment.

use parking_lot::Mutex;
use tracing::debug;

use super::FeedingParams;
use crate::audio::sbc::CodecSessionConfig;
use crate::common::{Direction, MediaError, MediaResult};

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCommand {
    /// Sink stream (re)configured from a codec information element.
    ConfigureSink { codec_info: Vec<u8> },
    /// Sink switched to mSBC voice frames.
    ConfigureVoice,
    /// Encoder parameters for a newly opened source stream.
    InitEncoder {
        config: CodecSessionConfig,
        mtu: usize,
        edr: bool,
    },
    /// Peer limits changed on an open source stream.
    UpdateEncoder {
        min_bitpool: u8,
        max_bitpool: u8,
        mtu: usize,
    },
    InitFeeding(FeedingParams),
    StartTx,
    StopTx,
    /// Stop decoding and drop everything buffered for the current track.
    ClearTrack,
    FlushInbound,
    FlushOutbound,
}

impl MediaCommand {
    /// Worker that owns the state this command touches.
    pub fn direction(&self) -> Direction {
        match self {
            Self::ConfigureSink { .. }
            | Self::ConfigureVoice
            | Self::ClearTrack
            | Self::FlushInbound => Direction::Inbound,
            Self::InitEncoder { .. }
            | Self::UpdateEncoder { .. }
            | Self::InitFeeding(_)
            | Self::StartTx
            | Self::StopTx
            | Self::FlushOutbound => Direction::Outbound,
        }
    }
}

/// Stream control requested by the audio front end. The signaling layer
/// acknowledges each one once the link has followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Start,
    Suspend,
    Stop,
}

/// Holds at most one unacknowledged [`ControlRequest`].
#[derive(Debug, Default)]
pub struct ControlGate {
    pending: Mutex<Option<ControlRequest>>,
}

impl ControlGate {
    pub fn begin(&self, request: ControlRequest) -> MediaResult<()> {
        let mut pending = self.pending.lock();
        if let Some(current) = *pending {
            debug!("control {:?} rejected, {:?} still pending", request, current);
            return Err(MediaError::CommandPending);
        }
        *pending = Some(request);
        Ok(())
    }

    /// Clears the slot, returning the request that was waiting.
    pub fn acknowledge(&self) -> Option<ControlRequest> {
        self.pending.lock().take()
    }

    pub fn pending(&self) -> Option<ControlRequest> {
        *self.pending.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_waits_for_ack() {
        let gate = ControlGate::default();
        gate.begin(ControlRequest::Start).unwrap();
        assert!(matches!(
            gate.begin(ControlRequest::Suspend),
            Err(MediaError::CommandPending)
        ));
        assert_eq!(gate.pending(), Some(ControlRequest::Start));
        assert_eq!(gate.acknowledge(), Some(ControlRequest::Start));
        assert_eq!(gate.acknowledge(), None);
        assert!(gate.begin(ControlRequest::Suspend).is_ok());
    }

    #[test]
    fn commands_route_by_direction() {
        assert_eq!(MediaCommand::ConfigureVoice.direction(), Direction::Inbound);
        assert_eq!(MediaCommand::StartTx.direction(), Direction::Outbound);
        assert_eq!(
            MediaCommand::ConfigureSink { codec_info: vec![] }.direction(),
            Direction::Inbound
        );
    }
}
