use thiserror::Error;

/// Every failure the media path can report to a caller.
///
/// Transient decode problems never surface here: the worker handles them
/// inline and only counts them in [`crate::media::MediaStats`].
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media task already running")]
    AlreadyRunning,

    #[error("media task is not running")]
    NotRunning,

    #[error("media task is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid codec information: {0}")]
    InvalidCodecInfo(&'static str),

    #[error("queue full, frame dropped")]
    QueueFull,

    #[error("queue busy, frame dropped after bounded wait")]
    QueueBusy,

    #[error("worker channel closed")]
    ChannelClosed,

    #[error("timed out posting to worker channel")]
    ChannelTimeout,

    #[error("a control request is already awaiting acknowledgment")]
    CommandPending,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("failed to spawn media worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

impl<T> From<flume::SendTimeoutError<T>> for MediaError {
    fn from(err: flume::SendTimeoutError<T>) -> Self {
        match err {
            flume::SendTimeoutError::Timeout(_) => Self::ChannelTimeout,
            flume::SendTimeoutError::Disconnected(_) => Self::ChannelClosed,
        }
    }
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_timeout_maps_to_channel_errors() {
        let (tx, rx) = flume::bounded::<u8>(1);
        tx.send(1).unwrap();
        let err = tx
            .send_timeout(2, std::time::Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(MediaError::from(err), MediaError::ChannelTimeout));

        drop(rx);
        let err = tx
            .send_timeout(3, std::time::Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(MediaError::from(err), MediaError::ChannelClosed));
    }

    #[test]
    fn display_includes_detail() {
        let err = MediaError::invalid_config("zero subbands");
        assert_eq!(err.to_string(), "invalid configuration: zero subbands");
    }
}
