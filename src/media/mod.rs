//! The real-time media task.
//!
//! | Piece | Role |
//! |---|---|
//! | [`MediaTaskScheduler`] | lifecycle, producer-side API, command posting |
//! | [`worker::MediaWorker`] | per-direction event loop on its own thread |
//! | [`sink::SinkPipeline`] | RX tick: inbound queue → decoder / PLC → [`PcmSink`] |
//! | [`source::SourcePipeline`] | TX tick: [`PcmSource`] → resampler → encoder → outbound queue |

pub mod command;
pub mod context;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod state;
pub mod stats;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{ControlGate, ControlRequest, MediaCommand};
pub use context::MediaContext;
pub use scheduler::{MediaIo, MediaTaskScheduler};
pub use state::TaskState;
pub use stats::{MediaStats, MediaStatsSnapshot};

use serde::{Deserialize, Serialize};

/// How the application feeds PCM to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedingMode {
    /// The application keeps up with the tick; a short read is an underrun.
    #[default]
    Synchronous,
    /// The application may lag; short reads are padded with silence.
    Asynchronous,
}

/// PCM layout the application feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedingParams {
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub channels: u8,
}

impl FeedingParams {
    pub fn bytes_per_frame(&self) -> usize {
        self.bits_per_sample as usize / 8 * self.channels as usize
    }
}

impl Default for FeedingParams {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bits_per_sample: 16,
            channels: 2,
        }
    }
}

/// Receives decoded PCM, interleaved signed 16-bit little-endian.
pub trait PcmSink: Send {
    fn deliver(&mut self, pcm: &[u8]);
}

impl<F> PcmSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn deliver(&mut self, pcm: &[u8]) {
        self(pcm)
    }
}

/// Supplies PCM in the layout given by [`FeedingParams`]. Returns the number
/// of bytes written into `buf`.
pub trait PcmSource: Send {
    fn pull(&mut self, buf: &mut [u8]) -> usize;
}

impl<F> PcmSource for F
where
    F: FnMut(&mut [u8]) -> usize + Send,
{
    fn pull(&mut self, buf: &mut [u8]) -> usize {
        self(buf)
    }
}

pub type BoxedSink = Box<dyn PcmSink>;
pub type BoxedSource = Box<dyn PcmSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_sinks_and_sources() {
        let mut got = Vec::new();
        {
            let mut sink = |pcm: &[u8]| got.extend_from_slice(pcm);
            sink.deliver(&[1, 2]);
        }
        assert_eq!(got, vec![1, 2]);

        let mut source = |buf: &mut [u8]| {
            buf.fill(7);
            buf.len()
        };
        let mut buf = [0u8; 3];
        assert_eq!(source.pull(&mut buf), 3);
        assert_eq!(buf, [7, 7, 7]);
    }

    #[test]
    fn feeding_mode_from_config_names() {
        #[derive(Deserialize)]
        struct Wrap {
            mode: FeedingMode,
        }
        let w: Wrap = toml::from_str("mode = \"asynchronous\"").unwrap();
        assert_eq!(w.mode, FeedingMode::Asynchronous);
        assert_eq!(FeedingParams::default().bytes_per_frame(), 4);
    }
}
