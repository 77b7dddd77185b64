//! Encoder bitpool selection from a target bitrate.

use tracing::{debug, warn};

use super::config::{ChannelMode, CodecSessionConfig};
use crate::common::{MediaError, MediaResult};

/// Bitpool ceiling for stereo layouts, by subband count.
const STEREO_BITPOOL_CAP_8: i64 = 255;
const STEREO_BITPOOL_CAP_4: i64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitpoolChoice {
    pub bitpool: u8,
    /// Bitrate in kbps the search settled on.
    pub bitrate: u32,
    /// `false` when the search tried both directions without landing inside
    /// the negotiated range; the bitpool is then clamped into it.
    pub converged: bool,
}

/// Walks the target bitrate in fixed steps until its bitpool fits the
/// negotiated min..max range.
#[derive(Debug, Clone)]
pub struct BitrateController {
    bitrate: u32,
    step: u32,
}

impl BitrateController {
    pub fn new(bitrate: u32, step: u32) -> Self {
        Self { bitrate, step }
    }

    /// Starts from `default_bitrate`, capped at `non_edr_max_rate` when the
    /// peer link lacks EDR.
    pub fn for_link(default_bitrate: u32, step: u32, non_edr_max_rate: u32, edr: bool) -> Self {
        let bitrate = if edr {
            default_bitrate
        } else {
            debug!("non-EDR link, restricting rate to {} kbps", non_edr_max_rate);
            default_bitrate.min(non_edr_max_rate)
        };
        Self::new(bitrate, step)
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Bitpool that yields at most `rate` kbps for `config`. May be outside
    /// the negotiated range.
    pub fn bitpool_for_rate(config: &CodecSessionConfig, rate: u32) -> i64 {
        let hz = config.frequency.hz() as i64;
        let sb = config.subband_count() as i64;
        let blocks = config.blocks() as i64;
        let ch = config.channels() as i64;
        let rate = rate as i64;

        let bitpool = if config.channel_mode.shares_bitpool() {
            let join = if config.channel_mode == ChannelMode::JointStereo { 1 } else { 0 };
            let mut bitpool = (rate * sb * 1000 / hz) - (32 + 4 * sb * ch + join * sb) / blocks;

            let frame_len = 4 + (4 * sb * ch) / 8 + (join * sb + blocks * bitpool) / 8;
            let actual = (8 * frame_len * hz) / (sb * blocks * 1000);
            if actual > rate {
                bitpool -= 1;
            }

            let cap = if sb == 8 { STEREO_BITPOOL_CAP_8 } else { STEREO_BITPOOL_CAP_4 };
            bitpool.min(cap)
        } else {
            let bitpool = (sb * rate * 1000) / (hz * ch) - ((32 / ch) + 4 * sb) / blocks;
            bitpool.min(16 * sb)
        };

        bitpool.max(0)
    }

    /// Finds the bitpool for `config`, adjusting the stored bitrate.
    pub fn select(&mut self, config: &CodecSessionConfig) -> MediaResult<BitpoolChoice> {
        if config.blocks() == 0 || config.subband_count() == 0 || config.channels() == 0 {
            return Err(MediaError::invalid_config("zero blocks, subbands or channels"));
        }
        config.validate()?;

        let min = config.min_bitpool as i64;
        let max = config.max_bitpool as i64;
        let mut went_down = false;
        let mut went_up = false;

        loop {
            let candidate = Self::bitpool_for_rate(config, self.bitrate);
            debug!("bitpool candidate: {} ({} kbps)", candidate, self.bitrate);

            if candidate > max {
                self.bitrate = self.bitrate.saturating_sub(self.step);
                went_down = true;
            } else if candidate < min {
                match self.bitrate.checked_add(self.step) {
                    Some(rate) => self.bitrate = rate,
                    None => went_down = true,
                }
                went_up = true;
            } else {
                return Ok(BitpoolChoice {
                    bitpool: candidate as u8,
                    bitrate: self.bitrate,
                    converged: true,
                });
            }

            if went_down && went_up {
                warn!(
                    "could not find bitpool in range {}..{}, last candidate {}",
                    min, max, candidate
                );
                return Ok(BitpoolChoice {
                    bitpool: candidate.clamp(min, max) as u8,
                    bitrate: self.bitrate,
                    converged: false,
                });
            }
        }
    }
}
