//! SBC bit allocation.
//!
//! Both ends of a link derive the per-subband bit counts of every frame from
//! its scale factors and the bitpool, so this must stay bit-exact: any
//! difference shifts every quantized sample that follows in the frame.
//!
//! The allocation runs in four passes:
//!
//! 1. bit-need per subband from the scale factor (SNR) or from the scale
//!    factor minus a perceptual offset (loudness);
//! 2. a binary search for the largest global adjustment whose clamped total
//!    still fits the bitpool;
//! 3. per-subband clamping, spending the excess one bit at a time;
//! 4. round-robin distribution of whatever is left.

use super::config::{AllocationMethod, ChannelMode, CodecSessionConfig, SamplingFrequency};
use crate::audio::constants::{SBC_MAX_BITS_PER_SUBBAND, SBC_MAX_CHANNELS, SBC_MAX_SUBBANDS};
use crate::common::{MediaError, MediaResult};

/// Loudness offsets for 4 subbands, one row per sampling frequency index.
const LOUDNESS_OFFSET_4: [[i32; 4]; 4] = [
    [-1, 0, 0, 0],
    [-2, 0, 0, 1],
    [-2, 0, 0, 1],
    [-2, 0, 0, 1],
];

/// Loudness offsets for 8 subbands, one row per sampling frequency index.
const LOUDNESS_OFFSET_8: [[i32; 8]; 4] = [
    [-2, 0, 0, 0, 0, 0, 0, 1],
    [-3, 0, 0, 0, 0, 0, 1, 2],
    [-4, 0, 0, 0, 0, 0, 1, 2],
    [-4, 0, 0, 0, 0, 0, 1, 2],
];

/// Added to every loudness bit-need so a zero scale factor maps to 0.
const LOUDNESS_BIAS: i32 = 5;

/// Largest bit-need either method can produce.
const MAX_BITNEED: i32 = 15;

/// First step of the adjustment search; the search spans ±(2·STEP − 1).
const FIRST_SEARCH_STEP: i32 = 8;

/// Scale factors of one frame, `[channel][subband]`.
pub type ScaleFactors = [[u8; SBC_MAX_SUBBANDS]; SBC_MAX_CHANNELS];

/// Result of one allocation, `[channel][subband]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub bits: [[u8; SBC_MAX_SUBBANDS]; SBC_MAX_CHANNELS],
    pub channels: usize,
    pub subbands: usize,
    /// Largest bit-need seen across all channels.
    pub max_bitneed: i32,
    /// Sum of `scale_factor + 2` over every coded subband; a bitpool hint
    /// for near-lossless sizing.
    pub preferred_bitpool: u32,
}

impl Allocation {
    pub fn channel(&self, ch: usize) -> &[u8] {
        &self.bits[ch][..self.subbands]
    }

    pub fn total_bits(&self) -> u32 {
        (0..self.channels)
            .flat_map(|ch| self.channel(ch).iter())
            .map(|&b| b as u32)
            .sum()
    }
}

/// Stream-constant allocation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitAllocator {
    channel_mode: ChannelMode,
    method: AllocationMethod,
    frequency: SamplingFrequency,
    subbands: usize,
}

impl BitAllocator {
    pub fn new(
        channel_mode: ChannelMode,
        method: AllocationMethod,
        frequency: SamplingFrequency,
        subbands: usize,
    ) -> MediaResult<Self> {
        if subbands != 4 && subbands != 8 {
            return Err(MediaError::invalid_config(format!(
                "subband count must be 4 or 8, got {}",
                subbands
            )));
        }
        Ok(Self {
            channel_mode,
            method,
            frequency,
            subbands,
        })
    }

    pub fn for_config(config: &CodecSessionConfig) -> MediaResult<Self> {
        if config.blocks() == 0 {
            return Err(MediaError::invalid_config("zero blocks"));
        }
        Self::new(
            config.channel_mode,
            config.allocation,
            config.frequency,
            config.subband_count(),
        )
    }

    pub fn channels(&self) -> usize {
        self.channel_mode.channels()
    }

    fn bitneed(&self, scale_factor: u8, sb: usize) -> i32 {
        let sf = scale_factor as i32;
        match self.method {
            AllocationMethod::Snr => sf,
            AllocationMethod::Loudness => {
                if sf == 0 {
                    return 0;
                }
                let offset = if self.subbands == 4 {
                    LOUDNESS_OFFSET_4[self.frequency.index()][sb]
                } else {
                    LOUDNESS_OFFSET_8[self.frequency.index()][sb]
                };
                let mut need = sf - offset;
                if need > 0 {
                    need /= 2;
                }
                need + LOUDNESS_BIAS
            }
        }
    }

    /// Allocates bits for every channel of one frame.
    pub fn allocate(&self, scale_factors: &ScaleFactors, bitpool: u8) -> Allocation {
        let channels = self.channels();
        let mut needs = [[0i32; SBC_MAX_SUBBANDS]; SBC_MAX_CHANNELS];
        let mut max_bitneed = i32::MIN;
        let mut preferred_bitpool = 0u32;

        for ch in 0..channels {
            for sb in 0..self.subbands {
                let sf = scale_factors[ch][sb].min(MAX_BITNEED as u8);
                let need = self.bitneed(sf, sb);
                needs[ch][sb] = need;
                max_bitneed = max_bitneed.max(need);
                preferred_bitpool += sf as u32 + 2;
            }
        }

        let mut bits = [[0u8; SBC_MAX_SUBBANDS]; SBC_MAX_CHANNELS];
        if self.channel_mode.shares_bitpool() {
            // Interleaved order: sb0 ch0, sb0 ch1, sb1 ch0, ...
            let mut joint = [0i32; SBC_MAX_SUBBANDS * SBC_MAX_CHANNELS];
            for sb in 0..self.subbands {
                for ch in 0..channels {
                    joint[sb * channels + ch] = needs[ch][sb];
                }
            }
            let n = self.subbands * channels;
            let alloc = allocate_group(&joint[..n], bitpool as i32);
            for sb in 0..self.subbands {
                for ch in 0..channels {
                    bits[ch][sb] = alloc[sb * channels + ch];
                }
            }
        } else {
            for ch in 0..channels {
                let alloc = allocate_group(&needs[ch][..self.subbands], bitpool as i32);
                bits[ch][..self.subbands].copy_from_slice(&alloc[..self.subbands]);
            }
        }

        Allocation {
            bits,
            channels,
            subbands: self.subbands,
            max_bitneed,
            preferred_bitpool,
        }
    }
}

/// Allocates with the parameters of a single call; see [`BitAllocator`].
pub fn allocate(
    scale_factors: &ScaleFactors,
    channel_mode: ChannelMode,
    method: AllocationMethod,
    frequency: SamplingFrequency,
    subbands: usize,
    bitpool: u8,
) -> MediaResult<Allocation> {
    Ok(BitAllocator::new(channel_mode, method, frequency, subbands)?.allocate(scale_factors, bitpool))
}

/// Bits a subband receives for bit-need `need` under adjustment `adjust`,
/// before excess is spent.
#[inline]
fn clamped(need: i32, adjust: i32) -> i32 {
    let v = need + adjust;
    if v < 2 { 0 } else { v.min(SBC_MAX_BITS_PER_SUBBAND) }
}

fn total_for(needs: &[i32], adjust: i32) -> i32 {
    needs.iter().map(|&n| clamped(n, adjust)).sum()
}

/// Largest adjustment whose total fits `bitpool`, and the excess it leaves.
///
/// The probe points form a balanced search tree over -15..=15 rooted at 0;
/// if no probe fits, every bit-need is pushed below 2 and nothing is coded.
fn search_adjustment(needs: &[i32], bitpool: i32) -> (i32, i32) {
    let floor = -(2 * FIRST_SEARCH_STEP);
    let mut best = floor;
    let mut best_total = total_for(needs, floor);
    let mut adjust = 0;
    let mut step = FIRST_SEARCH_STEP;

    loop {
        let total = total_for(needs, adjust);
        let fits = total <= bitpool;
        if fits && adjust > best {
            best = adjust;
            best_total = total;
        }
        if step == 0 {
            break;
        }
        adjust += if fits { step } else { -step };
        step /= 2;
    }

    (best, bitpool - best_total)
}

fn allocate_group(needs: &[i32], bitpool: i32) -> [u8; SBC_MAX_SUBBANDS * SBC_MAX_CHANNELS] {
    let mut out = [0u8; SBC_MAX_SUBBANDS * SBC_MAX_CHANNELS];
    let (adjust, mut excess) = search_adjustment(needs, bitpool);

    for (slot, &need) in out.iter_mut().zip(needs) {
        let v = need + adjust;
        *slot = if v >= SBC_MAX_BITS_PER_SUBBAND {
            SBC_MAX_BITS_PER_SUBBAND as u8
        } else if v > 1 {
            if excess > 0 {
                excess -= 1;
                (v + 1) as u8
            } else {
                v as u8
            }
        } else if v == 1 && excess >= 2 {
            excess -= 2;
            2
        } else {
            0
        };
    }

    let n = needs.len();
    let mut sb = 0;
    while excess > 0 && out[..n].iter().any(|&b| (b as i32) < SBC_MAX_BITS_PER_SUBBAND) {
        if (out[sb] as i32) < SBC_MAX_BITS_PER_SUBBAND {
            out[sb] += 1;
            excess -= 1;
        }
        sb = (sb + 1) % n;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn mono(sf: &[u8]) -> ScaleFactors {
        let mut out = [[0u8; 8]; 2];
        out[0][..sf.len()].copy_from_slice(sf);
        out
    }

    fn loudness_44k(subbands: usize) -> BitAllocator {
        BitAllocator::new(
            ChannelMode::Mono,
            AllocationMethod::Loudness,
            SamplingFrequency::Hz44100,
            subbands,
        )
        .unwrap()
    }

    #[test]
    fn golden_8_subbands_bitpool_32_loudness_44k() {
        let alloc = loudness_44k(8).allocate(&mono(&[8, 7, 6, 5, 4, 3, 2, 1]), 32);
        assert_eq!(alloc.channel(0), &[9, 5, 5, 4, 4, 3, 2, 0]);
        assert_eq!(alloc.total_bits(), 32);
        assert_eq!(alloc.max_bitneed, 11);
        assert_eq!(alloc.preferred_bitpool, 36 + 16);
    }

    #[test]
    fn msbc_silence_allocation() {
        let config = CodecSessionConfig::msbc();
        let alloc = BitAllocator::for_config(&config)
            .unwrap()
            .allocate(&[[0; 8]; 2], config.max_bitpool);
        assert_eq!(alloc.channel(0), &[4, 4, 3, 3, 3, 3, 3, 3]);
    }

    #[test]
    fn snr_uses_scale_factor_as_need() {
        let allocator = BitAllocator::new(
            ChannelMode::Mono,
            AllocationMethod::Snr,
            SamplingFrequency::Hz48000,
            4,
        )
        .unwrap();
        let alloc = allocator.allocate(&mono(&[10, 6, 2, 0]), 12);
        assert_eq!(alloc.channel(0), &[8, 4, 0, 0]);
        assert_eq!(alloc.total_bits(), 12);
    }

    #[test]
    fn large_bitpool_caps_every_subband() {
        let alloc = loudness_44k(4).allocate(&mono(&[1, 2, 3, 4]), 250);
        assert_eq!(alloc.channel(0), &[16, 16, 16, 16]);
    }

    #[test]
    fn zero_bitpool_allocates_nothing() {
        let alloc = loudness_44k(8).allocate(&mono(&[15; 8]), 0);
        assert_eq!(alloc.total_bits(), 0);
    }

    #[test]
    fn invalid_subband_count_is_a_config_error() {
        assert!(BitAllocator::new(
            ChannelMode::Mono,
            AllocationMethod::Snr,
            SamplingFrequency::Hz48000,
            0
        )
        .is_err());
        assert!(
            allocate(
                &[[0; 8]; 2],
                ChannelMode::Stereo,
                AllocationMethod::Snr,
                SamplingFrequency::Hz48000,
                6,
                32
            )
            .is_err()
        );
    }

    #[test]
    fn allocation_properties_hold_for_random_frames() {
        let mut rng = StdRng::seed_from_u64(0x5BC);
        let modes = [
            ChannelMode::Mono,
            ChannelMode::DualChannel,
            ChannelMode::Stereo,
            ChannelMode::JointStereo,
        ];
        let freqs = [
            SamplingFrequency::Hz16000,
            SamplingFrequency::Hz32000,
            SamplingFrequency::Hz44100,
            SamplingFrequency::Hz48000,
        ];

        for _ in 0..20_000 {
            let mode = modes[rng.gen_range(0..4)];
            let method = if rng.gen_bool(0.5) {
                AllocationMethod::Loudness
            } else {
                AllocationMethod::Snr
            };
            let subbands = if rng.gen_bool(0.5) { 4 } else { 8 };
            let bitpool: u8 = rng.gen_range(0..=250);
            let mut sf = [[0u8; 8]; 2];
            for ch in sf.iter_mut() {
                for v in ch.iter_mut() {
                    *v = rng.gen_range(0..16);
                }
            }

            let allocator = BitAllocator::new(mode, method, freqs[rng.gen_range(0..4)], subbands)
                .unwrap();
            let alloc = allocator.allocate(&sf, bitpool);
            assert_eq!(alloc, allocator.allocate(&sf, bitpool));

            let groups: Vec<Vec<u8>> = if mode.shares_bitpool() {
                vec![(0..2).flat_map(|ch| alloc.channel(ch).to_vec()).collect()]
            } else {
                (0..mode.channels()).map(|ch| alloc.channel(ch).to_vec()).collect()
            };
            for group in groups {
                let sum: u32 = group.iter().map(|&b| b as u32).sum();
                assert!(group.iter().all(|&b| b <= 16));
                assert!(sum <= bitpool as u32, "{sum} > {bitpool}");
                let all_capped = group.iter().all(|&b| b == 16);
                assert!(
                    all_capped || (bitpool as u32 - sum) < group.len() as u32,
                    "leftover {} with {} subbands",
                    bitpool as u32 - sum,
                    group.len()
                );
            }
        }
    }
}
