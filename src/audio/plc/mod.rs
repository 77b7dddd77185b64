//! Packet loss concealment for mSBC voice frames.
//!
//! History layout (`PLC_HIST_LEN` samples):
//!
//! ```text
//! [0 .. LHIST)                  decoded past, newest last
//! [LHIST .. LHIST+FS)           frame being produced
//! [LHIST+FS .. +RT+OLAL)        synthesized tail used to reconverge
//! ```
//!
//! A bad frame is rebuilt from the history segment that best matches the
//! most recent `M` samples; the first `OLAL` samples are cross-faded with
//! the decoder's zero-input response. The good frame that ends a run
//! replays the synthesized tail and fades into the decoded signal.

pub mod zero_frame;

pub use zero_frame::{MSBC_ZERO_FRAME, MSBC_ZERO_PCM};

use tracing::trace;

use crate::audio::constants::{
    INT16_MAX_F, INT16_MIN_F, PLC_FS, PLC_LHIST, PLC_M, PLC_N, PLC_OLAL, PLC_RT, PLC_SCALE_MAX,
    PLC_SCALE_MIN,
};

pub const PLC_HIST_LEN: usize = PLC_LHIST + PLC_FS + PLC_RT + PLC_OLAL;

/// Raised-cosine overlap window, `cos²(π(i+1) / (2(OLAL+1)))`.
const RCOS: [f32; PLC_OLAL] = [
    0.991_486_55,
    0.966_236_11,
    0.925_108_57,
    0.869_504_46,
    0.801_317_32,
    0.722_869_18,
    0.636_831_50,
    0.546_134_18,
    0.453_865_82,
    0.363_168_50,
    0.277_130_82,
    0.198_682_68,
    0.130_495_54,
    0.074_891_43,
    0.033_763_89,
    0.008_513_45,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcState {
    Normal,
    /// Number of consecutive bad frames so far.
    Concealing(u32),
}

#[inline]
fn saturate(v: f32) -> i16 {
    v.clamp(INT16_MIN_F, INT16_MAX_F) as i16
}

pub struct PlcEngine {
    hist: Vec<i16>,
    bestlag: usize,
    scale: f32,
    state: PlcState,
}

impl Default for PlcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlcEngine {
    pub fn new() -> Self {
        Self {
            hist: vec![0; PLC_HIST_LEN],
            bestlag: 0,
            scale: 1.0,
            state: PlcState::Normal,
        }
    }

    /// Back to silence; called on every stream (re)start.
    pub fn reset(&mut self) {
        self.hist.fill(0);
        self.bestlag = 0;
        self.scale = 1.0;
        self.state = PlcState::Normal;
    }

    pub fn state(&self) -> PlcState {
        self.state
    }

    pub fn bestlag(&self) -> usize {
        self.bestlag
    }

    /// Amplitude scale chosen at the start of the current or last run.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Start of the history segment that best matches the last `M` samples.
    fn pattern_match(&self) -> usize {
        let template = &self.hist[PLC_LHIST - PLC_M..PLC_LHIST];
        let template_energy: f32 = template.iter().map(|&y| (y as f32) * (y as f32)).sum();

        let mut best = 0;
        let mut max_cn = f32::MIN;
        for n in 0..PLC_N {
            let window = &self.hist[n..n + PLC_M];
            let mut cross = 0.0f32;
            let mut energy = 0.0f32;
            for (&x, &y) in window.iter().zip(template) {
                cross += (x as f32) * (y as f32);
                energy += (x as f32) * (x as f32);
            }
            let norm = (energy * template_energy).sqrt();
            if norm == 0.0 {
                continue;
            }
            let cn = cross / norm;
            if cn > max_cn {
                max_cn = cn;
                best = n;
            }
        }
        best
    }

    /// Ratio of recent amplitude to the matched segment's amplitude.
    fn amplitude_match(&self, lag: usize) -> f32 {
        let recent: f32 = self.hist[PLC_LHIST - PLC_FS..PLC_LHIST]
            .iter()
            .map(|&s| (s as f32).abs())
            .sum();
        let matched: f32 = 1e-6
            + self.hist[lag..lag + PLC_FS]
                .iter()
                .map(|&s| (s as f32).abs())
                .sum::<f32>();
        (recent / matched).clamp(PLC_SCALE_MIN, PLC_SCALE_MAX)
    }

    /// Synthesizes a replacement for a lost frame. `zir` is the decoder's
    /// output for [`MSBC_ZERO_FRAME`].
    pub fn bad_frame(&mut self, zir: &[i16; PLC_FS], out: &mut [i16; PLC_FS]) {
        let run = match self.state {
            PlcState::Normal => 1,
            PlcState::Concealing(run) => run + 1,
        };
        self.state = PlcState::Concealing(run);

        let lag = if run == 1 {
            let lag = self.pattern_match() + PLC_M;
            let sf = self.amplitude_match(lag);
            self.bestlag = lag;
            self.scale = sf;
            trace!("plc: new run, bestlag {} scale {:.3}", lag, sf);

            let h = &mut self.hist;
            for i in 0..PLC_OLAL {
                let v = zir[i] as f32 * RCOS[i] + sf * h[lag + i] as f32 * RCOS[PLC_OLAL - 1 - i];
                h[PLC_LHIST + i] = saturate(v);
            }
            for i in PLC_OLAL..PLC_FS {
                h[PLC_LHIST + i] = saturate(sf * h[lag + i] as f32);
            }
            for i in PLC_FS..PLC_FS + PLC_OLAL {
                let v = sf * h[lag + i] as f32 * RCOS[i - PLC_FS]
                    + h[lag + i] as f32 * RCOS[PLC_OLAL - 1 - i + PLC_FS];
                h[PLC_LHIST + i] = saturate(v);
            }
            for i in PLC_FS + PLC_OLAL..PLC_FS + PLC_RT + PLC_OLAL {
                h[PLC_LHIST + i] = h[lag + i];
            }
            lag
        } else {
            let lag = self.bestlag;
            for i in 0..PLC_FS + PLC_RT + PLC_OLAL {
                self.hist[PLC_LHIST + i] = self.hist[lag + i];
            }
            lag
        };
        trace!("plc: concealed frame {} from lag {}", run, lag);

        out.copy_from_slice(&self.hist[PLC_LHIST..PLC_LHIST + PLC_FS]);
        self.hist.copy_within(PLC_FS.., 0);
        let len = self.hist.len();
        self.hist[len - PLC_FS..].fill(0);
    }

    /// Records a correctly decoded frame, fading out of a concealment run
    /// when one is active.
    pub fn good_frame(&mut self, input: &[i16; PLC_FS], out: &mut [i16; PLC_FS]) {
        let mut start = 0;
        if let PlcState::Concealing(run) = self.state {
            trace!("plc: reconverging after {} bad frames", run);
            out[..PLC_RT].copy_from_slice(&self.hist[PLC_LHIST..PLC_LHIST + PLC_RT]);
            for i in PLC_RT..PLC_RT + PLC_OLAL {
                let v = self.hist[PLC_LHIST + i] as f32 * RCOS[i - PLC_RT]
                    + input[i] as f32 * RCOS[PLC_OLAL - 1 - i + PLC_RT];
                out[i] = saturate(v);
            }
            start = PLC_RT + PLC_OLAL;
        }
        out[start..].copy_from_slice(&input[start..]);

        self.hist[PLC_LHIST..PLC_LHIST + PLC_FS].copy_from_slice(out);
        self.hist.copy_within(PLC_FS..PLC_FS + PLC_LHIST, 0);
        self.state = PlcState::Normal;
    }
}
