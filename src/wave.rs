//! Wave storage and mipmapping.
//!
//! Decoding arbitrary audio file formats into this layout is out of scope
//!; this crate generates waves in-engine (sine/noise tables) or
//! accepts raw PCM uploaded through the stream API.

use crate::types::{a2_wavepost, A2_MAXFRAG, A2_MAXPHINC, A2_MIPLEVELS, A2_WAVEPRE};

/// Maximum wave length in samples, per the pre/post padding budget.
pub fn max_wave_length() -> usize {
    0x0100_0000 - A2_WAVEPRE - a2_wavepost()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveType {
    /// Destroyed/unloaded placeholder -- oscillators reading it go silent.
    Off,
    Noise,
    Wave,
    MipWave,
}

/// One mip level's sample buffer, padded front and back so interpolating
/// oscillators never read outside the allocation.
#[derive(Debug, Clone)]
pub struct MipLevel {
    /// Includes `A2_WAVEPRE` lead-in and `a2_wavepost()` trailing pad samples.
    pub samples: Vec<f32>,
    pub period: usize,
}

impl MipLevel {
    pub fn from_cycle(cycle: &[f32], looped: bool) -> Self {
        let pre = A2_WAVEPRE;
        let post = a2_wavepost();
        let mut samples = vec![0.0f32; pre + cycle.len() + post];
        samples[pre..pre + cycle.len()].copy_from_slice(cycle);
        if looped && !cycle.is_empty() {
            for i in 0..pre {
                samples[i] = cycle[(cycle.len() - pre % cycle.len() + i) % cycle.len()];
            }
            for i in 0..post {
                samples[pre + cycle.len() + i] = cycle[i % cycle.len()];
            }
        }
        Self { samples, period: cycle.len() }
    }

    /// Sample at padded index `pre + i`, valid for `i` in `-A2_WAVEPRE ..
    /// period + a2_wavepost()`.
    pub fn at(&self, i: isize) -> f32 {
        let idx = (A2_WAVEPRE as isize + i) as usize;
        self.samples.get(idx).copied().unwrap_or(0.0)
    }
}

/// A loaded waveform: its type plus up to `A2_MIPLEVELS` downsampled copies,
/// used by wavetable oscillators to suppress aliasing at high playback
/// ratios.
#[derive(Debug, Clone)]
pub struct Wave {
    pub wave_type: WaveType,
    pub period: usize,
    pub looped: bool,
    pub levels: Vec<MipLevel>,
}

impl Wave {
    pub fn silence() -> Self {
        Self { wave_type: WaveType::Off, period: 0, looped: false, levels: Vec::new() }
    }

    /// Builds a full mip chain from a single-cycle base waveform by
    /// repeated 2x decimation, stopping once a level collapses below 4
    /// samples or the level budget is exhausted.
    pub fn from_single_cycle(cycle: Vec<f32>, looped: bool) -> Self {
        let mut levels = vec![MipLevel::from_cycle(&cycle, looped)];
        let mut current = cycle;
        while levels.len() < A2_MIPLEVELS && current.len() >= 8 {
            let mut next = Vec::with_capacity(current.len() / 2);
            let mut i = 0;
            while i + 1 < current.len() {
                next.push((current[i] + current[i + 1]) * 0.5);
                i += 2;
            }
            levels.push(MipLevel::from_cycle(&next, looped));
            current = next;
        }
        let period = levels[0].period;
        Self { wave_type: WaveType::MipWave, period, looped, levels }
    }

    /// Marks the wave unloaded in place: mip level 0 is emptied so any
    /// oscillator still reading it (between the destroy request and the
    /// next WAHP barrier) sees silence rather than stale or freed memory.
    pub fn unload(&mut self) {
        self.wave_type = WaveType::Off;
        self.levels.clear();
    }

    pub fn is_silent(&self) -> bool {
        matches!(self.wave_type, WaveType::Off) || self.levels.is_empty()
    }

    /// Picks the mip level whose period best matches a playback phase
    /// increment of `phase_inc` (16.16 fixed), halving resolution once per
    /// octave above the base rate.
    pub fn mip_level_for(&self, phase_inc: u32) -> usize {
        if self.levels.is_empty() {
            return 0;
        }
        let octaves = (phase_inc.max(1) as f32 / crate::types::REG_ONE as f32).log2().max(0.0);
        (octaves as usize).min(self.levels.len() - 1)
    }

    pub fn max_phase_inc() -> u32 {
        A2_MAXPHINC as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unload_makes_wave_silent() {
        let mut w = Wave::from_single_cycle(vec![0.0, 1.0, 0.0, -1.0], true);
        assert!(!w.is_silent());
        w.unload();
        assert!(w.is_silent());
    }

    #[test]
    fn mip_chain_shrinks_each_level() {
        let cycle: Vec<f32> = (0..64).map(|i| (i as f32).sin()).collect();
        let w = Wave::from_single_cycle(cycle, true);
        for pair in w.levels.windows(2) {
            assert!(pair[1].period <= pair[0].period);
        }
    }

    #[test]
    fn looped_pad_wraps_from_cycle_start() {
        let w = MipLevel::from_cycle(&[1.0, 2.0, 3.0, 4.0], true);
        assert_eq!(w.at(4), w.at(0));
    }

    #[test]
    fn max_length_accounts_for_padding() {
        assert!(max_wave_length() < 0x0100_0000);
        assert!(max_wave_length() > 0x0100_0000 - 1000);
    }

    #[test]
    fn fragment_budget_matches_maxfrag() {
        assert_eq!(A2_MAXFRAG, 64);
    }
}
