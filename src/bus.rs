//! Fixed-size audio buffer blocks and buses.
//!
//! A [`Bus`] never owns its buffers' storage directly between fragments --
//! buffers come from a [`crate::pool::Pool`] of [`Block`]s so the engine
//! thread never allocates once it is running.

use log::warn;

use crate::pool::Pool;
use crate::types::{A2_MAXCHANNELS, A2_MAXFRAG};

/// One fixed-size sample buffer, the unit of recycling for scratch buses.
#[derive(Debug, Clone)]
pub struct Block {
    pub samples: [f32; A2_MAXFRAG],
}

impl Default for Block {
    fn default() -> Self {
        Self { samples: [0.0; A2_MAXFRAG] }
    }
}

impl Block {
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }
}

/// A set of channel buffers shared by the units in one voice, or by one
/// scratch nesting level. Buffers are borrowed from the surrounding
/// [`crate::pool::Pool<Block>`] by index, not owned here, so wiring a unit's
/// output to a bus costs one `u32` copy.
#[derive(Debug, Clone, Default)]
pub struct Bus {
    pub channels: Vec<u32>,
}

impl Bus {
    pub fn new(block_indices: Vec<u32>) -> Self {
        Self { channels: block_indices }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Clamps a requested channel count to [`A2_MAXCHANNELS`], warning once per
/// offending call site rather than silently growing scratch storage past the
/// hard bound the ping/pong arrays in `voice.rs` are sized to.
pub fn clamp_channels(requested: usize) -> usize {
    if requested > A2_MAXCHANNELS {
        warn!("unit chain requested {requested} channels, clamping to A2_MAXCHANNELS ({A2_MAXCHANNELS})");
        A2_MAXCHANNELS
    } else {
        requested
    }
}

/// The scratch storage one nesting level needs for a fragment: `mix` is the
/// already-rendered subvoice sum an `inline` unit reads, `a`/`b` are the
/// ping/pong pair the unit chain threads its running output through. All
/// three are block-pool-backed so a deeply nested voice tree costs one
/// `Vec` growth per level the first time it's seen, never per fragment.
#[derive(Debug, Default, Clone)]
struct LevelScratch {
    mix: Bus,
    a: Bus,
    b: Bus,
}

/// One scratch bus triple per nesting level, each grown to the widest unit
/// chain seen so far at that level.
#[derive(Debug, Default)]
pub struct ScratchBuses {
    levels: Vec<LevelScratch>,
}

impl ScratchBuses {
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    /// Grows level `level`'s mix/ping/pong buses to at least `channels`
    /// blocks wide, pulling fresh blocks from `blocks` only the first time a
    /// wider chain is seen at this depth -- every later fragment at this
    /// depth reuses the same indices.
    pub fn ensure_level(&mut self, level: usize, channels: usize, blocks: &mut Pool<Block>) {
        let channels = clamp_channels(channels);
        if level >= self.levels.len() {
            self.levels.resize_with(level + 1, LevelScratch::default);
        }
        let l = &mut self.levels[level];
        for bus in [&mut l.mix, &mut l.a, &mut l.b] {
            while bus.channels.len() < channels {
                bus.channels.push(blocks.alloc(Block::default()));
            }
        }
    }

    pub fn mix(&self, level: usize) -> Option<&Bus> {
        self.levels.get(level).map(|l| &l.mix)
    }

    pub fn ping_pong(&self, level: usize) -> Option<(&Bus, &Bus)> {
        self.levels.get(level).map(|l| (&l.a, &l.b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_bus_grows_to_widest_seen() {
        let mut blocks = Pool::new(4, None);
        let mut s = ScratchBuses::new();
        s.ensure_level(0, 2, &mut blocks);
        s.ensure_level(0, 3, &mut blocks);
        assert_eq!(s.ping_pong(0).unwrap().0.channel_count(), 3);
        assert_eq!(s.mix(0).unwrap().channel_count(), 3);
    }

    #[test]
    fn ensure_level_never_shrinks() {
        let mut blocks = Pool::new(4, None);
        let mut s = ScratchBuses::new();
        s.ensure_level(1, 4, &mut blocks);
        s.ensure_level(1, 1, &mut blocks);
        assert_eq!(s.ping_pong(1).unwrap().0.channel_count(), 4);
    }

    #[test]
    fn ensure_level_reuses_indices_once_grown() {
        let mut blocks = Pool::new(4, None);
        let mut s = ScratchBuses::new();
        s.ensure_level(0, 2, &mut blocks);
        let first = s.ping_pong(0).unwrap().0.channels.clone();
        s.ensure_level(0, 2, &mut blocks);
        let second = s.ping_pong(0).unwrap().0.channels.clone();
        assert_eq!(first, second);
        assert_eq!(blocks.in_use(), 6, "mix + a + b, two channels each");
    }

    #[test]
    fn clamp_channels_caps_at_hard_limit() {
        assert_eq!(clamp_channels(A2_MAXCHANNELS + 4), A2_MAXCHANNELS);
        assert_eq!(clamp_channels(2), 2);
    }

    #[test]
    fn block_clear_zeroes_all_samples() {
        let mut b = Block { samples: [1.0; A2_MAXFRAG] };
        b.clear();
        assert!(b.samples.iter().all(|&s| s == 0.0));
    }
}
