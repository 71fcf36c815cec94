//! Client-pumped buffer driver: `Run(frames)` processes one chunk and leaves
//! the result in an owned, non-interleaved buffer, for off-line rendering
//! and substate composition. Used by [`crate::render`] and by group
//! substates that don't own a physical device.

use crate::state::Engine;
use crate::types::A2_MAXFRAG;

/// Drives an [`Engine`] in caller-controlled chunks, collecting non-
/// interleaved output into `channels` growable buffers.
pub struct BufferDriver {
    channel_count: usize,
    pub channels: Vec<Vec<f32>>,
}

impl BufferDriver {
    pub fn new(channel_count: usize) -> Self {
        Self { channel_count, channels: vec![Vec::new(); channel_count] }
    }

    /// Processes `frames` samples through `engine` and appends the result
    /// to `self.channels`, one `A2_MAXFRAG`-sized chunk at a time so every
    /// fragment's output gets read back before the engine's pool-backed
    /// output blocks are overwritten by the next one.
    pub fn run(&mut self, engine: &mut Engine, frames: usize) {
        let mut scratch = [0.0f32; A2_MAXFRAG];
        let mut remaining = frames;
        while remaining > 0 {
            let step = remaining.min(A2_MAXFRAG);
            engine.process(step);
            for ch in 0..self.channel_count {
                engine.read_channel(ch, &mut scratch[..step]);
                self.channels[ch].extend_from_slice(&scratch[..step]);
            }
            remaining -= step;
        }
    }

    pub fn clear(&mut self) {
        for ch in &mut self.channels {
            ch.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateConfig;
    use crate::vm::opcode::{Instruction, Opcode};
    use crate::vm::program::{Function, Program};

    fn silent_root() -> Program {
        let mut p = Program::new("root");
        p.add_function(Function::new(vec![
            Instruction { opcode: Opcode::End, a1: 0, a2: 0 }.encode(),
        ]));
        p
    }

    #[test]
    fn run_collects_requested_frame_count_per_channel() {
        let config = StateConfig::new().with_channels(2);
        let mut engine = Engine::open(config, silent_root()).unwrap();
        let mut driver = BufferDriver::new(2);
        driver.run(&mut engine, 200);
        assert_eq!(driver.channels[0].len(), 200);
        assert_eq!(driver.channels[1].len(), 200);
    }
}
