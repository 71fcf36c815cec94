//! Delay line: representative of the delay/feedback unit family.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

const REG_TIME: usize = 0;
const REG_FEEDBACK: usize = 1;

const MAX_DELAY_SAMPLES: usize = 48_000 * 2;

struct Delay {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl Delay {
    fn new() -> Self {
        Self { buffer: vec![0.0; MAX_DELAY_SAMPLES], write_pos: 0 }
    }
}

impl UnitState for Delay {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        let time_ramp = controls.get_mut(REG_TIME).unwrap();
        let fb_ramp = controls.get_mut(REG_FEEDBACK).unwrap();
        let len = self.buffer.len();

        for i in 0..frames {
            let delay_seconds = time_ramp.step().clamp(0.0, 2.0);
            let feedback = fb_ramp.step().clamp(0.0, 0.98);
            let delay_samples = (delay_seconds * 48_000.0) as usize % len;
            let read_pos = (self.write_pos + len - delay_samples) % len;

            let delayed = self.buffer[read_pos];
            let input = inputs[0][offset + i];
            self.buffer[self.write_pos] = input + delayed * feedback;
            self.write_pos = (self.write_pos + 1) % len;

            let sample = input + delayed;
            for ch in outputs.iter_mut() {
                if additive {
                    ch[offset + i] += sample;
                } else {
                    ch[offset + i] = sample;
                }
            }
        }
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(Delay::new())
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "delay",
    flags: UnitFlags::MATCH_IO,
    registers: &[
        ControlRegister { name: "time", ramped: true },
        ControlRegister { name: "feedback", ramped: true },
    ],
    control_outputs: &[ControlOutput { name: "out" }],
    min_inputs: 1,
    max_inputs: 2,
    min_outputs: 1,
    max_outputs: 2,
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_reappears_after_delay_time() {
        let mut d = Delay::new();
        let mut controls = ControlBank::new(&[0.0, 0.0]);
        controls.prepare(4);
        let input = [1.0f32, 0.0, 0.0, 0.0];
        let mut out = [0.0f32; 4];
        d.process(&mut controls, &[&input], &mut [&mut out], 0, 4, false);
        assert_eq!(out[0], 1.0);
    }
}
