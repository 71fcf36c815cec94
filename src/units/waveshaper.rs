//! Tanh waveshaper: representative of the distortion/shaper unit family.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

const REG_DRIVE: usize = 0;

struct Waveshaper;

impl UnitState for Waveshaper {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        let drive_ramp = controls.get_mut(REG_DRIVE).unwrap();
        for i in 0..frames {
            let drive = drive_ramp.step().max(0.001);
            let shaped = (inputs[0][offset + i] * drive).tanh() / drive.tanh();
            for ch in outputs.iter_mut() {
                if additive {
                    ch[offset + i] += shaped;
                } else {
                    ch[offset + i] = shaped;
                }
            }
        }
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(Waveshaper)
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "waveshaper",
    flags: UnitFlags::MATCH_IO,
    registers: &[ControlRegister { name: "drive", ramped: true }],
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
    fn unit_drive_is_near_identity_at_small_signal() {
        let mut w = Waveshaper;
        let mut controls = ControlBank::new(&[1.0]);
        controls.prepare(1);
        let input = [0.01f32];
        let mut out = [0.0f32];
        w.process(&mut controls, &[&input], &mut [&mut out], 0, 1, false);
        assert!((out[0] - 0.01).abs() < 0.01);
    }

    #[test]
    fn high_drive_saturates_toward_one() {
        let mut w = Waveshaper;
        let mut controls = ControlBank::new(&[20.0]);
        controls.prepare(1);
        let input = [1.0f32];
        let mut out = [0.0f32];
        w.process(&mut controls, &[&input], &mut [&mut out], 0, 1, false);
        assert!(out[0] <= 1.0001);
    }
}
