//! panmix: pans a mono (or sums a stereo) input across the output
//! channels at a controlled gain; the root driver's default terminator
//! ahead of the xinsert output tap.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

const REG_PAN: usize = 0;
const REG_GAIN: usize = 1;

struct Panmix;

impl UnitState for Panmix {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        let pan_ramp = controls.get_mut(REG_PAN).unwrap();
        let gain_ramp = controls.get_mut(REG_GAIN).unwrap();
        let stereo_in = inputs.len() > 1;
        let stereo_out = outputs.len() > 1;

        for i in 0..frames {
            let pan = pan_ramp.step().clamp(-1.0, 1.0);
            let gain = gain_ramp.step();
            let mono = if stereo_in {
                0.5 * (inputs[0][offset + i] + inputs[1][offset + i])
            } else {
                inputs[0][offset + i]
            };

            if stereo_out {
                let left = mono * gain * (0.5 * (1.0 - pan));
                let right = mono * gain * (0.5 * (1.0 + pan));
                write(&mut outputs[0], offset + i, left, additive);
                write(&mut outputs[1], offset + i, right, additive);
            } else {
                write(&mut outputs[0], offset + i, mono * gain, additive);
            }
        }
    }
}

fn write(buf: &mut [f32], i: usize, value: f32, additive: bool) {
    if additive {
        buf[i] += value;
    } else {
        buf[i] = value;
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(Panmix)
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "panmix",
    flags: UnitFlags::empty(),
    registers: &[
        ControlRegister { name: "pan", ramped: true },
        ControlRegister { name: "gain", ramped: true },
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
    fn centered_pan_splits_evenly_across_stereo_output() {
        let mut p = Panmix;
        let mut controls = ControlBank::new(&[0.0, 1.0]);
        controls.prepare(1);
        let input = [1.0f32];
        let mut left = [0.0f32];
        let mut right = [0.0f32];
        p.process(&mut controls, &[&input], &mut [&mut left, &mut right], 0, 1, false);
        assert!((left[0] - 0.5).abs() < 1e-6);
        assert!((right[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn hard_right_pan_silences_left_channel() {
        let mut p = Panmix;
        let mut controls = ControlBank::new(&[1.0, 1.0]);
        controls.prepare(1);
        let input = [1.0f32];
        let mut left = [0.0f32];
        let mut right = [0.0f32];
        p.process(&mut controls, &[&input], &mut [&mut left, &mut right], 0, 1, false);
        assert!(left[0].abs() < 1e-6);
        assert!(right[0] > 0.9);
    }

    #[test]
    fn stereo_input_collapses_to_mono_before_panning() {
        let mut p = Panmix;
        let mut controls = ControlBank::new(&[0.0, 1.0]);
        controls.prepare(1);
        let left_in = [1.0f32];
        let right_in = [(-1.0f32)];
        let mut out = [0.0f32];
        p.process(&mut controls, &[&left_in, &right_in], &mut [&mut out], 0, 1, false);
        assert!(out[0].abs() < 1e-6);
    }
}
