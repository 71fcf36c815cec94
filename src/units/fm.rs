//! 2-operator FM pair: representative of the FM/operator unit family
//!. Operator 2 modulates operator 1's phase, scaled by
//! `index`.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

const REG_CARRIER_RATIO: usize = 0;
const REG_MOD_RATIO: usize = 1;
const REG_INDEX: usize = 2;
const REG_PITCH: usize = 3;

struct Fm2 {
    carrier_phase: f64,
    mod_phase: f64,
}

impl UnitState for Fm2 {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        _inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        let carrier_ratio = controls.get_mut(REG_CARRIER_RATIO).unwrap().step();
        let mod_ratio = controls.get_mut(REG_MOD_RATIO).unwrap();
        let index = controls.get_mut(REG_INDEX).unwrap();
        let pitch = controls.get_mut(REG_PITCH).unwrap();

        for i in 0..frames {
            let base_freq = 2f64.powf(pitch.step() as f64) * 261.625_58 / 48_000.0;
            let mr = mod_ratio.step() as f64;
            let idx = index.step();

            self.mod_phase = (self.mod_phase + base_freq * mr) % 1.0;
            let modulator = (self.mod_phase * std::f64::consts::TAU).sin() as f32 * idx;

            self.carrier_phase = (self.carrier_phase + base_freq * carrier_ratio as f64) % 1.0;
            let sample = (self.carrier_phase as f32 * std::f32::consts::TAU + modulator).sin();

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
    Box::new(Fm2 { carrier_phase: 0.0, mod_phase: 0.0 })
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "fm2",
    flags: UnitFlags::empty(),
    registers: &[
        ControlRegister { name: "carrier_ratio", ramped: false },
        ControlRegister { name: "mod_ratio", ramped: false },
        ControlRegister { name: "index", ramped: true },
        ControlRegister { name: "pitch", ramped: true },
    ],
    control_outputs: &[ControlOutput { name: "out" }],
    min_inputs: 0,
    max_inputs: 0,
    min_outputs: 1,
    max_outputs: 2,
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_index_degenerates_to_plain_carrier() {
        let mut fm = Fm2 { carrier_phase: 0.0, mod_phase: 0.0 };
        let mut controls = ControlBank::new(&[1.0, 1.0, 0.0, 0.0]);
        controls.prepare(32);
        let mut out = [0.0f32; 32];
        fm.process(&mut controls, &[], &mut [&mut out], 0, 32, false);
        assert!(out.iter().any(|&s| s != 0.0));
    }
}
