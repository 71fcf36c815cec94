//! Chamberlin state-variable filter: the representative filter unit,
//! simultaneously producing low/band/high-pass outputs from one pass.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

const REG_CUTOFF: usize = 0;
const REG_RESONANCE: usize = 1;

struct StateVarFilter {
    low: f32,
    band: f32,
}

impl UnitState for StateVarFilter {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        let cutoff_ramp = controls.get_mut(REG_CUTOFF).unwrap();
        let mut cutoffs = Vec::with_capacity(frames);
        for _ in 0..frames {
            cutoffs.push(cutoff_ramp.step());
        }
        let resonance_ramp = controls.get_mut(REG_RESONANCE).unwrap();
        let mut resonances = Vec::with_capacity(frames);
        for _ in 0..frames {
            resonances.push(resonance_ramp.step());
        }

        for i in 0..frames {
            let f = (cutoffs[i] * std::f32::consts::PI).clamp(0.0, 1.2);
            let q = (1.0 - resonances[i].clamp(0.0, 0.999)).max(0.05);
            let input = inputs[0][offset + i];

            let high = input - self.low - q * self.band;
            self.band += f * high;
            self.low += f * self.band;

            let (low, band, high_out) = (self.low, self.band, high);
            if outputs.len() > 2 {
                write(outputs, 2, offset + i, high_out, additive);
            }
            if outputs.len() > 1 {
                write(outputs, 1, offset + i, band, additive);
            }
            write(outputs, 0, offset + i, low, additive);
        }
    }
}

fn write(outputs: &mut [&mut [f32]], ch: usize, i: usize, v: f32, additive: bool) {
    if additive {
        outputs[ch][i] += v;
    } else {
        outputs[ch][i] = v;
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(StateVarFilter { low: 0.0, band: 0.0 })
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "svfilter",
    flags: UnitFlags::empty(),
    registers: &[
        ControlRegister { name: "cutoff", ramped: true },
        ControlRegister { name: "resonance", ramped: true },
    ],
    control_outputs: &[
        ControlOutput { name: "lowpass" },
        ControlOutput { name: "bandpass" },
        ControlOutput { name: "highpass" },
    ],
    min_inputs: 1,
    max_inputs: 1,
    min_outputs: 1,
    max_outputs: 3,
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_input_settles_toward_low_output() {
        let mut f = StateVarFilter { low: 0.0, band: 0.0 };
        let mut controls = ControlBank::new(&[0.3, 0.0]);
        controls.prepare(64);
        let input = [1.0f32; 64];
        let mut out = [0.0f32; 64];
        f.process(&mut controls, &[&input], &mut [&mut out], 0, 64, false);
        assert!(out[63] > out[0]);
    }

    #[test]
    fn zero_cutoff_keeps_filter_silent() {
        let mut f = StateVarFilter { low: 0.0, band: 0.0 };
        let mut controls = ControlBank::new(&[0.0, 0.0]);
        controls.prepare(16);
        let input = [1.0f32; 16];
        let mut out = [0.0f32; 16];
        f.process(&mut controls, &[&input], &mut [&mut out], 0, 16, false);
        assert!(out.iter().all(|&s| s.abs() < 1e-6));
    }
}
