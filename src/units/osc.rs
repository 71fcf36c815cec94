//! Wavetable oscillator: the representative unit exercising mipmap lookup
//! and phase-accumulation against the ramped `pitch`/`amplitude` control
//! registers.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};
use crate::wave::Wave;

const REG_PITCH: usize = 0;
const REG_AMPLITUDE: usize = 1;

struct Osc {
    wave: Wave,
    phase: f64,
}

impl Osc {
    fn new() -> Self {
        let cycle: Vec<f32> = (0..256)
            .map(|i| (i as f32 / 256.0 * std::f32::consts::TAU).sin())
            .collect();
        Self { wave: Wave::from_single_cycle(cycle, true), phase: 0.0 }
    }
}

impl UnitState for Osc {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        _inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        if self.wave.is_silent() {
            if !additive {
                for ch in outputs.iter_mut() {
                    ch[offset..offset + frames].fill(0.0);
                }
            }
            return;
        }
        let pitch_ramp = controls.get_mut(REG_PITCH).unwrap();
        let amp_ramp = controls.get_mut(REG_AMPLITUDE).unwrap();
        let level0 = &self.wave.levels[0];
        let period = level0.period.max(1) as f64;

        for i in 0..frames {
            let pitch_offset = pitch_ramp.step();
            let amplitude = amp_ramp.step();
            let freq_ratio = 2f64.powf(pitch_offset as f64);
            self.phase = (self.phase + freq_ratio) % period;
            let idx = self.phase.floor() as isize;
            let frac = (self.phase - self.phase.floor()) as f32;
            let a = level0.at(idx);
            let b = level0.at(idx + 1);
            let sample = (a + (b - a) * frac) * amplitude;
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
    Box::new(Osc::new())
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "osc",
    flags: UnitFlags::empty(),
    registers: &[
        ControlRegister { name: "pitch", ramped: true },
        ControlRegister { name: "amplitude", ramped: true },
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
    use crate::types::Timestamp;

    #[test]
    fn silent_wave_produces_zero_output() {
        let mut osc = Osc::new();
        osc.wave.unload();
        let mut controls = ControlBank::new(&[0.0, 1.0]);
        controls.prepare(4);
        let mut out = [1.0f32; 4];
        osc.process(&mut controls, &[], &mut [&mut out], 0, 4, false);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn amplitude_zero_silences_output() {
        let mut osc = Osc::new();
        let mut controls = ControlBank::new(&[0.0, 0.0]);
        controls.prepare(8);
        let mut out = [9.0f32; 8];
        osc.process(&mut controls, &[], &mut [&mut out], 0, 8, false);
        assert!(out.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn ramped_amplitude_write_moves_output_toward_target() {
        let mut osc = Osc::new();
        let mut controls = ControlBank::new(&[0.0, 0.0]);
        controls.write(REG_AMPLITUDE, 1.0, Timestamp::ZERO, Timestamp::from_frames(4));
        controls.prepare(4);
        let mut out = [0.0f32; 4];
        osc.process(&mut controls, &[], &mut [&mut out], 0, 4, false);
        assert!(out[3].abs() > out[0].abs());
    }
}
