//! ADSR envelope generator: representative of the envelope/modulation unit
//! family. A no-input unit whose sole output is its
//! current level -- typically wired into another unit's amplitude control.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

const REG_ATTACK: usize = 0;
const REG_DECAY: usize = 1;
const REG_SUSTAIN: usize = 2;
const REG_RELEASE: usize = 3;
const REG_GATE: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

struct Envelope {
    stage: Stage,
    level: f32,
    gate_was_open: bool,
}

impl UnitState for Envelope {
    fn process(
        &mut self,
        controls: &mut ControlBank,
        _inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        let attack = controls.get_mut(REG_ATTACK).unwrap().step().max(0.0001);
        let decay = controls.get_mut(REG_DECAY).unwrap().step().max(0.0001);
        let sustain = controls.get_mut(REG_SUSTAIN).unwrap().step().clamp(0.0, 1.0);
        let release = controls.get_mut(REG_RELEASE).unwrap().step().max(0.0001);
        let gate = controls.get_mut(REG_GATE).unwrap().step() > 0.5;

        if gate && !self.gate_was_open {
            self.stage = Stage::Attack;
        } else if !gate && self.gate_was_open {
            self.stage = Stage::Release;
        }
        self.gate_was_open = gate;

        for i in 0..frames {
            match self.stage {
                Stage::Idle => self.level = 0.0,
                Stage::Attack => {
                    self.level += 1.0 / (attack * 48_000.0);
                    if self.level >= 1.0 {
                        self.level = 1.0;
                        self.stage = Stage::Decay;
                    }
                }
                Stage::Decay => {
                    self.level -= (1.0 - sustain) / (decay * 48_000.0);
                    if self.level <= sustain {
                        self.level = sustain;
                        self.stage = Stage::Sustain;
                    }
                }
                Stage::Sustain => self.level = sustain,
                Stage::Release => {
                    self.level -= self.level.max(0.001) / (release * 48_000.0);
                    if self.level <= 0.0 {
                        self.level = 0.0;
                        self.stage = Stage::Idle;
                    }
                }
            }
            for ch in outputs.iter_mut() {
                if additive {
                    ch[offset + i] += self.level;
                } else {
                    ch[offset + i] = self.level;
                }
            }
        }
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(Envelope { stage: Stage::Idle, level: 0.0, gate_was_open: false })
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "envelope",
    flags: UnitFlags::empty(),
    registers: &[
        ControlRegister { name: "attack", ramped: false },
        ControlRegister { name: "decay", ramped: false },
        ControlRegister { name: "sustain", ramped: false },
        ControlRegister { name: "release", ramped: false },
        ControlRegister { name: "gate", ramped: false },
    ],
    control_outputs: &[ControlOutput { name: "level" }],
    min_inputs: 0,
    max_inputs: 0,
    min_outputs: 1,
    max_outputs: 1,
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_open_ramps_level_up_from_zero() {
        let mut e = Envelope { stage: Stage::Idle, level: 0.0, gate_was_open: false };
        let mut controls = ControlBank::new(&[0.01, 0.01, 0.5, 0.01, 1.0]);
        controls.prepare(64);
        let mut out = [0.0f32; 64];
        e.process(&mut controls, &[], &mut [&mut out], 0, 64, false);
        assert!(out[63] > out[0]);
    }

    #[test]
    fn gate_closed_stays_idle_at_zero() {
        let mut e = Envelope { stage: Stage::Idle, level: 0.0, gate_was_open: false };
        let mut controls = ControlBank::new(&[0.01, 0.01, 0.5, 0.01, 0.0]);
        controls.prepare(16);
        let mut out = [1.0f32; 16];
        e.process(&mut controls, &[], &mut [&mut out], 0, 16, false);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
