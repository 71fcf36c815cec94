//! inline: a DSP unit whose `Process` recursively runs the voice's
//! subvoices, letting a structure splice a nested voice tree directly
//! into its own signal path at sample resolution.
//!
//! The actual recursion happens one level up, in
//! `voice::process_voice_recursive` and `voice::run_unit_chain`, which
//! special-case a voice carrying this descriptor (`VoiceFlags::HAS_INLINE`)
//! so they can reach the voice pool; `Inline::process` itself is a plain
//! passthrough for the buffers the caller has already filled with the
//! subvoice mix.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

struct Inline;

impl UnitState for Inline {
    fn process(
        &mut self,
        _controls: &mut ControlBank,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        for (out_ch, in_ch) in outputs.iter_mut().zip(inputs.iter()) {
            for i in 0..frames {
                if additive {
                    out_ch[offset + i] += in_ch[offset + i];
                } else {
                    out_ch[offset + i] = in_ch[offset + i];
                }
            }
        }
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(Inline)
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "inline",
    flags: UnitFlags::MATCH_IO,
    registers: &[ControlRegister { name: "bypass", ramped: false }],
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
    fn passthrough_copies_subvoice_mix_in_replacing_mode() {
        let mut u = Inline;
        let mut controls = ControlBank::new(&[0.0]);
        controls.prepare(4);
        let input = [1.0f32, 2.0, 3.0, 4.0];
        let mut out = [9.0f32; 4];
        u.process(&mut controls, &[&input], &mut [&mut out], 0, 4, false);
        assert_eq!(out, input);
    }

    #[test]
    fn additive_mode_sums_onto_existing_output() {
        let mut u = Inline;
        let mut controls = ControlBank::new(&[0.0]);
        controls.prepare(2);
        let input = [1.0f32, 1.0];
        let mut out = [2.0f32, 3.0];
        u.process(&mut controls, &[&input], &mut [&mut out], 0, 2, true);
        assert_eq!(out, [3.0, 4.0]);
    }
}
