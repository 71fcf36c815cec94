//! Default root-driver program: wires a `panmix` into an `xinsert`
//! terminator ahead of the driver's output buffers. [`group_program`] builds the variant substates and
//! sub-groups use, identical in shape but parameterized by channel count.

use crate::unit::ChannelSpec;
use crate::vm::opcode::{Instruction, Opcode};
use crate::vm::program::{Function, Program};

/// Builds the default root voice program: an oscillator-free chain of
/// `panmix → xinsert`, both autowired to the voice's own output channel
/// count. `main()` is a single `INITV`-then-`DELAY`/`JUMP` loop so the
/// root voice's unit chain runs for as long as the engine context is open.
pub fn default_root_program(pan: f32, gain: f32) -> Program {
    let mut program = Program::new("root");
    program.add_unit_with_constants(
        "panmix",
        ChannelSpec::Default,
        ChannelSpec::Default,
        vec![("pan", pan), ("gain", gain)],
    );
    program.add_unit("xinsert", ChannelSpec::MatchOutput, ChannelSpec::WireToVoiceOutput);

    let mut main = Function::new(root_main_loop());
    main.highest_register = crate::types::A2_FIRSTCONTROLREG;
    program.add_function(main);
    program.set_entry_point(0, 0);
    program
}

/// `INITV` once, then a `DELAY`/`JUMP` loop back to the delay -- each `DELAY`
/// hands control back to the caller for the current fragment and the VM picks the loop back up, still `Running`, on the
/// next fragment. `SLEEP` would park the voice in `Waiting` for good: nothing
/// in this program ever sends a `WAKE`, so the root voice's unit chain would
/// stop processing after the very first fragment.
fn root_main_loop() -> Vec<u32> {
    const DELAY_MS: u32 = 1000 * crate::types::REG_ONE as u32;
    vec![
        Instruction { opcode: Opcode::InitV, a1: 0, a2: 0 }.encode(), // pc 0
        Instruction { opcode: Opcode::Delay, a1: 0, a2: 0 }.encode(), // pc 1
        DELAY_MS,                                                    // pc 2 (Delay's immediate)
        Instruction { opcode: Opcode::Jump, a1: 0, a2: 0 }.encode(), // pc 3
        1,                                                            // pc 4 (Jump's immediate: back to pc 1)
    ]
}

/// Group-driver variant: same shape as the root program, but without the
/// `xinsert` terminator's tap semantics since a sub-group's output feeds
/// back into its parent's scratch bus rather than a physical device.
pub fn group_program(pan: f32, gain: f32) -> Program {
    let mut program = Program::new("group");
    program.add_unit_with_constants(
        "panmix",
        ChannelSpec::WireToVoiceOutput,
        ChannelSpec::WireToVoiceOutput,
        vec![("pan", pan), ("gain", gain)],
    );

    let mut main = Function::new(root_main_loop());
    main.highest_register = crate::types::A2_FIRSTCONTROLREG;
    program.add_function(main);
    program.set_entry_point(0, 0);
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_program_wires_panmix_then_xinsert() {
        let p = default_root_program(0.0, 1.0);
        assert!(p.has_units());
        assert_eq!(p.structure.len(), 2);
    }

    #[test]
    fn group_program_terminates_directly_at_voice_output() {
        let p = group_program(0.0, 1.0);
        assert_eq!(p.structure.len(), 1);
    }

    /// The root main loop must keep the VM `Running` fragment after
    /// fragment -- a `SLEEP`-based loop would park it in `Waiting` after the
    /// first call and never resume, since nothing here ever sends `WAKE`.
    #[test]
    fn root_main_loop_stays_running_across_fragments() {
        use crate::types::Timestamp;
        use crate::vm::{Vm, VoiceState};

        let p = default_root_program(0.0, 1.0);
        let mut vm = Vm::new(0, &[], 48000.0);
        for _ in 0..5 {
            vm.run(&p, Timestamp::ZERO);
            assert_eq!(vm.state, VoiceState::Running);
        }
    }
}
