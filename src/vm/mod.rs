//! Bytecode interpreter: 32-bit instruction words, 32 per-voice
//! registers, call stack, message-handler interrupts, register-write
//! tracking and the timing instructions that hand control back to DSP.

pub mod opcode;
pub mod program;

use std::collections::BTreeSet;

use crate::error::A2Error;
use crate::handle::Handle;
use crate::types::{Reg, Timestamp, A2_INSLIMIT, A2_MAXARGS, A2_REGISTERS, REG_ONE, R_TICK, R_TRANSPOSE};
use opcode::{Instruction, Opcode, OperandForm};
use program::{Program, StructureItem};

/// Voice run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Running,
    Waiting,
    Interrupt,
    Ending,
    Finalizing,
}

struct StackFrame {
    return_fn: usize,
    return_pc: usize,
    saved_registers: Vec<(usize, Reg)>,
    is_interrupt: bool,
    saved_wake_time: Timestamp,
}

/// What the VM produced in one `run` call that the voice/engine must act on.
/// Emitted in order; the voice applies them and, for `WakeAt`/`Ended`, stops
/// calling `run` until the next fragment or event.
#[derive(Debug, Clone)]
pub enum VmEvent {
    /// A control register should be committed to its wired unit.
    CommitRegister { register: usize, value: f32, start: Timestamp, duration: Timestamp },
    Spawn { program: Handle, entry: u8, args: Vec<i32>, detached: bool, vid: Option<u32> },
    Send { vid: Option<u32>, entry: u8, args: Vec<i32>, all: bool },
    Kill { vid: Option<u32>, all: bool },
    Detach { vid: Option<u32>, all: bool },
    Debug { value: Reg },
    InitV,
    Error(A2Error),
}

/// The interpreter's full mutable state for one voice.
pub struct Vm {
    pub registers: [Reg; A2_REGISTERS],
    pub current_fn: usize,
    pub pc: usize,
    pub wake_time: Timestamp,
    pub state: VoiceState,
    call_stack: Vec<StackFrame>,
    arg_stack: Vec<i32>,
    dirty: BTreeSet<usize>,
    instruction_budget: u32,
    initialized: bool,
    sample_rate: f64,
}

impl Vm {
    pub fn new(entry_fn: usize, args: &[i32], sample_rate: f64) -> Self {
        let mut registers = [Reg::default(); A2_REGISTERS];
        registers[R_TICK] = Reg::from_f32(1.0);
        registers[R_TRANSPOSE] = Reg::default();
        for (i, &a) in args.iter().take(A2_MAXARGS).enumerate() {
            registers[crate::types::A2_FIRSTCONTROLREG + i] = Reg(a);
        }
        Self {
            registers,
            current_fn: entry_fn,
            pc: 0,
            wake_time: Timestamp::ZERO,
            state: VoiceState::Running,
            call_stack: Vec::new(),
            arg_stack: Vec::new(),
            dirty: BTreeSet::new(),
            instruction_budget: A2_INSLIMIT,
            initialized: false,
            sample_rate,
        }
    }

    /// Runs instructions from the current function until a timing
    /// instruction moves `wake_time` forward, the program ends, or the
    /// instruction budget (`A2_INSLIMIT`) is exhausted (§4.4 "Instruction
    /// budget"). `now` is the caller's current sample-accurate position
    /// (the fragment start plus however many frames have already been
    /// rendered this fragment), used both to compute sub-sample
    /// `start`/`duration` for committed register writes and to gate
    /// execution: a voice asleep on a `DELAY`/`TDELAY` does not run any
    /// instructions until `now` reaches its `wake_time`, no matter how the
    /// caller has chunked the fragment.
    pub fn run(&mut self, program: &Program, now: Timestamp) -> Vec<VmEvent> {
        let mut events = Vec::new();
        if self.state != VoiceState::Running && self.state != VoiceState::Interrupt {
            return events;
        }
        if self.wake_time > now {
            return events;
        }
        loop {
            if self.instruction_budget == 0 {
                self.state = VoiceState::Ending;
                events.push(VmEvent::Error(A2Error::Overload));
                return events;
            }
            self.instruction_budget -= 1;

            let func = match program.functions.get(self.current_fn) {
                Some(f) => f,
                None => {
                    self.state = VoiceState::Ending;
                    events.push(VmEvent::Error(A2Error::BadEntry));
                    return events;
                }
            };
            if self.pc >= func.instructions.len() {
                if !self.end_or_return(&mut events) {
                    return events;
                }
                continue;
            }

            let word = func.instructions[self.pc];
            let ins = Instruction::decode(word);
            let immediate = if ins.opcode.operand_form() == OperandForm::Immediate {
                self.pc += 1;
                program.functions[self.current_fn]
                    .instructions
                    .get(self.pc)
                    .copied()
                    .unwrap_or(0) as i32
            } else {
                0
            };
            self.pc += 1;

            match self.execute(ins, immediate, program, now, &mut events) {
                ControlFlow::Continue => {}
                ControlFlow::Stop => return events,
            }
        }
    }

    /// Resolves a `SIZEOF`/`SIZEOFR` selector against objects reachable from
    /// the running program: `0` is the unit count of this voice's own
    /// structure, `1` is the program's function count, `2` is the current
    /// function's declared argument count. Bank, wave and string element
    /// counts are out of reach here -- `run` only ever sees this voice's own
    /// `Program`, never the owning state's handle tables -- so an unknown
    /// selector resolves to 0 rather than echoing it back unexamined.
    fn sizeof_object(&self, selector: i32, program: &Program) -> i32 {
        match selector {
            0 => program
                .structure
                .iter()
                .filter(|item| matches!(item, StructureItem::Unit { .. }))
                .count() as i32,
            1 => program.functions.len() as i32,
            2 => program
                .functions
                .get(self.current_fn)
                .map(|f| f.arg_count as i32)
                .unwrap_or(0),
            _ => 0,
        }
    }

    fn end_or_return(&mut self, events: &mut Vec<VmEvent>) -> bool {
        if let Some(frame) = self.call_stack.pop() {
            for (reg, val) in frame.saved_registers {
                self.registers[reg] = val;
            }
            self.current_fn = frame.return_fn;
            self.pc = frame.return_pc;
            if frame.is_interrupt {
                self.wake_time = frame.saved_wake_time;
                self.state = VoiceState::Running;
            }
            true
        } else {
            self.state = VoiceState::Ending;
            let _ = events;
            false
        }
    }

    fn execute(
        &mut self,
        ins: Instruction,
        imm: i32,
        program: &Program,
        now: Timestamp,
        events: &mut Vec<VmEvent>,
    ) -> ControlFlow {
        use Opcode::*;
        let a1 = ins.a1 as usize % A2_REGISTERS;
        let a2r = ins.a2 as usize % A2_REGISTERS;

        match ins.opcode {
            End => {
                self.state = VoiceState::Ending;
                return ControlFlow::Stop;
            }
            Return => {
                if !self.end_or_return(events) {
                    return ControlFlow::Stop;
                }
            }
            Call => {
                self.push_frame(0, false);
                self.jump_to_function(imm as usize);
            }
            Jump => self.pc = imm as usize,
            Loop => {
                self.registers[a1].0 -= 1;
                if self.registers[a1].0 > 0 {
                    self.pc = imm as usize;
                }
            }
            Jz => self.cond_jump(self.registers[a1].0 == 0, imm),
            Jnz => self.cond_jump(self.registers[a1].0 != 0, imm),
            Jg => self.cond_jump(self.registers[a1].0 > 0, imm),
            Jl => self.cond_jump(self.registers[a1].0 < 0, imm),
            Jge => self.cond_jump(self.registers[a1].0 >= 0, imm),
            Jle => self.cond_jump(self.registers[a1].0 <= 0, imm),

            Delay => {
                self.advance_time(imm as f32 / REG_ONE as f32, now, events);
                return ControlFlow::Stop;
            }
            DelayR => {
                self.advance_time(self.registers[a1].to_f32(), now, events);
                return ControlFlow::Stop;
            }
            TDelay => {
                self.advance_ticks(imm as f32 / REG_ONE as f32, now, events);
                return ControlFlow::Stop;
            }
            TDelayR => {
                self.advance_ticks(self.registers[a1].to_f32(), now, events);
                return ControlFlow::Stop;
            }

            Sleep => {
                self.state = VoiceState::Waiting;
                return ControlFlow::Stop;
            }
            Wake => self.state = VoiceState::Running,
            Force => self.instruction_budget = A2_INSLIMIT,

            Load => self.set_reg(a1, Reg(imm)),
            LoadR => self.set_reg(a1, self.registers[a2r]),
            Add => self.set_reg(a1, Reg(self.registers[a1].0.wrapping_add(imm))),
            AddR => self.set_reg(a1, Reg(self.registers[a1].0.wrapping_add(self.registers[a2r].0))),
            SubR => self.set_reg(a1, Reg(self.registers[a1].0.wrapping_sub(self.registers[a2r].0))),
            Mul => self.set_reg(a1, self.mul_reg(self.registers[a1], Reg(imm))),
            MulR => self.set_reg(a1, self.mul_reg(self.registers[a1], self.registers[a2r])),
            Mod => {
                if imm == 0 {
                    events.push(VmEvent::Error(A2Error::DivByZero));
                    self.state = VoiceState::Ending;
                    return ControlFlow::Stop;
                }
                self.set_reg(a1, Reg(self.registers[a1].0 % imm));
            }
            ModR => {
                if self.registers[a2r].0 == 0 {
                    events.push(VmEvent::Error(A2Error::DivByZero));
                    self.state = VoiceState::Ending;
                    return ControlFlow::Stop;
                }
                self.set_reg(a1, Reg(self.registers[a1].0 % self.registers[a2r].0));
            }
            Quant => self.set_reg(a1, self.quantize(self.registers[a1], imm.max(1))),
            QuantR => self.set_reg(a1, self.quantize(self.registers[a1], self.registers[a2r].0.max(1))),
            Rand => self.set_reg(a1, Reg(self.pseudo_rand(imm.max(1)))),
            RandR => self.set_reg(a1, Reg(self.pseudo_rand(self.registers[a2r].0.max(1)))),
            P2dR => self.set_reg(a1, Reg::from_f32(crate::vm::pitch_to_period_ratio(self.registers[a2r].to_f32()))),
            NegR => self.set_reg(a1, Reg(-self.registers[a2r].0)),

            Gr => self.set_reg(a1, Reg::bool(self.registers[a1].0 > self.registers[a2r].0)),
            Lr => self.set_reg(a1, Reg::bool(self.registers[a1].0 < self.registers[a2r].0)),
            Ger => self.set_reg(a1, Reg::bool(self.registers[a1].0 >= self.registers[a2r].0)),
            Ler => self.set_reg(a1, Reg::bool(self.registers[a1].0 <= self.registers[a2r].0)),
            Eqr => self.set_reg(a1, Reg::bool(self.registers[a1].0 == self.registers[a2r].0)),
            Ner => self.set_reg(a1, Reg::bool(self.registers[a1].0 != self.registers[a2r].0)),

            AndR => self.set_reg(a1, Reg::bool(self.registers[a1].truthy() && self.registers[a2r].truthy())),
            OrR => self.set_reg(a1, Reg::bool(self.registers[a1].truthy() || self.registers[a2r].truthy())),
            XorR => self.set_reg(a1, Reg::bool(self.registers[a1].truthy() != self.registers[a2r].truthy())),
            NotR => self.set_reg(a1, Reg::bool(!self.registers[a1].truthy())),

            Set => self.commit_one(a1, now, Timestamp::ZERO, events),
            SetAll => self.commit_all(now, Timestamp::ZERO, events),
            Ramp => {
                let d = Timestamp::from_ms(imm as f64, self.sample_rate);
                self.commit_one(a1, now, d, events)
            }
            RampR => {
                let d = Timestamp::from_ms(self.registers[a2r].to_f32() as f64, self.sample_rate);
                self.commit_one(a1, now, d, events)
            }
            RampAll => {
                let d = Timestamp::from_ms(imm as f64, self.sample_rate);
                self.commit_all(now, d, events)
            }
            RampAllR => {
                let d = Timestamp::from_ms(self.registers[a1].to_f32() as f64, self.sample_rate);
                self.commit_all(now, d, events)
            }

            Push => self.arg_stack.push(imm),
            PushR => self.arg_stack.push(self.registers[a1].0),

            Spawn | SpawnR | SpawnD | SpawnDR | SpawnV | SpawnVR | SpawnA | SpawnAR => {
                let detached = matches!(ins.opcode, SpawnD | SpawnDR | SpawnA | SpawnAR);
                let vid = if matches!(ins.opcode, SpawnV | SpawnVR) { Some(a1 as u32) } else { None };
                let entry = if matches!(ins.opcode, SpawnR | SpawnDR | SpawnVR | SpawnAR) {
                    self.registers[a1].0 as u8
                } else {
                    imm as u8
                };
                let args = std::mem::take(&mut self.arg_stack);
                let program_handle = Handle(self.registers[a2r].0 as u32);
                events.push(VmEvent::Spawn { program: program_handle, entry, args, detached, vid });
            }
            Send => {
                let args = std::mem::take(&mut self.arg_stack);
                events.push(VmEvent::Send { vid: None, entry: imm as u8, args, all: false });
            }
            SendR => {
                let args = std::mem::take(&mut self.arg_stack);
                events.push(VmEvent::Send { vid: Some(a1 as u32), entry: self.registers[a2r].0 as u8, args, all: false });
            }
            SendA => {
                let args = std::mem::take(&mut self.arg_stack);
                events.push(VmEvent::Send { vid: None, entry: a1 as u8, args, all: true });
            }
            SendS => {
                let args = std::mem::take(&mut self.arg_stack);
                events.push(VmEvent::Send { vid: None, entry: a1 as u8, args, all: false });
            }
            Wait => {
                self.state = VoiceState::Waiting;
                return ControlFlow::Stop;
            }
            Kill => events.push(VmEvent::Kill { vid: None, all: false }),
            KillR => events.push(VmEvent::Kill { vid: Some(self.registers[a1].0 as u32), all: false }),
            KillA => events.push(VmEvent::Kill { vid: None, all: true }),
            Detach => events.push(VmEvent::Detach { vid: None, all: false }),
            DetachR => events.push(VmEvent::Detach { vid: Some(self.registers[a1].0 as u32), all: false }),
            DetachA => events.push(VmEvent::Detach { vid: None, all: true }),

            Debug => events.push(VmEvent::Debug { value: Reg(imm) }),
            DebugR => events.push(VmEvent::Debug { value: self.registers[a1] }),

            InitV => {
                if !self.initialized {
                    self.initialized = true;
                    events.push(VmEvent::InitV);
                }
            }
            SizeOf => {
                let n = self.sizeof_object(imm, program);
                self.set_reg(a1, Reg::from_int(n));
            }
            SizeOfR => {
                let selector = self.registers[a2r].0;
                let n = self.sizeof_object(selector, program);
                self.set_reg(a1, Reg::from_int(n));
            }

            Illegal => {
                events.push(VmEvent::Error(A2Error::IllegalOp));
                self.state = VoiceState::Ending;
                return ControlFlow::Stop;
            }
        }
        ControlFlow::Continue
    }

    fn push_frame(&mut self, _placeholder: u8, is_interrupt: bool) {
        let func = self.current_fn;
        let saved = (0..A2_REGISTERS).map(|r| (r, self.registers[r])).collect();
        self.call_stack.push(StackFrame {
            return_fn: func,
            return_pc: self.pc,
            saved_registers: saved,
            is_interrupt,
            saved_wake_time: self.wake_time,
        });
        if self.call_stack.len() > crate::types::A2_MAXNESTING {
            self.state = VoiceState::Ending;
        }
    }

    /// Delivers a `SEND` targeting this voice's own message handler as an
    /// interrupt: save state, install the handler frame, run until
    /// `RETURN` restores it. Message
    /// handlers may not advance time; callers must not invoke timing
    /// opcodes from within one (enforced by the compiler, not checked here).
    pub fn enter_interrupt(&mut self, function_index: usize, args: &[i32]) {
        self.push_frame(0, true);
        self.jump_to_function(function_index);
        for (i, &a) in args.iter().take(A2_MAXARGS).enumerate() {
            self.registers[crate::types::A2_FIRSTCONTROLREG + i] = Reg(a);
        }
        self.state = VoiceState::Interrupt;
    }

    fn jump_to_function(&mut self, index: usize) {
        self.current_fn = index;
        self.pc = 0;
    }

    fn cond_jump(&mut self, cond: bool, target: i32) {
        if cond {
            self.pc = target as usize;
        }
    }

    fn set_reg(&mut self, index: usize, value: Reg) {
        self.registers[index] = value;
        if index >= crate::types::A2_FIRSTCONTROLREG {
            self.dirty.insert(index);
        }
    }

    fn mul_reg(&self, a: Reg, b: Reg) -> Reg {
        let v = (a.0 as i64 * b.0 as i64) >> crate::types::REG_FRAC_BITS;
        Reg(v as i32)
    }

    fn quantize(&self, value: Reg, step: i32) -> Reg {
        Reg((value.0 / step) * step)
    }

    fn pseudo_rand(&mut self, max: i32) -> i32 {
        let x = self.registers[R_TICK].0 as u32 ^ (self.pc as u32).wrapping_mul(2654435761);
        let x = x ^ (x << 13);
        let x = x ^ (x >> 17);
        let x = x ^ (x << 5);
        (x as i32).rem_euclid(max.max(1))
    }

    fn advance_time(&mut self, ms: f32, now: Timestamp, events: &mut Vec<VmEvent>) {
        self.commit_all(now, Timestamp::ZERO, events);
        let delta = Timestamp::from_ms(ms as f64, self.sample_rate);
        self.wake_time = self.wake_time.saturating_add(delta);
        self.instruction_budget = A2_INSLIMIT;
        self.state = VoiceState::Running;
    }

    fn advance_ticks(&mut self, ticks: f32, now: Timestamp, events: &mut Vec<VmEvent>) {
        let tick_ms = self.registers[R_TICK].to_f32();
        self.advance_time(ticks * tick_ms, now, events);
    }

    fn commit_one(&mut self, reg: usize, now: Timestamp, duration: Timestamp, events: &mut Vec<VmEvent>) {
        self.dirty.remove(&reg);
        let start = self.sub_sample_start(now);
        events.push(VmEvent::CommitRegister {
            register: reg,
            value: self.registers[reg].to_f32(),
            start,
            duration,
        });
    }

    fn commit_all(&mut self, now: Timestamp, duration: Timestamp, events: &mut Vec<VmEvent>) {
        let regs: Vec<usize> = self.dirty.iter().copied().collect();
        for reg in regs {
            self.commit_one(reg, now, duration, events);
        }
    }

    fn sub_sample_start(&self, now: Timestamp) -> Timestamp {
        self.wake_time.saturating_sub(now)
    }
}

enum ControlFlow {
    Continue,
    Stop,
}

/// `2^(semitones/12)` by way of the register's 16.16 pitch-offset convention.
fn pitch_to_period_ratio(pitch_offset: f32) -> f32 {
    2f32.powf(-pitch_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::program::Function;

    fn prog_with(instructions: Vec<u32>) -> Program {
        let mut p = Program::new("t");
        p.add_function(Function::new(instructions));
        p
    }

    fn ins(op: Opcode, a1: u8, a2: u16) -> u32 {
        Instruction { opcode: op, a1, a2 }.encode()
    }

    #[test]
    fn end_terminates_without_events() {
        let p = prog_with(vec![ins(Opcode::End, 0, 0)]);
        let mut vm = Vm::new(0, &[], 48000.0);
        let events = vm.run(&p, Timestamp::ZERO);
        assert!(events.is_empty());
        assert_eq!(vm.state, VoiceState::Ending);
    }

    #[test]
    fn overload_kills_voice_after_inslimit_instructions() {
        let p = prog_with(vec![ins(Opcode::Jump, 0, 0), 0]);
        let mut vm = Vm::new(0, &[], 48000.0);
        let events = vm.run(&p, Timestamp::ZERO);
        assert!(matches!(events.last(), Some(VmEvent::Error(A2Error::Overload))));
    }

    #[test]
    fn delay_advances_wake_time_and_stops_execution() {
        let p = prog_with(vec![ins(Opcode::Delay, 0, 0), 1000 * crate::types::REG_ONE as u32, ins(Opcode::End, 0, 0)]);
        let mut vm = Vm::new(0, &[], 48000.0);
        let before = vm.wake_time;
        let _ = vm.run(&p, Timestamp::ZERO);
        assert!(vm.wake_time > before);
    }

    #[test]
    fn set_commits_register_write_immediately() {
        let mut p = Program::new("t");
        p.add_function(Function::new(vec![
            ins(Opcode::Load, 5, 0),
            crate::types::REG_ONE as u32,
            ins(Opcode::Set, 5, 0),
            ins(Opcode::End, 0, 0),
        ]));
        let mut vm = Vm::new(0, &[], 48000.0);
        let events = vm.run(&p, Timestamp::ZERO);
        assert!(events.iter().any(|e| matches!(e, VmEvent::CommitRegister { register: 5, .. })));
    }

    #[test]
    fn illegal_opcode_kills_voice() {
        let p = prog_with(vec![0xff]);
        let mut vm = Vm::new(0, &[], 48000.0);
        let events = vm.run(&p, Timestamp::ZERO);
        assert!(matches!(events.last(), Some(VmEvent::Error(A2Error::IllegalOp))));
    }

    #[test]
    fn call_then_return_resumes_caller_pc() {
        let mut p = Program::new("t");
        let callee = p.add_function(Function::new(vec![ins(Opcode::Return, 0, 0)]));
        p.add_function(Function::new(vec![
            ins(Opcode::Call, 0, 0),
            callee as u32,
            ins(Opcode::End, 0, 0),
        ]));
        let mut vm = Vm::new(1, &[], 48000.0);
        let events = vm.run(&p, Timestamp::ZERO);
        assert!(events.is_empty());
        assert_eq!(vm.state, VoiceState::Ending);
    }
}
