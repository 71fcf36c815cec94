//! Minimal A2S-like source compiler.
//!
//! Full A2S language coverage (expressions, patches, named exports, nested
//! function definitions) is explicitly out of core scope; this is a small
//! two-section assembler text format, not a reimplementation of the
//! original language:
//!
//! ```text
//! ; comment
//! unit osc 0 1 freq=440.0
//! unit panmix 1 2
//! wire 0 0 -> r4
//!
//! main:
//!     initv
//!     load r2, 1000.0
//!     delay r2
//! loop:
//!     jump loop
//!     end
//! ```
//!
//! Programs built this way are equivalent to ones built directly through
//! the [`crate::vm::program::Program`] builder API -- the builder is the
//! primary surface the test suite exercises.

use std::collections::HashMap;

use crate::error::A2Error;
use crate::types::Reg;
use crate::unit::ChannelSpec;
use crate::vm::opcode::{Instruction, Opcode};
use crate::vm::program::{Function, Program};

/// Parses source text into a [`Program`] with a single entry-point function
/// named `main`.
pub fn compile(source: &str) -> Result<Program, A2Error> {
    let mut program = Program::new("compiled");
    let mut body: Vec<Line> = Vec::new();
    let mut in_code = false;

    for raw_line in source.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if line == "main:" {
            in_code = true;
            continue;
        }
        if in_code {
            body.push(parse_code_line(line)?);
        } else {
            parse_structure_line(line, &mut program)?;
        }
    }

    let instructions = assemble(&body)?;
    let mut main = Function::new(instructions);
    main.highest_register = crate::types::A2_FIRSTCONTROLREG;
    let idx = program.add_function(main);
    program.set_entry_point(0, idx);
    Ok(program)
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse_structure_line(line: &str, program: &mut Program) -> Result<(), A2Error> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.first().copied() {
        Some("unit") => {
            // Descriptor names are looked up by value, not identity, so
            // leaking one small string per structure line at load time
            // (never per-fragment) is an acceptable trade for not building
            // a string interner for this minimal compiler.
            let name: &'static str = Box::leak(tokens.get(1).ok_or(A2Error::ParseError)?.to_string().into_boxed_str());
            let inputs = parse_channel_spec(tokens.get(2).ok_or(A2Error::ParseError)?)?;
            let outputs = parse_channel_spec(tokens.get(3).ok_or(A2Error::ParseError)?)?;
            let mut constants = Vec::new();
            for tok in &tokens[4..] {
                let (k, v) = tok.split_once('=').ok_or(A2Error::ParseError)?;
                let k: &'static str = Box::leak(k.to_string().into_boxed_str());
                let v: f32 = v.parse().map_err(|_| A2Error::ParseError)?;
                constants.push((k, v));
            }
            program.add_unit_with_constants(name, inputs, outputs, constants);
            Ok(())
        }
        Some("wire") => {
            let unit_index: usize = tokens.get(1).ok_or(A2Error::ParseError)?.parse().map_err(|_| A2Error::ParseError)?;
            let output_index: usize = tokens.get(2).ok_or(A2Error::ParseError)?.parse().map_err(|_| A2Error::ParseError)?;
            if tokens.get(3) != Some(&"->") {
                return Err(A2Error::ParseError);
            }
            let reg = parse_register(tokens.get(4).ok_or(A2Error::ParseError)?)?;
            program.add_wire(unit_index, output_index, reg);
            Ok(())
        }
        _ => Err(A2Error::ParseError),
    }
}

fn parse_channel_spec(tok: &str) -> Result<ChannelSpec, A2Error> {
    match tok {
        "match" => Ok(ChannelSpec::MatchOutput),
        "default" => Ok(ChannelSpec::Default),
        "voiceout" => Ok(ChannelSpec::WireToVoiceOutput),
        n => n.parse::<u16>().map(ChannelSpec::Explicit).map_err(|_| A2Error::ParseError),
    }
}

fn parse_register(tok: &str) -> Result<usize, A2Error> {
    tok.strip_prefix('r').and_then(|n| n.parse().ok()).ok_or(A2Error::ParseError)
}

/// One parsed instruction, pending label resolution.
enum Line {
    Label(String),
    Instr { opcode: Opcode, a1: u8, a2: u16, immediate: Option<Operand> },
}

enum Operand {
    Literal(i32),
    Label(String),
}

fn parse_operand_value(tok: &str) -> i32 {
    if let Ok(f) = tok.parse::<f32>() {
        if tok.contains('.') {
            return Reg::from_f32(f).0;
        }
        return f as i32;
    }
    0
}

fn parse_code_line(line: &str) -> Result<Line, A2Error> {
    if let Some(label) = line.strip_suffix(':') {
        return Ok(Line::Label(label.trim().to_string()));
    }
    let mut tokens = line.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty());
    let mnemonic = tokens.next().ok_or(A2Error::ParseError)?.to_lowercase();
    let args: Vec<&str> = tokens.collect();

    let reg_arg = |i: usize| -> Result<u8, A2Error> { parse_register(args.get(i).ok_or(A2Error::ParseError)?).map(|r| r as u8) };

    let (opcode, a1, a2, immediate) = match mnemonic.as_str() {
        "end" => (Opcode::End, 0, 0, None),
        "return" => (Opcode::Return, 0, 0, None),
        "initv" => (Opcode::InitV, 0, 0, None),
        "sleep" => (Opcode::Sleep, 0, 0, None),
        "wake" => (Opcode::Wake, 0, 0, None),
        "wait" => (Opcode::Wait, 0, 0, None),
        "force" => (Opcode::Force, 0, 0, None),
        "jump" => (Opcode::Jump, 0, 0, Some(Operand::Label(args.first().ok_or(A2Error::ParseError)?.to_string()))),
        "jz" => (Opcode::Jz, reg_arg(0)?, 0, Some(Operand::Label(args.get(1).ok_or(A2Error::ParseError)?.to_string()))),
        "jnz" => (Opcode::Jnz, reg_arg(0)?, 0, Some(Operand::Label(args.get(1).ok_or(A2Error::ParseError)?.to_string()))),
        "loop" => (Opcode::Loop, reg_arg(0)?, 0, Some(Operand::Label(args.get(1).ok_or(A2Error::ParseError)?.to_string()))),
        "delay" => (Opcode::Delay, 0, 0, Some(Operand::Literal(parse_operand_value(args.first().ok_or(A2Error::ParseError)?)))),
        "delayr" => (Opcode::DelayR, reg_arg(0)?, 0, None),
        "load" => (Opcode::Load, reg_arg(0)?, 0, Some(Operand::Literal(parse_operand_value(args.get(1).ok_or(A2Error::ParseError)?)))),
        "loadr" => (Opcode::LoadR, reg_arg(0)?, reg_arg(1)? as u16, None),
        "add" => (Opcode::Add, reg_arg(0)?, 0, Some(Operand::Literal(parse_operand_value(args.get(1).ok_or(A2Error::ParseError)?)))),
        "addr" => (Opcode::AddR, reg_arg(0)?, reg_arg(1)? as u16, None),
        "set" => (Opcode::Set, reg_arg(0)?, 0, None),
        "setall" => (Opcode::SetAll, 0, 0, None),
        "ramp" => (Opcode::Ramp, reg_arg(0)?, 0, Some(Operand::Literal(parse_operand_value(args.get(1).ok_or(A2Error::ParseError)?)))),
        "push" => (Opcode::Push, 0, 0, Some(Operand::Literal(parse_operand_value(args.first().ok_or(A2Error::ParseError)?)))),
        "pushr" => (Opcode::PushR, reg_arg(0)?, 0, None),
        "spawn" => (
            Opcode::Spawn,
            0,
            reg_arg(1)? as u16,
            Some(Operand::Literal(parse_operand_value(args.first().ok_or(A2Error::ParseError)?))),
        ),
        "send" => (Opcode::Send, 0, 0, Some(Operand::Literal(parse_operand_value(args.first().ok_or(A2Error::ParseError)?)))),
        "sendr" => (Opcode::SendR, reg_arg(0)?, reg_arg(1)? as u16, None),
        "kill" => (Opcode::Kill, 0, 0, None),
        "killr" => (Opcode::KillR, reg_arg(0)?, 0, None),
        "debug" => (Opcode::Debug, 0, 0, Some(Operand::Literal(parse_operand_value(args.first().ok_or(A2Error::ParseError)?)))),
        _ => return Err(A2Error::ParseError),
    };
    Ok(Line::Instr { opcode, a1, a2, immediate })
}

/// Two-pass assembly: first records each label's word offset, then encodes
/// instructions with labels resolved to absolute word positions.
fn assemble(lines: &[Line]) -> Result<Vec<u32>, A2Error> {
    let mut labels = HashMap::new();
    let mut offset = 0usize;
    for line in lines {
        match line {
            Line::Label(name) => {
                labels.insert(name.clone(), offset);
            }
            Line::Instr { opcode, immediate, .. } => {
                offset += if opcode.operand_form() == crate::vm::opcode::OperandForm::Immediate || immediate.is_some() {
                    2
                } else {
                    1
                };
            }
        }
    }

    let mut words = Vec::with_capacity(offset);
    for line in lines {
        let Line::Instr { opcode, a1, a2, immediate } = line else { continue };
        words.push(Instruction { opcode: *opcode, a1: *a1, a2: *a2 }.encode());
        if let Some(operand) = immediate {
            let value = match operand {
                Operand::Literal(v) => *v,
                Operand::Label(name) => *labels.get(name).ok_or(A2Error::ParseError)? as i32,
            };
            words.push(value as u32);
        }
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_structure_and_wire_declarations() {
        let src = "unit osc 0 1 freq=440.0\nunit panmix 1 2\nwire 0 0 -> r4\n\nmain:\n    end\n";
        let p = compile(src).unwrap();
        assert!(p.has_units());
        assert_eq!(p.structure.len(), 3);
    }

    #[test]
    fn resolves_forward_and_backward_jump_labels() {
        let src = "main:\n    initv\nloop:\n    load r2, 1000.0\n    delay r2\n    jump loop\n";
        let p = compile(src).unwrap();
        let f = &p.functions[0];
        // initv (1) + load (2) + delay (2) + jump (2) = 7 words
        assert_eq!(f.instructions.len(), 7);
    }

    #[test]
    fn unknown_mnemonic_is_a_parse_error() {
        assert!(compile("main:\n    frobnicate\n").is_err());
    }

    #[test]
    fn spawn_takes_an_entry_literal_and_a_program_register() {
        let src = "main:\n    load r3, 7.0\n    spawn 2, r3\n    end\n";
        let p = compile(src).unwrap();
        let instr = Instruction::decode(p.functions[0].instructions[2]);
        assert_eq!(instr.opcode, Opcode::Spawn);
        assert_eq!(instr.a2, 3);
        assert_eq!(p.functions[0].instructions[3], 2);
    }
}
