//! Compiled program representation: structure items and functions.
//!
//! The minimal A2S subset and the builder API both produce this
//! same representation, so the VM and voice-instantiation code never see
//! source text.

use crate::types::A2_MAXEPS;
use crate::unit::ChannelSpec;

/// One DSP-unit declaration or control-wire declaration in a voice's
/// structure list.
#[derive(Debug, Clone)]
pub enum StructureItem {
    /// Declares a unit instance: which descriptor, and its resolved input
    /// and output channel-count specs (subject to autowiring, §4.2).
    Unit {
        descriptor_name: &'static str,
        inputs: ChannelSpec,
        outputs: ChannelSpec,
        /// Named constants passed at `Initialize` time (compile-time only).
        constants: Vec<(&'static str, f32)>,
    },
    /// Wires a unit's control-output port to a voice register.
    Wire {
        unit_index: usize,
        output_index: usize,
        register: usize,
    },
}

/// A contiguous function body plus its calling convention.
#[derive(Debug, Clone)]
pub struct Function {
    pub instructions: Vec<u32>,
    /// Number of declared arguments, `<= A2_MAXARGS`.
    pub arg_count: u8,
    /// Default values used when a caller supplies fewer than `arg_count`
    /// arguments.
    pub arg_defaults: Vec<i32>,
    /// Index of the first argument register within the voice register file.
    pub first_arg_register: usize,
    /// Highest register this function touches; sizes the call-stack save
    /// window.
    pub highest_register: usize,
}

impl Function {
    pub fn new(instructions: Vec<u32>) -> Self {
        Self {
            instructions,
            arg_count: 0,
            arg_defaults: Vec::new(),
            first_arg_register: crate::types::A2_FIRSTCONTROLREG,
            highest_register: crate::types::A2_FIRSTCONTROLREG,
        }
    }
}

/// A fully compiled program: voice structure plus callable/handler
/// functions. Function 0 is always the entry point; functions referenced
/// from `entry_points[1..]` double as message handlers.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub structure: Vec<StructureItem>,
    pub functions: Vec<Function>,
    /// Maps message-handler slot (0..A2_MAXEPS) to a function index, or
    /// `None` if that entry point is unhandled.
    pub entry_points: [Option<usize>; A2_MAXEPS],
    pub name: String,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            structure: Vec::new(),
            functions: Vec::new(),
            entry_points: [None; A2_MAXEPS],
            name: name.into(),
        }
    }

    pub fn add_unit(
        &mut self,
        descriptor_name: &'static str,
        inputs: ChannelSpec,
        outputs: ChannelSpec,
    ) -> usize {
        self.structure.push(StructureItem::Unit {
            descriptor_name,
            inputs,
            outputs,
            constants: Vec::new(),
        });
        self.structure.len() - 1
    }

    /// Like [`Self::add_unit`], but with named compile-time constants
    /// passed to the descriptor's `Initialize`.
    pub fn add_unit_with_constants(
        &mut self,
        descriptor_name: &'static str,
        inputs: ChannelSpec,
        outputs: ChannelSpec,
        constants: Vec<(&'static str, f32)>,
    ) -> usize {
        self.structure.push(StructureItem::Unit { descriptor_name, inputs, outputs, constants });
        self.structure.len() - 1
    }

    pub fn add_wire(&mut self, unit_index: usize, output_index: usize, register: usize) {
        self.structure.push(StructureItem::Wire { unit_index, output_index, register });
    }

    pub fn add_function(&mut self, f: Function) -> usize {
        self.functions.push(f);
        self.functions.len() - 1
    }

    pub fn set_entry_point(&mut self, slot: usize, function_index: usize) {
        if slot < A2_MAXEPS {
            self.entry_points[slot] = Some(function_index);
        }
    }

    pub fn has_units(&self) -> bool {
        self.structure.iter().any(|s| matches!(s, StructureItem::Unit { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_zero_is_main_by_convention() {
        let mut p = Program::new("test");
        let f = p.add_function(Function::new(vec![]));
        p.set_entry_point(0, f);
        assert_eq!(p.entry_points[0], Some(0));
    }

    #[test]
    fn has_units_false_for_empty_structure() {
        let p = Program::new("empty");
        assert!(!p.has_units());
    }
}
