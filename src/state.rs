//! Top-level engine state: shared resources, the voice pool, and the
//! per-callback processing entry point.

use std::collections::HashMap;

use log::{debug, warn};

use crate::bank::Bank;
use crate::bus::{Block, Bus, ScratchBuses};
use crate::config::StateConfig;
use crate::error::{A2Error, A2Result};
use crate::gateway::{Gateway, Message};
use crate::handle::{DestroyOutcome, Handle, HandleTable, ObjectType, UserFlags};
use crate::pool::Pool;
use crate::types::Timestamp;
use crate::unit::UnitDescriptor;
use crate::vm::program::Program;
use crate::vm::Vm;
use crate::voice::{process_fragment, UnitRegistry, Voice, VoicePool};
use crate::wave::Wave;

/// Process-wide unit-descriptor registry guard.
/// Distinct states may share one `UnitRegistry` through a shared
/// reference built once at startup and registered before any state opens.
pub fn default_unit_registry() -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    crate::units::register_builtins(&mut registry);
    registry
}

/// Shared resources reachable from the master state and every substate.
pub struct SharedState {
    pub banks: HandleTable<Bank>,
    pub programs: HandleTable<Program>,
    pub waves: HandleTable<Wave>,
    pub unit_registry: UnitRegistry,
    pub bank0: Handle,
}

impl SharedState {
    pub fn new(initial_handles: usize) -> Self {
        let mut banks = HandleTable::with_capacity(initial_handles);
        let bank0 = banks.new_handle(Bank::new("bank0"), ObjectType::Bank, UserFlags::LOCKED, 1);
        Self {
            banks,
            programs: HandleTable::with_capacity(initial_handles),
            waves: HandleTable::with_capacity(initial_handles),
            unit_registry: default_unit_registry(),
            bank0,
        }
    }

    pub fn load_program(&mut self, name: impl Into<String>, program: Program) -> Handle {
        let name = name.into();
        let h = self.programs.new_handle(program, ObjectType::Program, UserFlags::empty(), 1);
        if let Some(bank) = self.banks.get_mut(self.bank0) {
            bank.export(name, h);
        }
        h
    }

    pub fn register_unit(&mut self, descriptor: &'static UnitDescriptor) {
        self.unit_registry.register(descriptor);
    }
}

/// One engine context: the voice tree rooted at `root_voice`, its gateway,
/// and the scratch/block pools it processes fragments with. The master
/// `State` is itself one context plus the shared resources; every
/// substate (off-line renderer, sub-group) is another, independent one.
pub struct Engine {
    pub voices: VoicePool,
    pub programs: HashMap<u32, Program>,
    pub blocks: Pool<Block>,
    pub scratch: ScratchBuses,
    pub gateway: Gateway,
    pub root_voice: u32,
    pub sample_rate: f64,
    pub channels: u16,
    pub now: Timestamp,
    pub config: StateConfig,
    silence_run: u32,
}

impl Engine {
    /// Opens a new engine context rooted at a fresh instance of `root_program`
    /// (typically the default panmix+xinsert root driver from [`crate::root`]).
    pub fn open(config: StateConfig, root_program: Program) -> A2Result<Self> {
        let mut blocks: Pool<Block> = Pool::new(config.channels as usize * 2, None);
        let channel_indices: Vec<u32> =
            (0..config.channels).map(|_| blocks.alloc(Block::default())).collect();
        let output_bus = Bus::new(channel_indices);

        let mut voices: VoicePool = Pool::new(config.initial_voices, config.max_voices);
        let vm = Vm::new(0, &[], config.sample_rate as f64);
        let mut root = Voice::new(vm, Handle(0), output_bus, 0);
        root.flags.insert(crate::voice::VoiceFlags::ATTACHED);

        let registry = default_unit_registry();
        root.instantiate(&root_program, &registry)?;
        let root_index = voices.alloc(root);

        let mut programs = HashMap::new();
        programs.insert(0, root_program);

        Ok(Self {
            voices,
            programs,
            blocks,
            scratch: ScratchBuses::new(),
            gateway: Gateway::new(256),
            root_voice: root_index,
            sample_rate: config.sample_rate as f64,
            channels: config.channels,
            now: Timestamp::ZERO,
            config,
            silence_run: 0,
        })
    }

    /// Registers an additional program under `key`, for voices spawned by
    /// the VM's `Spawn`/`SpawnV` family (normally resolved through a bank's
    /// export table; this is the minimal direct path the builder API uses).
    pub fn add_program(&mut self, key: u32, program: Program) {
        self.programs.insert(key, program);
    }

    /// Runs one audio callback's worth of processing: pumps due gateway
    /// messages, processes the voice tree in `A2_MAXFRAG`-sized fragments,
    /// and reports back accumulated spawns/errors via the `toapi` FIFO.
    pub fn process(&mut self, frames: usize) {
        let registry = default_unit_registry();
        let mut remaining = frames;
        while remaining > 0 {
            let step = remaining.min(crate::types::A2_MAXFRAG);
            self.pump_messages(step);
            let report = process_fragment(
                &mut self.voices,
                &registry,
                &self.programs,
                &mut self.blocks,
                &mut self.scratch,
                self.root_voice,
                step,
                self.now,
                self.sample_rate,
            );
            self.apply_report(report);
            self.now = self.now.saturating_add(Timestamp::from_frames(step as i64));
            remaining -= step;
        }
        self.update_silence_tracking(frames);
    }

    fn pump_messages(&mut self, step: usize) {
        let buffer_start = self.now;
        let buffer_end = self.now.saturating_add(Timestamp::from_frames(step as i64));
        for (msg, late) in self.gateway.drain_due(buffer_start, buffer_end) {
            if late {
                warn!("late message delivered to engine context: {msg:?}");
                let _ = self.gateway.toapi_tx.send(Message::Error {
                    code: A2Error::LateMessage,
                    site: "Engine::pump_messages",
                });
            }
            self.apply_message(msg);
        }
    }

    fn apply_message(&mut self, msg: Message) {
        use crate::event::{Event, EventBody};
        let (target, ts, body) = match msg {
            Message::Play { target, program, entry, args, timestamp } => {
                (target, timestamp, EventBody::Play { program, entry, args })
            }
            Message::Start { target, program, entry, args, timestamp, new_voice: _ } => {
                (target, timestamp, EventBody::Play { program, entry, args })
            }
            Message::Send { target, entry, args, timestamp } => {
                (target, timestamp, EventBody::Send { entry, args })
            }
            Message::Release { target, timestamp } => (target, timestamp, EventBody::Release),
            Message::Kill { target, timestamp } => (target, timestamp, EventBody::Kill),
            _ => return,
        };
        if let Some(voice) = self.voices.get_mut(target.0) {
            voice.events.insert(Event { timestamp: ts, body });
        } else {
            debug!("message addressed to dead voice #{}", target.0);
        }
    }

    fn apply_report(&mut self, report: crate::voice::FragmentReport) {
        for (_voice_idx, err) in report.errors {
            let _ = self.gateway.toapi_tx.send(Message::Error { code: err, site: "voice" });
        }
        for idx in report.freed {
            self.voices.free(idx);
        }
    }

    /// Amplitude-based silence detection backing the CLI's `-sl` stop
    /// switch.
    fn update_silence_tracking(&mut self, frames: usize) {
        let level = self.config.silence_level;
        let peak = self
            .blocks
            .iter()
            .flat_map(|(_, b)| b.samples.iter().copied())
            .fold(0.0f32, f32::max);
        if peak <= level {
            self.silence_run += frames as u32;
        } else {
            self.silence_run = 0;
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silence_run >= self.config.silence_grace
    }

    /// Reads down-mixed output for channel `ch` into `out`, from the root
    /// voice's output bus blocks (used by both the realtime and buffer
    /// drivers, see [`crate::driver`]).
    pub fn read_channel(&self, ch: usize, out: &mut [f32]) {
        let Some(root) = self.voices.get(self.root_voice) else {
            out.fill(0.0);
            return;
        };
        let Some(&block_idx) = root.output_bus.channels.get(ch) else {
            out.fill(0.0);
            return;
        };
        if let Some(block) = self.blocks.get(block_idx) {
            let n = out.len().min(block.samples.len());
            out[..n].copy_from_slice(&block.samples[..n]);
        } else {
            out.fill(0.0);
        }
    }

    /// Explicit pool-growth path exercised before entering realtime mode.
    pub fn reserve_voices(&mut self, additional: usize) {
        self.voices.reserve(additional);
    }

    pub fn reserve_blocks(&mut self, additional: usize) {
        self.blocks.reserve(additional);
    }

    pub fn release_program(&mut self, shared: &mut SharedState, handle: Handle) -> A2Result<()> {
        shared.programs.release(handle, |_| DestroyOutcome::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::{Instruction, Opcode};
    use crate::vm::program::Function;

    fn root_program() -> Program {
        let mut p = Program::new("root");
        p.add_function(Function::new(vec![
            Instruction { opcode: Opcode::End, a1: 0, a2: 0 }.encode(),
        ]));
        p
    }

    #[test]
    fn open_allocates_root_voice_and_output_blocks() {
        let config = StateConfig::new().with_channels(2);
        let engine = Engine::open(config, root_program()).unwrap();
        assert!(engine.voices.get(engine.root_voice).is_some());
    }

    #[test]
    fn process_advances_engine_clock() {
        let config = StateConfig::new().with_channels(2);
        let mut engine = Engine::open(config, root_program()).unwrap();
        engine.process(128);
        assert_eq!(engine.now, Timestamp::from_frames(128));
    }

    #[test]
    fn silent_output_is_detected_after_grace_period() {
        let config = StateConfig::new().with_channels(1).with_silence_level(0.0);
        let mut engine = Engine::open(config, root_program()).unwrap();
        for _ in 0..10 {
            engine.process(64);
        }
        assert!(engine.is_silent());
    }
}
