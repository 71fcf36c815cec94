//! Hierarchical voice graph: instantiation, recursive subvoice processing,
//! and scratch-bus allocation.

use log::warn;

use crate::bus::{clamp_channels, Block, Bus, ScratchBuses};
use crate::error::A2Error;
use crate::event::{Event, EventBody, EventQueue};
use crate::handle::Handle;
use crate::pool::Pool;
use crate::types::{Timestamp, A2_MAXCHANNELS, A2_MAXFRAG, A2_MAXNESTING, A2_SV_LUT_SIZE};
use crate::unit::{ChannelSpec, UnitDescriptor, UnitInstance};
use crate::vm::program::{Program, StructureItem};
use crate::vm::{Vm, VmEvent, VoiceState};

bitflags_voice! {
    pub struct VoiceFlags: u8 {
        const ATTACHED    = 0x01;
        const API_OWNED   = 0x02;
        const HAS_INLINE  = 0x04;
    }
}

macro_rules! bitflags_voice {
    (pub struct $name:ident: $ty:ty { $(const $flag:ident = $value:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);
        impl $name {
            $(pub const $flag: $name = $name($value);)*
            pub const fn empty() -> Self { $name(0) }
            pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
            pub fn insert(&mut self, other: Self) { self.0 |= other.0; }
            pub fn remove(&mut self, other: Self) { self.0 &= !other.0; }
        }
    };
}
use bitflags_voice;

/// Lookup table accelerating "named subvoice" (VID) access.
#[derive(Debug, Default)]
struct VidTable {
    lut: [Option<u32>; A2_SV_LUT_SIZE],
    overflow: Vec<(u32, u32)>,
}

impl VidTable {
    fn bind(&mut self, vid: u32, voice_index: u32) {
        if (vid as usize) < A2_SV_LUT_SIZE {
            self.lut[vid as usize] = Some(voice_index);
        } else {
            self.overflow.retain(|&(v, _)| v != vid);
            self.overflow.push((vid, voice_index));
        }
    }

    fn unbind_voice(&mut self, voice_index: u32) {
        for slot in self.lut.iter_mut() {
            if *slot == Some(voice_index) {
                *slot = None;
            }
        }
        self.overflow.retain(|&(_, v)| v != voice_index);
    }

    fn lookup(&self, vid: u32) -> Option<u32> {
        if (vid as usize) < A2_SV_LUT_SIZE {
            self.lut[vid as usize]
        } else {
            self.overflow.iter().find(|&&(v, _)| v == vid).map(|&(_, idx)| idx)
        }
    }
}

/// A running instance of a [`Program`].
pub struct Voice {
    pub vm: Vm,
    pub program: Handle,
    pub units: Vec<UnitInstance>,
    pub subvoices: Vec<u32>,
    pub events: EventQueue,
    pub handle: Option<Handle>,
    pub flags: VoiceFlags,
    pub output_bus: Bus,
    pub nesting_level: usize,
    vids: VidTable,
    finalizing_wait: bool,
}

impl Voice {
    pub fn new(vm: Vm, program: Handle, output_bus: Bus, nesting_level: usize) -> Self {
        Self {
            vm,
            program,
            units: Vec::new(),
            subvoices: Vec::new(),
            events: EventQueue::new(),
            handle: None,
            flags: VoiceFlags::empty(),
            output_bus,
            nesting_level,
            vids: VidTable::default(),
            finalizing_wait: false,
        }
    }

    /// Runtime lifecycle state derived from the VM's run state plus
    /// finalization bookkeeping.
    pub fn lifecycle(&self) -> VoiceState {
        if self.finalizing_wait {
            crate::vm::VoiceState::Finalizing
        } else {
            self.vm.state
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.lifecycle(), VoiceState::Finalizing) && self.subvoices.is_empty()
    }

    /// Binds a VID to a freshly spawned subvoice's pool index, for later
    /// `SendSub`/`KillSub` addressing.
    pub fn bind_vid(&mut self, vid: u32, voice_index: u32) {
        self.vids.bind(vid, voice_index);
    }

    /// Resolves a VID to its subvoice's current pool index, if still bound.
    pub fn resolve_vid(&self, vid: u32) -> Option<u32> {
        self.vids.lookup(vid)
    }

    /// Drops a VID binding once its subvoice has been freed.
    pub fn unbind_vid(&mut self, voice_index: u32) {
        self.vids.unbind_voice(voice_index);
    }

    /// Executes `INITV`: instantiates units in declaration order, resolving
    /// autowiring sentinels against this voice's own output-channel count.
    pub fn instantiate(
        &mut self,
        program: &Program,
        registry: &UnitRegistry,
    ) -> Result<(), A2Error> {
        if !program.has_units() {
            return Ok(());
        }
        let voice_channels = self.output_bus.channel_count() as u16;
        let mut next_register = crate::types::A2_FIRSTCONTROLREG;
        let mut last_unit_is_terminator = false;

        for item in &program.structure {
            if let StructureItem::Unit { descriptor_name, inputs, outputs, .. } = item {
                let descriptor = registry
                    .get(descriptor_name)
                    .ok_or(A2Error::NoUnits)?;
                let resolved_in = descriptor.resolve_channels(*inputs, voice_channels)?;
                let resolved_out = descriptor.resolve_channels(*outputs, voice_channels)?;
                if descriptor.flags.contains(crate::unit::UnitFlags::MATCH_IO)
                    && resolved_in != resolved_out
                {
                    return Err(A2Error::IoDontMatch);
                }
                let is_terminator = matches!(outputs, ChannelSpec::WireToVoiceOutput)
                    || (matches!(outputs, ChannelSpec::Default) && self.units.is_empty());

                let initial_values: Vec<f32> =
                    descriptor.registers.iter().map(|_| 0.0).collect();
                let state = (descriptor.build)(&initial_values);
                let controls = crate::unit::ControlBank::new(&initial_values);

                self.units.push(UnitInstance {
                    descriptor,
                    state,
                    controls,
                    first_register: next_register,
                    input_bus: 0,
                    output_bus: 0,
                    is_output_terminator: is_terminator,
                });
                if descriptor.name == "inline" {
                    self.flags.insert(VoiceFlags::HAS_INLINE);
                }
                next_register += descriptor.registers.len();
                last_unit_is_terminator = is_terminator;
            }
        }
        if !last_unit_is_terminator {
            if let Some(last) = self.units.last_mut() {
                last.is_output_terminator = true;
            } else {
                return Err(A2Error::NoOutput);
            }
        }
        Ok(())
    }

    /// Delivers a due event into VM effects, returning what the caller
    /// (the voice pool's fragment driver) must act on.
    fn apply_event(&mut self, program: &Program, body: EventBody) -> Vec<VmEvent> {
        match body {
            EventBody::Send { entry, args } => {
                if let Some(&Some(f)) = program.entry_points.get(entry as usize) {
                    self.vm.enter_interrupt(f, &args);
                }
                Vec::new()
            }
            EventBody::Kill => {
                self.vm.state = VoiceState::Ending;
                Vec::new()
            }
            other => vec![match other {
                EventBody::Play { program, entry, args } => {
                    VmEvent::Spawn { program, entry, args, detached: true, vid: None }
                }
                EventBody::Start { program, entry, args, handle } => VmEvent::Spawn {
                    program,
                    entry,
                    args,
                    detached: false,
                    vid: Some(handle.0),
                },
                EventBody::SendSub { vid, entry, args } => {
                    VmEvent::Send { vid: Some(vid), entry, args, all: false }
                }
                EventBody::KillSub { vid } => VmEvent::Kill { vid: Some(vid), all: false },
                EventBody::Release => {
                    self.flags.remove(VoiceFlags::API_OWNED);
                    return Vec::new();
                }
                _ => return Vec::new(),
            }],
        }
    }
}

/// Process-wide unit-descriptor registry.
pub struct UnitRegistry {
    descriptors: std::collections::HashMap<&'static str, &'static UnitDescriptor>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self { descriptors: std::collections::HashMap::new() }
    }

    pub fn register(&mut self, descriptor: &'static UnitDescriptor) {
        self.descriptors.insert(descriptor.name, descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&'static UnitDescriptor> {
        self.descriptors.get(name).copied()
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of all live voices in one state's tree, keyed by stable slab index.
pub type VoicePool = Pool<Voice>;

/// Output of processing one voice's fragment: requests the caller applies
/// against the pool (spawns, kills, errors) since a voice cannot mutate its
/// siblings or the pool directly while borrowed.
pub struct FragmentReport {
    pub spawns: Vec<(u32, VmEvent)>,
    pub errors: Vec<(u32, A2Error)>,
    pub freed: Vec<u32>,
}

/// Processes a fragment of length `frames` for the subtree rooted at
/// `root_index`, recursing into subvoices after the parent. Scratch buses grow to the widest chain seen.
pub fn process_fragment(
    pool: &mut VoicePool,
    registry: &UnitRegistry,
    programs: &std::collections::HashMap<u32, Program>,
    blocks: &mut Pool<Block>,
    scratch: &mut ScratchBuses,
    root_index: u32,
    frames: usize,
    now: Timestamp,
    sample_rate: f64,
) -> FragmentReport {
    let mut report = FragmentReport { spawns: Vec::new(), errors: Vec::new(), freed: Vec::new() };
    process_voice_recursive(pool, registry, programs, blocks, scratch, root_index, frames, now, 0, &mut report);
    resolve_spawns(pool, registry, programs, blocks, now, sample_rate, &mut report);
    report
}

/// Applies the `Spawn`/`Send`/`Kill` requests a fragment's voices queued
/// against their parent while borrowed out of the pool (a voice cannot
/// reach its own pool slot or a sibling's while `process_voice_recursive`
/// holds it). Runs once per fragment, after every voice in the subtree has
/// been returned to the pool.
fn resolve_spawns(
    pool: &mut VoicePool,
    registry: &UnitRegistry,
    programs: &std::collections::HashMap<u32, Program>,
    blocks: &mut Pool<Block>,
    now: Timestamp,
    sample_rate: f64,
    report: &mut FragmentReport,
) {
    let requests = std::mem::take(&mut report.spawns);
    for (parent_index, event) in requests {
        match event {
            VmEvent::Spawn { program, entry, args, detached, vid } => {
                let Some(prog) = programs.get(&program.0) else {
                    report.errors.push((parent_index, A2Error::BadEntry));
                    continue;
                };
                let Some(Some(entry_fn)) = prog.entry_points.get(entry as usize).copied() else {
                    report.errors.push((parent_index, A2Error::BadEntry));
                    continue;
                };
                let (channels, nesting_level) = match pool.get(parent_index) {
                    Some(parent) => (parent.output_bus.channel_count().max(1), parent.nesting_level + 1),
                    None => continue,
                };
                let channel_indices: Vec<u32> =
                    (0..channels).map(|_| blocks.alloc(Block::default())).collect();
                let vm = Vm::new(entry_fn, &args, sample_rate);
                let mut sub = Voice::new(vm, program, Bus::new(channel_indices), nesting_level);
                if !detached {
                    sub.flags.insert(VoiceFlags::ATTACHED);
                }
                if let Err(err) = sub.instantiate(prog, registry) {
                    report.errors.push((parent_index, err));
                    continue;
                }
                let sub_index = pool.alloc(sub);
                if let Some(parent) = pool.get_mut(parent_index) {
                    parent.subvoices.push(sub_index);
                    if let Some(vid) = vid {
                        parent.bind_vid(vid, sub_index);
                    }
                } else {
                    pool.free(sub_index);
                }
            }
            VmEvent::Send { vid, entry, args, all } => {
                let targets = resolve_targets(pool, parent_index, vid, all);
                for target in targets {
                    if let Some(sub) = pool.get_mut(target) {
                        sub.events.insert(Event { timestamp: now, body: EventBody::Send { entry, args: args.clone() } });
                    }
                }
            }
            VmEvent::Kill { vid, all } => {
                let targets = resolve_targets(pool, parent_index, vid, all);
                for target in targets {
                    if let Some(sub) = pool.get_mut(target) {
                        sub.events.insert(Event { timestamp: now, body: EventBody::Kill });
                    }
                }
            }
            VmEvent::Detach { vid, all } => {
                let targets = resolve_targets(pool, parent_index, vid, all);
                for target in &targets {
                    if let Some(sub) = pool.get_mut(*target) {
                        sub.flags.remove(VoiceFlags::ATTACHED);
                    }
                }
                if let Some(parent) = pool.get_mut(parent_index) {
                    for target in targets {
                        parent.unbind_vid(target);
                    }
                }
            }
            _ => {}
        }
    }
}

fn resolve_targets(pool: &VoicePool, parent_index: u32, vid: Option<u32>, all: bool) -> Vec<u32> {
    let Some(parent) = pool.get(parent_index) else { return Vec::new() };
    if all {
        return parent.subvoices.clone();
    }
    match vid.and_then(|v| parent.resolve_vid(v)) {
        Some(idx) => vec![idx],
        None => Vec::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn process_voice_recursive(
    pool: &mut VoicePool,
    registry: &UnitRegistry,
    programs: &std::collections::HashMap<u32, Program>,
    blocks: &mut Pool<Block>,
    scratch: &mut ScratchBuses,
    index: u32,
    frames: usize,
    now: Timestamp,
    depth: usize,
    report: &mut FragmentReport,
) {
    if depth >= A2_MAXNESTING {
        report.errors.push((index, A2Error::VoiceNest));
        return;
    }

    let mut voice = match pool.free(index) {
        Some(v) => v,
        None => return,
    };

    let program_key = voice.program.0;
    let has_inline = voice.flags.contains(VoiceFlags::HAS_INLINE);
    let subvoices = std::mem::take(&mut voice.subvoices);
    let freed_before = report.freed.len();

    if has_inline {
        // The voice hosts an `inline` unit: its Process needs this
        // fragment's subvoice mix already rendered, so the subtree runs
        // before the parent's own unit chain rather than after it.
        for &sub in &subvoices {
            process_voice_recursive(pool, registry, programs, blocks, scratch, sub, frames, now, depth + 1, report);
        }
        let freed_this_round: std::collections::HashSet<u32> =
            report.freed[freed_before..].iter().copied().collect();
        for &idx in &freed_this_round {
            voice.unbind_vid(idx);
        }
        voice.subvoices = subvoices.into_iter().filter(|idx| !freed_this_round.contains(idx)).collect();

        let channels = voice.output_bus.channel_count().max(1);
        mix_subvoice_outputs(pool, blocks, scratch, &voice.subvoices, channels, frames, depth);
        if let Some(program) = programs.get(&program_key) {
            step_voice(&mut voice, program, frames, now, report, index, blocks, scratch, depth, true);
        }
    } else {
        if let Some(program) = programs.get(&program_key) {
            step_voice(&mut voice, program, frames, now, report, index, blocks, scratch, depth, false);
        }
        for &sub in &subvoices {
            process_voice_recursive(pool, registry, programs, blocks, scratch, sub, frames, now, depth + 1, report);
        }
        let freed_this_round: std::collections::HashSet<u32> =
            report.freed[freed_before..].iter().copied().collect();
        for &idx in &freed_this_round {
            voice.unbind_vid(idx);
        }
        voice.subvoices = subvoices.into_iter().filter(|idx| !freed_this_round.contains(idx)).collect();
    }

    if voice.is_terminal() {
        report.freed.push(index);
    } else {
        let recycled = pool.alloc(voice);
        debug_assert_eq!(recycled, index, "voice slot must round-trip to the same index");
    }
}

/// Sums the rendered output buses of `subvoices` (already processed for
/// this fragment) into `scratch`'s pool-backed mix bus for `depth`, for an
/// `inline` unit to read as its input. Grows that bus on first use; every
/// later fragment at this depth reuses the same block indices.
fn mix_subvoice_outputs(
    pool: &VoicePool,
    blocks: &mut Pool<Block>,
    scratch: &mut ScratchBuses,
    subvoices: &[u32],
    channels: usize,
    frames: usize,
    depth: usize,
) {
    let channels = clamp_channels(channels);
    scratch.ensure_level(depth, channels, blocks);
    let mut mix_idx = [0u32; A2_MAXCHANNELS];
    mix_idx[..channels].copy_from_slice(&scratch.mix(depth).expect("level just ensured").channels[..channels]);

    for &idx in &mix_idx[..channels] {
        if let Some(b) = blocks.get_mut(idx) {
            b.samples[..frames].fill(0.0);
        }
    }
    for &sub in subvoices {
        let Some(sv) = pool.get(sub) else { continue };
        for (ch_idx, &block_idx) in sv.output_bus.channels.iter().enumerate().take(channels) {
            let Some(src_samples) = blocks.get(block_idx).map(|b| b.samples) else { continue };
            if let Some(dst) = blocks.get_mut(mix_idx[ch_idx]) {
                for i in 0..frames {
                    dst.samples[i] += src_samples[i];
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn step_voice(
    voice: &mut Voice,
    program: &Program,
    frames: usize,
    now: Timestamp,
    report: &mut FragmentReport,
    index: u32,
    blocks: &mut Pool<Block>,
    scratch: &mut ScratchBuses,
    depth: usize,
    has_inline_mix: bool,
) {
    let mut s = 0usize;
    while s < frames {
        let now_s = now.saturating_add(Timestamp::from_frames(s as i64));
        if let Some(e) = voice.events.pop_due(now_s) {
            let events = voice.apply_event(program, e.body);
            for ev in events {
                report.spawns.push((index, ev));
            }
            continue;
        }
        let vm_events = voice.vm.run(program, now_s);
        for ev in vm_events {
            match ev {
                VmEvent::Error(err) => {
                    if err.kills_voice() {
                        warn!("voice {index} killed by VM error: {err}");
                        voice.vm.state = VoiceState::Ending;
                    }
                    report.errors.push((index, err));
                }
                VmEvent::CommitRegister { register, value, start, duration } => {
                    if let Some(unit) = voice
                        .units
                        .iter_mut()
                        .find(|u| register >= u.first_register && register < u.first_register + u.descriptor.registers.len())
                    {
                        let local = register - unit.first_register;
                        unit.controls.write(local, value, start, duration);
                    }
                }
                other => report.spawns.push((index, other)),
            }
        }
        if voice.lifecycle() != VoiceState::Running {
            if voice.vm.state == VoiceState::Ending {
                voice.finalizing_wait = true;
            }
            break;
        }

        // The VM call above either ran to the next timing instruction
        // (wake_time now in the future) or returned immediately because it
        // already was waiting on one. Either way DSP only needs to render
        // up to the next wake-up or queued event, whichever comes first --
        // not the whole remaining fragment -- so a DELAY shorter than one
        // fragment still yields control back to the VM mid-fragment.
        let remaining = frames - s;
        let next_vm = if voice.vm.wake_time > now_s {
            voice.vm.wake_time.saturating_sub(now_s).whole_frames().max(0) as usize
        } else {
            remaining
        };
        let next_ev = voice
            .events
            .peek_timestamp()
            .map(|t| t.saturating_sub(now_s).whole_frames().max(0) as usize)
            .unwrap_or(remaining);
        let step = next_vm.min(next_ev).min(remaining).max(1);

        run_unit_chain(voice, step, blocks, scratch, depth, s, has_inline_mix);
        s += step;
    }
}

/// Runs every unit in declaration order, threading the previous unit's
/// output into the next unit's input via `scratch`'s pool-backed ping/pong
/// bus for this voice's nesting `depth`, then copies the terminator's output
/// into the voice's own output bus at fragment offset `bus_offset`. The
/// first unit in the chain reads silence, except an `inline` unit, whose
/// input is `scratch`'s mix bus ([`mix_subvoice_outputs`]) when
/// `has_inline_mix` is set, in place of whatever precedes it in the chain.
///
/// Per-unit input/output staging lives in fixed-size stack arrays bounded by
/// [`A2_MAXCHANNELS`]; the only heap-backed storage touched here is the
/// pool-resident ping/pong and mix buses themselves, which are grown once
/// per depth rather than once per fragment.
fn run_unit_chain(
    voice: &mut Voice,
    step: usize,
    blocks: &mut Pool<Block>,
    scratch: &mut ScratchBuses,
    depth: usize,
    bus_offset: usize,
    has_inline_mix: bool,
) {
    let channels = clamp_channels(voice.output_bus.channel_count().max(1));
    scratch.ensure_level(depth, channels, blocks);
    let (bus_a, bus_b) = scratch.ping_pong(depth).expect("level just ensured");
    let mut prev_idx = [0u32; A2_MAXCHANNELS];
    let mut next_idx = [0u32; A2_MAXCHANNELS];
    prev_idx[..channels].copy_from_slice(&bus_a.channels[..channels]);
    next_idx[..channels].copy_from_slice(&bus_b.channels[..channels]);

    for &idx in &prev_idx[..channels] {
        if let Some(b) = blocks.get_mut(idx) {
            b.samples[..step].fill(0.0);
        }
    }

    let mut mix_idx = [0u32; A2_MAXCHANNELS];
    if has_inline_mix {
        if let Some(mix) = scratch.mix(depth) {
            mix_idx[..channels].copy_from_slice(&mix.channels[..channels]);
        }
    }

    for unit in &mut voice.units {
        for &idx in &next_idx[..channels] {
            if let Some(b) = blocks.get_mut(idx) {
                b.samples[..step].fill(0.0);
            }
        }

        let is_inline = unit.descriptor.name == "inline";
        let source_idx = if is_inline && has_inline_mix { &mix_idx } else { &prev_idx };
        let mut input_stage: [[f32; A2_MAXFRAG]; A2_MAXCHANNELS] = [[0.0; A2_MAXFRAG]; A2_MAXCHANNELS];
        for (i, &idx) in source_idx[..channels].iter().enumerate() {
            if let Some(b) = blocks.get(idx) {
                input_stage[i][..step].copy_from_slice(&b.samples[..step]);
            }
        }
        let inputs: [&[f32]; A2_MAXCHANNELS] = std::array::from_fn(|i| &input_stage[i][..step]);

        let mut output_stage: [[f32; A2_MAXFRAG]; A2_MAXCHANNELS] = [[0.0; A2_MAXFRAG]; A2_MAXCHANNELS];
        {
            let mut output_refs: [&mut [f32]; A2_MAXCHANNELS] =
                output_stage.each_mut().map(|row| &mut row[..step]);
            unit.process(&inputs[..channels], &mut output_refs[..channels], 0, step);
        }

        for (i, &idx) in next_idx[..channels].iter().enumerate() {
            if let Some(b) = blocks.get_mut(idx) {
                b.samples[..step].copy_from_slice(&output_stage[i][..step]);
            }
        }

        if unit.is_output_terminator {
            let fallback = next_idx[0];
            for (ch_idx, &block_idx) in voice.output_bus.channels.iter().enumerate() {
                let src_idx = next_idx.get(ch_idx).copied().filter(|_| ch_idx < channels).unwrap_or(fallback);
                let Some(src_samples) = blocks.get(src_idx).map(|b| b.samples) else { continue };
                if let Some(block) = blocks.get_mut(block_idx) {
                    block.samples[bus_offset..bus_offset + step].copy_from_slice(&src_samples[..step]);
                }
            }
        }

        std::mem::swap(&mut prev_idx, &mut next_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    fn make_pool() -> (VoicePool, std::collections::HashMap<u32, Program>) {
        let mut programs = std::collections::HashMap::new();
        let mut p = Program::new("t");
        p.add_function(crate::vm::program::Function::new(vec![
            crate::vm::opcode::Instruction { opcode: crate::vm::opcode::Opcode::End, a1: 0, a2: 0 }.encode(),
        ]));
        programs.insert(0, p);
        (Pool::new(4, None), programs)
    }

    /// An `inline` unit's input must be the already-rendered subvoice mix,
    /// not silence.
    #[test]
    fn inline_unit_reads_subvoice_mix() {
        let (mut pool, programs) = make_pool();
        let mut blocks: Pool<Block> = Pool::new(4, None);

        let sub_block = blocks.alloc(Block::default());
        if let Some(block) = blocks.get_mut(sub_block) {
            block.samples[0] = 1.0;
            block.samples[1] = 2.0;
        }
        let sub_vm = Vm::new(0, &[], 48000.0);
        let sub_voice = Voice::new(sub_vm, Handle(0), Bus::new(vec![sub_block]), 1);
        let sub_index = pool.alloc(sub_voice);

        let parent_block = blocks.alloc(Block::default());
        let parent_vm = Vm::new(0, &[], 48000.0);
        let mut parent = Voice::new(parent_vm, Handle(0), Bus::new(vec![parent_block]), 0);
        parent.subvoices.push(sub_index);
        parent.flags.insert(VoiceFlags::HAS_INLINE);
        let descriptor = &crate::units::inline::DESCRIPTOR;
        parent.units.push(crate::unit::UnitInstance {
            descriptor,
            state: (descriptor.build)(&[0.0]),
            controls: crate::unit::ControlBank::new(&[0.0]),
            first_register: crate::types::A2_FIRSTCONTROLREG,
            input_bus: 0,
            output_bus: 0,
            is_output_terminator: true,
        });
        let parent_index = pool.alloc(parent);

        let registry = UnitRegistry::new();
        let mut scratch = ScratchBuses::new();
        process_fragment(&mut pool, &registry, &programs, &mut blocks, &mut scratch, parent_index, 2, Timestamp::ZERO, 48000.0);

        let parent = pool.get(parent_index).expect("parent voice recycled");
        let &out_block = parent.output_bus.channels.first().unwrap();
        let samples = &blocks.get(out_block).unwrap().samples;
        assert_eq!(&samples[..2], &[1.0, 2.0]);
    }

    #[test]
    fn terminal_voice_after_end_gets_freed() {
        let (mut pool, programs) = make_pool();
        let registry = UnitRegistry::new();
        let vm = Vm::new(0, &[], 48000.0);
        let v = Voice::new(vm, Handle(0), Bus::new(vec![0, 1]), 0);
        let idx = pool.alloc(v);
        let mut blocks: Pool<Block> = Pool::new(4, None);
        let mut scratch = ScratchBuses::new();
        let report = process_fragment(&mut pool, &registry, &programs, &mut blocks, &mut scratch, idx, 32, Timestamp::ZERO, 48000.0);
        assert!(report.freed.contains(&idx));
    }
}
