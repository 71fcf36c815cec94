//! End-to-end integration tests driving a whole [`Engine`] through its
//! public surface: the text compiler, `Engine::open`/`add_program`, and the
//! `BufferDriver`. Unlike the `#[cfg(test)]` modules scattered through
//! `src/`, these exercise the full fragment pipeline -- VM, voice pool,
//! gateway -- together rather than one layer in isolation.

use audiality2::compiler::compile;
use audiality2::config::StateConfig;
use audiality2::driver::buffer_driver::BufferDriver;
use audiality2::gateway::Message;
use audiality2::state::Engine;
use audiality2::A2Error;

fn osc_root_source(turn_on_ms: f32) -> String {
    format!(
        "unit osc 0 1\nunit panmix 1 1\nunit xinsert 1 1\n\nmain:\n    initv\n    delay {turn_on_ms}\n    load r3, 1.0\n    set r3\nloop:\n    delay 1000.0\n    jump loop\n"
    )
}

fn silent_root_source() -> &'static str {
    "unit osc 0 1\nunit panmix 1 1\nunit xinsert 1 1\n\nmain:\n    initv\nloop:\n    delay 1000.0\n    jump loop\n"
}

#[test]
fn spawn_creates_a_subvoice_and_frees_it_after_the_child_ends() {
    let parent_src = "main:\n    initv\n    load r3, 7\n    spawn 0, r3\n    sleep\n";
    let child_src = "main:\n    initv\n    end\n";

    let parent = compile(parent_src).unwrap();
    let child = compile(child_src).unwrap();

    let config = StateConfig::new().with_channels(1).with_sample_rate(8_000);
    let mut engine = Engine::open(config, parent).unwrap();
    engine.add_program(7, child);

    assert_eq!(engine.voices.in_use(), 1);

    engine.process(64);
    assert_eq!(engine.voices.in_use(), 2, "spawn request should have created a subvoice");

    engine.process(64);
    assert_eq!(engine.voices.in_use(), 1, "child voice should be freed after it ends");
}

#[test]
fn tight_self_jump_overloads_and_frees_the_root_voice() {
    let src = "main:\nloop:\n    jump loop\n";
    let program = compile(src).unwrap();

    let config = StateConfig::new().with_channels(1).with_sample_rate(8_000);
    let mut engine = Engine::open(config, program).unwrap();

    engine.process(64);

    let mut saw_overload = false;
    while let Some(msg) = engine.gateway.toapi_rx.try_recv() {
        if let Message::Error { code: A2Error::Overload, .. } = msg {
            saw_overload = true;
        }
    }
    assert!(saw_overload, "a tight self-jump should exhaust the instruction budget and report Overload");
    assert_eq!(engine.voices.in_use(), 0, "the overloaded root voice should be freed");
}

#[test]
fn processing_is_independent_of_how_callers_chunk_the_frame_count() {
    let program = compile(&osc_root_source(50.0)).unwrap();
    let config = StateConfig::new().with_channels(1).with_sample_rate(8_000);

    let mut engine_a = Engine::open(config.clone(), program.clone()).unwrap();
    let mut driver_a = BufferDriver::new(1);
    driver_a.run(&mut engine_a, 600);

    let mut engine_b = Engine::open(config, program).unwrap();
    let mut driver_b = BufferDriver::new(1);
    driver_b.run(&mut engine_b, 77);
    driver_b.run(&mut engine_b, 301);
    driver_b.run(&mut engine_b, 222);

    assert_eq!(driver_a.channels[0], driver_b.channels[0]);
    assert!(driver_a.channels[0].iter().any(|&s| s != 0.0), "the oscillator should have produced non-silent output");
}

#[test]
fn silence_tracking_distinguishes_active_output_from_sustained_silence() {
    let loud_program = compile(&osc_root_source(10.0)).unwrap();
    let silent_program = compile(silent_root_source()).unwrap();

    let config = StateConfig::new().with_channels(1).with_sample_rate(8_000).with_silence_level(0.0);

    let mut loud = Engine::open(config.clone(), loud_program).unwrap();
    let mut silent = Engine::open(config, silent_program).unwrap();

    for _ in 0..6 {
        loud.process(512);
        silent.process(512);
    }

    assert!(!loud.is_silent(), "an oscillator held at full amplitude should never read as silent");
    assert!(silent.is_silent(), "a voice chain with no audio source should settle into silence");
}
