//! Throughput benchmark for the master-callback path: `Engine::process`
//! driven through a `BufferDriver`, exercising the VM's `INITV`/`DELAY`/
//! `JUMP` root loop plus the `panmix`/`xinsert` unit chain every fragment.
//! Uses the client-pumped `BufferDriver` instead of a realtime audio
//! device so the benchmark has no hardware dependency.

use audiality2::config::StateConfig;
use audiality2::driver::buffer_driver::BufferDriver;
use audiality2::root::default_root_program;
use audiality2::state::Engine;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn process_one_second(c: &mut Criterion) {
    c.bench_function("engine_process_1s_stereo", |b| {
        b.iter(|| {
            let config = StateConfig::new().with_sample_rate(48_000).with_channels(2);
            let mut engine = Engine::open(config, default_root_program(0.0, 1.0)).unwrap();
            let mut driver = BufferDriver::new(2);
            driver.run(&mut engine, black_box(48_000));
            black_box(driver.channels[0].len());
        });
    });
}

criterion_group!(benches, process_one_second);
criterion_main!(benches);
