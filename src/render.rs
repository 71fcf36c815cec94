//! Off-line renderer: drives an [`Engine`] with the [`BufferDriver`] and
//! writes the result to a WAV file.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::driver::buffer_driver::BufferDriver;
use crate::error::{A2Error, A2Result};
use crate::state::Engine;

/// Renders `seconds` of audio from `engine` to a 32-bit float WAV file at
/// `path`. Uses the engine's own sample rate and channel count.
pub fn render_to_wav(engine: &mut Engine, seconds: f32, path: impl AsRef<Path>) -> A2Result<()> {
    let channels = engine.channels as usize;
    let total_frames = (engine.sample_rate * seconds as f64).round() as usize;

    let mut driver = BufferDriver::new(channels);
    driver.run(engine, total_frames);

    let spec = WavSpec {
        channels: engine.channels,
        sample_rate: engine.sample_rate as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(|_| A2Error::DeviceOpen)?;
    for frame in 0..total_frames {
        for ch in &driver.channels {
            writer.write_sample(ch[frame]).map_err(|_| A2Error::BufOverflow)?;
        }
    }
    writer.finalize().map_err(|_| A2Error::BufOverflow)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateConfig;
    use crate::vm::opcode::{Instruction, Opcode};
    use crate::vm::program::{Function, Program};

    fn silent_root() -> Program {
        let mut p = Program::new("root");
        p.add_function(Function::new(vec![
            Instruction { opcode: Opcode::End, a1: 0, a2: 0 }.encode(),
        ]));
        p
    }

    #[test]
    fn renders_requested_duration_to_a_wav_file() {
        let config = StateConfig::new().with_channels(2).with_sample_rate(8_000);
        let mut engine = Engine::open(config, silent_root()).unwrap();
        let path = std::env::temp_dir().join("audiality2_render_test.wav");
        render_to_wav(&mut engine, 0.1, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8_000);
        let _ = std::fs::remove_file(&path);
    }
}
