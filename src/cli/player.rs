//! `a2play`: command-line player for Audiality 2 programs, driving
//! [`audiality2::state::Engine`] through the realtime `cpal` driver.
//!
//! Flags are ordinary space-separated `clap` derive options rather than
//! concatenated short switches (`-st<sec>`, `-sl<level>`), since clap's
//! short-option parser doesn't model multi-letter concatenated switches
//! and idiomatic Rust CLIs are space-separated. See DESIGN.md for this
//! as a recorded interpretation, not an omission.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use log::info;

use audiality2::compiler;
use audiality2::config::StateConfig;
use audiality2::driver::cpal_driver::CpalDriver;
use audiality2::driver::Driver;
use audiality2::root::default_root_program;
use audiality2::state::Engine;

#[derive(Parser)]
#[command(name = "a2play", version, about = "Audiality 2 command-line player")]
struct Args {
    /// Output audio device (name or index); default device if omitted.
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// MIDI input port (name or index); requires the `midi` feature.
    #[arg(short = 'm', long)]
    midi: Option<String>,

    /// Audio buffer size in frames.
    #[arg(short = 'b', long)]
    buffer: Option<u32>,

    /// Sample rate in Hz.
    #[arg(short = 'r', long, default_value = "48000")]
    rate: u32,

    /// Output channel count.
    #[arg(short = 'c', long, default_value = "2")]
    channels: u16,

    /// A2S source file to compile and run as the root program's main function.
    #[arg(short = 'p', long)]
    program: Option<PathBuf>,

    /// Read A2S source from stdin instead of a file.
    #[arg(short = 's', long)]
    stdin: bool,

    /// Stop after this many seconds.
    #[arg(long = "stop-after")]
    stop_after: Option<f32>,

    /// Stop once output amplitude falls and stays below this level
    /// (1.0 == full scale) for the configured grace period.
    #[arg(long = "silence-level")]
    silence_level: Option<f32>,

    /// Print the compiled program's structure and exit instead of playing.
    #[arg(short = 'a', long)]
    dump: bool,
}

fn load_source(args: &Args) -> Result<Option<String>, String> {
    if args.stdin {
        use std::io::Read;
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s).map_err(|e| e.to_string())?;
        return Ok(Some(s));
    }
    if let Some(path) = &args.program {
        return std::fs::read_to_string(path).map(Some).map_err(|e| e.to_string());
    }
    Ok(None)
}

fn run(args: Args) -> Result<(), String> {
    let source = load_source(&args)?;

    let root_program = match source {
        Some(src) => compiler::compile(&src).map_err(|e| e.message().to_string())?,
        None => default_root_program(0.0, 1.0),
    };

    if args.dump {
        println!("program {:?}: {} structure item(s), {} function(s)", root_program.name, root_program.structure.len(), root_program.functions.len());
        for (i, item) in root_program.structure.iter().enumerate() {
            println!("  [{i}] {item:?}");
        }
        return Ok(());
    }

    let mut config = StateConfig::new().with_sample_rate(args.rate).with_channels(args.channels);
    if let Some(buf) = args.buffer {
        config = config.with_buffer_size(buf);
    }
    if let Some(level) = args.silence_level {
        config = config.with_silence_level(level);
    }
    if let Some(device) = args.device.clone() {
        config = config.with_output_device(device);
    }

    let engine = Engine::open(config.clone(), root_program).map_err(|e| e.message().to_string())?;
    let engine = Arc::new(Mutex::new(engine));

    let mut driver = CpalDriver::new(Arc::clone(&engine), args.channels, args.buffer, config.output_device.clone());
    driver.open().map_err(|e| e.message().to_string())?;
    info!("playing; press Ctrl+C to stop");

    let start = std::time::Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(50));
        if let Some(stop_after) = args.stop_after {
            if start.elapsed().as_secs_f32() >= stop_after {
                break;
            }
        }
        if engine.lock().unwrap().is_silent() {
            break;
        }
    }
    driver.close();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("a2play: {e}");
            ExitCode::from(100)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_parse_with_defaults() {
        let args = Args::parse_from(["a2play"]);
        assert_eq!(args.rate, 48000);
        assert_eq!(args.channels, 2);
        assert!(!args.dump);
    }

    #[test]
    fn device_and_rate_flags_are_recognized() {
        let args = Args::parse_from(["a2play", "-d", "hw:0", "-r", "44100"]);
        assert_eq!(args.device.as_deref(), Some("hw:0"));
        assert_eq!(args.rate, 44100);
    }
}
