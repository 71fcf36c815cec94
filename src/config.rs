//! Configuration for an Audiality 2 [`State`](crate::state::State).
//!
//! A builder-style config covering the ambient knobs a complete engine
//! needs: handle table sizing, silence detection, and driver selection
//! strings matching the CLI surface.

/// Configuration for an Audiality 2 engine state.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count of the root voice.
    pub channels: u16,
    /// Audio buffer size in frames. `None` uses the driver's default.
    pub buffer_size: Option<u32>,
    /// Initial number of voices to pre-allocate from the pool.
    pub initial_voices: usize,
    /// Hard ceiling on total voices (pool + in-use); `None` is unbounded
    /// (new blocks are grown on demand, with a logged warning, per §4.3).
    pub max_voices: Option<usize>,
    /// Initial handle table capacity.
    pub initial_handles: usize,
    /// Output device spec (name or index); `None` uses the system default.
    pub output_device: Option<String>,
    /// Input device spec (name or index); `None` uses the system default.
    pub input_device: Option<String>,
    /// Amplitude threshold below which output counts as "silent" for the
    /// `-sl` stop-level CLI switch. Carried as a float
    /// throughout per the §9 open-question decision.
    pub silence_level: f32,
    /// Frames output must stay below `silence_level` before the engine
    /// reports silence.
    pub silence_grace: u32,
    /// Averaging window (frames) for late-message margin statistics.
    pub silence_window: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_size: None,
            initial_voices: 64,
            max_voices: Some(256),
            initial_handles: 256,
            output_device: None,
            input_device: None,
            silence_level: 0.0,
            silence_grace: 48_000 / 4,
            silence_window: 48_000,
        }
    }
}

impl StateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_rate(mut self, sr: u32) -> Self {
        self.sample_rate = sr;
        self.silence_grace = sr / 4;
        self.silence_window = sr;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = Some(frames);
        self
    }

    pub fn with_max_voices(mut self, n: usize) -> Self {
        self.max_voices = Some(n);
        self
    }

    pub fn with_output_device(mut self, device: impl Into<String>) -> Self {
        self.output_device = Some(device.into());
        self
    }

    pub fn with_input_device(mut self, device: impl Into<String>) -> Self {
        self.input_device = Some(device.into());
        self
    }

    pub fn with_silence_level(mut self, level: f32) -> Self {
        self.silence_level = level;
        self
    }
}
