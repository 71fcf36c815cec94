//! Audio/MIDI/system driver contracts.
//!
//! A small platform-agnostic surface here, with the `cpal`-backed realtime
//! implementation and the client-pumped buffer/off-line implementation as
//! separate submodules.

#[cfg(feature = "player")]
pub mod cpal_driver;

pub mod buffer_driver;

#[cfg(feature = "midi")]
pub mod midi;

use crate::error::A2Result;

/// One callback buffer's worth of non-interleaved output, one `Vec<f32>`
/// per channel, each exactly `frames` samples long.
pub type OutputBuffers<'a> = &'a mut [Vec<f32>];

/// What an audio driver invokes once per buffer. Implemented by [`crate::state::Engine`]
/// via [`Driver::process`] below so drivers stay engine-agnostic.
pub trait EngineCallback: Send {
    fn process(&mut self, frames: usize);
    fn read_channel(&self, channel: usize, out: &mut [f32]);
}

/// A driver that can push `frames` worth of audio through an
/// [`EngineCallback`] and deliver the result, real-time or buffer-driven,
/// client-pumped via `Run(frames)`.
pub trait Driver {
    /// Opens the device/resource. Idempotent no-op if already open.
    fn open(&mut self) -> A2Result<()>;
    /// Closes the device/resource. Idempotent no-op if already closed.
    fn close(&mut self);
}

/// Enumerated audio device.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub index: usize,
    pub max_channels: u16,
    pub is_default: bool,
}

#[cfg(feature = "player")]
pub use cpal_driver::{list_output_devices, CpalDriver};
