//! Realtime audio driver backed by `cpal`, adapted to the engine's
//! non-interleaved, pool-backed [`crate::bus::Block`] output.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream, StreamConfig};
use log::{error, info};

use super::{AudioDeviceInfo, Driver};
use crate::error::{A2Error, A2Result};
use crate::state::Engine;

fn preferred_host() -> Host {
    cpal::default_host()
}

/// Lists available output devices.
pub fn list_output_devices() -> Vec<AudioDeviceInfo> {
    let host = preferred_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };
    devices
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
            let max_channels = device
                .supported_output_configs()
                .ok()?
                .map(|c| c.channels())
                .max()
                .unwrap_or(2);
            let is_default = Some(&name) == default_name.as_ref();
            Some(AudioDeviceInfo { name, index, max_channels, is_default })
        })
        .collect()
}

fn find_output_device(spec: &str) -> Option<Device> {
    let host = preferred_host();
    let devices: Vec<_> = host.output_devices().ok()?.collect();
    if let Ok(idx) = spec.parse::<usize>() {
        return devices.into_iter().nth(idx);
    }
    let spec_lower = spec.to_lowercase();
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n.to_lowercase().contains(&spec_lower)).unwrap_or(false))
}

/// Owns the `cpal` output stream and the shared [`Engine`] it pumps once per
/// callback. `buffer_size` mirrors the `-b<n>` CLI switch; `None` leaves it
/// to the device's default.
pub struct CpalDriver {
    engine: Arc<Mutex<Engine>>,
    device_spec: Option<String>,
    buffer_size: Option<u32>,
    channels: u16,
    stream: Option<Stream>,
}

impl CpalDriver {
    pub fn new(engine: Arc<Mutex<Engine>>, channels: u16, buffer_size: Option<u32>, device_spec: Option<String>) -> Self {
        Self { engine, device_spec, buffer_size, channels, stream: None }
    }

    fn resolve_device(&self) -> A2Result<Device> {
        match &self.device_spec {
            Some(spec) => find_output_device(spec).ok_or(A2Error::DeviceOpen),
            None => preferred_host().default_output_device().ok_or(A2Error::DeviceOpen),
        }
    }
}

impl Driver for CpalDriver {
    fn open(&mut self) -> A2Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = self.resolve_device()?;
        let default_config = device.default_output_config().map_err(|_| A2Error::DeviceOpen)?;
        let config = StreamConfig {
            channels: self.channels,
            sample_rate: default_config.sample_rate(),
            buffer_size: self
                .buffer_size
                .map(cpal::BufferSize::Fixed)
                .unwrap_or(cpal::BufferSize::Default),
        };
        let channels = self.channels as usize;
        let engine = Arc::clone(&self.engine);
        let mut scratch: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let frames = data.len() / channels.max(1);
                    let mut guard = engine.lock().unwrap();
                    guard.process(frames);
                    for ch in scratch.iter_mut() {
                        ch.resize(frames, 0.0);
                    }
                    for (i, ch_buf) in scratch.iter_mut().enumerate().take(channels) {
                        guard.read_channel(i, ch_buf);
                    }
                    for (frame, out) in data.chunks_mut(channels).enumerate() {
                        for (ch, sample) in out.iter_mut().enumerate() {
                            *sample = scratch.get(ch).and_then(|b| b.get(frame)).copied().unwrap_or(0.0);
                        }
                    }
                },
                |err| error!("cpal output stream error: {err}"),
                None,
            )
            .map_err(|_| A2Error::DeviceOpen)?;
        stream.play().map_err(|_| A2Error::DeviceOpen)?;
        info!("opened cpal output stream: {} channel(s)", self.channels);
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            info!("closed cpal output stream");
        }
    }
}
