//! Per-client interface objects: a timestamp cursor plus operating mode.

use crate::error::A2Result;
use crate::gateway::{Gateway, Message};
use crate::handle::Handle;
use crate::types::Timestamp;

/// Whether an interface's calls serialize through the gateway FIFOs or
/// apply synchronously on the engine side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Realtime,
    Direct,
}

/// A client-facing handle onto one engine state's gateway, carrying its own
/// logical timestamp cursor. Multiple
/// interfaces may share one state.
pub struct Interface {
    pub mode: Mode,
    cursor: Timestamp,
    sample_rate: f64,
}

impl Interface {
    pub fn new(mode: Mode, sample_rate: f64) -> Self {
        Self { mode, cursor: Timestamp::ZERO, sample_rate }
    }

    /// Sets the cursor from the engine's current time, plus an optional
    /// jitter margin in milliseconds.
    pub fn reset(&mut self, engine_now: Timestamp, jitter_margin_ms: f64) {
        self.cursor = engine_now.saturating_add(Timestamp::from_ms(jitter_margin_ms, self.sample_rate));
    }

    /// Advances the cursor by `dt_ms` for the next message (`TimestampBump`).
    pub fn bump(&mut self, dt_ms: f64) {
        self.cursor = self.cursor.saturating_add(Timestamp::from_ms(dt_ms, self.sample_rate));
    }

    /// Gently pulls the cursor toward `now - offset_ms` by `amount`, smoothing clock drift without a hard jump.
    pub fn nudge(&mut self, now: Timestamp, offset_ms: f64, amount: f32) {
        let target = now.saturating_sub(Timestamp::from_ms(offset_ms, self.sample_rate));
        let delta = target.raw() - self.cursor.raw();
        self.cursor = Timestamp::from_frac(self.cursor.raw() + (delta as f32 * amount.clamp(0.0, 1.0)) as i64);
    }

    pub fn timestamp(&self) -> Timestamp {
        self.cursor
    }

    pub fn play(&self, gateway: &mut Gateway, target: Handle, program: Handle, entry: u8, args: Vec<i32>) -> A2Result<()> {
        gateway.fromapi_tx.send(Message::Play { target, program, entry, args, timestamp: self.cursor })
    }

    pub fn start(
        &self,
        gateway: &mut Gateway,
        target: Handle,
        program: Handle,
        entry: u8,
        args: Vec<i32>,
        new_voice: Handle,
    ) -> A2Result<()> {
        gateway.fromapi_tx.send(Message::Start { target, program, entry, args, timestamp: self.cursor, new_voice })
    }

    pub fn send(&self, gateway: &mut Gateway, target: Handle, entry: u8, args: Vec<i32>) -> A2Result<()> {
        gateway.fromapi_tx.send(Message::Send { target, entry, args, timestamp: self.cursor })
    }

    pub fn kill(&self, gateway: &mut Gateway, target: Handle) -> A2Result<()> {
        gateway.fromapi_tx.send(Message::Kill { target, timestamp: self.cursor })
    }

    pub fn release(&self, gateway: &mut Gateway, target: Handle) -> A2Result<()> {
        gateway.fromapi_tx.send(Message::Release { target, timestamp: self.cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_advances_cursor_forward() {
        let mut iface = Interface::new(Mode::Realtime, 48000.0);
        let before = iface.timestamp();
        iface.bump(10.0);
        assert!(iface.timestamp() > before);
    }

    #[test]
    fn nudge_moves_partway_to_target() {
        let mut iface = Interface::new(Mode::Realtime, 48000.0);
        iface.bump(100.0);
        let before = iface.timestamp();
        iface.nudge(Timestamp::ZERO, 0.0, 0.5);
        assert!(iface.timestamp() < before);
        assert!(iface.timestamp() > Timestamp::ZERO);
    }
}
