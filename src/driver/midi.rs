//! `midir`-backed MIDI driver: translates
//! incoming MIDI bytes into `Send` messages on a configured target voice,
//! entry point 7, with `(event_kind, channel, arg1, arg2)` float arguments.

use std::sync::mpsc::{Receiver, Sender};

use midir::{MidiInput, MidiInputConnection};

use crate::gateway::{Message, MessageSender};
use crate::handle::Handle;
use crate::types::{Reg, Timestamp};

/// `Send` entry point MIDI events are dispatched to, per the driver
/// contract.
pub const MIDI_ENTRY_POINT: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEventKind {
    NoteOff = 0,
    NoteOn = 1,
    ControlChange = 2,
    ProgramChange = 3,
    PitchBend = 4,
}

/// One decoded MIDI event, queued from the `midir` callback thread and
/// drained by [`MidiDriver::poll`] on the engine thread.
struct RawEvent {
    kind: MidiEventKind,
    channel: u8,
    arg1: u8,
    arg2: u8,
}

fn decode(bytes: &[u8]) -> Option<RawEvent> {
    let status = *bytes.first()?;
    let channel = status & 0x0f;
    let arg1 = *bytes.get(1)?;
    match status & 0xf0 {
        0x80 => Some(RawEvent { kind: MidiEventKind::NoteOff, channel, arg1, arg2: *bytes.get(2)? }),
        0x90 => {
            let velocity = *bytes.get(2)?;
            let kind = if velocity == 0 { MidiEventKind::NoteOff } else { MidiEventKind::NoteOn };
            Some(RawEvent { kind, channel, arg1, arg2: velocity })
        }
        0xb0 => Some(RawEvent { kind: MidiEventKind::ControlChange, channel, arg1, arg2: *bytes.get(2)? }),
        0xc0 => Some(RawEvent { kind: MidiEventKind::ProgramChange, channel, arg1, arg2: 0 }),
        0xe0 => Some(RawEvent { kind: MidiEventKind::PitchBend, channel, arg1, arg2: *bytes.get(2)? }),
        _ => None,
    }
}

/// Owns a `midir` input connection and the target voice events get sent to.
pub struct MidiDriver {
    _connection: Option<MidiInputConnection<()>>,
    rx: Receiver<RawEvent>,
    target: Handle,
}

impl MidiDriver {
    /// Opens the first available MIDI input port (or `port_spec` if given,
    /// matched by substring like the audio device specs), wiring its
    /// callback into a channel this driver's [`poll`](Self::poll) drains.
    pub fn open(port_spec: Option<&str>, target: Handle) -> Result<Self, String> {
        let input = MidiInput::new("audiality2").map_err(|e| e.to_string())?;
        let ports = input.ports();
        let port = match port_spec {
            Some(spec) => ports
                .iter()
                .find(|p| input.port_name(p).map(|n| n.to_lowercase().contains(&spec.to_lowercase())).unwrap_or(false))
                .ok_or_else(|| format!("MIDI port '{spec}' not found"))?,
            None => ports.first().ok_or("no MIDI input ports available")?,
        };

        let (tx, rx): (Sender<RawEvent>, Receiver<RawEvent>) = std::sync::mpsc::channel();
        let connection = input
            .connect(
                port,
                "audiality2-in",
                move |_stamp, bytes, _| {
                    if let Some(ev) = decode(bytes) {
                        let _ = tx.send(ev);
                    }
                },
                (),
            )
            .map_err(|e| e.to_string())?;

        Ok(Self { _connection: Some(connection), rx, target })
    }

    /// Drains events queued since the last call and posts one `Send`
    /// message per event to `sender`, timestamped at `now`.
    pub fn poll(&mut self, sender: &mut MessageSender, now: Timestamp) {
        while let Ok(ev) = self.rx.try_recv() {
            let args = vec![
                Reg::from_f32(ev.kind as i32 as f32).0,
                Reg::from_f32(ev.channel as f32).0,
                Reg::from_f32(ev.arg1 as f32).0,
                Reg::from_f32(ev.arg2 as f32).0,
            ];
            let _ = sender.send(Message::Send { target: self.target, entry: MIDI_ENTRY_POINT, args, timestamp: now });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_note_on_and_off() {
        let on = decode(&[0x90, 60, 100]).unwrap();
        assert_eq!(on.kind, MidiEventKind::NoteOn);
        assert_eq!(on.arg1, 60);

        let zero_velocity = decode(&[0x90, 60, 0]).unwrap();
        assert_eq!(zero_velocity.kind, MidiEventKind::NoteOff);

        let off = decode(&[0x80, 60, 0]).unwrap();
        assert_eq!(off.kind, MidiEventKind::NoteOff);
    }

    #[test]
    fn decodes_control_change() {
        let cc = decode(&[0xb0, 7, 127]).unwrap();
        assert_eq!(cc.kind, MidiEventKind::ControlChange);
        assert_eq!(cc.arg1, 7);
        assert_eq!(cc.arg2, 127);
    }

    #[test]
    fn unknown_status_byte_is_ignored() {
        assert!(decode(&[0xf8]).is_none());
    }
}
