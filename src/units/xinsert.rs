//! xinsert: hosts pluggable client callbacks for audio taps, sinks,
//! sources, and inserts.

use crate::unit::{ControlBank, ControlOutput, ControlRegister, UnitDescriptor, UnitFlags, UnitState};

macro_rules! bitflags_client {
    (pub struct $name:ident: $ty:ty { $(const $flag:ident = $value:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);
        impl $name {
            $(pub const $flag: $name = $name($value);)*
            pub const fn empty() -> Self { $name(0) }
            pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
        }
    };
}

bitflags_client! {
    pub struct ClientFlags: u8 {
        const READ   = 0x01;
        const WRITE  = 0x02;
        const STREAM = 0x04;
        const SILENT = 0x08;
    }
}

/// One attached xinsert client: a tap/sink (reads voice audio), a source
/// (writes into voice audio), or a full insert (both), with its data
/// ferried through a lock-free FIFO.
pub struct Client {
    pub flags: ClientFlags,
    pub fifo_tx: ringbuf::HeapProd<f32>,
    pub fifo_rx: ringbuf::HeapCons<f32>,
}

impl Client {
    pub fn new(flags: ClientFlags, fifo_capacity: usize) -> Self {
        let rb = ringbuf::HeapRb::<f32>::new(fifo_capacity);
        let (fifo_tx, fifo_rx) = ringbuf::traits::Split::split(rb);
        Self { flags, fifo_tx, fifo_rx }
    }
}

/// The unit itself: a client list plus the two `Process` variants chosen
/// by whether any client writes.
#[derive(Default)]
struct XInsert {
    clients: Vec<Client>,
}

impl UnitState for XInsert {
    fn process(
        &mut self,
        _controls: &mut ControlBank,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        frames: usize,
        additive: bool,
    ) {
        use ringbuf::traits::{Consumer, Producer};

        let has_writer = self.clients.iter().any(|c| c.flags.contains(ClientFlags::WRITE));

        for i in 0..frames {
            let mut sample = inputs[0][offset + i];
            for client in &mut self.clients {
                if client.flags.contains(ClientFlags::READ) {
                    let _ = client.fifo_tx.try_push(sample);
                }
            }
            if has_writer {
                for client in &mut self.clients {
                    if client.flags.contains(ClientFlags::WRITE) {
                        if let Some(injected) = client.fifo_rx.try_pop() {
                            sample = injected;
                        }
                    }
                }
            }
            for ch in outputs.iter_mut() {
                if additive {
                    ch[offset + i] += sample;
                } else {
                    ch[offset + i] = sample;
                }
            }
        }
    }
}

fn build(_initial: &[f32]) -> Box<dyn UnitState> {
    Box::new(XInsert::default())
}

pub static DESCRIPTOR: UnitDescriptor = UnitDescriptor {
    name: "xinsert",
    flags: UnitFlags::XINSERT,
    registers: &[ControlRegister { name: "bypass", ramped: false }],
    control_outputs: &[ControlOutput { name: "out" }],
    min_inputs: 1,
    max_inputs: 2,
    min_outputs: 1,
    max_outputs: 2,
    build,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_client_is_a_pure_tap() {
        let mut x = XInsert { clients: vec![Client::new(ClientFlags::READ, 64)] };
        let mut controls = ControlBank::new(&[0.0]);
        controls.prepare(4);
        let input = [1.0f32, 2.0, 3.0, 4.0];
        let mut out = [0.0f32; 4];
        x.process(&mut controls, &[&input], &mut [&mut out], 0, 4, false);
        assert_eq!(out, input);
    }

    #[test]
    fn write_client_overrides_passthrough() {
        use ringbuf::traits::Producer;
        let mut client = Client::new(ClientFlags::WRITE, 64);
        for _ in 0..4 {
            client.fifo_tx.try_push(9.0).unwrap();
        }
        let mut x = XInsert { clients: vec![client] };
        let mut controls = ControlBank::new(&[0.0]);
        controls.prepare(4);
        let input = [1.0f32, 2.0, 3.0, 4.0];
        let mut out = [0.0f32; 4];
        x.process(&mut controls, &[&input], &mut [&mut out], 0, 4, false);
        assert_eq!(out, [9.0, 9.0, 9.0, 9.0]);
    }
}
