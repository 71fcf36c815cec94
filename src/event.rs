//! Timestamp-ordered per-voice event queues.

use std::collections::VecDeque;

use crate::types::Timestamp;

/// Action carried by an event, with its payload folded in -- a tagged sum
/// in place of the source's payload union (§9 design note).
#[derive(Debug, Clone)]
pub enum EventBody {
    /// Spawn a detached subvoice under the target voice.
    Play { program: crate::handle::Handle, entry: u8, args: Vec<i32> },
    /// Spawn an attached subvoice bound to a pre-allocated "new-voice" handle.
    Start { program: crate::handle::Handle, entry: u8, args: Vec<i32>, handle: crate::handle::Handle },
    /// Invoke a message handler on the target voice itself.
    Send { entry: u8, args: Vec<i32> },
    /// Invoke a message handler on a named subvoice (by VID).
    SendSub { vid: u32, entry: u8, args: Vec<i32> },
    /// Hard-stop the target voice.
    Kill,
    /// Hard-stop a named subvoice.
    KillSub { vid: u32 },
    /// Attach an xinsert client to the target voice's xinsert unit.
    AddXIC { client: crate::handle::Handle },
    /// Detach a previously attached xinsert client.
    RemoveXIC { client: crate::handle::Handle },
    /// Final release of an API-owned voice handle.
    Release,
    /// When-all-have-processed barrier, echoed back once processed.
    Wahp { token: u64 },
}

/// A single queued event: action plus the timestamp it is due at.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: Timestamp,
    pub body: EventBody,
}

/// Strictly timestamp-ordered queue of pending events for one voice.
///
/// Backed by a `VecDeque` rather than the source's intrusive single-linked
/// list plus free-list pool -- allocation happens only on API-thread
/// `send`, never while the engine thread drains events mid-fragment.
#[derive(Debug, Default)]
pub struct EventQueue {
    items: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    /// Inserts `e` keeping the queue non-decreasing in timestamp. Equal-timestamp events stay FIFO relative to each other.
    pub fn insert(&mut self, e: Event) {
        let pos = self
            .items
            .iter()
            .position(|existing| existing.timestamp > e.timestamp)
            .unwrap_or(self.items.len());
        self.items.insert(pos, e);
    }

    pub fn peek_timestamp(&self) -> Option<Timestamp> {
        self.items.front().map(|e| e.timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pops the next event if its timestamp is `<= now`. An event whose
    /// timestamp is strictly before `now` is "late"; the caller is expected
    /// to clamp and log it.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<Event> {
        if self.items.front().map(|e| e.timestamp <= now).unwrap_or(false) {
            self.items.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ts: i64) -> Event {
        Event { timestamp: Timestamp::from_frac(ts), body: EventBody::Kill }
    }

    #[test]
    fn stays_ordered_on_out_of_order_insert() {
        let mut q = EventQueue::new();
        q.insert(ev(30));
        q.insert(ev(10));
        q.insert(ev(20));
        let mut out = Vec::new();
        while let Some(e) = q.pop_due(Timestamp::from_frac(100)) {
            out.push(e.timestamp.raw());
        }
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn equal_timestamps_stay_fifo() {
        let mut q = EventQueue::new();
        q.insert(Event { timestamp: Timestamp::from_frac(5), body: EventBody::Send { entry: 1, args: vec![] } });
        q.insert(Event { timestamp: Timestamp::from_frac(5), body: EventBody::Send { entry: 2, args: vec![] } });
        let a = q.pop_due(Timestamp::from_frac(5)).unwrap();
        let b = q.pop_due(Timestamp::from_frac(5)).unwrap();
        assert!(matches!(a.body, EventBody::Send { entry: 1, .. }));
        assert!(matches!(b.body, EventBody::Send { entry: 2, .. }));
    }

    #[test]
    fn pop_due_respects_now() {
        let mut q = EventQueue::new();
        q.insert(ev(50));
        assert!(q.pop_due(Timestamp::from_frac(49)).is_none());
        assert!(q.pop_due(Timestamp::from_frac(50)).is_some());
    }
}
