//! Typed, reference-counted handle table.
//!
//! A [`Handle`] is just an index plus a generation tag; the table behind it
//! is the only place that mutates reference counts, and destruction of a
//! "refuse"-class object (voices, xinsert clients) is deferred across a
//! round trip instead of happening inline.

use std::fmt;

use crate::error::{A2Error, A2Result};

/// One of the object kinds a handle can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Bank,
    Wave,
    Program,
    UnitDescriptor,
    String,
    Constant,
    Stream,
    XInsertClient,
    /// Placeholder for a voice whose instantiation is in flight.
    NewVoice,
    Voice,
    /// Tombstone: payload destroyed engine-side, API references remain.
    Detached,
}

/// A minimal bitflags-like macro, kept in-crate so the handle table has no
/// dependency on an external bitflags crate for eight bits of state.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub const fn empty() -> Self { $name(0) }
            pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
            pub fn insert(&mut self, other: Self) { self.0 |= other.0; }
            pub fn remove(&mut self, other: Self) { self.0 &= !other.0; }
            pub const fn bits(self) -> $ty { self.0 }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self { $name(self.0 | rhs.0) }
        }
    };
}

bitflags_lite! {
    /// User-visible flag bits carried alongside the refcount.
    pub struct UserFlags: u8 {
        const LOCKED    = 0x01;
        const API_OWNED = 0x02;
        const ATTACHED  = 0x04;
    }
}

/// Index into the handle table. Does not carry a generation counter itself
/// -- the table retypes freed slots to `Detached` rather than reusing them
/// while any handle might still reference the old generation, matching the
/// "weak index, not owning pointer" design note (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a destructor did when the refcount dropped to zero.
pub enum DestroyOutcome {
    /// Object was destroyed immediately; the slot is free for reuse.
    Destroyed,
    /// Object needs a round trip through the engine context; retain the
    /// slot, but retype it to `Detached` once `confirm_detached` is called.
    Refuse,
}

struct Slot<T> {
    otype: ObjectType,
    flags: UserFlags,
    refcount: u32,
    payload: Option<T>,
    /// Free-list link, valid only when `payload` is `None` and the slot
    /// isn't `Detached`.
    next_free: Option<u32>,
}

/// Fixed-capacity growable table of handle slots.
///
/// Generic over the payload type so the engine can keep one table per
/// concrete object representation; [`crate::state::State`] holds one
/// instance per object kind it manages directly (banks, waves, programs)
/// plus one [`HandleTable<Voice>`](crate::voice::Voice) per engine context.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            slots: Vec::with_capacity(cap),
            free_head: None,
        }
    }

    /// Allocates a new handle for `payload`, returning its index.
    pub fn new_handle(
        &mut self,
        payload: T,
        otype: ObjectType,
        flags: UserFlags,
        initial_refcount: u32,
    ) -> Handle {
        let slot = Slot {
            otype,
            flags,
            refcount: initial_refcount,
            payload: Some(payload),
            next_free: None,
        };
        if let Some(idx) = self.free_head {
            let old_next = self.slots[idx as usize].next_free;
            self.free_head = old_next;
            self.slots[idx as usize] = slot;
            Handle(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(slot);
            Handle(idx)
        }
    }

    fn slot(&self, h: Handle) -> Option<&Slot<T>> {
        self.slots.get(h.0 as usize).filter(|s| s.payload.is_some())
    }

    fn slot_mut(&mut self, h: Handle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(h.0 as usize)
            .filter(|s| s.payload.is_some())
    }

    /// Reachable iff refcount>0 or LOCKED is set.
    pub fn get(&self, h: Handle) -> Option<&T> {
        let slot = self.slot(h)?;
        if slot.refcount > 0 || slot.flags.contains(UserFlags::LOCKED) {
            slot.payload.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, h: Handle) -> Option<&mut T> {
        let slot = self.slot_mut(h)?;
        if slot.refcount > 0 || slot.flags.contains(UserFlags::LOCKED) {
            slot.payload.as_mut()
        } else {
            None
        }
    }

    pub fn type_of(&self, h: Handle) -> Option<ObjectType> {
        self.slots.get(h.0 as usize).map(|s| s.otype)
    }

    pub fn flags(&self, h: Handle) -> Option<UserFlags> {
        self.slots.get(h.0 as usize).map(|s| s.flags)
    }

    pub fn set_flags(&mut self, h: Handle, flags: UserFlags) -> A2Result<()> {
        let slot = self
            .slots
            .get_mut(h.0 as usize)
            .ok_or(A2Error::InvalidHandle)?;
        slot.flags.insert(flags);
        Ok(())
    }

    pub fn retain(&mut self, h: Handle) -> A2Result<()> {
        let slot = self
            .slots
            .get_mut(h.0 as usize)
            .filter(|s| s.payload.is_some())
            .ok_or(A2Error::InvalidHandle)?;
        slot.refcount += 1;
        Ok(())
    }

    /// Decrements the refcount. If it reaches zero, calls `destroy` on the
    /// payload; if `destroy` returns `Refuse`, the slot is kept alive
    /// (detached payload stays put) until [`Self::confirm_detached`] is
    /// called by the engine once the round trip completes.
    pub fn release(
        &mut self,
        h: Handle,
        destroy: impl FnOnce(&mut T) -> DestroyOutcome,
    ) -> A2Result<()> {
        let idx = h.0 as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .filter(|s| s.payload.is_some())
            .ok_or(A2Error::InvalidHandle)?;
        if slot.refcount == 0 {
            return Err(A2Error::DeadHandle);
        }
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return Ok(());
        }
        let payload = slot.payload.as_mut().expect("checked Some above");
        match destroy(payload) {
            DestroyOutcome::Destroyed => self.free_slot(idx),
            DestroyOutcome::Refuse => {
                self.slots[idx].otype = ObjectType::Detached;
            }
        }
        Ok(())
    }

    /// Engine confirms an earlier `Refuse` destruction has completed; the
    /// slot becomes free and subsequent `get()`s fail gracefully.
    pub fn confirm_detached(&mut self, h: Handle) {
        let idx = h.0 as usize;
        if let Some(slot) = self.slots.get(idx) {
            if matches!(slot.otype, ObjectType::Detached) {
                self.free_slot(idx);
            }
        }
    }

    /// Forced, engine-side free -- bypasses refcounting entirely.
    pub fn force_free(&mut self, h: Handle) {
        self.free_slot(h.0 as usize);
    }

    fn free_slot(&mut self, idx: usize) {
        if idx >= self.slots.len() {
            return;
        }
        self.slots[idx].payload = None;
        self.slots[idx].next_free = self.free_head;
        self.free_head = Some(idx as u32);
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.payload.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachable_iff_refcount_or_locked() {
        let mut t: HandleTable<i32> = HandleTable::new();
        let h = t.new_handle(42, ObjectType::Constant, UserFlags::empty(), 1);
        assert_eq!(t.get(h), Some(&42));
        t.release(h, |_| DestroyOutcome::Destroyed).unwrap();
        assert_eq!(t.get(h), None);
    }

    #[test]
    fn locked_survives_zero_refcount() {
        let mut t: HandleTable<i32> = HandleTable::new();
        let h = t.new_handle(7, ObjectType::Constant, UserFlags::LOCKED, 1);
        t.release(h, |_| DestroyOutcome::Destroyed).unwrap();
        assert_eq!(t.get(h), Some(&7));
    }

    #[test]
    fn refuse_defers_to_detached_then_free() {
        let mut t: HandleTable<i32> = HandleTable::new();
        let h = t.new_handle(1, ObjectType::Voice, UserFlags::empty(), 1);
        t.release(h, |_| DestroyOutcome::Refuse).unwrap();
        assert_eq!(t.type_of(h), Some(ObjectType::Detached));
        assert_eq!(t.get(h), None);
        t.confirm_detached(h);
        assert_eq!(t.type_of(h), None);
    }

    #[test]
    fn double_release_is_dead_handle() {
        let mut t: HandleTable<i32> = HandleTable::new();
        let h = t.new_handle(1, ObjectType::Constant, UserFlags::empty(), 1);
        t.release(h, |_| DestroyOutcome::Destroyed).unwrap();
        assert_eq!(
            t.release(h, |_| DestroyOutcome::Destroyed),
            Err(A2Error::InvalidHandle)
        );
    }

    #[test]
    fn freed_slots_are_recycled() {
        let mut t: HandleTable<i32> = HandleTable::new();
        let h1 = t.new_handle(1, ObjectType::Constant, UserFlags::empty(), 1);
        t.release(h1, |_| DestroyOutcome::Destroyed).unwrap();
        let h2 = t.new_handle(2, ObjectType::Constant, UserFlags::empty(), 1);
        assert_eq!(h1, h2);
    }
}
