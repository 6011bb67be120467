// pr_registry.rs -- handle registry holding every Lua value the server refers to
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use mlua::Value;
use std::fmt;
use std::num::NonZeroU32;

use crate::server::{SvError, SvResult};

/// Non-owning reference to a registry slot. Zero is never a valid id, so
/// `Option<HandleId>` stands in for the "no reference" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(NonZeroU32);

impl HandleId {
    pub fn get(self) -> u32 {
        self.0.get()
    }

    fn slot(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning reference to a registry slot. Not `Clone`: whoever holds it must
/// hand it back through [`HandleRegistry::release`] exactly once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an owned handle leaks its registry slot unless released"]
pub struct OwnedHandle(HandleId);

impl OwnedHandle {
    pub fn id(&self) -> HandleId {
        self.0
    }
}

/// Integer-keyed slots holding arbitrary Lua values. Released ids are
/// recycled for later acquisitions.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    slots: Vec<Option<Value>>,
    free_slots: Vec<usize>,
    live: usize,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and take ownership of the new slot.
    pub fn acquire(&mut self, value: Value) -> OwnedHandle {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };
        self.live += 1;

        // slot + 1 is never zero
        let id = NonZeroU32::new(slot as u32 + 1).unwrap_or(NonZeroU32::MIN);
        OwnedHandle(HandleId(id))
    }

    /// Drop the registry's reference to the value behind `handle`.
    pub fn release(&mut self, handle: OwnedHandle) {
        let slot = handle.id().slot();
        match self.slots.get_mut(slot) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                self.free_slots.push(slot);
                self.live -= 1;
            }
            _ => log::error!("HandleRegistry: released handle {} twice", handle.id()),
        }
    }

    /// Fetch the value behind a live handle. Reading a released slot means
    /// somebody kept an id past its owner's release.
    pub fn get(&self, id: HandleId) -> SvResult<Value> {
        self.slots
            .get(id.slot())
            .and_then(|entry| entry.clone())
            .ok_or(SvError::StaleHandle(id.get()))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
