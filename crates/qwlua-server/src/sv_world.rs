// sv_world.rs -- world linking interface used by the edict lifecycle
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.
//
// The area node tree, box queries and tracing belong to the physics code.
// The edict lifecycle only needs to pull an entity out of the world before
// its slot is freed or reused.

/// Spatial partitioning seen from the edict store.
pub trait WorldLink {
    /// Link an edict into the world at its current bounds.
    fn link_edict(&mut self, ent: usize);

    /// Remove an edict from the world. Unlinking an edict that is not linked
    /// is a no-op.
    fn unlink_edict(&mut self, ent: usize);

    fn is_linked(&self, ent: usize) -> bool;
}

/// Flat linkage table, one flag per edict slot.
#[derive(Debug, Clone)]
pub struct AreaLinks {
    linked: Vec<bool>,
}

impl AreaLinks {
    pub fn new(max_edicts: usize) -> Self {
        Self {
            linked: vec![false; max_edicts],
        }
    }
}

impl WorldLink for AreaLinks {
    fn link_edict(&mut self, ent: usize) {
        if ent == 0 {
            return; // don't add the world
        }
        if let Some(l) = self.linked.get_mut(ent) {
            *l = true;
        }
    }

    fn unlink_edict(&mut self, ent: usize) {
        if let Some(l) = self.linked.get_mut(ent) {
            *l = false;
        }
    }

    fn is_linked(&self, ent: usize) -> bool {
        self.linked.get(ent).copied().unwrap_or(false)
    }
}
