// sv_edict.rs -- entity dictionary: edict slots and their lifecycle
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use mlua::{Lua, Value};
use qwlua_common::common::com_warning;
use qwlua_common::q_shared::VEC3_ORIGIN;
use rayon::prelude::*;

use crate::pr_edict::EdictUd;
use crate::pr_fields::EntVars;
use crate::pr_registry::{HandleId, HandleRegistry, OwnedHandle};
use crate::server::{Server, SvError, SvResult};

/// Within this much server time the cooldown on freed slots is waived.
pub const ALLOC_WARMUP_TIME: f64 = 2.0;

/// How long a freed slot rests before it can be handed out again.
pub const ALLOC_REUSE_DELAY: f64 = 0.5;

// ============================================================
// edict_t
// ============================================================

#[derive(Debug, Default)]
pub struct Edict {
    pub free: bool,
    /// sv.time when the edict was freed
    pub freetime: f64,
    pub v: EntVars,

    /// Canonical bridge object for this slot, created once and kept for
    /// the life of the progs VM.
    handle: Option<OwnedHandle>,
    /// Overflow table for keys without native storage.
    fields: Option<OwnedHandle>,
}

impl Edict {
    pub fn handle(&self) -> Option<HandleId> {
        self.handle.as_ref().map(OwnedHandle::id)
    }

    pub fn fields(&self) -> Option<HandleId> {
        self.fields.as_ref().map(OwnedHandle::id)
    }
}

// ============================================================
// Edict store
// ============================================================

/// Fixed-capacity edict array. Slot 0 is the world, slots
/// 1..=max_clients belong to players.
#[derive(Debug)]
pub struct EdictStore {
    edicts: Vec<Edict>,
    num_edicts: usize,
    max_clients: usize,
}

impl EdictStore {
    pub fn new(max_edicts: usize, max_clients: usize) -> Self {
        let mut store = Self {
            edicts: Vec::with_capacity(max_edicts),
            num_edicts: 0,
            max_clients,
        };
        store.edicts.resize_with(max_edicts, Edict::default);
        store.reset_slots();
        store
    }

    fn reset_slots(&mut self) {
        let reserved = self.max_clients;
        self.edicts.par_iter_mut().enumerate().for_each(|(i, e)| {
            e.free = i > reserved;
            e.freetime = 0.0;
            e.v = EntVars::default();
        });
        self.num_edicts = (self.max_clients + 1).min(self.edicts.len());
    }

    /// EDICT_NUM
    pub fn edict_num(&self, n: usize) -> SvResult<&Edict> {
        self.edicts.get(n).ok_or(SvError::BadEdictNum(n))
    }

    pub fn edict_num_mut(&mut self, n: usize) -> SvResult<&mut Edict> {
        self.edicts.get_mut(n).ok_or(SvError::BadEdictNum(n))
    }

    /// Number of slots in use, i.e. one past the highest slot ever handed out.
    pub fn num_edicts(&self) -> usize {
        self.num_edicts
    }

    pub fn max_edicts(&self) -> usize {
        self.edicts.len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Edicts currently in use, in index order.
    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &Edict)> {
        self.edicts[..self.num_edicts]
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.free)
    }
}

// ============================================================
// Lifecycle
// ============================================================

/// Create the canonical handle and the overflow table of edict `n` if
/// they don't exist yet.
pub fn ed_ensure_fields(lua: &Lua, sv: &mut Server, n: usize) -> SvResult<()> {
    let Server {
        edicts, registry, ..
    } = sv;
    let ed = edicts.edict_num_mut(n)?;

    if ed.handle.is_none() {
        let ud = lua.create_userdata(EdictUd(n))?;
        ed.handle = Some(registry.acquire(Value::UserData(ud)));
    }

    if ed.fields.is_none() {
        let table = lua.create_table()?;
        ed.fields = Some(registry.acquire(Value::Table(table)));
    }

    Ok(())
}

fn release_refs(registry: &mut HandleRegistry, ed: &mut Edict) {
    for h in ed.v.take_owned() {
        registry.release(h);
    }
}

/// ED_ClearEdict
///
/// Marks the edict in use and resets its native block. The overflow table
/// is replaced by a new, empty one.
pub fn ed_clear_edict(lua: &Lua, sv: &mut Server, n: usize) -> SvResult<()> {
    {
        let Server {
            edicts, registry, ..
        } = &mut *sv;
        let ed = edicts.edict_num_mut(n)?;

        ed.free = false;
        release_refs(registry, ed);
        ed.v = EntVars::default();

        if let Some(fields) = ed.fields.take() {
            registry.release(fields);
        }
    }

    ed_ensure_fields(lua, sv, n)
}

/// ED_Alloc
///
/// Either finds a free edict, or allocates a new one. A recently freed
/// edict is not reused right away: the client would see the old entity
/// morph into the new one and interpolate angles and trails across them.
pub fn ed_alloc(lua: &Lua, sv: &mut Server) -> SvResult<usize> {
    let time = sv.time;
    let first = sv.edicts.max_clients + 1;
    let num_edicts = sv.edicts.num_edicts;

    // the first couple seconds of server time can involve a lot of
    // freeing and allocating, so relax the replacement policy
    let reusable = (first..num_edicts).find(|&i| {
        let e = &sv.edicts.edicts[i];
        e.free && (time < ALLOC_WARMUP_TIME || time - e.freetime > ALLOC_REUSE_DELAY)
    });

    let n = match reusable {
        Some(i) => i,
        None if num_edicts >= sv.edicts.max_edicts() => {
            com_warning("WARNING: ED_Alloc: no free edicts");
            // step on whatever is the last edict, unless that is the world
            // or a client
            let last = sv
                .edicts
                .max_edicts()
                .checked_sub(1)
                .filter(|&last| last >= first)
                .ok_or(SvError::NoFreeEdicts)?;
            sv.area.unlink_edict(last);
            last
        }
        None => {
            sv.edicts.num_edicts += 1;
            num_edicts
        }
    };

    ed_clear_edict(lua, sv, n)?;
    Ok(n)
}

/// ED_Free
///
/// Marks the edict as free. Other edicts still pointing at it keep their
/// references.
pub fn ed_free(sv: &mut Server, n: usize) -> SvResult<()> {
    let Server {
        edicts,
        registry,
        area,
        time,
        ..
    } = sv;
    let ed = edicts.edict_num_mut(n)?;

    area.unlink_edict(n); // unlink from world bsp

    release_refs(registry, ed);

    ed.free = true;
    ed.v.takedamage = 0.0;
    ed.v.modelindex = 0.0;
    ed.v.colormap = 0.0;
    ed.v.skin = 0.0;
    ed.v.frame = 0.0;
    ed.v.origin = VEC3_ORIGIN;
    ed.v.angles = VEC3_ORIGIN;
    ed.v.nextthink = -1.0;
    ed.v.solid = 0.0;

    ed.freetime = *time;
    Ok(())
}

/// Wipe every slot for a new level. Canonical handles survive; native
/// blocks and overflow tables do not.
pub fn sv_reset_edicts(sv: &mut Server) {
    let Server {
        edicts,
        registry,
        area,
        ..
    } = sv;

    for (n, ed) in edicts.edicts.iter_mut().enumerate() {
        area.unlink_edict(n);
        release_refs(registry, ed);
        if let Some(fields) = ed.fields.take() {
            registry.release(fields);
        }
    }

    edicts.reset_slots();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{sv_mut, test_vm};
    use crate::sv_world::WorldLink;

    #[test]
    fn test_store_initial_state() {
        let store = EdictStore::new(16, 4);
        assert_eq!(store.num_edicts(), 5);
        assert_eq!(store.max_edicts(), 16);
        for i in 0..=4 {
            assert!(!store.edict_num(i).unwrap().free);
        }
        assert!(store.edict_num(5).unwrap().free);
        assert!(matches!(store.edict_num(16), Err(SvError::BadEdictNum(16))));
    }

    #[test]
    fn test_alloc_skips_reserved_slots() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        let n = ed_alloc(&lua, &mut sv).unwrap();
        assert_eq!(n, 5);
        assert_eq!(sv.edicts.num_edicts(), 6);
        let ed = sv.edicts.edict_num(n).unwrap();
        assert!(!ed.free);
        assert!(ed.handle().is_some());
        assert!(ed.fields().is_some());
    }

    #[test]
    fn test_alloc_reuses_during_warmup() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        sv.time = 1.0;
        let a = ed_alloc(&lua, &mut sv).unwrap();
        ed_free(&mut sv, a).unwrap();
        let b = ed_alloc(&lua, &mut sv).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_alloc_respects_reuse_delay() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        sv.time = 10.0;
        let a = ed_alloc(&lua, &mut sv).unwrap();
        ed_free(&mut sv, a).unwrap();

        sv.time = 10.3;
        let b = ed_alloc(&lua, &mut sv).unwrap();
        assert_ne!(a, b);

        sv.time = 10.6;
        let c = ed_alloc(&lua, &mut sv).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_alloc_keeps_canonical_handle() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        let a = ed_alloc(&lua, &mut sv).unwrap();
        let handle = sv.edicts.edict_num(a).unwrap().handle();
        let live = sv.registry.len();
        ed_free(&mut sv, a).unwrap();
        let b = ed_alloc(&lua, &mut sv).unwrap();
        assert_eq!(a, b);
        assert_eq!(sv.edicts.edict_num(b).unwrap().handle(), handle);
        assert!(sv.edicts.edict_num(b).unwrap().fields().is_some());
        // old overflow table released, new one acquired
        assert_eq!(sv.registry.len(), live);
    }

    #[test]
    fn test_alloc_at_capacity_steps_on_last() {
        let lua = test_vm(8, 2);
        let mut sv = sv_mut(&lua).unwrap();
        sv.time = 10.0;
        let mut got = Vec::new();
        for _ in 3..8 {
            got.push(ed_alloc(&lua, &mut sv).unwrap());
        }
        assert_eq!(got, vec![3, 4, 5, 6, 7]);
        assert_eq!(sv.edicts.num_edicts(), 8);

        sv.area.link_edict(7);
        let n = ed_alloc(&lua, &mut sv).unwrap();
        assert_eq!(n, 7);
        assert_eq!(sv.edicts.num_edicts(), 8);
        assert!(!sv.area.is_linked(7));
    }

    #[test]
    fn test_alloc_never_steps_on_clients() {
        let lua = test_vm(3, 2);
        let mut sv = sv_mut(&lua).unwrap();
        sv.time = 10.0;
        let handle = sv.edicts.edict_num(2).unwrap().handle();
        assert!(matches!(ed_alloc(&lua, &mut sv), Err(SvError::NoFreeEdicts)));
        assert_eq!(sv.edicts.num_edicts(), 3);
        assert!(!sv.edicts.edict_num(2).unwrap().free);
        assert_eq!(sv.edicts.edict_num(2).unwrap().handle(), handle);

        let lua = test_vm(2, 4);
        let mut sv = sv_mut(&lua).unwrap();
        assert!(matches!(ed_alloc(&lua, &mut sv), Err(SvError::NoFreeEdicts)));
    }

    #[test]
    fn test_free_resets_identity_fields() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        sv.time = 3.5;
        let n = ed_alloc(&lua, &mut sv).unwrap();
        let model = sv.registry.acquire(Value::Boolean(true));
        {
            let ed = sv.edicts.edict_num_mut(n).unwrap();
            ed.v.model = Some(model);
            ed.v.frame = 3.0;
            ed.v.origin = [1.0, 2.0, 3.0];
            ed.v.health = 50.0;
        }
        sv.area.link_edict(n);
        let live = sv.registry.len();

        ed_free(&mut sv, n).unwrap();

        let ed = sv.edicts.edict_num(n).unwrap();
        assert!(ed.free);
        assert_eq!(ed.freetime, 3.5);
        assert!(ed.v.model.is_none());
        assert_eq!(ed.v.frame, 0.0);
        assert_eq!(ed.v.origin, VEC3_ORIGIN);
        assert_eq!(ed.v.nextthink, -1.0);
        // not an identity field
        assert_eq!(ed.v.health, 50.0);
        assert_eq!(sv.registry.len(), live - 1);
        assert!(!sv.area.is_linked(n));
    }

    #[test]
    fn test_clear_releases_refs_and_replaces_fields() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        let n = ed_alloc(&lua, &mut sv).unwrap();
        let live = sv.registry.len();

        let think = sv.registry.acquire(Value::Boolean(true));
        sv.edicts.edict_num_mut(n).unwrap().v.think = Some(think);
        ed_clear_edict(&lua, &mut sv, n).unwrap();

        let ed = sv.edicts.edict_num(n).unwrap();
        assert!(ed.v.think.is_none());
        assert_eq!(sv.registry.len(), live);
    }

    #[test]
    fn test_reset_edicts() {
        let lua = test_vm(16, 4);
        let mut sv = sv_mut(&lua).unwrap();
        for _ in 0..5 {
            ed_alloc(&lua, &mut sv).unwrap();
        }
        let handles = sv.edicts.iter_active().filter(|(_, e)| e.handle().is_some()).count();
        assert_eq!(handles, 5);

        sv_reset_edicts(&mut sv);
        assert_eq!(sv.edicts.num_edicts(), 5);
        assert_eq!(sv.registry.len(), 5);
        assert!(sv.edicts.edict_num(5).unwrap().free);
        assert!(sv.edicts.edict_num(5).unwrap().fields().is_none());
    }
}
