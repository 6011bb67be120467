// pr_fields.rs -- native entity variables and their descriptor table
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use qwlua_common::q_shared::Vec3;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::pr_registry::{HandleId, OwnedHandle};

// ============================================================
// Field kinds
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Vector,
    Boolean,
    /// string held through an owned registry handle
    Str,
    /// callback (or any other Lua value) held through an owned registry handle
    Func,
    /// borrowed canonical handle of another edict
    Edict,
}

/// Static descriptor of one hot field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Read-only copy of a hot field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f32),
    Vector(Vec3),
    Boolean(bool),
    Str(Option<HandleId>),
    Func(Option<HandleId>),
    Edict(Option<HandleId>),
}

/// Mutable access to the storage of a hot field.
#[derive(Debug)]
pub enum FieldMut<'a> {
    Float(&'a mut f32),
    Vector(&'a mut Vec3),
    Boolean(&'a mut bool),
    Str(&'a mut Option<OwnedHandle>),
    Func(&'a mut Option<OwnedHandle>),
    Edict(&'a mut Option<HandleId>),
}

// ============================================================
// entvars_t
// ============================================================

macro_rules! entvar_type {
    (Float) => { f32 };
    (Vector) => { Vec3 };
    (Boolean) => { bool };
    (Str) => { Option<OwnedHandle> };
    (Func) => { Option<OwnedHandle> };
    (Edict) => { Option<HandleId> };
}

macro_rules! entvar_value {
    (Float, $v:expr) => { FieldValue::Float($v) };
    (Vector, $v:expr) => { FieldValue::Vector($v) };
    (Boolean, $v:expr) => { FieldValue::Boolean($v) };
    (Str, $v:expr) => { FieldValue::Str($v.as_ref().map(OwnedHandle::id)) };
    (Func, $v:expr) => { FieldValue::Func($v.as_ref().map(OwnedHandle::id)) };
    (Edict, $v:expr) => { FieldValue::Edict($v) };
}

macro_rules! entvars {
    ($($key:literal => $name:ident : $kind:ident),* $(,)?) => {
        /// The fixed block of native entity variables.
        #[derive(Debug, Default)]
        pub struct EntVars {
            $(pub $name: entvar_type!($kind),)*
        }

        /// Every hot field, in declaration order.
        pub static FIELDS: &[FieldDef] = &[
            $(FieldDef { name: $key, kind: FieldKind::$kind },)*
        ];

        impl EntVars {
            /// Copy out the hot field called `key`.
            pub fn field(&self, key: &str) -> Option<FieldValue> {
                match key {
                    $($key => Some(entvar_value!($kind, self.$name)),)*
                    _ => None,
                }
            }

            /// Borrow the storage of the hot field called `key`.
            pub fn field_mut(&mut self, key: &str) -> Option<FieldMut<'_>> {
                match key {
                    $($key => Some(FieldMut::$kind(&mut self.$name)),)*
                    _ => None,
                }
            }

            /// All hot fields with their current values.
            pub fn values(&self) -> Vec<(&'static str, FieldValue)> {
                vec![$(($key, entvar_value!($kind, self.$name)),)*]
            }

            /// All hot fields, mutably.
            pub fn slots_mut(&mut self) -> Vec<(&'static str, FieldMut<'_>)> {
                vec![$(($key, FieldMut::$kind(&mut self.$name)),)*]
            }
        }
    };
}

entvars! {
    "modelindex"    => modelindex: Float,
    "absmin"        => absmin: Vector,
    "absmax"        => absmax: Vector,
    "ltime"         => ltime: Float,
    "lastruntime"   => lastruntime: Float,
    "movetype"      => movetype: Float,
    "solid"         => solid: Float,
    "origin"        => origin: Vector,
    "oldorigin"     => oldorigin: Vector,
    "velocity"      => velocity: Vector,
    "angles"        => angles: Vector,
    "avelocity"     => avelocity: Vector,
    "classname"     => classname: Str,
    "model"         => model: Str,
    "frame"         => frame: Float,
    "skin"          => skin: Float,
    "effects"       => effects: Float,
    "mins"          => mins: Vector,
    "maxs"          => maxs: Vector,
    "size"          => size: Vector,
    "touch"         => touch: Func,
    "use"           => use_fn: Func,
    "think"         => think: Func,
    "blocked"       => blocked: Func,
    "nextthink"     => nextthink: Float,
    "groundentity"  => groundentity: Edict,
    "health"        => health: Float,
    "frags"         => frags: Float,
    "weapon"        => weapon: Float,
    "weaponmodel"   => weaponmodel: Str,
    "weaponframe"   => weaponframe: Float,
    "currentammo"   => currentammo: Float,
    "ammo_shells"   => ammo_shells: Float,
    "ammo_nails"    => ammo_nails: Float,
    "ammo_rockets"  => ammo_rockets: Float,
    "ammo_cells"    => ammo_cells: Float,
    "items"         => items: Float,
    "takedamage"    => takedamage: Float,
    "chain"         => chain: Edict,
    "deadflag"      => deadflag: Float,
    "view_ofs"      => view_ofs: Vector,
    "button0"       => button0: Float,
    "button1"       => button1: Float,
    "button2"       => button2: Float,
    "impulse"       => impulse: Float,
    "fixangle"      => fixangle: Boolean,
    "v_angle"       => v_angle: Vector,
    "netname"       => netname: Str,
    "enemy"         => enemy: Edict,
    "flags"         => flags: Float,
    "colormap"      => colormap: Float,
    "team"          => team: Float,
    "max_health"    => max_health: Float,
    "teleport_time" => teleport_time: Float,
    "armortype"     => armortype: Float,
    "armorvalue"    => armorvalue: Float,
    "waterlevel"    => waterlevel: Float,
    "watertype"     => watertype: Float,
    "ideal_yaw"     => ideal_yaw: Float,
    "yaw_speed"     => yaw_speed: Float,
    "aiment"        => aiment: Edict,
    "goalentity"    => goalentity: Edict,
    "spawnflags"    => spawnflags: Float,
    "target"        => target: Str,
    "targetname"    => targetname: Str,
    "dmg_take"      => dmg_take: Float,
    "dmg_save"      => dmg_save: Float,
    "dmg_inflictor" => dmg_inflictor: Edict,
    "owner"         => owner: Edict,
    "movedir"       => movedir: Vector,
    "message"       => message: Str,
    "sounds"        => sounds: Float,
    "noise"         => noise: Str,
    "noise1"        => noise1: Str,
    "noise2"        => noise2: Str,
    "noise3"        => noise3: Str,
}

impl EntVars {
    /// Move every owned handle out of the block, leaving those slots empty.
    pub fn take_owned(&mut self) -> Vec<OwnedHandle> {
        self.slots_mut()
            .into_iter()
            .filter_map(|(_, slot)| match slot {
                FieldMut::Str(h) | FieldMut::Func(h) => h.take(),
                _ => None,
            })
            .collect()
    }
}

// ============================================================
// Descriptor lookup
// ============================================================

static FIELDS_INDEX: OnceLock<HashMap<&'static str, usize>> = OnceLock::new();

fn get_fields_index() -> &'static HashMap<&'static str, usize> {
    FIELDS_INDEX.get_or_init(|| FIELDS.iter().enumerate().map(|(i, f)| (f.name, i)).collect())
}

/// Descriptor of the hot field called `key`, `None` for overflow keys.
pub fn find_field(key: &str) -> Option<&'static FieldDef> {
    get_fields_index().get(key).map(|&i| &FIELDS[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pr_registry::HandleRegistry;
    use mlua::Value;

    #[test]
    fn test_fields_table_is_complete() {
        assert_eq!(FIELDS.len(), 76);
        assert_eq!(EntVars::default().values().len(), FIELDS.len());
        let index = get_fields_index();
        assert_eq!(index.len(), FIELDS.len(), "duplicate hot field name");
    }

    #[test]
    fn test_find_field() {
        assert_eq!(find_field("origin").map(|f| f.kind), Some(FieldKind::Vector));
        assert_eq!(find_field("use").map(|f| f.kind), Some(FieldKind::Func));
        assert_eq!(find_field("owner").map(|f| f.kind), Some(FieldKind::Edict));
        assert_eq!(find_field("fixangle").map(|f| f.kind), Some(FieldKind::Boolean));
        assert!(find_field("light_lev").is_none());
        assert!(find_field("use_fn").is_none());
    }

    #[test]
    fn test_field_and_field_mut_agree() {
        let mut v = EntVars::default();
        if let Some(FieldMut::Float(f)) = v.field_mut("health") {
            *f = 100.0;
        }
        if let Some(FieldMut::Vector(o)) = v.field_mut("origin") {
            *o = [1.0, 2.0, 3.0];
        }
        assert_eq!(v.health, 100.0);
        assert_eq!(v.field("health"), Some(FieldValue::Float(100.0)));
        assert_eq!(v.field("origin"), Some(FieldValue::Vector([1.0, 2.0, 3.0])));
        assert_eq!(v.field("nosuchfield"), None);
    }

    #[test]
    fn test_every_descriptor_resolves() {
        let mut v = EntVars::default();
        for def in FIELDS {
            let kind = match v.field(def.name) {
                Some(FieldValue::Float(_)) => FieldKind::Float,
                Some(FieldValue::Vector(_)) => FieldKind::Vector,
                Some(FieldValue::Boolean(_)) => FieldKind::Boolean,
                Some(FieldValue::Str(_)) => FieldKind::Str,
                Some(FieldValue::Func(_)) => FieldKind::Func,
                Some(FieldValue::Edict(_)) => FieldKind::Edict,
                None => panic!("{} does not resolve", def.name),
            };
            assert_eq!(kind, def.kind, "{}", def.name);
            assert!(v.field_mut(def.name).is_some());
        }
    }

    #[test]
    fn test_take_owned_empties_reference_slots() {
        let mut reg = HandleRegistry::new();
        let mut v = EntVars::default();
        v.classname = Some(reg.acquire(Value::Boolean(true)));
        v.think = Some(reg.acquire(Value::Boolean(true)));
        v.noise3 = Some(reg.acquire(Value::Boolean(true)));
        let other = reg.acquire(Value::Nil);
        v.enemy = Some(other.id());

        let owned = v.take_owned();
        assert_eq!(owned.len(), 3);
        assert!(v.classname.is_none() && v.think.is_none() && v.noise3.is_none());
        // edict references are borrowed, not owned
        assert_eq!(v.enemy, Some(other.id()));

        for h in owned {
            reg.release(h);
        }
        reg.release(other);
        assert!(reg.is_empty());
    }
}
