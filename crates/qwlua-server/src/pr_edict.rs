// pr_edict.rs -- edict objects as seen from Lua
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.
//
// An edict object only carries its slot number. Reads and writes go
// through the server attached to the VM: hot fields land in the native
// block, everything else in the edict's overflow table.

use mlua::{Lua, MetaMethod, UserData, UserDataMethods, Value};
use std::fmt::Write;

use crate::pr_fields::{find_field, FieldKind, FieldMut, FieldValue};
use crate::pr_registry::{HandleId, OwnedHandle};
use crate::pr_vec3::{pr_vec3_copy, pr_vec3_push, pr_vec3_to_vec, LuaVec3};
use crate::server::{sv_mut, sv_ref, Server, SvError, SvResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdictUd(pub usize);

impl UserData for EdictUd {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: mlua::String| {
            let key = key.to_str()?;
            Ok(ed_get_field(lua, this.0, &key)?)
        });

        methods.add_meta_method(
            MetaMethod::NewIndex,
            |lua, this, (key, value): (mlua::String, Value)| {
                let key = key.to_str()?;
                Ok(ed_set_field(lua, this.0, &key, value)?)
            },
        );

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("edict {}", this.0))
        });
    }
}

// ============================================================
// Field access
// ============================================================

fn overflow_table(sv: &Server, n: usize, key: &str) -> SvResult<mlua::Table> {
    let fields = sv
        .edicts
        .edict_num(n)?
        .fields()
        .ok_or_else(|| SvError::field(key, format!("edict {} has no field table", n)))?;
    match sv.registry.get(fields)? {
        Value::Table(t) => Ok(t),
        other => Err(SvError::field(
            key,
            format!("field table is a {}", other.type_name()),
        )),
    }
}

/// Read `key` from edict `n`: the native block first, then the overflow
/// table. Unset references and unknown keys read as nil.
pub fn ed_get_field(lua: &Lua, n: usize, key: &str) -> SvResult<Value> {
    let sv = sv_ref(lua)?;
    let ed = sv.edicts.edict_num(n)?;

    match ed.v.field(key) {
        Some(FieldValue::Float(f)) => Ok(Value::Number(f64::from(f))),
        Some(FieldValue::Vector(v)) => Ok(pr_vec3_push(lua, v)?),
        Some(FieldValue::Boolean(b)) => Ok(Value::Boolean(b)),
        Some(FieldValue::Str(id) | FieldValue::Func(id) | FieldValue::Edict(id)) => match id {
            Some(id) => sv.registry.get(id),
            None => Ok(Value::Nil),
        },
        None => {
            let value = overflow_table(&sv, n, key)?.raw_get::<Value>(key)?;
            Ok(pr_vec3_copy(lua, value)?)
        }
    }
}

/// Resolve an edict reference assignment to the target's canonical handle.
fn edict_ref_target(sv: &Server, value: &Value) -> SvResult<Option<HandleId>> {
    match value {
        Value::Nil => Ok(None),
        Value::UserData(ud) => {
            let target = ud
                .borrow::<EdictUd>()
                .map_err(|_| SvError::NotAnEdict("userdata"))?
                .0;
            let handle = sv.edicts.edict_num(target)?.handle();
            handle.map(Some).ok_or(SvError::NotAnEdict("edict without a handle"))
        }
        other => Err(SvError::NotAnEdict(other.type_name())),
    }
}

/// Write `value` into `key` of edict `n`. Type mismatches on hot fields
/// are fatal; overflow keys take anything.
pub fn ed_set_field(lua: &Lua, n: usize, key: &str, value: Value) -> SvResult<()> {
    let mut sv = sv_mut(lua)?;

    let Some(def) = find_field(key) else {
        let table = overflow_table(&sv, n, key)?;
        // deep copy of vec3 when assigning
        table.raw_set(key, pr_vec3_copy(lua, value)?)?;
        return Ok(());
    };

    let target = match def.kind {
        FieldKind::Edict => edict_ref_target(&sv, &value)?,
        _ => None,
    };

    let Server {
        edicts, registry, ..
    } = &mut *sv;
    let ed = edicts.edict_num_mut(n)?;
    let got = value.type_name();

    match ed.v.field_mut(key) {
        Some(FieldMut::Float(f)) => {
            *f = lua
                .unpack::<f64>(value)
                .map_err(|_| SvError::field(key, format!("number expected, got {}", got)))?
                as f32;
        }
        Some(FieldMut::Vector(v)) => {
            *v = pr_vec3_to_vec(&value)
                .ok_or_else(|| SvError::field(key, format!("vec3 expected, got {}", got)))?;
        }
        Some(FieldMut::Boolean(b)) => match value {
            Value::Boolean(x) => *b = x,
            _ => return Err(SvError::field(key, format!("boolean expected, got {}", got))),
        },
        Some(FieldMut::Str(slot) | FieldMut::Func(slot)) => {
            if let Some(old) = slot.take() {
                registry.release(old);
            }
            if !value.is_nil() {
                *slot = Some(registry.acquire(value));
            }
        }
        Some(FieldMut::Edict(slot)) => *slot = target,
        None => return Err(SvError::field(key, "no native storage")),
    }

    Ok(())
}

// ============================================================
// Strings and edict references held by handle
// ============================================================

/// PR_SetString
pub fn pr_set_string(lua: &Lua, sv: &mut Server, s: &str) -> SvResult<OwnedHandle> {
    let s = lua.create_string(s)?;
    Ok(sv.registry.acquire(Value::String(s)))
}

/// PR_GetString: an unset reference is the empty string.
pub fn pr_get_string(sv: &Server, id: Option<HandleId>) -> SvResult<String> {
    let Some(id) = id else {
        return Ok(String::new());
    };
    match sv.registry.get(id)? {
        Value::String(s) => Ok(String::from(&*s.to_str()?)),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(SvError::field(
            "string",
            format!("string expected, got {}", other.type_name()),
        )),
    }
}

/// PROG_TO_EDICT: slot number of the edict behind `id`.
pub fn prog_to_edict(sv: &Server, id: Option<HandleId>) -> SvResult<Option<usize>> {
    let Some(id) = id else {
        return Ok(None);
    };
    match sv.registry.get(id)? {
        Value::UserData(ud) => {
            let ed = ud
                .borrow::<EdictUd>()
                .map_err(|_| SvError::NotAnEdict("userdata"))?;
            Ok(Some(ed.0))
        }
        other => Err(SvError::NotAnEdict(other.type_name())),
    }
}

// ============================================================
// ED_Print
// ============================================================

fn describe(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::UserData(ud) => {
            if let Ok(v) = ud.borrow::<LuaVec3>() {
                format!("'{} {} {}'", v.0[0], v.0[1], v.0[2])
            } else if let Ok(e) = ud.borrow::<EdictUd>() {
                format!("entity {}", e.0)
            } else {
                "userdata".to_string()
            }
        }
        other => other.type_name().to_string(),
    }
}

/// Human readable dump of every non-default field of edict `n`.
pub fn ed_print(sv: &Server, n: usize) -> SvResult<String> {
    let ed = sv.edicts.edict_num(n)?;
    let mut out = String::new();

    let _ = writeln!(out, "EDICT {}:", n);
    if ed.free {
        out.push_str("FREE\n");
        return Ok(out);
    }

    for (name, value) in ed.v.values() {
        let text = match value {
            FieldValue::Float(f) if f != 0.0 => f.to_string(),
            FieldValue::Vector(v) if v != [0.0; 3] => format!("'{} {} {}'", v[0], v[1], v[2]),
            FieldValue::Boolean(true) => "true".to_string(),
            FieldValue::Str(Some(id)) | FieldValue::Func(Some(id)) => {
                describe(&sv.registry.get(id)?)
            }
            FieldValue::Edict(Some(id)) => match prog_to_edict(sv, Some(id))? {
                Some(e) => format!("entity {}", e),
                None => continue,
            },
            _ => continue,
        };
        let _ = writeln!(out, "{:<15}{}", name, text);
    }

    if ed.fields().is_some() {
        let table = overflow_table(sv, n, "")?;
        let mut extra = Vec::new();
        for pair in table.pairs::<Value, Value>() {
            let (k, v) = pair?;
            extra.push((describe(&k), describe(&v)));
        }
        extra.sort();
        for (k, v) in extra {
            let _ = writeln!(out, "{:<15}{}", k, v);
        }
    }

    Ok(out)
}
