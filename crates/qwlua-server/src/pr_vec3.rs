// pr_vec3.rs -- three-component vector values for progs
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use mlua::{Lua, MetaMethod, UserData, UserDataMethods, UserDataRef, Value};
use qwlua_common::q_shared::{vector_add, vector_compare, vector_scale, vector_subtract, Vec3};

/// Mutable vector userdata. Every push creates a new value, so Lua code
/// never aliases the storage of an edict field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuaVec3(pub Vec3);

fn component(key: &Value) -> Option<usize> {
    match key {
        Value::Integer(i @ 1..=3) => Some(*i as usize - 1),
        Value::Number(n) if *n == 1.0 || *n == 2.0 || *n == 3.0 => Some(*n as usize - 1),
        Value::String(s) => match s.as_bytes().as_ref() {
            b"x" => Some(0),
            b"y" => Some(1),
            b"z" => Some(2),
            _ => None,
        },
        _ => None,
    }
}

impl UserData for LuaVec3 {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, key: Value| {
            Ok(component(&key).map(|i| this.0[i]))
        });

        methods.add_meta_method_mut(MetaMethod::NewIndex, |_, this, (key, value): (Value, f32)| {
            match component(&key) {
                Some(i) => {
                    this.0[i] = value;
                    Ok(())
                }
                None => Err(mlua::Error::RuntimeError(format!(
                    "vec3 has no component '{}'",
                    key.to_string()?
                ))),
            }
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("'{} {} {}'", this.0[0], this.0[1], this.0[2]))
        });

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: UserDataRef<LuaVec3>| {
            Ok(vector_compare(&this.0, &other.0))
        });

        methods.add_meta_method(MetaMethod::Add, |_, this, other: UserDataRef<LuaVec3>| {
            Ok(LuaVec3(vector_add(&this.0, &other.0)))
        });

        methods.add_meta_method(MetaMethod::Sub, |_, this, other: UserDataRef<LuaVec3>| {
            Ok(LuaVec3(vector_subtract(&this.0, &other.0)))
        });

        methods.add_meta_method(MetaMethod::Mul, |_, this, scale: f32| {
            Ok(LuaVec3(vector_scale(&this.0, scale)))
        });

        methods.add_meta_method(MetaMethod::Unm, |_, this, ()| {
            Ok(LuaVec3(vector_scale(&this.0, -1.0)))
        });
    }
}

/// Install the `vec3(x, y, z)` constructor.
pub fn pr_vec3_init(lua: &Lua) -> mlua::Result<()> {
    let ctor = lua.create_function(|_, (x, y, z): (Option<f32>, Option<f32>, Option<f32>)| {
        Ok(LuaVec3([x.unwrap_or(0.0), y.unwrap_or(0.0), z.unwrap_or(0.0)]))
    })?;
    lua.globals().set("vec3", ctor)
}

/// Push a fresh copy of `v`.
pub fn pr_vec3_push(lua: &Lua, v: Vec3) -> mlua::Result<Value> {
    lua.create_userdata(LuaVec3(v)).map(Value::UserData)
}

/// Extract a vector from a `vec3` userdata or a table of exactly three
/// numbers. Anything else is `None`.
pub fn pr_vec3_to_vec(value: &Value) -> Option<Vec3> {
    match value {
        Value::UserData(ud) => ud.borrow::<LuaVec3>().ok().map(|v| v.0),
        Value::Table(t) => {
            if t.raw_len() != 3 {
                return None;
            }
            let mut v = [0.0f32; 3];
            for (i, c) in v.iter_mut().enumerate() {
                *c = t.raw_get::<f32>(i + 1).ok()?;
            }
            Some(v)
        }
        _ => None,
    }
}

/// Replace a `vec3` userdata by a fresh copy. Other values, tables of
/// numbers included, pass through untouched.
pub fn pr_vec3_copy(lua: &Lua, value: Value) -> mlua::Result<Value> {
    let copy = match &value {
        Value::UserData(ud) => ud.borrow::<LuaVec3>().ok().map(|v| v.0),
        _ => None,
    };
    match copy {
        Some(v) => pr_vec3_push(lua, v),
        None => Ok(value),
    }
}
