// ed_parse.rs -- entity text parsing and level spawning
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use mlua::{Lua, Value};
use qwlua_common::common::{com_dprintf, com_printf};
use qwlua_common::cvar::cvar_variable_value;
use qwlua_common::q_shared::{com_parse, SpawnFlags, Vec3};

use crate::pr_edict::{ed_print, ed_set_field, pr_get_string};
use crate::pr_exec::{pr_execute_program, Func, PrGlobals};
use crate::pr_fields::{find_field, FieldKind};
use crate::pr_registry::OwnedHandle;
use crate::pr_vec3::pr_vec3_push;
use crate::server::{sv_mut, SvError, SvResult};
use crate::sv_edict::{ed_alloc, ed_ensure_fields, ed_free};

// ============================================================
// Spawn filtering
// ============================================================

/// Game rules that decide which map entities are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpawnConfig {
    pub deathmatch: bool,
    /// 0 easy, 1 medium, 2 hard, 3 nightmare
    pub skill: i32,
}

impl SpawnConfig {
    pub fn from_cvars() -> Self {
        Self {
            deathmatch: cvar_variable_value("deathmatch") != 0.0,
            skill: (cvar_variable_value("skill") + 0.5).floor().clamp(0.0, 3.0) as i32,
        }
    }

    /// Whether an entity with these spawnflags stays out of the level.
    pub fn inhibits(&self, flags: SpawnFlags) -> bool {
        if self.deathmatch {
            return flags.contains(SpawnFlags::NOT_DEATHMATCH);
        }
        match self.skill {
            0 => flags.contains(SpawnFlags::NOT_EASY),
            1 => flags.contains(SpawnFlags::NOT_MEDIUM),
            _ => flags.contains(SpawnFlags::NOT_HARD),
        }
    }
}

/// What a call to [`ed_load_from_file`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// edicts whose spawn function ran, in file order
    pub spawned: Vec<usize>,
    /// removed by skill or deathmatch spawnflags
    pub inhibited: usize,
    /// removed for lack of a classname or a spawn function
    pub discarded: usize,
}

// ============================================================
// Value conversion
// ============================================================

/// Read a number off the front of `s` the way `%lf` does, returning it
/// and the rest of the string. Besides decimals this takes hex floats
/// (`0x1.8p3`) and `inf`, `infinity` and `nan` in any case.
fn scan_float(s: &str) -> Option<(f64, &str)> {
    let s = s.trim_start();
    let b = s.as_bytes();
    let mut i = 0;

    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let sign = if b.first() == Some(&b'-') { -1.0 } else { 1.0 };
    let body = &s[i..];
    if let Some((f, len)) = scan_special(body).or_else(|| scan_hex(body)) {
        return Some((sign * f, &body[len..]));
    }

    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return None;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }

    s[..i].parse().ok().map(|f| (f, &s[i..]))
}

/// `inf`, `infinity` or `nan`, optionally `nan(chars)`, unsigned.
fn scan_special(s: &str) -> Option<(f64, usize)> {
    let b = s.as_bytes();
    let starts = |word: &str| {
        b.len() >= word.len() && b[..word.len()].eq_ignore_ascii_case(word.as_bytes())
    };

    if starts("infinity") {
        return Some((f64::INFINITY, 8));
    }
    if starts("inf") {
        return Some((f64::INFINITY, 3));
    }
    if !starts("nan") {
        return None;
    }
    let mut len = 3;
    if b.get(3) == Some(&b'(') {
        let chars = b[4..]
            .iter()
            .take_while(|c| c.is_ascii_alphanumeric() || **c == b'_')
            .count();
        if b.get(4 + chars) == Some(&b')') {
            len = 4 + chars + 1;
        }
    }
    Some((f64::NAN, len))
}

/// Unsigned hex float: `0x` digits, an optional fraction and an optional
/// binary exponent.
fn scan_hex(s: &str) -> Option<(f64, usize)> {
    let b = s.as_bytes();
    if b.len() < 2 || b[0] != b'0' || !(b[1] == b'x' || b[1] == b'X') {
        return None;
    }
    let hex_digit = |i: usize| b.get(i).and_then(|c| char::from(*c).to_digit(16));

    let mut i = 2;
    let mut mantissa = 0.0f64;
    let mut exp: i32 = 0;
    let mut digits = 0;
    while let Some(d) = hex_digit(i) {
        mantissa = mantissa * 16.0 + f64::from(d);
        digits += 1;
        i += 1;
    }
    if b.get(i) == Some(&b'.') {
        i += 1;
        while let Some(d) = hex_digit(i) {
            mantissa = mantissa * 16.0 + f64::from(d);
            exp -= 4;
            digits += 1;
            i += 1;
        }
    }
    if digits == 0 {
        // "0x" with nothing after it reads as the 0
        return Some((0.0, 1));
    }

    if matches!(b.get(i), Some(b'p' | b'P')) {
        let mut j = i + 1;
        let negative = b.get(j) == Some(&b'-');
        if matches!(b.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_start = j;
        let mut e: i32 = 0;
        while let Some(c) = b.get(j).filter(|c| c.is_ascii_digit()) {
            e = e.saturating_mul(10).saturating_add(i32::from(c - b'0'));
            j += 1;
        }
        if j > exp_start {
            exp = exp.saturating_add(if negative { -e } else { e });
            i = j;
        }
    }

    if mantissa == 0.0 {
        return Some((0.0, i));
    }
    Some((mantissa * 2f64.powi(exp), i))
}

/// Three whitespace separated numbers.
fn str_to_vector(s: &str) -> Option<Vec3> {
    let (x, rest) = scan_float(s)?;
    let (y, rest) = scan_float(rest)?;
    let (z, _) = scan_float(rest)?;
    Some([x as f32, y as f32, z as f32])
}

fn str_to_number(s: &str) -> Option<f64> {
    scan_float(s).map(|(f, _)| f)
}

/// atof: whatever number leads the string, 0 otherwise.
fn atof(s: &str) -> f64 {
    str_to_number(s).unwrap_or(0.0)
}

/// Up to three leading numbers; missing components are 0.
fn atov(s: &str) -> Vec3 {
    let mut v = [0.0; 3];
    let mut rest = s;
    for c in v.iter_mut() {
        match scan_float(rest) {
            Some((f, r)) => {
                *c = f as f32;
                rest = r;
            }
            None => break,
        }
    }
    v
}

/// Turn `\n` escapes into real newlines.
fn unescape(value: &str) -> String {
    value.replace("\\n", "\n")
}

/// ED_SetField
///
/// Native fields convert the text to their own type. Anything else is
/// stored as a vector if it reads as three numbers, as a number if it
/// starts with one, and as a string otherwise.
pub fn ed_set_field_text(lua: &Lua, n: usize, key: &str, value: &str) -> SvResult<()> {
    let value = unescape(value);

    let lvalue = match find_field(key).map(|f| f.kind) {
        Some(FieldKind::Str) => Value::String(lua.create_string(&value)?),
        Some(FieldKind::Float) => Value::Number(atof(&value)),
        Some(FieldKind::Vector) => pr_vec3_push(lua, atov(&value))?,
        Some(FieldKind::Boolean) => Value::Boolean(atof(&value) != 0.0),
        Some(kind @ (FieldKind::Func | FieldKind::Edict)) => {
            return Err(SvError::field(
                key,
                format!("'{}' can't be parsed into a {:?} field", value, kind),
            ))
        }
        None => {
            if let Some(v) = str_to_vector(&value) {
                pr_vec3_push(lua, v)?
            } else if let Some(f) = str_to_number(&value) {
                Value::Number(f)
            } else {
                Value::String(lua.create_string(&value)?)
            }
        }
    };

    ed_set_field(lua, n, key, lvalue)
}

// ============================================================
// ED_ParseEdict
// ============================================================

/// Parse one `{ }` block into edict `n`, returning the rest of the text.
/// The opening brace has already been read. `n` should be freshly
/// cleared; the world is taken as is. A block with nothing but comment
/// keys leaves the edict free.
pub fn ed_parse_edict<'a>(lua: &Lua, mut data: &'a str, n: usize) -> SvResult<&'a str> {
    let mut init = false;

    // go through all the dictionary pairs
    loop {
        // parse key
        let Some((token, rest)) = com_parse(data) else {
            return Err(SvError::Parse(
                "ED_ParseEntity: EOF without closing brace".to_string(),
            ));
        };
        data = rest;
        if token.starts_with('}') {
            break;
        }

        // anglehack is to allow QuakeEd to write single scalar angles
        // and allow them to be turned into vectors
        let (keyname, anglehack) = match token.as_str() {
            "angle" => ("angles".to_string(), true),
            "light" => ("light_lev".to_string(), false), // single light def
            _ => (token, false),
        };

        // parse value
        let Some((value, rest)) = com_parse(data) else {
            return Err(SvError::Parse(
                "ED_ParseEntity: EOF without closing brace".to_string(),
            ));
        };
        data = rest;
        if value.starts_with('}') {
            return Err(SvError::Parse(
                "ED_ParseEntity: closing brace without data".to_string(),
            ));
        }

        // keynames with a leading underscore are used for utility comments,
        // and are immediately discarded
        if keyname.starts_with('_') {
            continue;
        }

        init = true;

        let value = if anglehack {
            format!("0 {} 0", value)
        } else {
            value
        };

        ed_set_field_text(lua, n, &keyname, &value)?;
    }

    if !init {
        sv_mut(lua)?.edicts.edict_num_mut(n)?.free = true;
    }

    Ok(data)
}

// ============================================================
// ED_LoadFromFile
// ============================================================

/// Spawn every entity in `data`.
///
/// The first block is the world and goes into slot 0; the rest are
/// allocated in file order so an error part way through leaves entity
/// numbers in order. Each surviving entity gets its classname's global
/// function called with `self` set to it.
pub fn ed_load_from_file(
    lua: &Lua,
    pr: &mut PrGlobals,
    mut data: &str,
    config: SpawnConfig,
) -> SvResult<LoadSummary> {
    let mut summary = LoadSummary::default();
    let mut ent: Option<usize> = None;

    {
        let mut sv = sv_mut(lua)?;
        for i in 0..=sv.edicts.max_clients() {
            ed_ensure_fields(lua, &mut sv, i)?;
        }
    }

    // parse ents
    loop {
        // parse the opening brace
        let Some((token, rest)) = com_parse(data) else {
            break;
        };
        data = rest;
        if token != "{" {
            return Err(SvError::Parse(format!(
                "ED_LoadFromFile: found {} when expecting {{",
                token
            )));
        }

        let n = match ent {
            None => 0,
            Some(_) => {
                let mut sv = sv_mut(lua)?;
                ed_alloc(lua, &mut sv)?
            }
        };
        ent = Some(n);
        data = ed_parse_edict(lua, data, n)?;

        let classname = {
            let mut sv = sv_mut(lua)?;
            let ed = sv.edicts.edict_num(n)?;

            // remove things from different skill levels or deathmatch
            if config.inhibits(SpawnFlags::from_float(ed.v.spawnflags)) {
                ed_free(&mut sv, n)?;
                summary.inhibited += 1;
                continue;
            }

            let classname = ed.v.classname.as_ref().map(OwnedHandle::id);
            match classname {
                Some(id) => pr_get_string(&sv, Some(id))?,
                None => {
                    com_printf("No classname for:");
                    com_printf(&ed_print(&sv, n)?);
                    ed_free(&mut sv, n)?;
                    summary.discarded += 1;
                    continue;
                }
            }
        };

        // look for the spawn function
        let func: Value = lua.globals().get(classname.as_str())?;
        let mut sv = sv_mut(lua)?;
        if !matches!(func, Value::Function(_)) {
            com_printf(&format!("No spawn function for '{}'", classname));
            com_printf(&ed_print(&sv, n)?);
            ed_free(&mut sv, n)?;
            summary.discarded += 1;
            continue;
        }

        pr.self_ = sv.edicts.edict_num(n)?.handle();
        let fref = sv.registry.acquire(func);
        drop(sv);

        let result = pr_execute_program(lua, pr, Func::Ref(fref.id()));
        sv_mut(lua)?.registry.release(fref);
        result?;

        summary.spawned.push(n);
    }

    com_dprintf(&format!("{} entities inhibited", summary.inhibited));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_float() {
        assert_eq!(scan_float("  3.5 rest"), Some((3.5, " rest")));
        assert_eq!(scan_float("-2"), Some((-2.0, "")));
        assert_eq!(scan_float(".5"), Some((0.5, "")));
        assert_eq!(scan_float("1e3x"), Some((1000.0, "x")));
        assert_eq!(scan_float("1e"), Some((1.0, "e")));
        assert_eq!(scan_float("foo"), None);
        assert_eq!(scan_float("-"), None);
        assert_eq!(scan_float(""), None);
    }

    #[test]
    fn test_scan_float_keeps_double_precision() {
        assert_eq!(scan_float("0.1"), Some((0.1, "")));
        assert_eq!(scan_float("16777217"), Some((16_777_217.0, "")));
        assert_eq!(str_to_number("16777217"), Some(16_777_217.0));
    }

    #[test]
    fn test_scan_float_special_forms() {
        assert_eq!(scan_float("inf"), Some((f64::INFINITY, "")));
        assert_eq!(scan_float(" -Infinity x"), Some((f64::NEG_INFINITY, " x")));
        assert_eq!(scan_float("+INF"), Some((f64::INFINITY, "")));
        assert_eq!(scan_float("infantry"), Some((f64::INFINITY, "antry")));
        let (nan, rest) = scan_float("NaN(0x1) 2").unwrap();
        assert!(nan.is_nan());
        assert_eq!(rest, " 2");
        let (nan, rest) = scan_float("nan(").unwrap();
        assert!(nan.is_nan());
        assert_eq!(rest, "(");

        assert_eq!(scan_float("0x10"), Some((16.0, "")));
        assert_eq!(scan_float("0x1.8p1 y"), Some((3.0, " y")));
        assert_eq!(scan_float("-0X.8"), Some((-0.5, "")));
        assert_eq!(scan_float("0x1p-2"), Some((0.25, "")));
        assert_eq!(scan_float("0x1p"), Some((1.0, "p")));
        assert_eq!(scan_float("0xg"), Some((0.0, "xg")));
        assert_eq!(scan_float("in"), None);

        assert_eq!(str_to_vector("inf 0x10 1"), Some([f32::INFINITY, 16.0, 1.0]));
    }

    #[test]
    fn test_value_inference_helpers() {
        assert_eq!(str_to_vector("1 2 3"), Some([1.0, 2.0, 3.0]));
        assert_eq!(str_to_vector("1 2"), None);
        assert_eq!(str_to_vector("foo bar"), None);
        assert_eq!(str_to_number("3.5"), Some(3.5));
        assert_eq!(str_to_number("2 foo"), Some(2.0));
        assert_eq!(atof("junk"), 0.0);
        assert_eq!(atov("10 20"), [10.0, 20.0, 0.0]);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("line one\\nline two"), "line one\nline two");
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn test_spawn_config_inhibits() {
        let dm = SpawnConfig { deathmatch: true, skill: 0 };
        assert!(dm.inhibits(SpawnFlags::NOT_DEATHMATCH));
        assert!(!dm.inhibits(SpawnFlags::NOT_EASY));

        let easy = SpawnConfig { deathmatch: false, skill: 0 };
        assert!(easy.inhibits(SpawnFlags::NOT_EASY));
        assert!(!easy.inhibits(SpawnFlags::NOT_DEATHMATCH));

        let medium = SpawnConfig { deathmatch: false, skill: 1 };
        assert!(medium.inhibits(SpawnFlags::NOT_MEDIUM));
        assert!(!medium.inhibits(SpawnFlags::NOT_HARD));

        let nightmare = SpawnConfig { deathmatch: false, skill: 3 };
        assert!(nightmare.inhibits(SpawnFlags::NOT_HARD));
        assert!(!nightmare.inhibits(SpawnFlags::empty()));
    }
}
