// cvar.rs -- dynamic variable tracking
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use crate::common::com_printf;

use bitflags::bitflags;
use parking_lot::{const_mutex, Mutex};
use std::collections::HashMap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CvarFlags: u32 {
        /// added to the serverinfo string
        const SERVERINFO = 4;
        /// can only be set from the command line
        const NOSET      = 8;
    }
}

/// A console variable.
#[derive(Debug, Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: CvarFlags,
    pub modified: bool,
    pub value: f32,
}

/// The full cvar system context.
#[derive(Debug, Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    /// cvar lookup by name -> index in cvar_vars
    cvar_index: HashMap<String, usize>,
}

fn cvar_float(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Info strings can't carry these characters.
    pub fn info_validate(s: &str) -> bool {
        !s.contains('\\') && !s.contains('"') && !s.contains(';')
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Float value of a cvar, 0 if it doesn't exist.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |var| var.value)
    }

    /// String value of a cvar, "" if it doesn't exist.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |var| var.string.as_str())
    }

    /// Get or create a cvar. An existing cvar keeps its value but the
    /// flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: CvarFlags) -> Option<usize> {
        if flags.contains(CvarFlags::SERVERINFO) && !Self::info_validate(name) {
            com_printf("invalid info cvar name\n");
            return None;
        }

        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return Some(idx);
        }

        if flags.contains(CvarFlags::SERVERINFO) && !Self::info_validate(value) {
            com_printf("invalid info cvar value\n");
            return None;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            flags,
            modified: true,
            value: cvar_float(value),
        });
        self.cvar_index.insert(name.to_string(), idx);

        Some(idx)
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) -> Option<usize> {
        let Some(&idx) = self.cvar_index.get(name) else {
            return self.get(name, value, CvarFlags::empty());
        };

        let var = &mut self.cvar_vars[idx];

        if var.flags.contains(CvarFlags::SERVERINFO) && !Self::info_validate(value) {
            com_printf("invalid info cvar value\n");
            return Some(idx);
        }

        if !force && var.flags.contains(CvarFlags::NOSET) {
            com_printf(&format!("{} is write protected.\n", name));
            return Some(idx);
        }

        if value == var.string {
            return Some(idx);
        }

        var.modified = true;
        var.string = value.to_string();
        var.value = cvar_float(value);

        Some(idx)
    }

    /// Set a cvar value, honouring NOSET.
    pub fn set(&mut self, name: &str, value: &str) -> Option<usize> {
        self.set2(name, value, false)
    }

    /// Force-set a cvar value (ignores NOSET).
    pub fn force_set(&mut self, name: &str, value: &str) -> Option<usize> {
        self.set2(name, value, true)
    }

    pub fn set_value(&mut self, name: &str, value: f32) {
        let val_str = if value == (value as i32) as f32 {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &val_str);
    }

    /// Build the `\key\value` serverinfo string.
    pub fn serverinfo(&self) -> String {
        self.cvar_vars
            .iter()
            .filter(|v| v.flags.contains(CvarFlags::SERVERINFO))
            .map(|v| format!("\\{}\\{}", v.name, v.string))
            .collect()
    }
}

// ============================================================
// Global singleton and free-function wrappers
// ============================================================

static CVAR_CTX: Mutex<Option<CvarContext>> = const_mutex(None);

pub fn cvar_init() {
    let mut g = CVAR_CTX.lock();
    if g.is_none() {
        *g = Some(CvarContext::new());
    }
}

pub fn cvar_get(name: &str, value: &str, flags: CvarFlags) -> Option<usize> {
    CVAR_CTX.lock().as_mut().and_then(|c| c.get(name, value, flags))
}

pub fn cvar_force_set(name: &str, value: &str) {
    if let Some(c) = CVAR_CTX.lock().as_mut() {
        c.force_set(name, value);
    }
}

pub fn cvar_variable_value(name: &str) -> f32 {
    CVAR_CTX.lock().as_ref().map_or(0.0, |c| c.variable_value(name))
}

pub fn cvar_variable_string(name: &str) -> String {
    CVAR_CTX
        .lock()
        .as_ref()
        .map_or_else(String::new, |c| c.variable_string(name).to_string())
}

pub fn cvar_set_value(name: &str, value: f32) {
    if let Some(c) = CVAR_CTX.lock().as_mut() {
        c.set_value(name, value);
    }
}

pub fn cvar_serverinfo() -> String {
    CVAR_CTX.lock().as_ref().map_or_else(String::new, |c| c.serverinfo())
}
