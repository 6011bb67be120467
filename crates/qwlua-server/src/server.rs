// server.rs -- core server types shared by the edict and progs modules
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use mlua::{AppDataRef, AppDataRefMut, Lua};
use qwlua_common::cvar::{cvar_get, CvarFlags};
use qwlua_common::q_shared::{MAX_CLIENTS, MAX_EDICTS};
use thiserror::Error;

use crate::pr_registry::HandleRegistry;
use crate::sv_edict::EdictStore;
use crate::sv_world::{AreaLinks, WorldLink};

// ============================================================
// server_state_t
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Dead,    // no map loaded
    Loading, // spawning level edicts
    Active,  // actively running
}

// ============================================================
// Fatal errors
// ============================================================

/// Fatal server errors. Any of these aborts the operation that raised it.
#[derive(Debug, Error)]
pub enum SvError {
    #[error("{0}")]
    Parse(String),

    #[error("can't set field '{key}': {reason}")]
    Field { key: String, reason: String },

    #[error("PR_ExecuteProgram({0}) got invalid fnum, this is a bug")]
    InvalidFunction(i32),

    #[error("PR_ExecuteProgram({handle}) did not get a function, got '{got}' instead")]
    NotAFunction { handle: u32, got: &'static str },

    #[error("Executing a function with zero self, this is a bug")]
    NoSelf,

    #[error("{0}")]
    Script(#[from] mlua::Error),

    #[error("ED_Alloc: no free edicts")]
    NoFreeEdicts,

    #[error("EDICT_NUM: bad number {0}")]
    BadEdictNum(usize),

    #[error("handle {0} used after release")]
    StaleHandle(u32),

    #[error("expected an edict, got '{0}'")]
    NotAnEdict(&'static str),

    #[error("No {0} found.")]
    NoProgs(String),

    #[error("server state is not attached to the progs VM")]
    NoServer,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SvResult<T> = Result<T, SvError>;

impl SvError {
    pub(crate) fn field(key: &str, reason: impl Into<String>) -> Self {
        SvError::Field {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

// Bridge failures raised inside metamethods surface as Lua runtime errors.
impl From<SvError> for mlua::Error {
    fn from(err: SvError) -> Self {
        match err {
            SvError::Script(e) => e,
            other => mlua::Error::external(other),
        }
    }
}

// ============================================================
// Server (per-level state)
// ============================================================

/// Per-level server state. Lives inside the progs VM so edict metamethods
/// can reach the edicts and the handle registry.
pub struct Server {
    pub state: ServerState,
    pub time: f64,
    pub mapname: String,

    pub edicts: EdictStore,
    pub registry: HandleRegistry,
    pub area: Box<dyn WorldLink>,
}

impl Server {
    pub fn new(max_edicts: usize, max_clients: usize, area: Box<dyn WorldLink>) -> Self {
        Self {
            state: ServerState::Dead,
            time: 0.0,
            mapname: String::new(),
            edicts: EdictStore::new(max_edicts, max_clients),
            registry: HandleRegistry::new(),
            area,
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(MAX_EDICTS, MAX_CLIENTS, Box::new(AreaLinks::new(MAX_EDICTS)))
    }
}

/// Borrow the server attached to the progs VM. The borrow must be dropped
/// before control goes back into Lua.
pub fn sv_mut(lua: &Lua) -> SvResult<AppDataRefMut<'_, Server>> {
    lua.app_data_mut::<Server>().ok_or(SvError::NoServer)
}

pub fn sv_ref(lua: &Lua) -> SvResult<AppDataRef<'_, Server>> {
    lua.app_data_ref::<Server>().ok_or(SvError::NoServer)
}

/// Register the server variables the edict loader reads.
pub fn sv_init_cvars() {
    cvar_get("deathmatch", "1", CvarFlags::SERVERINFO);
    cvar_get("skill", "1", CvarFlags::empty());
    cvar_get("developer", "0", CvarFlags::empty());
    cvar_get("gamedir", "qw", CvarFlags::NOSET);
    cvar_get("mapname", "", CvarFlags::NOSET);
}

#[cfg(test)]
pub(crate) fn test_vm(max_edicts: usize, max_clients: usize) -> Lua {
    let lua = Lua::new();
    crate::pr_vec3::pr_vec3_init(&lua).unwrap();
    lua.set_app_data(Server::new(
        max_edicts,
        max_clients,
        Box::new(AreaLinks::new(max_edicts)),
    ));
    lua
}
