#![allow(clippy::float_cmp, clippy::needless_range_loop, clippy::result_large_err)]

// Server side of the Lua progs: edict storage and lifecycle, the Lua
// bridge for edict fields, entity text parsing and entrypoint calls.

pub mod server;
pub mod sv_world;
pub mod sv_edict;
pub mod pr_registry;
pub mod pr_vec3;
pub mod pr_fields;
pub mod pr_edict;
pub mod pr_exec;
pub mod ed_parse;

pub use ed_parse::{LoadSummary, SpawnConfig};
pub use pr_exec::{Func, PrGlobals, Progs};
pub use server::{Server, ServerState, SvError, SvResult};
