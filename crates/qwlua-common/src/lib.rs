#![allow(clippy::float_cmp, clippy::needless_range_loop)]

// Shared engine pieces used by the server and the progs bridge.

pub mod q_shared;
pub mod common;
pub mod cvar;
pub mod crc;
