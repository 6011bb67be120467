// common.rs -- console printing shared by the server and the progs bridge
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

/// Log target used for everything printed to the server console.
pub const CONSOLE_TARGET: &str = "qwlua::console";

/// General-purpose console print. Trailing newlines are dropped since the
/// logger terminates each record itself.
pub fn com_printf(msg: &str) {
    log::info!(target: CONSOLE_TARGET, "{}", msg.trim_end_matches('\n'));
}

/// Developer-only print, visible when the logger runs at debug level.
pub fn com_dprintf(msg: &str) {
    log::debug!(target: CONSOLE_TARGET, "{}", msg.trim_end_matches('\n'));
}

/// Console warning for degraded but recoverable situations.
pub fn com_warning(msg: &str) {
    log::warn!(target: CONSOLE_TARGET, "{}", msg.trim_end_matches('\n'));
}
