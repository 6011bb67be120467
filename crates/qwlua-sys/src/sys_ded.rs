// sys_ded.rs -- dedicated server startup and frame loop
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use clap::Parser;
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::path::PathBuf;

use qwlua_common::common::{com_dprintf, com_printf, com_warning};
use qwlua_common::cvar::{
    cvar_force_set, cvar_get, cvar_init, cvar_serverinfo, cvar_set_value, cvar_variable_string,
    cvar_variable_value, CvarFlags,
};
use qwlua_server::server::{sv_init_cvars, sv_mut, sv_ref};
use qwlua_server::{Func, Progs, Server, SpawnConfig, SvResult};

/// Seconds of game time per server frame.
pub const SV_FRAMETIME: f64 = 0.1;

/// Load a Lua progs and spawn a level from an entity file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Map to spawn
    pub map: String,

    /// Game directory holding qwprogs.lua
    #[arg(short, long)]
    pub game: Option<PathBuf>,

    /// Entity file, defaults to <game>/maps/<map>.ent
    #[arg(short, long)]
    pub entities: Option<PathBuf>,

    /// Server frames to run after the level is spawned
    #[arg(short, long, default_value_t = 0)]
    pub frames: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Set a console variable before the level starts
    #[arg(long = "set", num_args = 2, value_names = ["NAME", "VALUE"])]
    pub set: Vec<String>,

    /// Console commands such as `+set skill 2`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub commands: Vec<String>,
}

/// Initializes the global logger. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let env = Env::default().default_filter_or(level.to_string());
    // only fails if a logger is already installed
    let _ = Builder::from_env(env).try_init();
}

/// Pull the `+set name value` triples out of the command arguments.
/// Anything else is reported and skipped.
pub fn parse_early_commands(args: &[String]) -> Vec<(String, String)> {
    let mut sets = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] != "+set" {
            if args[i].starts_with('+') {
                com_warning(&format!("Unknown command \"{}\"", &args[i][1..]));
            }
            i += 1;
            continue;
        }
        match (args.get(i + 1), args.get(i + 2)) {
            (Some(name), Some(value)) => sets.push((name.clone(), value.clone())),
            _ => com_warning("usage: +set <variable> <value>"),
        }
        i += 3;
    }
    sets
}

/// Every cvar override given on the command line, in order.
pub fn command_line_sets(args: &Args) -> Vec<(String, String)> {
    let mut sets: Vec<(String, String)> = args
        .set
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    sets.extend(parse_early_commands(&args.commands));
    if let Some(game) = &args.game {
        sets.push(("gamedir".to_string(), game.to_string_lossy().into_owned()));
    }
    sets
}

/// SV_Frame without networking or physics: advance the clock, call
/// StartFrame and run whatever thinks are due. Returns the number of
/// thinks that ran.
pub fn sv_run_frame(progs: &mut Progs, frametime: f64) -> SvResult<usize> {
    let active: Vec<usize> = {
        let mut sv = sv_mut(progs.lua())?;
        sv.time += frametime;
        sv.edicts.iter_active().map(|(n, _)| n).collect()
    };

    let time = sv_ref(progs.lua())?.time;
    progs.globals.time = time;
    progs.globals.self_ = progs.globals.world;
    progs.globals.other = progs.globals.world;
    let start_frame = progs.globals.entry.start_frame;
    if start_frame != Func::NoRef {
        progs.execute(start_frame)?;
    }

    let mut thinks = 0;
    for n in active {
        if progs.run_think(n)? {
            thinks += 1;
        }
    }
    Ok(thinks)
}

/// Start the server described by `args` and run it for the requested
/// number of frames.
pub fn sys_run(args: &Args) -> SvResult<()> {
    cvar_init();
    sv_init_cvars();
    for (name, value) in command_line_sets(args) {
        // command line values may touch write protected variables
        cvar_force_set(&name, &value);
    }

    init_logging(args.verbose || cvar_variable_value("developer") != 0.0);

    let gamedir = PathBuf::from(cvar_variable_string("gamedir"));
    let entfile = args
        .entities
        .clone()
        .unwrap_or_else(|| gamedir.join("maps").join(format!("{}.ent", args.map)));
    com_dprintf(&format!("Loading entities from {}", entfile.display()));
    let entities = std::fs::read_to_string(&entfile)?;

    let mut progs = Progs::load_file(&gamedir, Server::default())?;
    cvar_get("*progs", "", CvarFlags::SERVERINFO | CvarFlags::NOSET);
    cvar_force_set("*progs", &progs.crc().to_string());
    cvar_force_set("mapname", &args.map);

    // the rest of the game sees skill as it was clamped
    let config = SpawnConfig::from_cvars();
    cvar_set_value("skill", config.skill as f32);

    let summary = progs.spawn_server(&args.map, &entities, config)?;
    com_printf(&format!(
        "{}: {} spawned, {} inhibited, {} discarded",
        args.map,
        summary.spawned.len(),
        summary.inhibited,
        summary.discarded
    ));
    if !progs.globals.world_published() {
        com_warning(&format!("{}: no spawn function ran, world is not set", args.map));
    }
    com_dprintf(&format!("serverinfo: {}", cvar_serverinfo()));

    for _ in 0..args.frames {
        let thinks = sv_run_frame(&mut progs, SV_FRAMETIME)?;
        com_dprintf(&format!("frame: {} thinks", thinks));
    }

    let sv = sv_ref(progs.lua())?;
    com_printf(&format!(
        "{} edicts in use at time {:.1}",
        sv.edicts.iter_active().count(),
        sv.time
    ));
    Ok(())
}
