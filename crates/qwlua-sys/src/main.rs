// main.rs -- qwlua-ded entry point
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use clap::Parser;
use std::process::ExitCode;

use qwlua_sys::sys_ded::{sys_run, Args};

fn main() -> ExitCode {
    let args = Args::parse();
    match sys_run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // the logger may not be up if startup failed early
            eprintln!("Error: {}", e);
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
