// pr_exec.rs -- progs loading and entrypoint execution
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use mlua::{Function, Lua, Table, Value};
use qwlua_common::common::{com_dprintf, com_printf};
use qwlua_common::crc::crc_block;
use std::path::Path;

use crate::ed_parse::{ed_load_from_file, LoadSummary, SpawnConfig};
use crate::pr_edict::pr_set_string;
use crate::pr_registry::{HandleId, OwnedHandle};
use crate::pr_vec3::pr_vec3_init;
use crate::server::{sv_mut, sv_ref, Server, ServerState, SvError, SvResult};
use crate::sv_edict::{ed_ensure_fields, sv_reset_edicts};

pub const PROGS_FILENAME: &str = "qwprogs.lua";

/// Raw value of a function reference that failed to resolve.
pub const NOREF: i32 = -2;

pub const NUM_SPAWN_PARMS: usize = 9;

// world entity defaults set before the level's entities are parsed
const SOLID_BSP: f32 = 4.0;
const MOVETYPE_PUSH: f32 = 7.0;

// ============================================================
// func_t
// ============================================================

/// A function reference as stored in the globals and in edict fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Func {
    /// nothing bound; executing it does nothing
    #[default]
    None,
    /// lookup failed when the progs were loaded; executing it is a bug
    NoRef,
    Ref(HandleId),
}

impl From<Option<HandleId>> for Func {
    fn from(id: Option<HandleId>) -> Self {
        id.map_or(Func::None, Func::Ref)
    }
}

// ============================================================
// globalvars_t
// ============================================================

/// Entrypoints looked up once when the progs are loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Entrypoints {
    pub main: Func,
    pub start_frame: Func,
    pub player_pre_think: Func,
    pub player_post_think: Func,
    pub client_kill: Func,
    pub client_connect: Func,
    pub put_client_in_server: Func,
    pub client_disconnect: Func,
    pub set_new_parms: Func,
    pub set_change_parms: Func,
    pub spectator_connect: Func,
    pub spectator_think: Func,
    pub spectator_disconnect: Func,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    /// The next call while loading publishes the world first.
    #[default]
    AwaitingWorld,
    Running,
}

/// State handed to every entrypoint call through the Lua globals.
#[derive(Debug, Clone, Default)]
pub struct PrGlobals {
    pub self_: Option<HandleId>,
    pub other: Option<HandleId>,
    pub world: Option<HandleId>,
    pub time: f64,
    pub force_retouch: f32,

    pub serverflags: f32,
    pub total_secrets: f32,
    pub total_monsters: f32,
    pub found_secrets: f32,
    pub killed_monsters: f32,

    /// set by SetNewParms and SetChangeParms, read by PutClientInServer
    pub parms: [f32; NUM_SPAWN_PARMS],

    pub entry: Entrypoints,
    phase: Phase,
}

impl PrGlobals {
    /// Forget the previous level's entities; the next call while loading
    /// publishes the world again.
    pub fn begin_level(&mut self, time: f64) {
        self.self_ = None;
        self.other = None;
        self.world = None;
        self.time = time;
        self.force_retouch = 0.0;
        self.phase = Phase::AwaitingWorld;
    }

    pub fn world_published(&self) -> bool {
        self.phase == Phase::Running
    }
}

fn parm_name(i: usize) -> String {
    format!("parm{}", i + 1)
}

// ============================================================
// PR_ExecuteProgram
// ============================================================

struct CallContext {
    function: Function,
    self_: Value,
    other: Value,
    /// world and mapname, present on the first call of a level
    bootstrap: Option<(Value, String)>,
}

fn prepare_call(lua: &Lua, pr: &mut PrGlobals, id: HandleId) -> SvResult<CallContext> {
    let mut sv = sv_mut(lua)?;

    let function = match sv.registry.get(id)? {
        Value::Function(f) => f,
        other => {
            return Err(SvError::NotAFunction {
                handle: id.get(),
                got: other.type_name(),
            })
        }
    };

    // the first call of a level runs before any edict but the world exists;
    // a caller that already picked self or other keeps its choice
    let mut bootstrap = None;
    if pr.phase == Phase::AwaitingWorld && sv.state == ServerState::Loading {
        ed_ensure_fields(lua, &mut sv, 0)?;
        let world = sv.edicts.edict_num(0)?.handle();
        pr.world = world;
        pr.self_ = pr.self_.or(world);
        pr.other = pr.other.or(world);
        pr.phase = Phase::Running;

        let world = match world {
            Some(id) => sv.registry.get(id)?,
            None => Value::Nil,
        };
        bootstrap = Some((world, sv.mapname.clone()));
    }

    let Some(self_) = pr.self_ else {
        return Err(SvError::NoSelf);
    };
    let self_ = sv.registry.get(self_)?;
    let other = match pr.other {
        Some(id) => sv.registry.get(id)?,
        None => Value::Nil,
    };

    Ok(CallContext {
        function,
        self_,
        other,
        bootstrap,
    })
}

/// Run the Lua function behind `fnum` with `pr` published as globals.
///
/// Entrypoint-specific globals: StartFrame reads `force_retouch` back
/// beforehand, PutClientInServer gets the spawn parms, SetNewParms and
/// SetChangeParms return them.
pub fn pr_execute_program(lua: &Lua, pr: &mut PrGlobals, fnum: Func) -> SvResult<()> {
    // if thinking without a valid function, we still get called
    let id = match fnum {
        Func::None => return Ok(()),
        Func::NoRef => return Err(SvError::InvalidFunction(NOREF)),
        Func::Ref(id) => id,
    };

    // the server borrow ends here; Lua code below may touch edicts
    let call = prepare_call(lua, pr, id)?;
    let globals = lua.globals();

    if let Some((world, mapname)) = call.bootstrap {
        globals.set("world", world)?;
        globals.set("mapname", mapname)?;
        globals.set("serverflags", pr.serverflags)?;
        // published for the progs but never read back
        globals.set("total_secrets", pr.total_secrets)?;
        globals.set("total_monsters", pr.total_monsters)?;
        globals.set("found_secrets", pr.found_secrets)?;
        globals.set("killed_monsters", pr.killed_monsters)?;
    }

    if fnum == pr.entry.start_frame {
        pr.force_retouch = get_gfloat(&globals, "force_retouch")?;
    }

    globals.set("self", call.self_)?;
    globals.set("other", call.other)?;
    globals.set("force_retouch", pr.force_retouch)?;
    globals.set("time", pr.time)?;

    if fnum == pr.entry.put_client_in_server {
        for (i, parm) in pr.parms.iter().enumerate() {
            globals.set(parm_name(i), *parm)?;
        }
    }

    call.function.call::<()>(())?;

    if fnum == pr.entry.set_change_parms || fnum == pr.entry.set_new_parms {
        for i in 0..NUM_SPAWN_PARMS {
            pr.parms[i] = get_gfloat(&globals, &parm_name(i))?;
        }
    }

    Ok(())
}

/// A numeric global; nil and non-numbers read as 0.
fn get_gfloat(globals: &Table, name: &str) -> SvResult<f32> {
    let value: Value = globals.get(name)?;
    Ok(match value {
        Value::Integer(i) => i as f32,
        Value::Number(n) => n as f32,
        Value::String(s) => s.to_str().ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0.0),
        _ => 0.0,
    })
}

/// ED_FindFunction: register the global function `name`, if there is one.
pub fn ed_find_function(lua: &Lua, sv: &mut Server, name: &str) -> SvResult<Option<OwnedHandle>> {
    match lua.globals().get::<Value>(name)? {
        f @ Value::Function(_) => Ok(Some(sv.registry.acquire(f))),
        _ => {
            com_printf(&format!("Did not find function '{}'", name));
            Ok(None)
        }
    }
}

// ============================================================
// Progs VM
// ============================================================

/// A loaded progs script together with the server it drives.
pub struct Progs {
    lua: Lua,
    pub globals: PrGlobals,
    /// keeps the entrypoints' registry slots alive
    entry_refs: Vec<OwnedHandle>,
    crc: u16,
}

impl Progs {
    /// PR_LoadProgs from an in-memory script. `gamedir` is added to the
    /// module search path so the script can `require` its siblings.
    pub fn load(source: &str, chunk_name: &str, gamedir: &str, sv: Server) -> SvResult<Self> {
        let lua = Lua::new();

        // append the game directory to package.path
        let package: Table = lua.globals().get("package")?;
        let path: String = package.get("path")?;
        package.set("path", format!("{};{}/?.lua", path, gamedir))?;

        pr_vec3_init(&lua)?;
        lua.set_app_data(sv);

        lua.load(source).set_name(chunk_name).exec()?;

        let mut progs = Self {
            lua,
            globals: PrGlobals::default(),
            entry_refs: Vec::new(),
            crc: crc_block(source.as_bytes()),
        };

        progs.globals.entry = Entrypoints {
            main: progs.find_function("main")?,
            start_frame: progs.find_function("StartFrame")?,
            player_pre_think: progs.find_function("PlayerPreThink")?,
            player_post_think: progs.find_function("PlayerPostThink")?,
            client_kill: progs.find_function("ClientKill")?,
            client_connect: progs.find_function("ClientConnect")?,
            put_client_in_server: progs.find_function("PutClientInServer")?,
            client_disconnect: progs.find_function("ClientDisconnect")?,
            set_new_parms: progs.find_function("SetNewParms")?,
            set_change_parms: progs.find_function("SetChangeParms")?,
            spectator_connect: progs.find_function("SpectatorConnect")?,
            spectator_think: progs.find_function("SpectatorThink")?,
            spectator_disconnect: progs.find_function("SpectatorDisconnect")?,
        };

        com_dprintf(&format!("Loaded {} (crc {})", chunk_name, progs.crc));
        Ok(progs)
    }

    /// Load `qwprogs.lua` from the game directory.
    pub fn load_file(gamedir: &Path, sv: Server) -> SvResult<Self> {
        let path = gamedir.join(PROGS_FILENAME);
        let source = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SvError::NoProgs(PROGS_FILENAME.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::load(&source, PROGS_FILENAME, &gamedir.to_string_lossy(), sv)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// CRC of the progs source, published as `*progs`.
    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Resolve a global function for the life of this VM. A missing one
    /// yields the `NoRef` sentinel.
    pub fn find_function(&mut self, name: &str) -> SvResult<Func> {
        let mut sv = sv_mut(&self.lua)?;
        match ed_find_function(&self.lua, &mut sv, name)? {
            Some(h) => {
                let id = h.id();
                self.entry_refs.push(h);
                Ok(Func::Ref(id))
            }
            None => Ok(Func::NoRef),
        }
    }

    pub fn execute(&mut self, fnum: Func) -> SvResult<()> {
        pr_execute_program(&self.lua, &mut self.globals, fnum)
    }

    /// ED_LoadFromFile
    pub fn load_entities(&mut self, data: &str, config: SpawnConfig) -> SvResult<LoadSummary> {
        ed_load_from_file(&self.lua, &mut self.globals, data, config)
    }

    /// Start a new level: wipe the edicts, set up the world and spawn the
    /// entities in `entities`.
    pub fn spawn_server(
        &mut self,
        mapname: &str,
        entities: &str,
        config: SpawnConfig,
    ) -> SvResult<LoadSummary> {
        com_dprintf(&format!("SpawnServer: {}", mapname));

        {
            let mut sv = sv_mut(&self.lua)?;
            sv.state = ServerState::Loading;
            sv.mapname = mapname.to_string();
            // leave the first frames inside the allocator's warm-up window
            sv.time = 1.0;
            sv_reset_edicts(&mut sv);

            ed_ensure_fields(&self.lua, &mut sv, 0)?;
            let model = pr_set_string(&self.lua, &mut sv, &format!("maps/{}.bsp", mapname))?;
            let world = sv.edicts.edict_num_mut(0)?;
            world.free = false;
            world.v.model = Some(model);
            world.v.modelindex = 1.0; // world model
            world.v.solid = SOLID_BSP;
            world.v.movetype = MOVETYPE_PUSH;
        }
        self.globals.begin_level(1.0);

        let summary = self.load_entities(entities, config)?;

        sv_mut(&self.lua)?.state = ServerState::Active;
        com_printf(&format!("Server spawned: {} entities", summary.spawned.len()));
        Ok(summary)
    }

    /// SV_RunThink: run edict `n`'s think function if it is due.
    pub fn run_think(&mut self, n: usize) -> SvResult<bool> {
        let (think, self_) = {
            let mut sv = sv_mut(&self.lua)?;
            let time = sv.time;
            let ed = sv.edicts.edict_num_mut(n)?;
            let due = ed.v.nextthink > 0.0 && f64::from(ed.v.nextthink) <= time;
            if ed.free || !due {
                return Ok(false);
            }
            // don't let things stay in the past
            ed.v.nextthink = 0.0;
            let think = Func::from(ed.v.think.as_ref().map(OwnedHandle::id));
            (think, ed.handle())
        };

        self.globals.time = sv_ref(&self.lua)?.time;
        self.globals.self_ = self_;
        self.globals.other = self.globals.world;
        self.execute(think)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sv_world::AreaLinks;

    fn small_server() -> Server {
        Server::new(32, 2, Box::new(AreaLinks::new(32)))
    }

    fn load(src: &str) -> Progs {
        Progs::load(src, "test.lua", "qw", small_server()).unwrap()
    }

    #[test]
    fn test_load_finds_entrypoints() {
        let progs = load("function main() end function StartFrame() end");
        assert!(matches!(progs.globals.entry.main, Func::Ref(_)));
        assert!(matches!(progs.globals.entry.start_frame, Func::Ref(_)));
        assert_eq!(progs.globals.entry.client_kill, Func::NoRef);
        assert_eq!(progs.crc(), crc_block(b"function main() end function StartFrame() end"));
    }

    #[test]
    fn test_load_appends_gamedir_to_package_path() {
        let progs = Progs::load("", "test.lua", "mygame", small_server()).unwrap();
        let path: String = progs.lua().load("return package.path").eval().unwrap();
        assert!(path.ends_with(";mygame/?.lua"));
    }

    #[test]
    fn test_load_script_error_is_fatal() {
        let err = Progs::load("this is not lua", "bad.lua", "qw", small_server());
        assert!(matches!(err, Err(SvError::Script(_))));
        let err = Progs::load("error('nope')", "bad.lua", "qw", small_server());
        assert!(matches!(err, Err(SvError::Script(_))));
    }

    #[test]
    fn test_load_file_missing() {
        let dir = std::env::temp_dir().join("qwlua-no-such-gamedir");
        let err = Progs::load_file(&dir, small_server());
        assert!(matches!(err, Err(SvError::NoProgs(_))));
    }

    #[test]
    fn test_execute_none_is_noop() {
        let mut progs = load("");
        progs.execute(Func::None).unwrap();
    }

    #[test]
    fn test_execute_noref_is_fatal() {
        let mut progs = load("");
        let err = progs.execute(Func::NoRef);
        assert!(matches!(err, Err(SvError::InvalidFunction(NOREF))));
    }

    #[test]
    fn test_execute_without_self_is_fatal() {
        let mut progs = load("function main() end");
        let main = progs.globals.entry.main;
        assert!(matches!(progs.execute(main), Err(SvError::NoSelf)));
    }

    #[test]
    fn test_execute_non_function_is_fatal() {
        let mut progs = load("");
        let h = sv_mut(progs.lua()).unwrap().registry.acquire(Value::Boolean(true));
        let err = progs.execute(Func::Ref(h.id()));
        assert!(matches!(err, Err(SvError::NotAFunction { got: "boolean", .. })));
        sv_mut(progs.lua()).unwrap().registry.release(h);
    }

    #[test]
    fn test_bootstrap_publishes_world() {
        let mut progs = load(
            r#"
            seen = {}
            function main()
                seen.world_is_self = rawequal(world, self)
                seen.mapname = mapname
                seen.time = time
            end
            "#,
        );
        {
            let mut sv = sv_mut(progs.lua()).unwrap();
            sv.state = ServerState::Loading;
            sv.mapname = "e1m1".to_string();
        }
        progs.globals.begin_level(1.0);
        let main = progs.globals.entry.main;
        progs.execute(main).unwrap();

        assert!(progs.globals.world_published());
        assert!(progs.globals.world.is_some());
        let (same, mapname, time): (bool, String, f64) = progs
            .lua()
            .load("return seen.world_is_self, seen.mapname, seen.time")
            .eval()
            .unwrap();
        assert!(same);
        assert_eq!(mapname, "e1m1");
        assert_eq!(time, 1.0);
    }

    #[test]
    fn test_bootstrap_keeps_chosen_self() {
        let mut progs = load("function main() seen = self end");
        progs.globals.begin_level(1.0);
        let client = {
            let mut sv = sv_mut(progs.lua()).unwrap();
            sv.state = ServerState::Loading;
            ed_ensure_fields(progs.lua(), &mut sv, 1).unwrap();
            sv.edicts.edict_num(1).unwrap().handle()
        };
        assert!(client.is_some());
        progs.globals.self_ = client;

        let main = progs.globals.entry.main;
        progs.execute(main).unwrap();

        assert!(progs.globals.world_published());
        assert_eq!(progs.globals.self_, client);
        assert_ne!(progs.globals.world, client);
        let seen: String = progs.lua().load("return tostring(seen)").eval().unwrap();
        assert_eq!(seen, "edict 1");
    }

    #[test]
    fn test_script_error_is_fatal() {
        let mut progs = load("function main() error('bad thing') end");
        sv_mut(progs.lua()).unwrap().state = ServerState::Loading;
        let main = progs.globals.entry.main;
        let err = progs.execute(main).unwrap_err();
        assert!(matches!(err, SvError::Script(_)));
        assert!(err.to_string().contains("bad thing"));
    }

    #[test]
    fn test_parms_round_trip() {
        let mut progs = load(
            r#"
            function SetNewParms()
                parm1 = 100
                parm4 = 25
            end
            function PutClientInServer()
                got = parm1 + parm4
            end
            "#,
        );
        sv_mut(progs.lua()).unwrap().state = ServerState::Loading;
        let entry = progs.globals.entry;
        progs.execute(entry.set_new_parms).unwrap();
        assert_eq!(progs.globals.parms[0], 100.0);
        assert_eq!(progs.globals.parms[3], 25.0);
        assert_eq!(progs.globals.parms[8], 0.0);

        progs.globals.parms[0] = 7.0;
        progs.execute(entry.put_client_in_server).unwrap();
        let got: f64 = progs.lua().load("return got").eval().unwrap();
        assert_eq!(got, 32.0);
    }

    #[test]
    fn test_start_frame_reads_force_retouch() {
        let mut progs = load("function StartFrame() seen = force_retouch end");
        sv_mut(progs.lua()).unwrap().state = ServerState::Loading;
        progs.lua().globals().set("force_retouch", 2).unwrap();
        let start_frame = progs.globals.entry.start_frame;
        progs.execute(start_frame).unwrap();
        assert_eq!(progs.globals.force_retouch, 2.0);
        let seen: f64 = progs.lua().load("return seen").eval().unwrap();
        assert_eq!(seen, 2.0);
    }

    #[test]
    fn test_func_from_handle() {
        assert_eq!(Func::from(None), Func::None);
        let mut progs = load("");
        let h = sv_mut(progs.lua()).unwrap().registry.acquire(Value::Boolean(true));
        assert_eq!(Func::from(Some(h.id())), Func::Ref(h.id()));
        sv_mut(progs.lua()).unwrap().registry.release(h);
        progs.execute(Func::None).unwrap();
    }
}
