/// `scripting/engine.rs` — runtime lifecycle and plugin VM manager
///
/// `ScriptRuntime` is the host's one handle on the scripting subsystem.
/// Each plugin runs in its own Lua VM with the `corvid` module registered
/// against an explicit plugin identity; all VMs share the single execution
/// exclusivity token. Plugin errors are caught and reported — never
/// propagated to the host threads that trigger them.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};
use serde::{Deserialize, Serialize};

use crate::host::{HostApi, LogLevel};

use super::{
    api::{register_bridge, BridgeContext},
    dispatch::{Callbacks, Dispatcher, PluginId},
    event::HostEvent,
    exclusivity::{Exclusivity, ScriptSection},
};

// ── Plugin VM creation ────────────────────────────────────────────────────────

/// Which Lua standard libraries a plugin VM gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginTrust {
    /// string, table, math, coroutine — no I/O or OS access.
    #[default]
    Restricted,
    /// Everything safe to load, including io and os.
    Full,
}

fn create_plugin_vm(trust: PluginTrust) -> LuaResult<Lua> {
    let libs = match trust {
        PluginTrust::Restricted => {
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE
        }
        PluginTrust::Full => StdLib::ALL_SAFE,
    };
    Lua::new_with(libs, LuaOptions::default())
}

// ── Load result / plugin metadata ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginLoadResult {
    pub success: bool,
    pub error: Option<String>,
    pub error_line: Option<u32>,
}

impl PluginLoadResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
            error_line: None,
        }
    }

    fn failed(error: String) -> Self {
        let error_line = parse_error_line(&error);
        Self {
            success: false,
            error: Some(error),
            error_line,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub trust: PluginTrust,
    pub loaded_at: i64,
}

struct LoadedPlugin {
    id: PluginId,
    // Kept alive for the plugin's lifetime; its callables live in the
    // callback registry and must be dropped before the VM is.
    lua: Lua,
    trust: PluginTrust,
    loaded_at: i64,
}

// ── ScriptRuntime ─────────────────────────────────────────────────────────────

/// Shared handle — one per process, lives in the host's state.
pub struct ScriptRuntime {
    excl: Arc<Exclusivity>,
    host: Arc<dyn HostApi>,
    callbacks: Arc<Callbacks>,
    dispatcher: Dispatcher,
    plugins: Mutex<HashMap<String, LoadedPlugin>>,
    event_tx: tokio::sync::broadcast::Sender<HostEvent>,
}

impl ScriptRuntime {
    pub fn new(host: Arc<dyn HostApi>) -> Self {
        let excl = Arc::new(Exclusivity::new());
        let callbacks = Arc::new(Callbacks::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&excl),
            Arc::clone(&host),
            Arc::clone(&callbacks),
        );
        let (event_tx, _) = tokio::sync::broadcast::channel(256);
        Self {
            excl,
            host,
            callbacks,
            dispatcher,
            plugins: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn callbacks(&self) -> &Arc<Callbacks> {
        &self.callbacks
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ── Plugin lifecycle ──────────────────────────────────────────────────

    /// Create a VM for the plugin, register the bridge under its identity,
    /// and execute the plugin body (which performs its registrations).
    pub fn load_plugin(&self, path: &str, source: &str, trust: PluginTrust) -> PluginLoadResult {
        let id = PluginId::from_path(path);
        if self.plugins.lock().unwrap().contains_key(id.name()) {
            return PluginLoadResult::failed(format!("{id} is already loaded"));
        }

        let lua = match create_plugin_vm(trust) {
            Ok(lua) => lua,
            Err(e) => {
                log::error!("[plugins] {id}: failed to create VM: {e}");
                return PluginLoadResult::failed(format!("failed to create VM: {e}"));
            }
        };

        let ctx = BridgeContext {
            plugin: id.clone(),
            host: Arc::clone(&self.host),
            excl: Arc::clone(&self.excl),
            callbacks: Arc::clone(&self.callbacks),
        };
        if let Err(e) = register_bridge(&lua, ctx) {
            log::error!("[plugins] {id}: bridge registration failed: {e}");
            return PluginLoadResult::failed(format!("bridge registration failed: {e}"));
        }

        let exec_result = {
            let _section = ScriptSection::enter(&self.excl);
            lua.load(source).set_name(id.name()).exec()
        };
        if let Err(e) = exec_result {
            let error = e.to_string();
            log::error!("[plugins] {id}: load failed: {error}");
            self.host
                .log(LogLevel::Error, id.name(), &format!("load failed: {error}"));
            // Anything the body registered before failing is withdrawn.
            self.callbacks.remove_for_plugin(&id);
            return PluginLoadResult::failed(error);
        }

        log::info!("[plugins] loaded {id}");
        self.plugins.lock().unwrap().insert(
            id.name().to_string(),
            LoadedPlugin {
                id,
                lua,
                trust,
                loaded_at: chrono::Utc::now().timestamp(),
            },
        );
        PluginLoadResult::ok()
    }

    /// Drop the plugin's registrations, then its VM. Returns false when no
    /// such plugin is loaded.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let plugin = self.plugins.lock().unwrap().remove(name);
        match plugin {
            Some(plugin) => {
                // Registry first: the registered callables hold handles into
                // the VM that is about to go away.
                self.callbacks.remove_for_plugin(&plugin.id);
                let _section = ScriptSection::enter(&self.excl);
                drop(plugin.lua);
                log::info!("[plugins] unloaded {name}");
                true
            }
            None => false,
        }
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .lock()
            .unwrap()
            .values()
            .map(|p| PluginInfo {
                name: p.id.name().to_string(),
                trust: p.trust,
                loaded_at: p.loaded_at,
            })
            .collect()
    }

    // ── Event dispatch ────────────────────────────────────────────────────

    /// Queue an event for the dispatch loop.
    pub fn fire(&self, event: HostEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Synchronous dispatch — the primitive the event loop is built on.
    pub fn run_command(&self, name: &str, args: &[String]) -> bool {
        self.dispatcher.command(name, args)
    }

    pub fn deliver_window_line(&self, tag: &str, line: &str) -> bool {
        self.dispatcher.window_line(tag, line)
    }

    pub fn run_due_timers(&self) {
        self.dispatcher.run_due_timers();
    }

    /// Spawn a background task that feeds fired events to the dispatcher.
    /// Callbacks run on a blocking thread — Lua is sync.
    pub fn start_event_loop(&self) {
        let mut rx = self.event_tx.subscribe();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let dispatcher = dispatcher.clone();
                        let _ = tokio::task::spawn_blocking(move || dispatcher.dispatch(event))
                            .await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(_) => {} // lagged, skip
                }
            }
        });
    }

    /// Spawn the timer driver: a once-a-second tick that invokes every timed
    /// callback whose interval has elapsed.
    pub fn start_timer_driver(&self) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let dispatcher = dispatcher.clone();
                let _ = tokio::task::spawn_blocking(move || dispatcher.run_due_timers()).await;
            }
        });
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Pull the source line out of an mlua error message, which embeds the chunk
/// name like `[string "roster.lua"]:3: ...`.
fn parse_error_line(err: &str) -> Option<u32> {
    let rest = &err[err.find("\"]:")? + 3..];
    let end = rest.find(':')?;
    rest[..end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;

    fn runtime() -> (Arc<ScriptRuntime>, Arc<RecordingHost>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let host = Arc::new(RecordingHost::new());
        let runtime = Arc::new(ScriptRuntime::new(
            Arc::<RecordingHost>::clone(&host) as Arc<dyn HostApi>
        ));
        (runtime, host)
    }

    const HELLO_PLUGIN: &str = r#"
        corvid.register_command("hello", 0, 1,
            { "/hello [name]" },
            "Say hello.",
            { { "name", "who to greet" } },
            { "/hello world" },
            function(name)
                if name == nil then
                    corvid.cons_show("hello, anyone")
                else
                    corvid.cons_show("hello, " .. name)
                end
            end)
    "#;

    #[test]
    fn load_plugin_runs_registrations() {
        let (runtime, host) = runtime();
        let result = runtime.load_plugin("plugins/hello.lua", HELLO_PLUGIN, PluginTrust::default());
        assert!(result.success, "{:?}", result.error);
        assert!(runtime.callbacks().has_command("hello"));
        assert_eq!(
            host.recorded(),
            vec!["command_registered(hello.lua, hello, 0, 1)"]
        );
    }

    #[test]
    fn hello_command_scenario() {
        let (runtime, host) = runtime();
        runtime.load_plugin("hello.lua", HELLO_PLUGIN, PluginTrust::default());
        host.calls.lock().unwrap().clear();

        // Zero args with max_args = 1: the callable sees a single nil.
        assert!(runtime.run_command("hello", &[]));
        assert!(runtime.run_command("hello", &["world".to_string()]));
        assert_eq!(
            host.recorded(),
            vec!["cons_show(hello, anyone)", "cons_show(hello, world)"]
        );
    }

    #[test]
    fn load_failure_reports_error_and_line() {
        let (runtime, host) = runtime();
        let result = runtime.load_plugin(
            "bad.lua",
            "corvid.cons_show(\"fine\")\nerror(\"broken plugin\")",
            PluginTrust::default(),
        );
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("broken plugin"), "{error}");
        assert_eq!(result.error_line, Some(2));
        assert!(runtime.plugins().is_empty());
        let logs = host.logs.lock().unwrap().clone();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].0, LogLevel::Error);
        assert_eq!(logs[0].1, "bad.lua");
    }

    #[test]
    fn failed_load_withdraws_partial_registrations() {
        let (runtime, _host) = runtime();
        let result = runtime.load_plugin(
            "half.lua",
            &format!("{HELLO_PLUGIN}\nerror(\"after registering\")"),
            PluginTrust::default(),
        );
        assert!(!result.success);
        assert!(!runtime.callbacks().has_command("hello"));
    }

    #[test]
    fn duplicate_load_is_rejected() {
        let (runtime, _host) = runtime();
        assert!(runtime.load_plugin("hello.lua", "", PluginTrust::default()).success);
        let again = runtime.load_plugin("hello.lua", "", PluginTrust::default());
        assert!(!again.success);
    }

    #[test]
    fn unload_drops_registrations_and_vm() {
        let (runtime, _host) = runtime();
        runtime.load_plugin("hello.lua", HELLO_PLUGIN, PluginTrust::default());
        assert!(runtime.unload_plugin("hello.lua"));
        assert!(!runtime.callbacks().has_command("hello"));
        assert!(runtime.plugins().is_empty());
        assert!(!runtime.unload_plugin("hello.lua"));
        assert!(!runtime.run_command("hello", &[]));
    }

    #[test]
    fn restricted_vm_has_no_os_library() {
        let (runtime, _host) = runtime();
        let result = runtime.load_plugin(
            "probe.lua",
            "if os ~= nil then error(\"os is available\") end",
            PluginTrust::Restricted,
        );
        assert!(result.success, "{:?}", result.error);
        let full = runtime.load_plugin(
            "probe_full.lua",
            "if os == nil then error(\"os is missing\") end",
            PluginTrust::Full,
        );
        assert!(full.success, "{:?}", full.error);
    }

    #[test]
    fn faulting_callback_leaves_other_plugins_working() {
        let (runtime, host) = runtime();
        runtime.load_plugin(
            "bomb.lua",
            r#"corvid.register_command("bomb", 0, 0, {}, "Boom.", {}, {},
                function() error("kaboom") end)"#,
            PluginTrust::default(),
        );
        runtime.load_plugin("hello.lua", HELLO_PLUGIN, PluginTrust::default());
        host.calls.lock().unwrap().clear();

        assert!(runtime.run_command("bomb", &[]));
        assert!(runtime.run_command("hello", &["still here".to_string()]));
        assert_eq!(host.recorded(), vec!["cons_show(hello, still here)"]);
        let logs = host.logs.lock().unwrap().clone();
        assert!(logs.iter().any(|(level, plugin, msg)| {
            *level == LogLevel::Error && plugin == "bomb.lua" && msg.contains("kaboom")
        }));
    }

    #[test]
    fn window_line_reaches_plugin_window_callback() {
        let (runtime, host) = runtime();
        runtime.load_plugin(
            "board.lua",
            r#"corvid.win_create("chess", function(tag, line)
                corvid.win_show(tag, "seen: " .. line)
            end)"#,
            PluginTrust::default(),
        );
        host.calls.lock().unwrap().clear();
        assert!(runtime.deliver_window_line("chess", "e2e4"));
        assert_eq!(host.recorded(), vec!["win_show(chess, seen: e2e4)"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn event_loop_dispatches_fired_events() {
        let (runtime, host) = runtime();
        runtime.load_plugin("hello.lua", HELLO_PLUGIN, PluginTrust::default());
        host.calls.lock().unwrap().clear();
        runtime.start_event_loop();
        // Give the loop a moment to subscribe-cycle before firing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        runtime.fire(HostEvent::Command {
            name: "hello".to_string(),
            args: vec!["async".to_string()],
        });

        for _ in 0..100 {
            if !host.recorded().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(host.recorded(), vec!["cons_show(hello, async)"]);
    }

    #[test]
    fn parse_error_line_reads_chunk_position() {
        assert_eq!(
            parse_error_line("runtime error: [string \"bad.lua\"]:7: boom"),
            Some(7)
        );
        assert_eq!(parse_error_line("something else entirely"), None);
    }
}
