/// `scripting/dispatch.rs` — plugin callback registries and dispatch
///
/// Host-originated events (a user command, a timer tick, a line delivered to
/// a plugin window) are turned into calls on plugin-supplied Lua callables
/// here. Every invocation runs under the exclusivity token; a fault raised
/// by a callable is reported on the diagnostic channel and dropped, so one
/// misbehaving plugin never takes the client or the other plugins with it.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mlua::{Function, Value, Variadic};
use serde::{Deserialize, Serialize};

use crate::host::{HostApi, LogLevel};

use super::event::HostEvent;
use super::exclusivity::{Exclusivity, HostSection, ScriptSection};

// ── Plugin identity ───────────────────────────────────────────────────────────

/// Explicit plugin identity, supplied by the loader when it creates the
/// plugin VM and threaded through every registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Keep only the trailing path segment, so `plugins/roster.lua` and
    /// `roster.lua` name the same plugin.
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        Self(name.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Registered callbacks ──────────────────────────────────────────────────────

/// Help metadata shown for a plugin command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandHelp {
    pub synopsis: Vec<String>,
    pub description: String,
    /// (argument name, argument description) pairs.
    pub arguments: Vec<(String, String)>,
    pub examples: Vec<String>,
}

pub struct RegisteredCommand {
    pub plugin: PluginId,
    pub name: String,
    pub min_args: i64,
    pub max_args: i64,
    pub help: CommandHelp,
    pub(crate) callback: Function,
}

pub struct RegisteredTimer {
    pub plugin: PluginId,
    pub interval: Duration,
    callback: Function,
    last_fired: Instant,
}

impl RegisteredTimer {
    pub fn new(plugin: PluginId, callback: Function, interval: Duration) -> Self {
        Self {
            plugin,
            interval,
            callback,
            last_fired: Instant::now(),
        }
    }
}

pub struct RegisteredWindow {
    pub plugin: PluginId,
    pub tag: String,
    pub(crate) callback: Function,
}

/// All live plugin registrations. Commands share one global name space, as
/// do window tags; timers are a plain list.
#[derive(Default)]
pub struct Callbacks {
    commands: Mutex<HashMap<String, RegisteredCommand>>,
    timers: Mutex<Vec<RegisteredTimer>>,
    windows: Mutex<HashMap<String, RegisteredWindow>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&self, cmd: RegisteredCommand) {
        self.commands.lock().unwrap().insert(cmd.name.clone(), cmd);
    }

    pub fn add_timed(&self, timer: RegisteredTimer) {
        self.timers.lock().unwrap().push(timer);
    }

    pub fn add_window(&self, window: RegisteredWindow) {
        self.windows.lock().unwrap().insert(window.tag.clone(), window);
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.lock().unwrap().contains_key(name)
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.lock().unwrap().keys().cloned().collect()
    }

    pub fn has_window(&self, tag: &str) -> bool {
        self.windows.lock().unwrap().contains_key(tag)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    /// Drop every registration owned by `plugin` — called on unload, before
    /// the plugin VM itself is dropped.
    pub fn remove_for_plugin(&self, plugin: &PluginId) {
        self.commands
            .lock()
            .unwrap()
            .retain(|_, c| &c.plugin != plugin);
        self.timers.lock().unwrap().retain(|t| &t.plugin != plugin);
        self.windows
            .lock()
            .unwrap()
            .retain(|_, w| &w.plugin != plugin);
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Invokes registered callables from host thread contexts. Assumes the
/// exclusivity token is *not* held by the calling thread; it acquires the
/// token for exactly the duration of the callable's execution.
#[derive(Clone)]
pub struct Dispatcher {
    excl: Arc<Exclusivity>,
    host: Arc<dyn HostApi>,
    callbacks: Arc<Callbacks>,
}

impl Dispatcher {
    pub fn new(excl: Arc<Exclusivity>, host: Arc<dyn HostApi>, callbacks: Arc<Callbacks>) -> Self {
        Self {
            excl,
            host,
            callbacks,
        }
    }

    pub fn dispatch(&self, event: HostEvent) {
        match event {
            HostEvent::Command { name, args } => {
                self.command(&name, &args);
            }
            HostEvent::WindowLine { tag, line } => {
                self.window_line(&tag, &line);
            }
            HostEvent::TimerTick => self.run_due_timers(),
        }
    }

    /// Run the command callback registered under `name`. Returns false when
    /// no such command exists.
    ///
    /// Arguments are forwarded positionally whatever their count. The empty
    /// case is special: a command declared with max_args == 1 always gets
    /// its single parameter, as nil, so the callable's signature holds.
    pub fn command(&self, name: &str, args: &[String]) -> bool {
        // Clone the callable out so the registry lock is not held while the
        // callback runs — it may re-enter the bridge and register more.
        let (plugin, max_args, callback) = {
            let commands = self.commands();
            match commands.get(name) {
                Some(c) => (c.plugin.clone(), c.max_args, c.callback.clone()),
                None => return false,
            }
        };

        let _section = ScriptSection::enter(&self.excl);
        let result = if args.is_empty() {
            if max_args == 1 {
                callback.call::<()>(Value::Nil)
            } else {
                callback.call::<()>(())
            }
        } else {
            callback.call::<()>(Variadic::from_iter(args.iter().cloned()))
        };
        if let Err(e) = result {
            self.report_fault(&plugin, &format!("command /{name}"), &e);
        }
        true
    }

    /// Run the window callback registered for `tag`, passing (tag, line).
    pub fn window_line(&self, tag: &str, line: &str) -> bool {
        let (plugin, callback) = {
            let windows = self.callbacks.windows.lock().unwrap();
            match windows.get(tag) {
                Some(w) => (w.plugin.clone(), w.callback.clone()),
                None => return false,
            }
        };

        let _section = ScriptSection::enter(&self.excl);
        if let Err(e) = callback.call::<()>((tag.to_string(), line.to_string())) {
            self.report_fault(&plugin, &format!("window {tag}"), &e);
        }
        true
    }

    /// Invoke every timed callback whose interval has elapsed, with no
    /// arguments.
    pub fn run_due_timers(&self) {
        let due: Vec<(PluginId, Function)> = {
            let mut timers = self.callbacks.timers.lock().unwrap();
            timers
                .iter_mut()
                .filter(|t| t.last_fired.elapsed() >= t.interval)
                .map(|t| {
                    t.last_fired = Instant::now();
                    (t.plugin.clone(), t.callback.clone())
                })
                .collect()
        };

        for (plugin, callback) in due {
            let _section = ScriptSection::enter(&self.excl);
            if let Err(e) = callback.call::<()>(()) {
                self.report_fault(&plugin, "timed", &e);
            }
        }
    }

    fn commands(&self) -> std::sync::MutexGuard<'_, HashMap<String, RegisteredCommand>> {
        self.callbacks.commands.lock().unwrap()
    }

    /// Swallow-and-log: the fault is reported on the diagnostic channel and
    /// never propagates past the dispatcher. The caller still holds its
    /// `ScriptSection`, so the host call goes out under a `HostSection`.
    fn report_fault(&self, plugin: &PluginId, what: &str, err: &mlua::Error) {
        log::error!("[plugins] {plugin}: {what} callback failed: {err}");
        let _host = HostSection::enter(&self.excl);
        self.host.log(
            LogLevel::Error,
            plugin.name(),
            &format!("{what} callback failed: {err}"),
        );
    }
}
