/// `scripting/api.rs` — the `corvid` module exposed to plugin VMs
///
/// One entry point per host capability, registered on a module table in
/// each plugin's VM. Every entry point follows the same shape:
///
///   1. validate argument count and decode values via `marshal`;
///   2. on any decode failure, return nil immediately — no `HostSection`,
///      no host side effect, never a Lua error;
///   3. wrap the forwarded host call in a `HostSection` so the exclusivity
///      token is free while the host works;
///   4. re-encode the host's result (most entry points return nil).
use std::sync::Arc;

use mlua::{Lua, MultiValue, Result as LuaResult, Table, Value};

use crate::host::{HostApi, LogLevel};

use super::dispatch::{
    Callbacks, CommandHelp, PluginId, RegisteredCommand, RegisteredTimer, RegisteredWindow,
};
use super::exclusivity::{Exclusivity, HostSection};
use super::marshal::{self, ScriptValue};

/// Name the module table is published under in every plugin VM.
pub const MODULE_NAME: &str = "corvid";

/// Everything an entry point needs, captured by its closure. The plugin
/// identity is explicit — the loader supplies it when it creates the VM,
/// instead of the bridge inferring it from the interpreter call stack.
#[derive(Clone)]
pub struct BridgeContext {
    pub plugin: PluginId,
    pub host: Arc<dyn HostApi>,
    pub excl: Arc<Exclusivity>,
    pub callbacks: Arc<Callbacks>,
}

/// Register the full `corvid` API surface on `lua`.
pub fn register_bridge(lua: &Lua, ctx: BridgeContext) -> LuaResult<()> {
    let module = lua.create_table()?;
    register_console(lua, &module, &ctx)?;
    register_registration(lua, &module, &ctx)?;
    register_completers(lua, &module, &ctx)?;
    register_state_queries(lua, &module, &ctx)?;
    register_windows(lua, &module, &ctx)?;
    register_settings(lua, &module, &ctx)?;
    register_messaging(lua, &module, &ctx)?;
    register_log(lua, &module, &ctx)?;
    register_help(lua, &module)?;
    lua.globals().set(MODULE_NAME, module)?;
    log::debug!("[plugins] registered {MODULE_NAME} module for {}", ctx.plugin);
    Ok(())
}

/// Exact-arity argument extraction. `None` means the call is rejected; the
/// entry point returns nil without touching the host.
fn take_args<const N: usize>(args: MultiValue) -> Option<[Value; N]> {
    if args.len() != N {
        return None;
    }
    let mut it = args.into_iter();
    Some(std::array::from_fn(|_| it.next().unwrap_or(Value::Nil)))
}

fn nil() -> LuaResult<Value> {
    Ok(Value::Nil)
}

// ── console ───────────────────────────────────────────────────────────────────

fn register_console(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let alert = {
        let ctx = ctx.clone();
        // No-args calling convention: arguments are ignored outright.
        lua.create_function(move |_, _args: MultiValue| {
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.cons_alert();
            drop(_host);
            nil()
        })?
    };
    module.set("cons_alert", alert)?;

    let show = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([message]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(message) = marshal::decode_str(&message) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.cons_show(&message);
            drop(_host);
            nil()
        })?
    };
    module.set("cons_show", show)?;

    let show_themed = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([group, key, default, message]) = take_args::<4>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_opt_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_opt_str(&key) else {
                return nil();
            };
            let Ok(default) = marshal::decode_opt_str(&default) else {
                return nil();
            };
            let Ok(message) = marshal::decode_str(&message) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.cons_show_themed(
                group.as_deref(),
                key.as_deref(),
                default.as_deref(),
                &message,
            );
            drop(_host);
            nil()
        })?
    };
    module.set("cons_show_themed", show_themed)?;

    let bad_usage = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([cmd]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(cmd) = marshal::decode_str(&cmd) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.cons_bad_cmd_usage(&cmd);
            drop(_host);
            nil()
        })?
    };
    module.set("cons_bad_cmd_usage", bad_usage)?;

    let notify = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([message, timeout_ms, category]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(message) = marshal::decode_str(&message) else {
                return nil();
            };
            let Ok(timeout_ms) = marshal::decode_int(&timeout_ms) else {
                return nil();
            };
            let Ok(category) = marshal::decode_str(&category) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.notify(&message, timeout_ms, &category);
            drop(_host);
            nil()
        })?
    };
    module.set("notify", notify)?;
    Ok(())
}

// ── registration ──────────────────────────────────────────────────────────────

fn register_registration(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let register_command = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([name, min, max, synopsis, description, arguments, examples, callback]) =
                take_args::<8>(args)
            else {
                return nil();
            };
            let Ok(name) = marshal::decode_str(&name) else {
                return nil();
            };
            let Ok(min_args) = marshal::decode_int(&min) else {
                return nil();
            };
            let Ok(max_args) = marshal::decode_int(&max) else {
                return nil();
            };
            let Ok(synopsis) = marshal::decode_str_list(&synopsis) else {
                return nil();
            };
            let Ok(description) = marshal::decode_str(&description) else {
                return nil();
            };
            // A malformed (name, description) pair abandons the whole
            // registration — nothing partial is ever stored.
            let Ok(arguments) = marshal::decode_pair_list(&arguments) else {
                return nil();
            };
            let Ok(examples) = marshal::decode_str_list(&examples) else {
                return nil();
            };
            let Value::Function(callback) = callback else {
                log::debug!(
                    "[plugins] {}: register_command /{name} skipped, callback not callable",
                    ctx.plugin
                );
                return nil();
            };

            log::debug!("[plugins] register command /{name} for {}", ctx.plugin);
            let help = CommandHelp {
                synopsis,
                description,
                arguments,
                examples,
            };
            {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host
                    .command_registered(ctx.plugin.name(), &name, min_args, max_args, &help);
            }
            ctx.callbacks.add_command(RegisteredCommand {
                plugin: ctx.plugin.clone(),
                name,
                min_args,
                max_args,
                help,
                callback,
            });
            nil()
        })?
    };
    module.set("register_command", register_command)?;

    let register_timed = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([callback, interval]) = take_args::<2>(args) else {
                return nil();
            };
            let Ok(interval) = marshal::decode_int(&interval) else {
                return nil();
            };
            let Value::Function(callback) = callback else {
                log::debug!(
                    "[plugins] {}: register_timed skipped, callback not callable",
                    ctx.plugin
                );
                return nil();
            };

            log::debug!("[plugins] register timed for {}", ctx.plugin);
            ctx.callbacks.add_timed(RegisteredTimer::new(
                ctx.plugin.clone(),
                callback,
                std::time::Duration::from_secs(interval.max(0) as u64),
            ));
            nil()
        })?
    };
    module.set("register_timed", register_timed)?;
    Ok(())
}

// ── autocomplete ──────────────────────────────────────────────────────────────

fn register_completers(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let add = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([key, items]) = take_args::<2>(args) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(items) = marshal::decode_str_list(&items) else {
                return nil();
            };
            log::debug!("[plugins] completer add {key} for {}", ctx.plugin);
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.completer_add(ctx.plugin.name(), &key, &items);
            drop(_host);
            nil()
        })?
    };
    module.set("completer_add", add)?;

    let remove = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([key, items]) = take_args::<2>(args) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(items) = marshal::decode_str_list(&items) else {
                return nil();
            };
            log::debug!("[plugins] completer remove {key} for {}", ctx.plugin);
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.completer_remove(ctx.plugin.name(), &key, &items);
            drop(_host);
            nil()
        })?
    };
    module.set("completer_remove", remove)?;

    let clear = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([key]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            log::debug!("[plugins] completer clear {key} for {}", ctx.plugin);
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.completer_clear(ctx.plugin.name(), &key);
            drop(_host);
            nil()
        })?
    };
    module.set("completer_clear", clear)?;
    Ok(())
}

// ── state queries ─────────────────────────────────────────────────────────────

fn register_state_queries(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let recipient = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, _args: MultiValue| {
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.get_current_recipient()
            };
            match result {
                Some(jid) => marshal::encode(&ScriptValue::Str(jid), lua),
                None => nil(),
            }
        })?
    };
    module.set("get_current_recipient", recipient)?;

    let muc = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, _args: MultiValue| {
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.get_current_muc()
            };
            match result {
                Some(room) => marshal::encode(&ScriptValue::Str(room), lua),
                None => nil(),
            }
        })?
    };
    module.set("get_current_muc", muc)?;

    let nick = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, _args: MultiValue| {
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.get_current_nick()
            };
            match result {
                Some(nick) => marshal::encode(&ScriptValue::Str(nick), lua),
                None => nil(),
            }
        })?
    };
    module.set("get_current_nick", nick)?;

    let occupants = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, _args: MultiValue| {
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.get_current_occupants()
            };
            // Always a list — empty when no room is active, never nil.
            marshal::encode(&ScriptValue::StrList(result), lua)
        })?
    };
    module.set("get_current_occupants", occupants)?;

    let is_console = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, _args: MultiValue| {
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.current_win_is_console()
            };
            marshal::encode(&ScriptValue::Bool(result), lua)
        })?
    };
    module.set("current_win_is_console", is_console)?;
    Ok(())
}

// ── windows ───────────────────────────────────────────────────────────────────

fn register_windows(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let exists = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, args: MultiValue| {
            let Some([tag]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(tag) = marshal::decode_str(&tag) else {
                return nil();
            };
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.win_exists(&tag)
            };
            marshal::encode(&ScriptValue::Bool(result), lua)
        })?
    };
    module.set("win_exists", exists)?;

    let create = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([tag, callback]) = take_args::<2>(args) else {
                return nil();
            };
            let Ok(tag) = marshal::decode_str(&tag) else {
                return nil();
            };
            let Value::Function(callback) = callback else {
                log::debug!(
                    "[plugins] {}: win_create {tag} skipped, callback not callable",
                    ctx.plugin
                );
                return nil();
            };

            log::debug!("[plugins] win create {tag} for {}", ctx.plugin);
            {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.win_create(ctx.plugin.name(), &tag);
            }
            ctx.callbacks.add_window(RegisteredWindow {
                plugin: ctx.plugin.clone(),
                tag,
                callback,
            });
            nil()
        })?
    };
    module.set("win_create", create)?;

    let focus = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([tag]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(tag) = marshal::decode_str(&tag) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.win_focus(&tag);
            drop(_host);
            nil()
        })?
    };
    module.set("win_focus", focus)?;

    let show = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([tag, line]) = take_args::<2>(args) else {
                return nil();
            };
            let Ok(tag) = marshal::decode_str(&tag) else {
                return nil();
            };
            let Ok(line) = marshal::decode_str(&line) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.win_show(&tag, &line);
            drop(_host);
            nil()
        })?
    };
    module.set("win_show", show)?;

    let show_themed = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([tag, group, key, default, line]) = take_args::<5>(args) else {
                return nil();
            };
            let Ok(tag) = marshal::decode_str(&tag) else {
                return nil();
            };
            let Ok(group) = marshal::decode_opt_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_opt_str(&key) else {
                return nil();
            };
            let Ok(default) = marshal::decode_opt_str(&default) else {
                return nil();
            };
            let Ok(line) = marshal::decode_str(&line) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.win_show_themed(
                &tag,
                group.as_deref(),
                key.as_deref(),
                default.as_deref(),
                &line,
            );
            drop(_host);
            nil()
        })?
    };
    module.set("win_show_themed", show_themed)?;
    Ok(())
}

// ── settings ──────────────────────────────────────────────────────────────────

fn register_settings(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let get_boolean = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, args: MultiValue| {
            let Some([group, key, default]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            // Exact boolean required — no truthiness. A mismatch leaves the
            // setting unread.
            let Ok(default) = marshal::decode_bool(&default) else {
                return nil();
            };
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.settings_get_boolean(&group, &key, default)
            };
            marshal::encode(&ScriptValue::Bool(result), lua)
        })?
    };
    module.set("settings_get_boolean", get_boolean)?;

    let set_boolean = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([group, key, value]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(value) = marshal::decode_bool(&value) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.settings_set_boolean(&group, &key, value);
            drop(_host);
            nil()
        })?
    };
    module.set("settings_set_boolean", set_boolean)?;

    let get_string = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, args: MultiValue| {
            let Some([group, key, default]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(default) = marshal::decode_opt_str(&default) else {
                return nil();
            };
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.settings_get_string(&group, &key, default.as_deref())
            };
            match result {
                Some(value) => marshal::encode(&ScriptValue::Str(value), lua),
                None => nil(),
            }
        })?
    };
    module.set("settings_get_string", get_string)?;

    let set_string = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([group, key, value]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(value) = marshal::decode_str(&value) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.settings_set_string(&group, &key, &value);
            drop(_host);
            nil()
        })?
    };
    module.set("settings_set_string", set_string)?;

    let get_int = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, args: MultiValue| {
            let Some([group, key, default]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(default) = marshal::decode_int(&default) else {
                return nil();
            };
            let result = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.settings_get_int(&group, &key, default)
            };
            marshal::encode(&ScriptValue::Int(result), lua)
        })?
    };
    module.set("settings_get_int", get_int)?;

    let set_int = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([group, key, value]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(group) = marshal::decode_str(&group) else {
                return nil();
            };
            let Ok(key) = marshal::decode_str(&key) else {
                return nil();
            };
            let Ok(value) = marshal::decode_int(&value) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.settings_set_int(&group, &key, value);
            drop(_host);
            nil()
        })?
    };
    module.set("settings_set_int", set_int)?;
    Ok(())
}

// ── messaging ─────────────────────────────────────────────────────────────────

fn register_messaging(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    let send_line = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([line]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(line) = marshal::decode_str(&line) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.send_line(&line);
            drop(_host);
            nil()
        })?
    };
    module.set("send_line", send_line)?;

    let send_stanza = {
        let ctx = ctx.clone();
        lua.create_function(move |lua, args: MultiValue| {
            let Some([stanza]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(stanza) = marshal::decode_str(&stanza) else {
                return nil();
            };
            let sent = {
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.send_stanza(&stanza)
            };
            marshal::encode(&ScriptValue::Bool(sent), lua)
        })?
    };
    module.set("send_stanza", send_stanza)?;

    let incoming = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([barejid, resource, message]) = take_args::<3>(args) else {
                return nil();
            };
            let Ok(barejid) = marshal::decode_str(&barejid) else {
                return nil();
            };
            let Ok(resource) = marshal::decode_str(&resource) else {
                return nil();
            };
            let Ok(message) = marshal::decode_str(&message) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.incoming_message(&barejid, &resource, &message);
            drop(_host);
            nil()
        })?
    };
    module.set("incoming_message", incoming)?;

    let disco = {
        let ctx = ctx.clone();
        lua.create_function(move |_, args: MultiValue| {
            let Some([feature]) = take_args::<1>(args) else {
                return nil();
            };
            let Ok(feature) = marshal::decode_str(&feature) else {
                return nil();
            };
            let _host = HostSection::enter(&ctx.excl);
            ctx.host.disco_add_feature(&feature);
            drop(_host);
            nil()
        })?
    };
    module.set("disco_add_feature", disco)?;
    Ok(())
}

// ── diagnostic log ────────────────────────────────────────────────────────────

fn register_log(lua: &Lua, module: &Table, ctx: &BridgeContext) -> LuaResult<()> {
    macro_rules! log_fn {
        ($name:literal, $level:expr) => {{
            let ctx = ctx.clone();
            let f = lua.create_function(move |_, args: MultiValue| {
                let Some([message]) = take_args::<1>(args) else {
                    return nil();
                };
                let Ok(message) = marshal::decode_str(&message) else {
                    return nil();
                };
                log::log!(native_level($level), "[{}] {message}", ctx.plugin);
                let _host = HostSection::enter(&ctx.excl);
                ctx.host.log($level, ctx.plugin.name(), &message);
                drop(_host);
                nil()
            })?;
            module.set($name, f)?;
        }};
    }

    log_fn!("log_debug", LogLevel::Debug);
    log_fn!("log_info", LogLevel::Info);
    log_fn!("log_warning", LogLevel::Warning);
    log_fn!("log_error", LogLevel::Error);
    Ok(())
}

fn native_level(level: LogLevel) -> log::Level {
    match level {
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Info => log::Level::Info,
        LogLevel::Warning => log::Level::Warn,
        LogLevel::Error => log::Level::Error,
    }
}

// ── help ──────────────────────────────────────────────────────────────────────

/// One-line description per entry point, published as `corvid.help`.
const HELP: &[(&str, &str)] = &[
    ("cons_alert", "Highlight the console window in the status bar."),
    ("cons_show", "Print a line to the console."),
    ("cons_show_themed", "Print a themed line to the console."),
    ("cons_bad_cmd_usage", "Show invalid command message in console."),
    ("register_command", "Register a command."),
    ("register_timed", "Register a timed function."),
    ("completer_add", "Add items to an autocompleter."),
    ("completer_remove", "Remove items from an autocompleter."),
    ("completer_clear", "Remove all items from an autocompleter."),
    ("notify", "Send desktop notification."),
    ("send_line", "Send a line of input."),
    ("get_current_recipient", "Return the jid of the recipient of the current window."),
    ("get_current_muc", "Return the jid of the room of the current window."),
    ("get_current_nick", "Return nickname in current room."),
    ("get_current_occupants", "Return list of occupants in current room."),
    ("current_win_is_console", "Return whether the current window is the console."),
    ("log_debug", "Log a debug message."),
    ("log_info", "Log an info message."),
    ("log_warning", "Log a warning message."),
    ("log_error", "Log an error message."),
    ("win_exists", "Determine whether a window exists."),
    ("win_create", "Create a new window."),
    ("win_focus", "Focus a window."),
    ("win_show", "Show text in the window."),
    ("win_show_themed", "Show themed text in the window."),
    ("send_stanza", "Send a stanza, returns whether it was sent."),
    ("settings_get_boolean", "Get a boolean setting."),
    ("settings_set_boolean", "Set a boolean setting."),
    ("settings_get_string", "Get a string setting."),
    ("settings_set_string", "Set a string setting."),
    ("settings_get_int", "Get an integer setting."),
    ("settings_set_int", "Set an integer setting."),
    ("incoming_message", "Show an incoming message."),
    ("disco_add_feature", "Add a feature to disco info responses."),
];

fn register_help(lua: &Lua, module: &Table) -> LuaResult<()> {
    let help = lua.create_table()?;
    for (name, doc) in HELP {
        help.set(*name, *doc)?;
    }
    module.set("help", help)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use crate::scripting::exclusivity::ScriptSection;

    struct Rig {
        lua: Lua,
        host: Arc<RecordingHost>,
        excl: Arc<Exclusivity>,
        callbacks: Arc<Callbacks>,
    }

    fn rig() -> Rig {
        let _ = env_logger::builder().is_test(true).try_init();
        let lua = Lua::new();
        let host = Arc::new(RecordingHost::new());
        let excl = Arc::new(Exclusivity::new());
        let callbacks = Arc::new(Callbacks::new());
        register_bridge(
            &lua,
            BridgeContext {
                plugin: PluginId::new("test.lua"),
                host: Arc::<RecordingHost>::clone(&host) as Arc<dyn HostApi>,
                excl: Arc::clone(&excl),
                callbacks: Arc::clone(&callbacks),
            },
        )
        .unwrap();
        Rig {
            lua,
            host,
            excl,
            callbacks,
        }
    }

    impl Rig {
        fn run(&self, src: &str) {
            let _s = ScriptSection::enter(&self.excl);
            self.lua.load(src).exec().unwrap();
        }

        fn eval(&self, expr: &str) -> Value {
            let _s = ScriptSection::enter(&self.excl);
            self.lua.load(expr).eval().unwrap()
        }
    }

    #[test]
    fn cons_show_forwards_decoded_string() {
        let rig = rig();
        rig.run(r#"corvid.cons_show("hello there")"#);
        assert_eq!(rig.host.recorded(), vec!["cons_show(hello there)"]);
    }

    #[test]
    fn wrong_arity_yields_nil_and_no_host_effect() {
        let rig = rig();
        let v = rig.eval("return corvid.cons_show()");
        assert!(matches!(v, Value::Nil));
        let v = rig.eval(r#"return corvid.cons_show("a", "b")"#);
        assert!(matches!(v, Value::Nil));
        assert!(rig.host.recorded().is_empty());
    }

    #[test]
    fn wrong_type_yields_nil_and_no_host_effect() {
        let rig = rig();
        let v = rig.eval("return corvid.cons_show(42)");
        assert!(matches!(v, Value::Nil));
        assert!(rig.host.recorded().is_empty());
    }

    #[test]
    fn cons_show_themed_accepts_nil_theme_fields() {
        let rig = rig();
        rig.run(r#"corvid.cons_show_themed(nil, nil, nil, "plain")"#);
        assert_eq!(
            rig.host.recorded(),
            vec!["cons_show_themed(None, None, None, plain)"]
        );
    }

    #[test]
    fn register_command_stores_callback_and_notifies_host() {
        let rig = rig();
        rig.run(
            r#"
            corvid.register_command("hello", 0, 1,
                { "/hello [name]" },
                "Say hello.",
                { { "name", "who to greet" } },
                { "/hello world" },
                function(name) end)
        "#,
        );
        assert!(rig.callbacks.has_command("hello"));
        assert_eq!(
            rig.host.recorded(),
            vec!["command_registered(test.lua, hello, 0, 1)"]
        );
    }

    #[test]
    fn register_command_with_bad_pair_registers_nothing() {
        let rig = rig();
        rig.run(
            r#"
            corvid.register_command("hello", 0, 1,
                { "/hello [name]" },
                "Say hello.",
                { { "name", "who", "extra" } },
                {},
                function(name) end)
        "#,
        );
        assert!(!rig.callbacks.has_command("hello"));
        assert!(rig.host.recorded().is_empty());
    }

    #[test]
    fn register_command_with_non_callable_is_skipped() {
        let rig = rig();
        rig.run(
            r#"
            corvid.register_command("hello", 0, 1, {}, "Say hello.", {}, {}, "not a function")
        "#,
        );
        assert!(!rig.callbacks.has_command("hello"));
        assert!(rig.host.recorded().is_empty());
    }

    #[test]
    fn register_timed_requires_callable() {
        let rig = rig();
        rig.run("corvid.register_timed(function() end, 30)");
        rig.run(r#"corvid.register_timed("nope", 30)"#);
        rig.run("corvid.register_timed(function() end, \"soon\")");
        // Only the callable-with-integer-interval registration landed.
        assert_eq!(rig.callbacks.timer_count(), 1);
    }

    #[test]
    fn completer_add_forwards_key_and_items() {
        let rig = rig();
        rig.run(r#"corvid.completer_add("/hello", { "world", "moon" })"#);
        assert_eq!(
            rig.host.recorded(),
            vec![r#"completer_add(test.lua, /hello, ["world", "moon"])"#]
        );
    }

    #[test]
    fn state_queries_map_absent_to_nil() {
        let rig = rig();
        assert!(matches!(rig.eval("return corvid.get_current_recipient()"), Value::Nil));
        *rig.host.recipient.lock().unwrap() = Some("alice@example.org".to_string());
        match rig.eval("return corvid.get_current_recipient()") {
            Value::String(s) => assert_eq!(s.to_string_lossy(), "alice@example.org"),
            other => panic!("expected string, got {}", other.type_name()),
        }
    }

    #[test]
    fn occupants_without_room_is_empty_list_not_nil() {
        let rig = rig();
        let v = rig.eval("return #corvid.get_current_occupants()");
        assert!(matches!(v, Value::Integer(0)));
    }

    #[test]
    fn occupants_list_round_trips() {
        let rig = rig();
        *rig.host.occupants.lock().unwrap() =
            vec!["alice".to_string(), "bob".to_string()];
        let v = rig.eval("return corvid.get_current_occupants()[2]");
        match v {
            Value::String(s) => assert_eq!(s.to_string_lossy(), "bob"),
            other => panic!("expected string, got {}", other.type_name()),
        }
    }

    #[test]
    fn win_create_registers_window_callback() {
        let rig = rig();
        rig.run(r#"corvid.win_create("chess", function(tag, line) end)"#);
        assert!(rig.callbacks.has_window("chess"));
        assert!(matches!(rig.eval(r#"return corvid.win_exists("chess")"#), Value::Boolean(true)));
        assert!(matches!(rig.eval(r#"return corvid.win_exists("poker")"#), Value::Boolean(false)));
    }

    #[test]
    fn win_create_without_callable_creates_nothing() {
        let rig = rig();
        rig.run(r#"corvid.win_create("chess", "not callable")"#);
        assert!(!rig.callbacks.has_window("chess"));
        assert!(rig.host.recorded().is_empty());
    }

    #[test]
    fn settings_boolean_default_then_stored_value() {
        let rig = rig();
        let v = rig.eval(r#"return corvid.settings_get_boolean("ui", "color", true)"#);
        assert!(matches!(v, Value::Boolean(true)));
        rig.run(r#"corvid.settings_set_boolean("ui", "color", false)"#);
        let v = rig.eval(r#"return corvid.settings_get_boolean("ui", "color", true)"#);
        assert!(matches!(v, Value::Boolean(false)));
    }

    #[test]
    fn settings_boolean_rejects_non_boolean_default() {
        let rig = rig();
        let v = rig.eval(r#"return corvid.settings_get_boolean("ui", "color", "yes")"#);
        assert!(matches!(v, Value::Nil));
        // Type mismatch on set leaves the setting unwritten.
        rig.run(r#"corvid.settings_set_boolean("ui", "color", 1)"#);
        assert!(rig.host.settings.lock().unwrap().is_empty());
    }

    #[test]
    fn settings_string_and_int_round_trip() {
        let rig = rig();
        rig.run(r#"corvid.settings_set_string("ui", "theme", "boring")"#);
        match rig.eval(r#"return corvid.settings_get_string("ui", "theme", "default")"#) {
            Value::String(s) => assert_eq!(s.to_string_lossy(), "boring"),
            other => panic!("expected string, got {}", other.type_name()),
        }
        rig.run(r#"corvid.settings_set_int("ui", "width", 120)"#);
        assert!(matches!(
            rig.eval(r#"return corvid.settings_get_int("ui", "width", 80)"#),
            Value::Integer(120)
        ));
        // Absent key returns the supplied default exactly.
        assert!(matches!(
            rig.eval(r#"return corvid.settings_get_int("ui", "height", 24)"#),
            Value::Integer(24)
        ));
    }

    #[test]
    fn send_stanza_reports_host_success() {
        let rig = rig();
        let v = rig.eval(r#"return corvid.send_stanza("<presence/>")"#);
        assert!(matches!(v, Value::Boolean(true)));
        *rig.host.stanza_result.lock().unwrap() = false;
        let v = rig.eval(r#"return corvid.send_stanza("<presence/>")"#);
        assert!(matches!(v, Value::Boolean(false)));
    }

    #[test]
    fn log_family_reaches_diagnostic_channel_with_attribution() {
        let rig = rig();
        rig.run(r#"corvid.log_warning("disk almost full")"#);
        let logs = rig.host.logs.lock().unwrap().clone();
        assert_eq!(
            logs,
            vec![(
                LogLevel::Warning,
                "test.lua".to_string(),
                "disk almost full".to_string()
            )]
        );
    }

    #[test]
    fn help_table_documents_entry_points() {
        let rig = rig();
        match rig.eval("return corvid.help.send_stanza") {
            Value::String(s) => assert!(s.to_string_lossy().contains("stanza")),
            other => panic!("expected string, got {}", other.type_name()),
        }
    }

    #[test]
    fn token_is_free_again_after_every_call() {
        let rig = rig();
        rig.run(r#"corvid.cons_show("one")"#);
        rig.run(r#"corvid.settings_set_int("a", "b", 1)"#);
        assert!(!rig.excl.is_held());
    }
}
