//! Host capability contract consumed by the scripting bridge.
//!
//! The client proper implements `HostApi`; the bridge only specifies how
//! plugin-side dynamic values are produced for and consumed from these
//! signatures. Every method here may block, perform I/O, or re-enter the
//! scripting subsystem (e.g. deliver a window line), which is why the
//! bridge always calls them with the execution exclusivity token released.

use crate::scripting::dispatch::CommandHelp;

/// Severity for the plugin-attributed diagnostic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One method per host capability the bridge exposes to plugins.
pub trait HostApi: Send + Sync {
    // Console family
    fn cons_alert(&self);
    fn cons_show(&self, message: &str);
    fn cons_show_themed(
        &self,
        group: Option<&str>,
        key: Option<&str>,
        default: Option<&str>,
        message: &str,
    );
    fn cons_bad_cmd_usage(&self, cmd: &str);

    /// A plugin command passed validation and is being registered; the host
    /// indexes it for its own command table and autocompletion.
    fn command_registered(
        &self,
        plugin: &str,
        name: &str,
        min_args: i64,
        max_args: i64,
        help: &CommandHelp,
    );

    // Autocomplete family
    fn completer_add(&self, plugin: &str, key: &str, items: &[String]);
    fn completer_remove(&self, plugin: &str, key: &str, items: &[String]);
    fn completer_clear(&self, plugin: &str, key: &str);

    fn notify(&self, message: &str, timeout_ms: i64, category: &str);

    // State query family — absent host state is `None`, not an error.
    fn get_current_recipient(&self) -> Option<String>;
    fn get_current_muc(&self) -> Option<String>;
    fn get_current_nick(&self) -> Option<String>;
    /// Empty when no room is active, never absent.
    fn get_current_occupants(&self) -> Vec<String>;
    fn current_win_is_console(&self) -> bool;

    // Window family
    fn win_exists(&self, tag: &str) -> bool;
    fn win_create(&self, plugin: &str, tag: &str);
    fn win_focus(&self, tag: &str);
    fn win_show(&self, tag: &str, line: &str);
    fn win_show_themed(
        &self,
        tag: &str,
        group: Option<&str>,
        key: Option<&str>,
        default: Option<&str>,
        line: &str,
    );

    // Settings family — getters return the default when the key is absent.
    fn settings_get_boolean(&self, group: &str, key: &str, default: bool) -> bool;
    fn settings_set_boolean(&self, group: &str, key: &str, value: bool);
    fn settings_get_string(&self, group: &str, key: &str, default: Option<&str>)
        -> Option<String>;
    fn settings_set_string(&self, group: &str, key: &str, value: &str);
    fn settings_get_int(&self, group: &str, key: &str, default: i64) -> i64;
    fn settings_set_int(&self, group: &str, key: &str, value: i64);

    // Messaging family
    fn send_line(&self, line: &str);
    /// The one capability with a success indicator — the connection may be
    /// down.
    fn send_stanza(&self, stanza: &str) -> bool;
    fn incoming_message(&self, barejid: &str, resource: &str, message: &str);
    fn disco_add_feature(&self, feature: &str);

    /// Plugin-attributed diagnostic channel.
    fn log(&self, level: LogLevel, plugin: &str, message: &str);
}
