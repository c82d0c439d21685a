/// `scripting/event.rs` — host events that reach plugin callbacks
///
/// Host subsystems (command parser, window manager, timer driver) fire
/// `HostEvent`s; the runtime's event loop feeds them to the dispatcher.
use serde::{Deserialize, Serialize};

/// Events that can invoke a plugin-registered callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// The user ran a plugin-registered command.
    Command { name: String, args: Vec<String> },
    /// A line was delivered to a plugin-created window.
    WindowLine { tag: String, line: String },
    /// Periodic tick — runs every timed callback whose interval elapsed.
    TimerTick,
}

impl HostEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HostEvent::Command { .. } => "command",
            HostEvent::WindowLine { .. } => "window_line",
            HostEvent::TimerTick => "timer_tick",
        }
    }
}
