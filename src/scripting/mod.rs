/// `scripting/` — Lua plugin bridge
///
/// Each plugin runs in its own Lua VM (mlua) with the `corvid` API module
/// registered. All script bytecode executes under a single process-wide
/// exclusivity token; host capability calls release it for their duration.
/// Plugin errors are caught and logged — never crash the client.
pub mod api;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod exclusivity;
pub mod marshal;

pub use api::{register_bridge, BridgeContext, MODULE_NAME};
pub use dispatch::{Callbacks, CommandHelp, Dispatcher, PluginId};
pub use engine::{PluginInfo, PluginLoadResult, PluginTrust, ScriptRuntime};
pub use event::HostEvent;
pub use exclusivity::{Exclusivity, HostSection, ScriptSection};
pub use marshal::{Shape, ScriptValue};
