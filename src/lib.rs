//! Corvid Console plugin scripting core.
//!
//! Bridges the host chat client and plugin code running in embedded Lua VMs:
//! the `corvid` module table exposed to plugins, the execution exclusivity
//! discipline around every boundary crossing, and the dispatch of host
//! events (commands, timers, window lines) into plugin callbacks.

pub mod host;
pub mod scripting;
