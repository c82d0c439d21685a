/// `scripting/exclusivity.rs` — the script execution exclusivity token
///
/// The embedded runtime allows only one thread to execute script bytecode at
/// a time. `Exclusivity` is that single token: a flag guarded by a mutex and
/// condvar rather than a plain `Mutex<Lua>`, because a bridge entry point
/// must be able to release the token *mid-call* (while its own stack frame
/// is suspended inside the VM) and re-acquire it afterwards — something a
/// scoped mutex guard held further up the stack cannot express.
///
/// Two guard types enforce the pairing:
///   `ScriptSection` — acquire on construct, release on drop. Wraps every
///     stretch of code that runs script bytecode or touches a Lua value.
///   `HostSection`   — the inverse: release on construct, re-acquire on
///     drop. Wraps every forwarded host capability call made from inside a
///     bridge entry point, so host threads (timers, network, UI) are never
///     blocked behind a plugin while the host call runs.
use std::sync::{Condvar, Mutex};

pub struct Exclusivity {
    held: Mutex<bool>,
    freed: Condvar,
}

impl Exclusivity {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(false),
            freed: Condvar::new(),
        }
    }

    /// Block until the token is free, then take it.
    fn acquire(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.freed.wait(held).unwrap();
        }
        *held = true;
    }

    /// Give the token up and wake one waiter.
    fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.freed.notify_one();
    }

    /// Whether some section currently holds the token.
    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap()
    }
}

impl Default for Exclusivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while script bytecode runs. Entering blocks until no other thread
/// is executing script code.
pub struct ScriptSection<'a> {
    excl: &'a Exclusivity,
}

impl<'a> ScriptSection<'a> {
    pub fn enter(excl: &'a Exclusivity) -> Self {
        excl.acquire();
        Self { excl }
    }
}

impl Drop for ScriptSection<'_> {
    fn drop(&mut self) {
        self.excl.release();
    }
}

/// The inverse guard: held while a forwarded host capability call runs.
/// Constructing it hands the token to other threads; dropping it re-acquires
/// before the caller touches any script value again. The caller must be
/// inside a `ScriptSection` (a bridge entry point always is).
pub struct HostSection<'a> {
    excl: &'a Exclusivity,
}

impl<'a> HostSection<'a> {
    pub fn enter(excl: &'a Exclusivity) -> Self {
        excl.release();
        Self { excl }
    }
}

impl Drop for HostSection<'_> {
    fn drop(&mut self) {
        self.excl.acquire();
    }
}
