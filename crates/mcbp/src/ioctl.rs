//! IOCTL-style administrative get/set dispatch.
//!
//! Keys look like `trace.dump.chunk?id=4`: a property name plus optional
//! query arguments. The core only routes recognised keys to injected
//! hooks; the hooks themselves (tracing control, allocator tweaks, SLA
//! reconfiguration) live with their subsystems.

use std::collections::HashMap;

use driftkv_types::Status;
use tracing::info;

/// Parsed query arguments of an IOCTL key.
pub type IoctlArgs = HashMap<String, String>;

/// Hook invoked for an IOCTL get.
pub type GetHook = Box<dyn Fn(&IoctlArgs) -> Result<String, Status> + Send + Sync>;

/// Hook invoked for an IOCTL set.
pub type SetHook = Box<dyn Fn(&IoctlArgs, &str) -> Result<(), Status> + Send + Sync>;

/// IOCTL get keys the dispatcher recognises.
pub const RECOGNISED_GET_KEYS: &[&str] =
    &["trace.config", "trace.status", "trace.dump.begin", "trace.dump.chunk", "sla"];

/// IOCTL set keys the dispatcher recognises.
pub const RECOGNISED_SET_KEYS: &[&str] = &[
    "jemalloc.prof.active",
    "jemalloc.prof.dump",
    "release_free_memory",
    "trace.connection",
    "trace.config",
    "trace.start",
    "trace.stop",
    "trace.dump.clear",
    "sla",
];

/// Splits `key?a=1&b=2` into the property name and its arguments.
///
/// Returns `None` for structurally broken queries (an argument without
/// `=`).
pub fn decode_query(key: &str) -> Option<(String, IoctlArgs)> {
    match key.split_once('?') {
        None => Some((key.to_string(), IoctlArgs::new())),
        Some((name, query)) => {
            let mut args = IoctlArgs::new();
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (k, v) = pair.split_once('=')?;
                args.insert(k.to_string(), v.to_string());
            }
            Some((name.to_string(), args))
        }
    }
}

/// Routes IOCTL properties to their registered hooks.
#[derive(Default)]
pub struct IoctlDispatcher {
    get_hooks: HashMap<&'static str, GetHook>,
    set_hooks: HashMap<&'static str, SetHook>,
}

impl IoctlDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a get hook for a recognised key.
    ///
    /// Unrecognised keys are refused so the dispatch table cannot drift
    /// from the documented surface.
    pub fn register_get(&mut self, key: &'static str, hook: GetHook) -> bool {
        if !RECOGNISED_GET_KEYS.contains(&key) {
            return false;
        }
        self.get_hooks.insert(key, hook);
        true
    }

    /// Registers a set hook for a recognised key.
    pub fn register_set(&mut self, key: &'static str, hook: SetHook) -> bool {
        if !RECOGNISED_SET_KEYS.contains(&key) {
            return false;
        }
        self.set_hooks.insert(key, hook);
        true
    }

    /// Handles an IOCTL get.
    pub fn get(&self, key: &str) -> Result<String, Status> {
        let (name, args) = decode_query(key).ok_or(Status::Einval)?;
        match self.get_hooks.get(name.as_str()) {
            Some(hook) => hook(&args),
            None => Err(Status::Einval),
        }
    }

    /// Handles an IOCTL set.
    pub fn set(&self, key: &str, value: &str) -> Result<(), Status> {
        let (name, args) = decode_query(key).ok_or(Status::Einval)?;
        match self.set_hooks.get(name.as_str()) {
            Some(hook) => {
                let result = hook(&args, value);
                if result.is_ok() {
                    info!(property = %name, "ioctl set applied");
                }
                result
            }
            None => Err(Status::Einval),
        }
    }
}
