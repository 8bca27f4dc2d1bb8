//! Per-application execution sandbox.
//!
//! The sandbox owns the bindings of one application's virtual global scope:
//! which keys exist on it, which of those the child injected since the last
//! start, and which window listeners the child registered while active. The
//! values themselves live in the script engine, which consults the sandbox
//! on every intercepted access.

pub mod policy;

pub use policy::{should_bind_receiver, ReadTarget, ScopePolicy, WriteTarget};

use crate::config::SandboxConfig;
use std::collections::BTreeSet;

/// Global the engine points at the sandboxed view before running bound code.
pub const PROXY_WINDOW_KEY: &str = "__MICRO_APP_PROXY_WINDOW__";

/// Entries every virtual scope starts with: the child messaging handle and
/// the listener-tracking wrappers.
pub const BASELINE_KEYS: &[&str] = &["microApp", "addEventListener", "removeEventListener"];

/// Window listeners registered by the child while its sandbox was active.
#[derive(Debug, Default, Clone)]
pub struct ListenerLedger {
    entries: Vec<(String, u32)>,
}

impl ListenerLedger {
    pub fn track(&mut self, event_type: &str, listener: u32) {
        if !self.entries.iter().any(|(_, id)| *id == listener) {
            self.entries.push((event_type.to_string(), listener));
        }
    }

    pub fn untrack(&mut self, listener: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(_, id)| *id != listener);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn release(&mut self) -> Vec<(String, u32)> {
        std::mem::take(&mut self.entries)
    }
}

/// What the engine must undo after a stop.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Teardown {
    /// Injected keys to delete from the virtual scope.
    pub removed_keys: Vec<String>,
    /// A baseline entry was overwritten or deleted and must be reinstalled.
    pub reset_baseline: bool,
    /// Window listeners to unregister, as `(event type, listener id)`.
    pub listeners: Vec<(String, u32)>,
    /// Script data listeners dropped from the messaging registry.
    pub data_listeners: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct ExecutionSandbox {
    app: String,
    active: bool,
    policy: ScopePolicy,
    keys: BTreeSet<String>,
    injected: BTreeSet<String>,
    baseline_dirty: bool,
    listeners: ListenerLedger,
}

impl ExecutionSandbox {
    pub fn new(app: impl Into<String>, config: &SandboxConfig) -> Self {
        Self {
            app: app.into(),
            active: false,
            policy: ScopePolicy::new(config),
            keys: BASELINE_KEYS.iter().map(|key| key.to_string()).collect(),
            injected: BTreeSet::new(),
            baseline_dirty: false,
            listeners: ListenerLedger::default(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&mut self) {
        if !self.active {
            self.active = true;
            tracing::debug!(app = %self.app, "sandbox started");
        }
    }

    /// Deactivate and collect everything the child left behind. Calling it
    /// again on a stopped sandbox yields an empty teardown.
    pub fn stop(&mut self) -> Teardown {
        let mut teardown = Teardown::default();
        if !self.active {
            return teardown;
        }
        self.active = false;

        teardown.removed_keys = std::mem::take(&mut self.injected).into_iter().collect();
        teardown.reset_baseline = std::mem::take(&mut self.baseline_dirty);
        teardown.listeners = self.listeners.release();
        self.keys = BASELINE_KEYS.iter().map(|key| key.to_string()).collect();

        tracing::debug!(
            app = %self.app,
            keys = teardown.removed_keys.len(),
            listeners = teardown.listeners.len(),
            "sandbox stopped"
        );
        teardown
    }

    pub fn read(&self, key: &str) -> ReadTarget {
        self.policy.read(key, self.keys.contains(key))
    }

    pub fn write(&mut self, key: &str) -> WriteTarget {
        let target = self.policy.write(key, self.active);
        if target == WriteTarget::VirtualScope {
            if BASELINE_KEYS.contains(&key) {
                self.baseline_dirty = true;
            }
            self.keys.insert(key.to_string());
            self.injected.insert(key.to_string());
        }
        target
    }

    /// Existence check backing the `in` operator; `on_real` reports whether
    /// the real global object has the key.
    pub fn exists(&self, key: &str, on_real: bool) -> bool {
        self.keys.contains(key) || on_real
    }

    /// Delete `key`. Returns whether the engine must delete it from the
    /// virtual scope; keys that only resolve through the real global object
    /// are left alone.
    pub fn remove(&mut self, key: &str) -> bool {
        if !self.keys.remove(key) {
            return false;
        }
        self.injected.remove(key);
        if BASELINE_KEYS.contains(&key) {
            self.baseline_dirty = true;
        }
        true
    }

    /// Keys currently present on the virtual scope.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn injected_keys(&self) -> impl Iterator<Item = &str> {
        self.injected.iter().map(String::as_str)
    }

    pub fn track_listener(&mut self, event_type: &str, listener: u32) {
        if self.active {
            self.listeners.track(event_type, listener);
        }
    }

    pub fn untrack_listener(&mut self, listener: u32) -> bool {
        self.listeners.untrack(listener)
    }

    pub fn listeners(&self) -> &ListenerLedger {
        &self.listeners
    }

    /// Wrap `code` so its free variables resolve against the sandboxed view
    /// installed at [`PROXY_WINDOW_KEY`].
    pub fn bind_scope(&self, code: &str) -> String {
        let view = format!("globalThis.{PROXY_WINDOW_KEY}");
        format!(
            ";(function(window, self, globalThis){{with(window){{;{code}\n}}}}).call({view}, {view}, {view}, {view});"
        )
    }
}
