//! Script engine - runs child application code in a V8 isolate.
//!
//! One isolate hosts every child application. The real global environment
//! only carries the minimal surface child code needs:
//! - console.log/info/debug/warn/error (captured and mirrored to tracing)
//! - atob, btoa
//! - crypto.randomUUID, crypto.getRandomValues, crypto.subtle.digest
//! - window events, a document facade and the `microApp` messaging handle
//! - No fs, net, env, module loading or other system access
//!
//! Each application gets a sandboxed view of that environment. Bound code
//! runs against the view installed under
//! [`PROXY_WINDOW_KEY`](crate::sandbox::PROXY_WINDOW_KEY).

use crate::config::HostConfig;
use crate::ops::{microapp_runtime, ConsoleOutput};
use crate::sandbox::Teardown;
use crate::state::SharedState;
use anyhow::{anyhow, Result};
use deno_core::{v8, JsRuntime, RuntimeOptions};
use serde_json::Value;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Everything the host asks of the script engine.
///
/// Implementations are driven from one thread and must not be re-entered:
/// the host never calls in while another call is on the stack.
pub trait ScriptEngine {
    /// Create the virtual scope and sandboxed view for `app`.
    fn create_scope(&mut self, app: &str) -> Result<()>;

    /// Run scope-bound code with `app`'s view installed.
    fn execute(&mut self, app: &str, code: &str) -> Result<()>;

    /// Undo what a stopped sandbox reported: injected keys, overwritten
    /// baseline entries and released listeners.
    fn purge(&mut self, app: &str, teardown: &Teardown) -> Result<()>;

    fn drop_scope(&mut self, app: &str) -> Result<()>;

    /// Invoke script listeners with `payload`.
    fn deliver(&mut self, listeners: &[u32], payload: &Value) -> Result<()>;

    fn dispatch_window_event(&mut self, event_type: &str, detail: &Value) -> Result<()>;

    /// JSON snapshot of a key on `app`'s virtual scope.
    fn read_scope(&mut self, app: &str, key: &str) -> Result<Option<Value>>;

    /// JSON snapshot of a key on the real global object.
    fn read_global(&mut self, key: &str) -> Result<Option<Value>>;

    /// Own keys of `app`'s virtual scope, symbols as `Symbol(description)`.
    fn scope_keys(&mut self, app: &str) -> Result<Vec<String>>;

    /// Drain console output captured since the last call.
    fn take_console(&mut self) -> ConsoleOutput;
}

/// Terminates the isolate if a single run exceeds its budget.
struct Watchdog {
    cancel: mpsc::Sender<()>,
    thread: JoinHandle<bool>,
}

impl Watchdog {
    fn arm(handle: v8::IsolateHandle, limit: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || match cancelled.recv_timeout(limit) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                handle.terminate_execution();
                true
            }
            _ => false,
        });
        Self { cancel, thread }
    }

    /// Stop the timer. Returns whether it fired.
    fn disarm(self) -> bool {
        let _ = self.cancel.send(());
        self.thread.join().unwrap_or(false)
    }
}

/// [`ScriptEngine`] backed by a deno_core [`JsRuntime`].
pub struct JsEngine {
    runtime: JsRuntime,
    timeout_ms: Option<u64>,
}

impl JsEngine {
    pub fn new(config: &HostConfig, state: SharedState) -> Result<Self> {
        // Configure V8 heap limits if specified
        let create_params = config
            .max_heap_size
            .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![microapp_runtime::init_ops_and_esm()],
            create_params,
            ..Default::default()
        });

        if config.max_heap_size.is_some() {
            let handle = runtime.v8_isolate().thread_safe_handle();
            runtime.add_near_heap_limit_callback(move |current, initial| {
                tracing::warn!(
                    current_mb = current / (1024 * 1024),
                    initial_mb = initial / (1024 * 1024),
                    "near heap limit, terminating child script"
                );
                // Headroom for the isolate to unwind after termination
                handle.terminate_execution();
                current * 2
            });
        }

        {
            let op_state = runtime.op_state();
            let mut op_state = op_state.borrow_mut();
            op_state.put(ConsoleOutput::default());
            op_state.put(state);
        }

        Ok(Self {
            runtime,
            timeout_ms: config.script_timeout_ms,
        })
    }

    /// Run `code`, terminating it after `timeout_ms` when set. Host calls
    /// pass no budget.
    fn run(
        &mut self,
        name: &'static str,
        code: String,
        timeout_ms: Option<u64>,
    ) -> Result<v8::Global<v8::Value>> {
        let watchdog = timeout_ms.map(|ms| {
            Watchdog::arm(
                self.runtime.v8_isolate().thread_safe_handle(),
                Duration::from_millis(ms),
            )
        });

        let result = self.runtime.execute_script(name, code);

        let timed_out = watchdog.is_some_and(Watchdog::disarm);
        if timed_out {
            self.runtime.v8_isolate().cancel_terminate_execution();
        }

        // Promise jobs queued by the run, e.g. the sandbox clearing the
        // current-app marker.
        self.runtime.handle_scope().perform_microtask_checkpoint();

        match result {
            Err(_) if timed_out => Err(anyhow!(
                "script timed out after {}ms",
                timeout_ms.unwrap_or_default()
            )),
            other => other,
        }
    }

    fn call(&mut self, code: String) -> Result<()> {
        self.run("<microapp:host>", code, None).map(drop)
    }

    fn read_json(&mut self, code: String) -> Result<Option<Value>> {
        let global = self.run("<microapp:host>", code, None)?;
        let text = {
            let scope = &mut self.runtime.handle_scope();
            let local = v8::Local::new(scope, &global);
            if local.is_null_or_undefined() {
                None
            } else {
                Some(local.to_rust_string_lossy(scope))
            }
        };
        Ok(text.map(|text| serde_json::from_str(&text)).transpose()?)
    }
}

/// JSON-encode a host value for splicing into script source.
fn js<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

impl ScriptEngine for JsEngine {
    fn create_scope(&mut self, app: &str) -> Result<()> {
        self.call(format!("globalThis.__micro_host__.createScope({})", js(app)?))
    }

    fn execute(&mut self, app: &str, code: &str) -> Result<()> {
        self.call(format!("globalThis.__micro_host__.install({})", js(app)?))?;
        self.run("<microapp:script>", code.to_string(), self.timeout_ms)
            .map(drop)
    }

    fn purge(&mut self, app: &str, teardown: &Teardown) -> Result<()> {
        let listeners: Vec<u32> = teardown.listeners.iter().map(|(_, id)| *id).collect();
        self.call(format!(
            "globalThis.__micro_host__.purge({}, {}, {}, {}, {})",
            js(app)?,
            js(&teardown.removed_keys)?,
            teardown.reset_baseline,
            js(&listeners)?,
            js(&teardown.data_listeners)?,
        ))
    }

    fn drop_scope(&mut self, app: &str) -> Result<()> {
        self.call(format!("globalThis.__micro_host__.dropScope({})", js(app)?))
    }

    fn deliver(&mut self, listeners: &[u32], payload: &Value) -> Result<()> {
        if listeners.is_empty() {
            return Ok(());
        }
        self.call(format!(
            "globalThis.__micro_host__.deliver({}, {})",
            js(listeners)?,
            js(payload)?
        ))
    }

    fn dispatch_window_event(&mut self, event_type: &str, detail: &Value) -> Result<()> {
        self.call(format!(
            "globalThis.__micro_host__.dispatchWindowEvent({}, {})",
            js(event_type)?,
            js(detail)?
        ))
    }

    fn read_scope(&mut self, app: &str, key: &str) -> Result<Option<Value>> {
        self.read_json(format!(
            "globalThis.__micro_host__.readScope({}, {})",
            js(app)?,
            js(key)?
        ))
    }

    fn read_global(&mut self, key: &str) -> Result<Option<Value>> {
        self.read_json(format!("globalThis.__micro_host__.readGlobal({})", js(key)?))
    }

    fn scope_keys(&mut self, app: &str) -> Result<Vec<String>> {
        let keys = self.read_json(format!(
            "globalThis.__micro_host__.scopeKeys({})",
            js(app)?
        ))?;
        Ok(keys.map(serde_json::from_value).transpose()?.unwrap_or_default())
    }

    fn take_console(&mut self) -> ConsoleOutput {
        let op_state = self.runtime.op_state();
        let mut op_state = op_state.borrow_mut();
        std::mem::take(op_state.borrow_mut::<ConsoleOutput>())
    }
}
