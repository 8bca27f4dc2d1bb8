//! Ops exposed to script code and the extension definition.
//!
//! The real-global utilities (console, crypto, base64) are plain ops. The
//! sandbox, listener, messaging and document ops consult the shared
//! [`HostState`] kept in `OpState`; none of them holds the state borrow while
//! calling back into host closures.

use crate::data::{format_event_name, DataListener, Deliveries};
use crate::sandbox::{should_bind_receiver, WriteTarget};
use crate::state::{HostState, SharedState};
use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};
use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;

// ============================================================================
// Console Output Capture
// ============================================================================

/// Console target child output is mirrored to.
pub const CONSOLE_TARGET: &str = "microapp_host::console";

/// Captured console output from child scripts
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    tracing::info!(target: CONSOLE_TARGET, "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    tracing::warn!(target: CONSOLE_TARGET, "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    tracing::error!(target: CONSOLE_TARGET, "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Crypto Ops
// ============================================================================

#[op2]
#[string]
pub fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2(fast)]
pub fn op_crypto_get_random_values(#[buffer] buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

#[op2]
#[buffer]
pub fn op_crypto_subtle_digest(#[string] algorithm: &str, #[buffer] data: &[u8]) -> Result<Vec<u8>, Error> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    let result = match algorithm.to_uppercase().replace('-', "").as_str() {
        "SHA256" => Sha256::digest(data).to_vec(),
        "SHA384" => Sha384::digest(data).to_vec(),
        "SHA512" => Sha512::digest(data).to_vec(),
        _ => {
            return Err(anyhow!(
                "Unsupported algorithm: {}. Supported: SHA-256, SHA-384, SHA-512",
                algorithm
            ))
        }
    };

    Ok(result)
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    // btoa expects Latin-1, but we'll be lenient and accept UTF-8
    Ok(base64::engine::general_purpose::STANDARD.encode(data.as_bytes()))
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 in decoded data: {}", e))
}

// ============================================================================
// Sandbox Ops
// ============================================================================

fn host_state(state: &OpState) -> SharedState {
    state.borrow::<SharedState>().clone()
}

/// Returns a [`crate::sandbox::ReadTarget`] code.
#[op2(fast)]
pub fn op_sandbox_read(state: &mut OpState, #[string] app: &str, #[string] key: &str) -> u32 {
    host_state(state).borrow_mut().resolve_read(app, key).code()
}

/// Returns a [`WriteTarget`] code.
#[op2(fast)]
pub fn op_sandbox_write(state: &mut OpState, #[string] app: &str, #[string] key: &str) -> u32 {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    host.apps
        .get_mut(app)
        .map_or(WriteTarget::Ignored, |entry| entry.sandbox.write(key))
        .code()
}

#[op2(fast)]
pub fn op_sandbox_exists(
    state: &mut OpState,
    #[string] app: &str,
    #[string] key: &str,
    on_real: bool,
) -> bool {
    let shared = host_state(state);
    let host = shared.borrow();
    match host.apps.get(app) {
        Some(entry) => entry.sandbox.exists(key, on_real),
        None => on_real,
    }
}

/// Gates writes the host cannot track by name, such as symbol keys.
#[op2(fast)]
pub fn op_sandbox_is_active(state: &mut OpState, #[string] app: &str) -> bool {
    let shared = host_state(state);
    let host = shared.borrow();
    host.apps
        .get(app)
        .is_some_and(|entry| entry.sandbox.is_active())
}

#[op2(fast)]
pub fn op_sandbox_remove(state: &mut OpState, #[string] app: &str, #[string] key: &str) -> bool {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    host.apps
        .get_mut(app)
        .is_some_and(|entry| entry.sandbox.remove(key))
}

#[op2(fast)]
pub fn op_sandbox_should_bind(#[string] source: &str) -> bool {
    should_bind_receiver(source)
}

#[op2(fast)]
pub fn op_sandbox_track_listener(
    state: &mut OpState,
    #[string] app: &str,
    #[string] event_type: &str,
    id: u32,
) {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    if let Some(entry) = host.apps.get_mut(app) {
        entry.sandbox.track_listener(event_type, id);
    }
}

#[op2(fast)]
pub fn op_sandbox_untrack_listener(state: &mut OpState, #[string] app: &str, id: u32) {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    if let Some(entry) = host.apps.get_mut(app) {
        entry.sandbox.untrack_listener(id);
    }
}

/// Scheduled by the sandbox view as a microtask after a marking read.
#[op2(fast)]
pub fn op_clear_current_app(state: &mut OpState) {
    host_state(state).borrow_mut().clear_current_app();
}

// ============================================================================
// Window Listener Ops
// ============================================================================

#[op2(fast)]
pub fn op_window_add_listener(state: &mut OpState, #[string] event_type: &str) -> u32 {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    let id = host.next_listener_id();
    host.window_listeners.add(event_type, id);
    id
}

#[op2(fast)]
pub fn op_window_remove_listener(state: &mut OpState, id: u32) -> bool {
    host_state(state).borrow_mut().window_listeners.remove(id)
}

#[op2]
#[serde]
pub fn op_window_listeners(state: &mut OpState, #[string] event_type: &str) -> Vec<u32> {
    host_state(state).borrow().window_listeners.listeners(event_type)
}

// ============================================================================
// Messaging Ops
// ============================================================================

/// Script listeners due to receive a payload.
#[derive(Debug, Serialize)]
pub struct ScriptDelivery {
    pub listeners: Vec<u32>,
    pub payload: Value,
}

/// Run native listeners, then hand script listener ids back to the caller.
/// Must be called with no state borrow held.
fn into_script_delivery(deliveries: Option<Deliveries>) -> Option<ScriptDelivery> {
    let deliveries = deliveries?;
    deliveries.run_native();
    if deliveries.script.is_empty() {
        return None;
    }
    Some(ScriptDelivery {
        payload: (*deliveries.payload).clone(),
        listeners: deliveries.script,
    })
}

/// Register a child listener for data sent by the host.
#[op2(fast)]
pub fn op_data_add_listener(state: &mut OpState, #[string] app: &str) -> u32 {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    let id = host.next_listener_id();
    host.data
        .on(&format_event_name(app, true), DataListener::Script(id));
    id
}

#[op2(fast)]
pub fn op_data_remove_listener(state: &mut OpState, #[string] app: &str, id: u32) -> bool {
    host_state(state)
        .borrow_mut()
        .data
        .off_script(&format_event_name(app, true), id)
}

#[op2]
#[serde]
pub fn op_data_clear_listeners(state: &mut OpState, #[string] app: &str) -> Vec<u32> {
    host_state(state)
        .borrow_mut()
        .data
        .clear(&format_event_name(app, true))
}

/// Child to host. Host closures run synchronously inside this call.
#[op2]
#[serde]
pub fn op_data_dispatch(
    state: &mut OpState,
    #[string] app: &str,
    #[serde] payload: serde_json::Value,
) -> Option<ScriptDelivery> {
    let shared = host_state(state);
    let deliveries = shared
        .borrow_mut()
        .data
        .dispatch(&format_event_name(app, false), Rc::new(payload));
    into_script_delivery(deliveries)
}

/// Last payload the host sent to `app`.
#[op2]
#[serde]
pub fn op_data_get(state: &mut OpState, #[string] app: &str) -> Option<Value> {
    host_state(state)
        .borrow()
        .data
        .data(&format_event_name(app, true))
        .map(|payload| (*payload).clone())
}

// ============================================================================
// Document Ops
// ============================================================================

fn with_element<R>(host: &HostState, id: u32, f: impl FnOnce(&HostState, crate::dom::NodeId) -> R) -> Result<R, Error> {
    let node = host
        .document
        .node(id)
        .filter(|node| host.document.element(*node).is_some())
        .ok_or_else(|| anyhow!("Unknown element handle: {}", id))?;
    Ok(f(host, node))
}

#[op2]
pub fn op_document_query(state: &mut OpState, #[string] selector: &str) -> Option<u32> {
    host_state(state)
        .borrow()
        .query_selector(selector)
        .map(|node| node.as_u32())
}

#[op2(fast)]
pub fn op_document_head(state: &mut OpState) -> u32 {
    host_state(state).borrow().document.head().as_u32()
}

#[op2(fast)]
pub fn op_document_body(state: &mut OpState) -> u32 {
    host_state(state).borrow().document.body().as_u32()
}

#[op2]
#[string]
pub fn op_element_tag(state: &mut OpState, id: u32) -> Result<String, Error> {
    let shared = host_state(state);
    let host = shared.borrow();
    with_element(&host, id, |host, node| {
        host.document.tag_name(node).unwrap_or_default().to_string()
    })
}

#[op2]
#[string]
pub fn op_element_get_attribute(
    state: &mut OpState,
    id: u32,
    #[string] name: &str,
) -> Result<Option<String>, Error> {
    let shared = host_state(state);
    let host = shared.borrow();
    with_element(&host, id, |host, node| {
        host.document.get_attribute(node, name).map(str::to_string)
    })
}

/// Attribute write from script code; `data` on a container is published to
/// the child instead of stored.
#[op2]
#[serde]
pub fn op_element_set_attribute(
    state: &mut OpState,
    id: u32,
    #[string] name: &str,
    #[serde] value: serde_json::Value,
) -> Result<Option<ScriptDelivery>, Error> {
    let shared = host_state(state);
    let deliveries = {
        let mut host = shared.borrow_mut();
        let node = with_element(&host, id, |_, node| node)?;
        host.set_attribute(node, name, value)?
    };
    Ok(into_script_delivery(deliveries))
}

#[op2]
#[string]
pub fn op_element_text(state: &mut OpState, id: u32) -> Result<String, Error> {
    let shared = host_state(state);
    let host = shared.borrow();
    with_element(&host, id, |host, node| host.document.text_content(node))
}

#[op2(fast)]
pub fn op_element_set_text(state: &mut OpState, id: u32, #[string] text: &str) -> Result<(), Error> {
    let shared = host_state(state);
    let mut host = shared.borrow_mut();
    let node = with_element(&host, id, |_, node| node)?;
    host.document.set_text_content(node, text);
    Ok(())
}

#[op2]
pub fn op_element_query(
    state: &mut OpState,
    id: u32,
    #[string] selector: &str,
) -> Result<Option<u32>, Error> {
    let shared = host_state(state);
    let host = shared.borrow();
    with_element(&host, id, |host, node| {
        host.document
            .query_selector(node, selector)
            .map(|found| found.as_u32())
    })
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    microapp_runtime,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_crypto_subtle_digest,
        op_btoa,
        op_atob,
        op_sandbox_read,
        op_sandbox_write,
        op_sandbox_exists,
        op_sandbox_is_active,
        op_sandbox_remove,
        op_sandbox_should_bind,
        op_sandbox_track_listener,
        op_sandbox_untrack_listener,
        op_clear_current_app,
        op_window_add_listener,
        op_window_remove_listener,
        op_window_listeners,
        op_data_add_listener,
        op_data_remove_listener,
        op_data_clear_listeners,
        op_data_dispatch,
        op_data_get,
        op_document_query,
        op_document_head,
        op_document_body,
        op_element_tag,
        op_element_get_attribute,
        op_element_set_attribute,
        op_element_text,
        op_element_set_text,
        op_element_query,
    ],
    esm_entry_point = "ext:microapp_runtime/bootstrap.js",
    esm = ["ext:microapp_runtime/bootstrap.js" = "src/bootstrap.js"],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_delivery_runs_native_listeners() {
        use std::cell::Cell;

        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let deliveries = Deliveries {
            payload: Rc::new(serde_json::json!({"a": 1})),
            native: vec![Rc::new(move |_: &Value| counter.set(counter.get() + 1))],
            script: vec![4, 5],
        };

        let delivery = into_script_delivery(Some(deliveries)).unwrap();
        assert_eq!(hits.get(), 1);
        assert_eq!(delivery.listeners, vec![4, 5]);
        assert_eq!(delivery.payload, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_native_only_delivery_returns_nothing() {
        let deliveries = Deliveries {
            payload: Rc::new(Value::Null),
            native: Vec::new(),
            script: Vec::new(),
        };
        assert!(into_script_delivery(Some(deliveries)).is_none());
        assert!(into_script_delivery(None).is_none());
    }
}
