//! Host page state shared between the host facade and the engine ops.
//!
//! Single-threaded: the state lives in an `Rc<RefCell<_>>` and no borrow is
//! ever held across a call into the script engine.

use crate::app::App;
use crate::data::{format_event_name, Deliveries, EventCenter};
use crate::dom::{Document, NodeId};
use crate::error::Result;
use crate::sandbox::ReadTarget;
use crate::sanitize::sanitize_data;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

pub type SharedState = Rc<RefCell<HostState>>;

/// Listener ids registered on the real global object, per event type, in
/// registration order.
#[derive(Debug, Default)]
pub struct WindowListeners {
    by_type: BTreeMap<String, Vec<u32>>,
}

impl WindowListeners {
    pub fn add(&mut self, event_type: &str, id: u32) {
        let ids = self.by_type.entry(event_type.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let mut removed = false;
        for ids in self.by_type.values_mut() {
            let before = ids.len();
            ids.retain(|existing| *existing != id);
            removed |= before != ids.len();
        }
        self.by_type.retain(|_, ids| !ids.is_empty());
        removed
    }

    pub fn listeners(&self, event_type: &str) -> Vec<u32> {
        self.by_type.get(event_type).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[derive(Debug)]
pub struct HostState {
    pub document: Document,
    /// Application registry keyed by name.
    pub apps: HashMap<String, App>,
    pub window_listeners: WindowListeners,
    pub data: EventCenter,
    container_tag: String,
    /// Application whose code is on the call stack right now.
    current_app: Option<String>,
    /// Containers currently connected; the document-query patch is active
    /// while this is non-zero.
    connected: usize,
    next_listener_id: u32,
    next_instance: u64,
}

impl Default for HostState {
    fn default() -> Self {
        Self::new("micro-app")
    }
}

impl HostState {
    pub fn new(container_tag: &str) -> Self {
        Self {
            document: Document::new(),
            apps: HashMap::new(),
            window_listeners: WindowListeners::default(),
            data: EventCenter::default(),
            container_tag: container_tag.to_string(),
            current_app: None,
            connected: 0,
            next_listener_id: 1,
            next_instance: 1,
        }
    }

    pub fn shared(self) -> SharedState {
        Rc::new(RefCell::new(self))
    }

    pub fn current_app(&self) -> Option<&str> {
        self.current_app.as_deref()
    }

    pub fn set_current_app(&mut self, app: &str) {
        self.current_app = Some(app.to_string());
    }

    pub fn clear_current_app(&mut self) {
        self.current_app = None;
    }

    pub fn connected(&self) -> usize {
        self.connected
    }

    pub fn container_connected(&mut self) {
        self.connected += 1;
    }

    pub fn container_disconnected(&mut self) {
        self.connected = self.connected.saturating_sub(1);
    }

    pub fn is_query_patch_active(&self) -> bool {
        self.connected > 0
    }

    pub fn next_listener_id(&mut self) -> u32 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        id
    }

    pub fn next_instance(&mut self) -> u64 {
        let instance = self.next_instance;
        self.next_instance += 1;
        instance
    }

    /// Resolve a sandboxed read for `app`. Reads of the document or the
    /// code-evaluation capability mark `app` as currently executing; the
    /// caller is responsible for clearing the mark once its synchronous unit
    /// of work is over. Unknown applications read through to the real global.
    pub fn resolve_read(&mut self, app: &str, key: &str) -> ReadTarget {
        let Some(target) = self.apps.get(app).map(|entry| entry.sandbox.read(key)) else {
            return ReadTarget::Fallback;
        };
        if target.marks_current_app() {
            self.set_current_app(app);
        }
        target
    }

    pub fn is_container(&self, node: NodeId) -> bool {
        self.document.is_tag(node, &self.container_tag)
    }

    /// Publish `payload` from the host to `app`.
    pub fn set_data(&mut self, app: &str, payload: Rc<Value>) -> Option<Deliveries> {
        self.data.dispatch(&format_event_name(app, true), payload)
    }

    /// Attribute write with the container data interception: `data` on a
    /// container is sanitized and published to the child instead of being
    /// stored, and non-object `data` values on containers are dropped.
    pub fn set_attribute(&mut self, node: NodeId, key: &str, value: Value) -> Result<Option<Deliveries>> {
        if key.eq_ignore_ascii_case("data") && self.is_container(node) {
            let name = self
                .document
                .get_attribute(node, "name")
                .unwrap_or_default()
                .to_string();
            if !value.is_object() {
                tracing::warn!(app = %name, "ignoring non-object data attribute");
                return Ok(None);
            }
            let payload = sanitize_data(value)?;
            return Ok(self.set_data(&name, Rc::new(Value::Object(payload))));
        }

        let text = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        self.document.set_attribute(node, key, &text);
        Ok(None)
    }

    /// Document-level `querySelector`. While the patch is active and an
    /// application is marked as executing, lookups other than `head` and
    /// `body` are confined to that application's container.
    pub fn query_selector(&self, selector: &str) -> Option<NodeId> {
        let root = self.document.root();
        let trimmed = selector.trim();
        let scoped = self
            .current_app
            .as_deref()
            .filter(|_| self.is_query_patch_active() && trimmed != "head" && trimmed != "body");

        match scoped {
            Some(app) => {
                let container = self.apps.get(app)?.container?;
                self.document.query_selector(container, selector)
            }
            None => self.document.query_selector(root, selector),
        }
    }
}
