//! Cross-application messaging.
//!
//! A channel-keyed publish/subscribe registry. Each application gets two
//! channels: one carrying data from the host to the child and one carrying
//! data from the child back to the host. Delivery is synchronous and only
//! happens when a payload differs by reference from the last one delivered
//! on that channel.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type NativeListener = Rc<dyn Fn(&Value)>;

/// Channel name for one direction of an application's messaging.
/// An empty application name yields an empty channel name.
pub fn format_event_name(app: &str, from_base: bool) -> String {
    if app.is_empty() {
        return String::new();
    }
    if from_base {
        format!("__from_base_app_{app}__")
    } else {
        format!("__from_micro_app_{app}__")
    }
}

#[derive(Clone)]
pub enum DataListener {
    /// A host-side closure.
    Native(NativeListener),
    /// A callback living in the script engine, by listener id.
    Script(u32),
}

impl fmt::Debug for DataListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataListener::Native(_) => f.write_str("Native"),
            DataListener::Script(id) => write!(f, "Script({id})"),
        }
    }
}

/// Listeners due to receive one payload. Native listeners run through
/// [`Deliveries::run_native`]; script listener ids are handed to the engine.
pub struct Deliveries {
    pub payload: Rc<Value>,
    pub native: Vec<NativeListener>,
    pub script: Vec<u32>,
}

impl Deliveries {
    pub fn run_native(&self) {
        for listener in &self.native {
            listener(&self.payload);
        }
    }
}

#[derive(Default)]
struct Channel {
    listeners: Vec<DataListener>,
    last: Option<Rc<Value>>,
}

#[derive(Default)]
pub struct EventCenter {
    channels: HashMap<String, Channel>,
}

impl fmt::Debug for EventCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCenter")
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl EventCenter {
    pub fn on(&mut self, channel: &str, listener: DataListener) {
        if channel.is_empty() {
            return;
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .listeners
            .push(listener);
    }

    /// Remove one script listener. Returns whether it was registered.
    pub fn off_script(&mut self, channel: &str, id: u32) -> bool {
        let Some(entry) = self.channels.get_mut(channel) else {
            return false;
        };
        let before = entry.listeners.len();
        entry
            .listeners
            .retain(|listener| !matches!(listener, DataListener::Script(existing) if *existing == id));
        before != entry.listeners.len()
    }

    /// Drop every listener on `channel`, returning the script listener ids
    /// that were removed. The last payload is kept.
    pub fn clear(&mut self, channel: &str) -> Vec<u32> {
        let Some(entry) = self.channels.get_mut(channel) else {
            return Vec::new();
        };
        std::mem::take(&mut entry.listeners)
            .into_iter()
            .filter_map(|listener| match listener {
                DataListener::Script(id) => Some(id),
                DataListener::Native(_) => None,
            })
            .collect()
    }

    /// Record `payload` as the channel's data and collect its listeners.
    /// Returns `None` when `payload` is the very payload delivered last.
    pub fn dispatch(&mut self, channel: &str, payload: Rc<Value>) -> Option<Deliveries> {
        if channel.is_empty() {
            return None;
        }
        let entry = self.channels.entry(channel.to_string()).or_default();
        if entry
            .last
            .as_ref()
            .is_some_and(|last| Rc::ptr_eq(last, &payload))
        {
            return None;
        }
        entry.last = Some(Rc::clone(&payload));

        let mut deliveries = Deliveries {
            payload,
            native: Vec::new(),
            script: Vec::new(),
        };
        for listener in &entry.listeners {
            match listener {
                DataListener::Native(f) => deliveries.native.push(Rc::clone(f)),
                DataListener::Script(id) => deliveries.script.push(*id),
            }
        }
        Some(deliveries)
    }

    /// Last payload dispatched on `channel`.
    pub fn data(&self, channel: &str) -> Option<Rc<Value>> {
        self.channels.get(channel).and_then(|entry| entry.last.clone())
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |entry| entry.listeners.len())
    }
}
