//! One child application instance: identity, lifecycle status, resource
//! tables and sandbox.

use crate::dom::{Document, NodeId};
use crate::sandbox::{ExecutionSandbox, Teardown};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Created,
    Loading,
    Mounted,
    Unmounted,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AppStatus::Created => "created",
            AppStatus::Loading => "loading",
            AppStatus::Mounted => "mounted",
            AppStatus::Unmounted => "unmounted",
        })
    }
}

/// One stylesheet or script reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    /// Resolved URL, or a generated nonce for inline content.
    pub key: String,
    /// Text content; empty until fetched for external entries.
    pub code: String,
    pub is_external: bool,
}

impl ResourceEntry {
    pub fn external(url: impl Into<String>) -> Self {
        Self {
            key: url.into(),
            code: String::new(),
            is_external: true,
        }
    }

    pub fn inline(nonce: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            key: nonce.into(),
            code: code.into(),
            is_external: false,
        }
    }
}

/// Keyed resource map preserving first-insertion order. Re-inserting a key
/// replaces the entry in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceTable {
    entries: Vec<ResourceEntry>,
}

impl ResourceTable {
    pub fn insert(&mut self, entry: ResourceEntry) {
        match self.entries.iter_mut().find(|existing| existing.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ResourceEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ResourceEntry> {
        self.entries.iter_mut().find(|entry| entry.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key.clone()).collect()
    }
}

/// Everything fetched and extracted for an application.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub links: ResourceTable,
    pub scripts: ResourceTable,
    /// The pristine extracted fragment, recorded once both tables resolve.
    pub html: Option<NodeId>,
}

#[derive(Debug)]
pub struct App {
    pub name: String,
    pub url: String,
    pub base_url: String,
    pub container: Option<NodeId>,
    pub source: SourceTables,
    pub sandbox: ExecutionSandbox,
    /// Distinguishes successive instances registered under one name.
    instance: u64,
    status: AppStatus,
    load_count: u32,
}

impl App {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        base_url: impl Into<String>,
        container: NodeId,
        sandbox: ExecutionSandbox,
        instance: u64,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            base_url: base_url.into(),
            container: Some(container),
            source: SourceTables::default(),
            sandbox,
            instance,
            status: AppStatus::Created,
            load_count: 0,
        }
    }

    /// A fresh instance reusing a previous instance's fetched source.
    pub fn from_cache(
        cached: &App,
        container: NodeId,
        sandbox: ExecutionSandbox,
        instance: u64,
    ) -> Self {
        let mut app = Self::new(
            cached.name.clone(),
            cached.url.clone(),
            cached.base_url.clone(),
            container,
            sandbox,
            instance,
        );
        app.source = cached.source.clone();
        app
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn status(&self) -> AppStatus {
        self.status
    }

    pub fn load_count(&self) -> u32 {
        self.load_count
    }

    /// Whether this instance's fetched source can be mounted without
    /// fetching again.
    pub fn has_cached_source(&self) -> bool {
        self.source.html.is_some()
    }

    pub fn begin_loading(&mut self) {
        if self.status == AppStatus::Created {
            self.status = AppStatus::Loading;
        }
    }

    /// Record one resource table's completion. Returns true exactly when
    /// this completion should trigger the mount.
    pub fn on_load(&mut self, fragment: NodeId) -> bool {
        self.load_count += 1;
        if self.load_count == 2 && self.status != AppStatus::Unmounted {
            self.source.html = Some(fragment);
            true
        } else {
            false
        }
    }

    /// Insert a copy of the stored fragment into the container, start the
    /// sandbox and return the scripts to run, bound to the sandbox, in table
    /// order. Returns `None` when there is nothing to mount into.
    pub fn prepare_mount(&mut self, doc: &mut Document) -> Option<Vec<(String, String)>> {
        let (Some(container), Some(html)) = (self.container, self.source.html) else {
            return None;
        };

        let copy = doc.clone_subtree(html);
        let group = doc.create_fragment();
        let children = doc.children(copy).to_vec();
        for child in children {
            doc.append_child(group, child);
        }
        doc.append_child(container, group);

        self.sandbox.start();
        Some(
            self.source
                .scripts
                .iter()
                .map(|entry| (entry.key.clone(), self.sandbox.bind_scope(&entry.code)))
                .collect(),
        )
    }

    pub fn finish_mount(&mut self) {
        if self.status != AppStatus::Unmounted {
            self.status = AppStatus::Mounted;
        }
    }

    /// Mark unmounted, empty and release the container, stop the sandbox.
    pub fn unmount(&mut self, doc: &mut Document) -> Teardown {
        self.status = AppStatus::Unmounted;
        if let Some(container) = self.container.take() {
            doc.set_text_content(container, "");
        }
        self.sandbox.stop()
    }
}
