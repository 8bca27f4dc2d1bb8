//! Host page facade: the container element contract, host-side messaging
//! and the mount/unmount half of the application lifecycle.
//!
//! Everything runs on one thread. A [`Host`] is a cheap handle; clones share
//! the page state, the script engine and the fetcher.

use crate::app::{App, AppStatus};
use crate::config::HostConfig;
use crate::css::StyleScope;
use crate::data::{format_event_name, DataListener, Deliveries};
use crate::dom::NodeId;
use crate::error::{HostError, Result};
use crate::fetch::SourceFetcher;
use crate::loader;
use crate::markup::{base_url_of, observe_pending_styles, MarkupExtractor};
use crate::ops::ConsoleOutput;
use crate::runtime::{JsEngine, ScriptEngine};
use crate::sandbox::ExecutionSandbox;
use crate::state::{HostState, SharedState};
use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use tracing::{debug, error, info};

/// Resource loading for one connected application. Resolves once the
/// application is mounted, or found stale.
pub type LoadTask = LocalBoxFuture<'static, Result<()>>;

#[derive(Clone)]
pub struct Host {
    pub(crate) state: SharedState,
    pub(crate) engine: Rc<RefCell<Box<dyn ScriptEngine>>>,
    pub(crate) fetcher: Rc<dyn SourceFetcher>,
    pub(crate) config: Rc<HostConfig>,
}

impl Host {
    /// A host backed by a V8 [`JsEngine`].
    pub fn new(config: HostConfig, fetcher: Rc<dyn SourceFetcher>) -> Result<Self> {
        Self::with_engine(config, fetcher, |config, state| {
            Ok(Box::new(JsEngine::new(config, state)?))
        })
    }

    /// A host backed by any [`ScriptEngine`]. `make_engine` receives the
    /// shared page state the engine's host calls must go through.
    pub fn with_engine<F>(config: HostConfig, fetcher: Rc<dyn SourceFetcher>, make_engine: F) -> Result<Self>
    where
        F: FnOnce(&HostConfig, SharedState) -> anyhow::Result<Box<dyn ScriptEngine>>,
    {
        config.validate()?;
        let state = HostState::new(&config.container_tag).shared();
        let engine = make_engine(&config, Rc::clone(&state))?;
        Ok(Self {
            state,
            engine: Rc::new(RefCell::new(engine)),
            fetcher,
            config: Rc::new(config),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    fn engine(&self) -> Result<RefMut<'_, Box<dyn ScriptEngine>>> {
        self.engine
            .try_borrow_mut()
            .map_err(|_| HostError::Engine(anyhow!("script engine is busy")))
    }

    /// Create a detached container element for `name` loading from `url`.
    pub fn create_container(&self, name: &str, url: &str) -> NodeId {
        let mut state = self.state.borrow_mut();
        let container = state.document.create_element(&self.config.container_tag);
        state.document.set_attribute(container, "name", name);
        state.document.set_attribute(container, "url", url);
        container
    }

    /// Connect a container: register a fresh application instance under its
    /// `name` and return the task that loads and mounts it. A container that
    /// is not yet part of the page is appended to the body.
    pub fn connect(&self, container: NodeId) -> Result<LoadTask> {
        let (name, url, base_url) = self.container_identity(container)?;

        let cached = {
            let state = self.state.borrow();
            match state.apps.get(&name) {
                Some(existing) if existing.status() != AppStatus::Unmounted => {
                    return Err(HostError::DuplicateApp(name));
                }
                Some(existing) => existing.url == url && existing.has_cached_source(),
                None => false,
            }
        };

        self.engine()?.create_scope(&name)?;

        let instance = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let instance = state.next_instance();
            let sandbox = ExecutionSandbox::new(&name, &self.config.sandbox);
            let mut app = match state.apps.get(&name).filter(|_| cached) {
                Some(previous) => App::from_cache(previous, container, sandbox, instance),
                None => App::new(&name, &url, &base_url, container, sandbox, instance),
            };
            app.begin_loading();

            if !state.document.is_connected(container) {
                let body = state.document.body();
                state.document.append_child(body, container);
            }
            state.apps.insert(name.clone(), app);
            state.container_connected();
            instance
        };

        info!(app = %name, url = %url, cached, "application connected");
        Ok(Box::pin(loader::load(self.clone(), name, instance)))
    }

    fn container_identity(&self, container: NodeId) -> Result<(String, String, String)> {
        let state = self.state.borrow();
        if !state.is_container(container) {
            return Err(HostError::NotAContainer);
        }
        let attribute = |attribute: &'static str| {
            state
                .document
                .get_attribute(container, attribute)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let name = attribute("name").ok_or(HostError::MissingAttribute { attribute: "name" })?;
        let url = attribute("url").ok_or(HostError::MissingAttribute { attribute: "url" })?;
        let base_url = attribute("baseurl").unwrap_or_else(|| base_url_of(&url));
        Ok((name, url, base_url))
    }

    /// Disconnect a container: detach it from the page and unmount its
    /// application, destroying it when the container carries `destroy`.
    pub fn disconnect(&self, container: NodeId) -> Result<()> {
        let (name, destroy) = {
            let mut state = self.state.borrow_mut();
            if !state.is_container(container) {
                return Err(HostError::NotAContainer);
            }
            let name = state
                .document
                .get_attribute(container, "name")
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            let destroy = state.document.has_attribute(container, "destroy");
            state.document.detach(container);
            (name, destroy)
        };

        self.unmount(&name, destroy)?;
        self.state.borrow_mut().container_disconnected();
        Ok(())
    }

    /// Unmount `name`: empty and release its container, stop its sandbox and
    /// release its listeners. With `destroy` the application and its cached
    /// source are removed from the registry.
    pub fn unmount(&self, name: &str, destroy: bool) -> Result<()> {
        let mut engine = self.engine()?;
        let teardown = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let app = state
                .apps
                .get_mut(name)
                .ok_or_else(|| HostError::UnknownApp(name.to_string()))?;

            let mut teardown = app.unmount(&mut state.document);
            for (_, listener) in &teardown.listeners {
                state.window_listeners.remove(*listener);
            }
            teardown.data_listeners = state.data.clear(&format_event_name(name, true));

            if destroy {
                state.apps.remove(name);
                if state.current_app() == Some(name) {
                    state.clear_current_app();
                }
            }
            teardown
        };

        engine.purge(name, &teardown)?;
        if destroy {
            engine.drop_scope(name)?;
        }
        info!(app = %name, destroy, "application unmounted");
        Ok(())
    }

    pub fn app_status(&self, name: &str) -> Option<AppStatus> {
        self.state.borrow().apps.get(name).map(App::status)
    }

    /// Attribute write with container `data` injection.
    pub fn set_attribute(&self, node: NodeId, key: &str, value: impl Into<Value>) -> Result<()> {
        let deliveries = self.state.borrow_mut().set_attribute(node, key, value.into())?;
        self.deliver(deliveries)
    }

    /// Send `payload` to `app`. Listeners only fire when `payload` is not the
    /// same allocation as the last payload sent.
    pub fn set_data(&self, app: &str, payload: impl Into<Rc<Value>>) -> Result<()> {
        let deliveries = self.state.borrow_mut().set_data(app, payload.into());
        self.deliver(deliveries)
    }

    /// Listen for data `app` dispatches through its `microApp` handle.
    pub fn add_data_listener(&self, app: &str, listener: impl Fn(&Value) + 'static) {
        self.state
            .borrow_mut()
            .data
            .on(&format_event_name(app, false), DataListener::Native(Rc::new(listener)));
    }

    pub fn clear_data_listener(&self, app: &str) {
        self.state
            .borrow_mut()
            .data
            .clear(&format_event_name(app, false));
    }

    /// Last payload `app` dispatched to the host.
    pub fn get_data(&self, app: &str) -> Option<Rc<Value>> {
        self.state.borrow().data.data(&format_event_name(app, false))
    }

    fn deliver(&self, deliveries: Option<Deliveries>) -> Result<()> {
        let Some(deliveries) = deliveries else {
            return Ok(());
        };
        deliveries.run_native();
        if !deliveries.script.is_empty() {
            self.engine()?.deliver(&deliveries.script, &deliveries.payload)?;
        }
        Ok(())
    }

    /// Document-level lookup, subject to the per-application query patch.
    pub fn query_selector(&self, selector: &str) -> Option<NodeId> {
        self.state.borrow().query_selector(selector)
    }

    pub fn body(&self) -> NodeId {
        self.state.borrow().document.body()
    }

    pub fn dispatch_window_event(&self, event_type: &str, detail: &Value) -> Result<()> {
        Ok(self.engine()?.dispatch_window_event(event_type, detail)?)
    }

    /// Value of `key` on `app`'s virtual scope, as JSON.
    pub fn read_scope(&self, app: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.engine()?.read_scope(app, key)?)
    }

    /// Value of `key` on the real global object, as JSON.
    pub fn read_global(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.engine()?.read_global(key)?)
    }

    /// Own keys of `app`'s virtual scope, in insertion order.
    pub fn scope_keys(&self, app: &str) -> Result<Vec<String>> {
        Ok(self.engine()?.scope_keys(app)?)
    }

    pub fn take_console(&self) -> Result<ConsoleOutput> {
        Ok(self.engine()?.take_console())
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        self.state.borrow().document.inner_html(node)
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        self.state.borrow().document.outer_html(node)
    }

    pub(crate) fn extractor(&self, name: &str, base_url: &str) -> MarkupExtractor {
        MarkupExtractor::new(
            &self.config.head_tag(),
            &self.config.body_tag(),
            base_url,
            StyleScope::for_app(&self.config.container_tag, name),
        )
    }

    /// One resource table of instance `instance` of `name` finished. Stale
    /// instances are ignored.
    pub(crate) fn on_load(&self, name: &str, instance: u64, fragment: NodeId) -> Result<()> {
        let ready = {
            let mut state = self.state.borrow_mut();
            match state.apps.get_mut(name) {
                Some(app) if app.instance() == instance => app.on_load(fragment),
                _ => {
                    debug!(app = %name, instance, "ignoring completion for stale instance");
                    false
                }
            }
        };
        if ready {
            self.mount(name)?;
        }
        Ok(())
    }

    fn mount(&self, name: &str) -> Result<()> {
        let mut engine = self.engine()?;
        let scripts = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(app) = state.apps.get_mut(name) else {
                return Ok(());
            };
            let Some(scripts) = app.prepare_mount(&mut state.document) else {
                return Ok(());
            };
            if let Some(container) = app.container {
                let scope = StyleScope::for_app(&self.config.container_tag, name);
                observe_pending_styles(&mut state.document, container, &scope);
            }
            scripts
        };

        for (key, code) in &scripts {
            if let Err(err) = engine.execute(name, code) {
                error!(app = %name, script = %key, error = %err, "script failed");
            }
        }

        if let Some(app) = self.state.borrow_mut().apps.get_mut(name) {
            app.finish_mount();
        }
        info!(app = %name, scripts = scripts.len(), "application mounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::runtime::testing::{CallLog, EngineCall, RecordingEngine, FAIL_MARKER};
    use serde_json::json;
    use std::time::Duration;

    const INDEX: &str = "https://x/index.html";

    fn recording_host(fetcher: Rc<StaticFetcher>) -> (Host, CallLog) {
        let calls = CallLog::default();
        let log = Rc::clone(&calls);
        let host = Host::with_engine(HostConfig::default(), fetcher, move |_, _| {
            Ok(Box::new(RecordingEngine::new(log)))
        })
        .unwrap();
        (host, calls)
    }

    fn js_host(fetcher: Rc<StaticFetcher>) -> Host {
        Host::new(HostConfig::default(), fetcher).unwrap()
    }

    fn executed(calls: &CallLog) -> Vec<String> {
        calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                EngineCall::Execute { code, .. } => Some(code.clone()),
                _ => None,
            })
            .collect()
    }

    async fn mount(host: &Host, name: &str) -> NodeId {
        let container = host.create_container(name, INDEX);
        host.connect(container).unwrap().await.unwrap();
        container
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripts_run_in_document_order() {
        let html = r#"<script src="a.js"></script><script src="b.js"></script><script>inline()</script><script src="c.js"></script>"#;
        let fetcher = Rc::new(
            StaticFetcher::new()
                .with(INDEX, html)
                .with_delay("https://x/a.js", "a()", Duration::from_millis(300))
                .with_delay("https://x/b.js", "b()", Duration::from_millis(100))
                .with("https://x/c.js", "c()"),
        );
        let (host, calls) = recording_host(fetcher);

        mount(&host, "demo").await;

        let codes = executed(&calls);
        assert_eq!(codes.len(), 4);
        for (code, expected) in codes.iter().zip(["a()", "b()", "inline()", "c()"]) {
            assert!(code.contains(expected), "{code} should run {expected}");
        }
        assert_eq!(host.app_status("demo"), Some(AppStatus::Mounted));
    }

    #[tokio::test]
    async fn test_mount_after_exactly_two_loads() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hello</p>"));
        let (host, calls) = recording_host(fetcher);

        let container = mount(&host, "demo").await;

        assert_eq!(host.state.borrow().apps["demo"].load_count(), 2);
        assert_eq!(host.inner_html(container), "<p>hello</p>");
        assert_eq!(calls.borrow()[0], EngineCall::CreateScope("demo".into()));
        assert!(executed(&calls).is_empty());
    }

    #[tokio::test]
    async fn test_stylesheets_are_scoped_into_head_region() {
        let html = r#"<html><head><link rel="stylesheet" href="a.css"></head><body><p>x</p></body></html>"#;
        let fetcher = Rc::new(
            StaticFetcher::new()
                .with(INDEX, html)
                .with("https://x/a.css", "body { margin: 0 } .title { color: red }"),
        );
        let (host, _) = recording_host(fetcher);

        let container = mount(&host, "demo").await;

        let markup = host.inner_html(container);
        assert!(markup.contains("<micro-app-head><style>micro-app[name=demo] { margin: 0 }"));
        assert!(markup.contains("micro-app[name=demo] .title { color: red }"));
        assert!(markup.contains("<micro-app-body><p>x</p></micro-app-body>"));
        assert!(!markup.contains("<link"));
    }

    #[tokio::test]
    async fn test_failing_script_does_not_stop_the_rest() {
        let html = format!("<script>a()</script><script>{FAIL_MARKER}</script><script>c()</script>");
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, html));
        let (host, calls) = recording_host(fetcher);

        mount(&host, "demo").await;

        assert_eq!(executed(&calls).len(), 3);
        assert_eq!(host.app_status("demo"), Some(AppStatus::Mounted));
    }

    #[tokio::test]
    async fn test_fetch_failure_stalls_the_app() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, r#"<script src="gone.js"></script>"#));
        let (host, calls) = recording_host(fetcher);

        let container = host.create_container("demo", INDEX);
        let err = host.connect(container).unwrap().await.unwrap_err();

        assert!(matches!(err, HostError::Fetch { ref url, .. } if url == "https://x/gone.js"));
        assert_eq!(host.app_status("demo"), Some(AppStatus::Loading));
        assert!(executed(&calls).is_empty());
    }

    #[tokio::test]
    async fn test_unmount_while_loading_never_mounts() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<script>a()</script>"));
        let (host, calls) = recording_host(fetcher);

        let container = host.create_container("demo", INDEX);
        let task = host.connect(container).unwrap();
        host.unmount("demo", false).unwrap();
        task.await.unwrap();

        assert_eq!(host.app_status("demo"), Some(AppStatus::Unmounted));
        assert!(executed(&calls).is_empty());
        assert!(host.inner_html(container).is_empty());
    }

    #[tokio::test]
    async fn test_unmount_keeps_or_destroys() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hi</p>"));
        let (host, calls) = recording_host(fetcher);
        let container = mount(&host, "demo").await;

        host.unmount("demo", false).unwrap();
        assert_eq!(host.app_status("demo"), Some(AppStatus::Unmounted));
        assert!(host.inner_html(container).is_empty());

        host.unmount("demo", true).unwrap();
        assert_eq!(host.app_status("demo"), None);
        assert!(calls
            .borrow()
            .contains(&EngineCall::DropScope("demo".into())));

        let err = host.unmount("demo", false).unwrap_err();
        assert!(matches!(err, HostError::UnknownApp(name) if name == "demo"));
    }

    #[tokio::test]
    async fn test_disconnect_honours_destroy_attribute() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hi</p>"));
        let (host, _) = recording_host(fetcher);

        let kept = mount(&host, "kept").await;
        host.disconnect(kept).unwrap();
        assert_eq!(host.app_status("kept"), Some(AppStatus::Unmounted));
        assert!(!host.state.borrow().document.is_connected(kept));

        let destroyed = mount(&host, "gone").await;
        host.set_attribute(destroyed, "destroy", "").unwrap();
        host.disconnect(destroyed).unwrap();
        assert_eq!(host.app_status("gone"), None);
        assert_eq!(host.state.borrow().connected(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_reuses_cached_source() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hi</p><script>boot()</script>"));
        let (host, calls) = recording_host(Rc::clone(&fetcher));

        let container = mount(&host, "demo").await;
        host.disconnect(container).unwrap();
        host.connect(container).unwrap().await.unwrap();

        assert_eq!(fetcher.requests(), vec![INDEX.to_string()]);
        assert_eq!(executed(&calls).len(), 2);
        assert_eq!(host.app_status("demo"), Some(AppStatus::Mounted));
        assert_eq!(host.inner_html(container), "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_connect_rejects_misuse() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hi</p>"));
        let (host, _) = recording_host(fetcher);

        mount(&host, "demo").await;
        let twin = host.create_container("demo", INDEX);
        assert!(matches!(host.connect(twin), Err(HostError::DuplicateApp(_))));

        let nameless = host.create_container("", INDEX);
        assert!(matches!(
            host.connect(nameless),
            Err(HostError::MissingAttribute { attribute: "name" })
        ));

        let div = host.state.borrow_mut().document.create_element("div");
        assert!(matches!(host.connect(div), Err(HostError::NotAContainer)));
    }

    #[tokio::test]
    async fn test_container_data_reaches_child_listeners() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hi</p>"));
        let (host, calls) = recording_host(fetcher);
        let container = mount(&host, "demo").await;
        host.state
            .borrow_mut()
            .data
            .on(&format_event_name("demo", true), DataListener::Script(7));

        host.set_attribute(container, "data", json!({"__ob__": {}, "user": "ann"}))
            .unwrap();

        assert!(calls.borrow().contains(&EngineCall::Deliver {
            listeners: vec![7],
            payload: json!({"user": "ann"}),
        }));
        assert!(!host.state.borrow().document.has_attribute(container, "data"));
    }

    #[tokio::test]
    async fn test_same_payload_is_delivered_once() {
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, "<p>hi</p>"));
        let (host, calls) = recording_host(fetcher);
        mount(&host, "demo").await;
        host.state
            .borrow_mut()
            .data
            .on(&format_event_name("demo", true), DataListener::Script(3));

        let payload = Rc::new(json!({"n": 1}));
        host.set_data("demo", Rc::clone(&payload)).unwrap();
        host.set_data("demo", Rc::clone(&payload)).unwrap();
        host.set_data("demo", json!({"n": 1})).unwrap();

        let deliveries = calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, EngineCall::Deliver { .. }))
            .count();
        assert_eq!(deliveries, 2);
    }

    #[tokio::test]
    async fn test_demo_application_end_to_end() {
        let html = r#"<link rel="stylesheet" href="a.css"><div id="app"></div><script>window.flag=1</script>"#;
        let fetcher = Rc::new(
            StaticFetcher::new()
                .with(INDEX, html)
                .with("https://x/a.css", "#app { color: red }"),
        );
        let host = js_host(fetcher);

        let container = mount(&host, "demo").await;

        {
            let state = host.state.borrow();
            let app = &state.apps["demo"];
            assert_eq!(app.source.links.keys(), vec!["https://x/a.css".to_string()]);
            assert_eq!(app.source.scripts.len(), 1);
            let script = app.source.scripts.iter().next().unwrap();
            assert!(!script.is_external);
            assert_eq!(script.code, "window.flag=1");
            assert_eq!(app.load_count(), 2);
        }
        assert_eq!(host.app_status("demo"), Some(AppStatus::Mounted));
        assert_eq!(host.read_scope("demo", "flag").unwrap(), Some(json!(1)));
        assert_eq!(host.read_global("flag").unwrap(), None);
        assert!(host
            .inner_html(container)
            .contains("micro-app[name=demo] #app { color: red }"));
    }

    #[tokio::test]
    async fn test_document_queries_are_scoped_while_executing() {
        let html = r#"<p class="title">child</p><script>window.found = document.querySelector('.title').textContent; window.head = document.querySelector('head').tagName</script>"#;
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, html));
        let host = js_host(fetcher);
        {
            let mut state = host.state.borrow_mut();
            let body = state.document.body();
            let title = state.document.create_element("p");
            state.document.set_attribute(title, "class", "title");
            state.document.set_text_content(title, "host");
            state.document.append_child(body, title);
        }

        mount(&host, "demo").await;

        assert_eq!(host.read_scope("demo", "found").unwrap(), Some(json!("child")));
        assert_eq!(host.read_scope("demo", "head").unwrap(), Some(json!("HEAD")));
        // The marker is cleared once the script's call stack unwinds
        assert_eq!(host.state.borrow().current_app(), None);
        let title = host.query_selector(".title").unwrap();
        assert_eq!(host.state.borrow().document.text_content(title), "host");
    }

    #[tokio::test]
    async fn test_messaging_between_host_and_child() {
        let html = r#"<script>
            window.microApp.addDataListener((data) => { window.received = data; });
            window.microApp.dispatch({ ready: true });
        </script>"#;
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, html));
        let host = js_host(fetcher);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        host.add_data_listener("demo", move |data| sink.borrow_mut().push(data.clone()));

        mount(&host, "demo").await;
        host.set_data("demo", json!({"user": "ann"})).unwrap();

        assert_eq!(*seen.borrow(), vec![json!({"ready": true})]);
        assert_eq!(host.get_data("demo").as_deref(), Some(&json!({"ready": true})));
        assert_eq!(host.read_scope("demo", "received").unwrap(), Some(json!({"user": "ann"})));

        host.clear_data_listener("demo");
        assert!(host.get_data("demo").is_some());
    }

    #[tokio::test]
    async fn test_unmount_releases_child_globals_and_listeners() {
        let html = r#"<script>
            window.addEventListener('resize', () => { window.resized = true; });
            window.microApp.addDataListener(() => {});
            window.counter = 1;
        </script>"#;
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, html));
        let host = js_host(fetcher);

        mount(&host, "demo").await;
        host.dispatch_window_event("resize", &Value::Null).unwrap();
        assert_eq!(host.read_scope("demo", "resized").unwrap(), Some(json!(true)));
        assert_eq!(host.state.borrow().window_listeners.len(), 1);

        host.unmount("demo", false).unwrap();

        assert!(host.state.borrow().window_listeners.is_empty());
        assert_eq!(
            host.state
                .borrow()
                .data
                .listener_count(&format_event_name("demo", true)),
            0
        );
        assert_eq!(host.read_scope("demo", "counter").unwrap(), None);
        assert_eq!(host.read_scope("demo", "resized").unwrap(), None);
        assert_eq!(host.read_global("counter").unwrap(), None);
    }

    #[tokio::test]
    async fn test_sibling_apps_do_not_share_globals() {
        let fetcher = Rc::new(
            StaticFetcher::new()
                .with("https://x/one/index.html", "<script>window.shared = 'one'</script>")
                .with("https://x/two/index.html", "<script>window.shared = 'two'</script>"),
        );
        let host = js_host(fetcher);

        let one = host.create_container("one", "https://x/one/index.html");
        let two = host.create_container("two", "https://x/two/index.html");
        let (first, second) = futures::join!(
            host.connect(one).unwrap(),
            host.connect(two).unwrap()
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(host.read_scope("one", "shared").unwrap(), Some(json!("one")));
        assert_eq!(host.read_scope("two", "shared").unwrap(), Some(json!("two")));
        assert_eq!(host.read_global("shared").unwrap(), None);
    }

    #[tokio::test]
    async fn test_child_dispatch_of_same_object_is_delivered_once() {
        let html = r#"<script>
            const status = { ready: true };
            window.microApp.dispatch(status);
            window.microApp.dispatch(status);
            window.microApp.dispatch({ ready: true });
        </script>"#;
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, html));
        let host = js_host(fetcher);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        host.add_data_listener("demo", move |data| sink.borrow_mut().push(data.clone()));

        mount(&host, "demo").await;

        assert_eq!(*seen.borrow(), vec![json!({"ready": true}); 2]);
    }

    #[tokio::test]
    async fn test_symbol_keys_follow_the_sandbox_lifecycle() {
        let html = r#"<script>
            window[Symbol.for('tag')] = 1;
            Object.defineProperty(window, Symbol('meta'), { value: 2 });
            window.plain = 3;
        </script>"#;
        let fetcher = Rc::new(StaticFetcher::new().with(INDEX, html));
        let host = js_host(fetcher);
        let baseline = vec!["microApp", "addEventListener", "removeEventListener"];

        mount(&host, "demo").await;
        assert_eq!(
            host.scope_keys("demo").unwrap(),
            [baseline.clone(), vec!["plain", "Symbol(tag)", "Symbol(meta)"]].concat()
        );

        host.unmount("demo", false).unwrap();
        assert_eq!(host.scope_keys("demo").unwrap(), baseline);

        // Writes while stopped have no effect
        let late = host.state.borrow().apps["demo"]
            .sandbox
            .bind_scope("window[Symbol.for('late')] = 1; window.late = 1;");
        host.engine().unwrap().execute("demo", &late).unwrap();
        assert_eq!(host.scope_keys("demo").unwrap(), baseline);
        assert_eq!(host.read_global("late").unwrap(), None);
    }
}
