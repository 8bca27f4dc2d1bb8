//! Resource loading pipeline for one application instance.
//!
//! Fetches the markup, extracts it into a detached fragment and resource
//! tables, then resolves the link and script tables concurrently. Each table
//! reports completion to the host separately, which mounts on the second.
//!
//! Guarantees:
//! - Extraction completes before either table is fetched
//! - Fetches within a table run concurrently and complete all-or-error
//! - A failed table never reports completion; nothing is retried
//! - Completions for an unmounted or replaced instance never mount

use crate::app::App;
use crate::dom::NodeId;
use crate::error::{HostError, Result};
use crate::fetch::SourceFetcher;
use crate::host::Host;
use crate::markup::MarkupExtractor;
use crate::state::HostState;
use futures::future::try_join_all;
use tracing::{debug, error};
use url::Url;

/// Drive instance `instance` of `name` from fetch to mount.
pub(crate) async fn load(host: Host, name: String, instance: u64) -> Result<()> {
    let (url, base_url, cached) = {
        let state = host.state.borrow();
        let Some(app) = current(&state, &name, instance) else {
            return Ok(());
        };
        (app.url.clone(), app.base_url.clone(), app.source.html)
    };

    if let Some(fragment) = cached {
        debug!(app = %name, "mounting from cached source");
        host.on_load(&name, instance, fragment)?;
        return host.on_load(&name, instance, fragment);
    }

    let html = host.fetcher.fetch_text(&url).await.map_err(|err| {
        error!(app = %name, url = %url, error = %err, "failed to fetch markup");
        err
    })?;

    let extractor = host.extractor(&name, &base_url);
    let extracted = {
        let mut guard = host.state.borrow_mut();
        let state = &mut *guard;
        match state.apps.get_mut(&name) {
            Some(app) if app.instance() == instance => {
                let fragment = extractor.extract(&mut state.document, &html, &mut app.source);
                let links = app.source.links.keys();
                let scripts: Vec<String> = app
                    .source
                    .scripts
                    .iter()
                    .filter(|entry| entry.is_external)
                    .map(|entry| entry.key.clone())
                    .collect();
                Some((fragment, links, scripts))
            }
            _ => None,
        }
    };
    let Some((fragment, links, scripts)) = extracted else {
        return Ok(());
    };
    debug!(app = %name, links = links.len(), scripts = scripts.len(), "markup extracted");

    let (links, scripts) = futures::join!(
        load_links(&host, &name, instance, fragment, &extractor, &base_url, links),
        load_scripts(&host, &name, instance, fragment, &base_url, scripts),
    );
    links.and(scripts)
}

fn current<'a>(state: &'a HostState, name: &str, instance: u64) -> Option<&'a App> {
    state
        .apps
        .get(name)
        .filter(|app| app.instance() == instance)
}

/// Request URL for a table key. Protocol-relative keys take the scheme of
/// the application's base URL, falling back to https.
fn request_url(key: &str, base_url: &str) -> String {
    if !key.starts_with("//") {
        return key.to_string();
    }
    match Url::parse(base_url) {
        Ok(base) => format!("{}:{}", base.scheme(), key),
        Err(_) => format!("https:{key}"),
    }
}

/// Fetch every key of a table; results stay keyed by table key.
async fn fetch_all(
    fetcher: &dyn SourceFetcher,
    base_url: &str,
    keys: Vec<String>,
) -> Result<Vec<(String, String)>> {
    try_join_all(keys.into_iter().map(|key| async move {
        let text = fetcher.fetch_text(&request_url(&key, base_url)).await?;
        Ok::<_, HostError>((key, text))
    }))
    .await
}

async fn load_links(
    host: &Host,
    name: &str,
    instance: u64,
    fragment: NodeId,
    extractor: &MarkupExtractor,
    base_url: &str,
    urls: Vec<String>,
) -> Result<()> {
    let fetched = fetch_all(&*host.fetcher, base_url, urls).await.map_err(|err| {
        error!(app = %name, error = %err, "failed to fetch stylesheets");
        err
    })?;

    {
        let mut guard = host.state.borrow_mut();
        let state = &mut *guard;
        let Some(app) = state
            .apps
            .get_mut(name)
            .filter(|app| app.instance() == instance)
        else {
            return Ok(());
        };
        for (url, css) in fetched {
            extractor.insert_stylesheet(&mut state.document, fragment, &css);
            if let Some(entry) = app.source.links.get_mut(&url) {
                entry.code = css;
            }
        }
    }

    host.on_load(name, instance, fragment)
}

async fn load_scripts(
    host: &Host,
    name: &str,
    instance: u64,
    fragment: NodeId,
    base_url: &str,
    urls: Vec<String>,
) -> Result<()> {
    let fetched = fetch_all(&*host.fetcher, base_url, urls).await.map_err(|err| {
        error!(app = %name, error = %err, "failed to fetch scripts");
        err
    })?;

    {
        let mut state = host.state.borrow_mut();
        let Some(app) = state
            .apps
            .get_mut(name)
            .filter(|app| app.instance() == instance)
        else {
            return Ok(());
        };
        // Inline entries already carry their code
        for (url, code) in fetched {
            if let Some(entry) = app.source.scripts.get_mut(&url) {
                entry.code = code;
            }
        }
    }

    host.on_load(name, instance, fragment)
}
