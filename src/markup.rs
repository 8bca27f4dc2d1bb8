//! Child markup extraction.
//!
//! Turns an application's raw HTML into a detached fragment ready to be
//! mounted: the singleton head/body regions are renamed, stylesheet links
//! and scripts are moved out of the tree into the application's resource
//! tables, and inline styles are scoped in place.

use crate::app::{ResourceEntry, SourceTables};
use crate::css::StyleScope;
use crate::dom::parser::parse_fragment;
use crate::dom::{Document, NodeId};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static HEAD_REGION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<head(?:\s[^>]*)?>.*?</head\s*>").expect("valid head region regex")
});

static BODY_REGION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<body(?:\s[^>]*)?>.*?</body\s*>").expect("valid body region regex")
});

/// Script `type` values that denote classic scripts.
const JS_MIME_TYPES: &[&str] = &[
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "application/ecmascript",
    "text/ecmascript",
    "text/jscript",
];

/// Rename the first `<head>` and `<body>` regions to `head_tag` and
/// `body_tag`, so they survive fragment parsing and never collide with the
/// host page's own regions.
pub fn normalize_regions(html: &str, head_tag: &str, body_tag: &str) -> String {
    let html = rename_region(html, &HEAD_REGION, "head", head_tag);
    rename_region(&html, &BODY_REGION, "body", body_tag)
}

fn rename_region(html: &str, region: &Regex, tag: &str, renamed: &str) -> String {
    let Some(found) = region.find(html) else {
        return html.to_string();
    };
    let text = found.as_str();
    // The region starts with `<tag` and ends with `</tag ...>`
    let close = text.rfind("</").unwrap_or(text.len());
    let mut out = String::with_capacity(html.len() + 2 * renamed.len());
    out.push_str(&html[..found.start()]);
    out.push('<');
    out.push_str(renamed);
    out.push_str(&text[1 + tag.len()..close]);
    out.push_str("</");
    out.push_str(renamed);
    out.push_str(&text[close + 2 + tag.len()..]);
    out.push_str(&html[found.end()..]);
    out
}

/// Resolve a resource reference against an application's base URL.
/// Absolute and protocol-relative URLs pass through unchanged.
pub fn resolve_url(href: &str, base_url: &str) -> String {
    let href = href.trim();
    if href.starts_with("//") || Url::parse(href).is_ok() {
        return href.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => format!("{base_url}{href}"),
    }
}

/// Directory of an application URL, with a trailing slash. A last path
/// segment without an extension is treated as a directory.
pub fn base_url_of(app_url: &str) -> String {
    match Url::parse(app_url) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            let path = url.path().to_string();
            let last = path.rsplit('/').next().unwrap_or("");
            let dir = if last.contains('.') {
                path[..path.len() - last.len()].to_string()
            } else if path.ends_with('/') {
                path
            } else {
                format!("{path}/")
            };
            url.set_path(&dir);
            url.to_string()
        }
        Err(_) => match app_url.rfind('/') {
            Some(pos) => app_url[..=pos].to_string(),
            None => String::new(),
        },
    }
}

/// Per-application extraction settings.
#[derive(Debug, Clone)]
pub struct MarkupExtractor {
    head_tag: String,
    body_tag: String,
    base_url: String,
    scope: StyleScope,
}

impl MarkupExtractor {
    pub fn new(head_tag: &str, body_tag: &str, base_url: &str, scope: StyleScope) -> Self {
        Self {
            head_tag: head_tag.to_string(),
            body_tag: body_tag.to_string(),
            base_url: base_url.to_string(),
            scope,
        }
    }

    /// Parse `html` into a detached fragment and populate `tables` with the
    /// stylesheets and scripts it references.
    pub fn extract(&self, doc: &mut Document, html: &str, tables: &mut SourceTables) -> NodeId {
        let html = normalize_regions(html, &self.head_tag, &self.body_tag);
        let fragment = parse_fragment(doc, &html);
        self.extract_children(doc, fragment, tables);
        fragment
    }

    fn extract_children(&self, doc: &mut Document, parent: NodeId, tables: &mut SourceTables) {
        let children = doc.element_children(parent);
        for child in &children {
            self.extract_children(doc, *child, tables);
        }

        for child in children {
            let Some(tag) = doc.tag_name(child).map(str::to_string) else {
                continue;
            };
            match tag.as_str() {
                "link" => self.extract_link(doc, parent, child, tables),
                "script" => self.extract_script(doc, parent, child, tables),
                "style" => scope_style_element(doc, child, &self.scope),
                _ => {}
            }
        }
    }

    fn extract_link(
        &self,
        doc: &mut Document,
        parent: NodeId,
        link: NodeId,
        tables: &mut SourceTables,
    ) {
        let is_stylesheet = doc.get_attribute(link, "rel").is_some_and(|rel| {
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        });
        let href = doc.get_attribute(link, "href").unwrap_or("").trim().to_string();
        if !is_stylesheet || href.is_empty() {
            return;
        }

        let url = resolve_url(&href, &self.base_url);
        debug!(url = %url, "found stylesheet");
        tables.links.insert(ResourceEntry::external(url));
        doc.remove_child(parent, link);
    }

    fn extract_script(
        &self,
        doc: &mut Document,
        parent: NodeId,
        script: NodeId,
        tables: &mut SourceTables,
    ) {
        if let Some(kind) = doc.get_attribute(script, "type") {
            let kind = kind.trim();
            if !kind.is_empty() && !JS_MIME_TYPES.iter().any(|mime| kind.eq_ignore_ascii_case(mime)) {
                debug!(r#type = %kind, "leaving non-classic script in place");
                return;
            }
        }

        let src = doc.get_attribute(script, "src").unwrap_or("").trim().to_string();
        if !src.is_empty() {
            let url = resolve_url(&src, &self.base_url);
            debug!(url = %url, "found external script");
            tables.scripts.insert(ResourceEntry::external(url));
            doc.remove_child(parent, script);
            return;
        }

        let code = doc.text_content(script);
        if !code.is_empty() {
            let nonce = uuid::Uuid::new_v4().simple().to_string();
            debug!(nonce = %nonce, "found inline script");
            tables.scripts.insert(ResourceEntry::inline(nonce, code));
            doc.remove_child(parent, script);
        }
    }

    /// Scope fetched stylesheet text and append it as a `<style>` element to
    /// the fragment's head region, or to the fragment itself when the markup
    /// had no head.
    pub fn insert_stylesheet(&self, doc: &mut Document, fragment: NodeId, css: &str) {
        let target = doc.query_selector(fragment, &self.head_tag).unwrap_or(fragment);
        let style = doc.create_element("style");
        doc.set_text_content(style, &self.scope.scope_stylesheet(css));
        doc.append_child(target, style);
    }

    pub fn scope(&self) -> &StyleScope {
        &self.scope
    }
}

/// Scope a `<style>` element in place. An empty element is scoped the first
/// time content appears in it.
pub fn scope_style_element(doc: &mut Document, style: NodeId, scope: &StyleScope) {
    let text = doc.text_content(style);
    if !text.is_empty() {
        doc.set_text_content(style, &scope.scope_stylesheet(&text));
        return;
    }

    let scope = scope.clone();
    doc.observe_child_list_once(style, move |doc, node| {
        let text = doc.text_content(node);
        if !text.is_empty() {
            doc.set_text_content(node, &scope.scope_stylesheet(&text));
        }
    });
}

/// Register one-shot scoping observers on every empty `<style>` below
/// `root`. Used for mounted copies, since observers are not cloned.
pub fn observe_pending_styles(doc: &mut Document, root: NodeId, scope: &StyleScope) {
    for node in doc.descendants(root) {
        if doc.is_tag(node, "style") && doc.text_content(node).is_empty() && !doc.has_observer(node) {
            scope_style_element(doc, node, scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> MarkupExtractor {
        MarkupExtractor::new(
            "micro-app-head",
            "micro-app-body",
            "https://x/",
            StyleScope::for_app("micro-app", "demo"),
        )
    }

    #[test]
    fn test_normalize_regions() {
        let html = "<html><HEAD lang=\"en\"><title>t</title></HEAD><body class=\"b\"><header>h</header></body></html>";
        assert_eq!(
            normalize_regions(html, "micro-app-head", "micro-app-body"),
            "<html><micro-app-head lang=\"en\"><title>t</title></micro-app-head><micro-app-body class=\"b\"><header>h</header></micro-app-body></html>"
        );
    }

    #[test]
    fn test_normalize_ignores_header_tags() {
        let html = "<header>top</header><div>x</div>";
        assert_eq!(normalize_regions(html, "a-head", "a-body"), html);
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("a.css", "https://x/"), "https://x/a.css");
        assert_eq!(resolve_url("./js/app.js", "https://x/app/"), "https://x/app/js/app.js");
        assert_eq!(resolve_url("/root.css", "https://x/app/"), "https://x/root.css");
        assert_eq!(resolve_url("https://cdn/a.js", "https://x/"), "https://cdn/a.js");
        assert_eq!(resolve_url("//cdn/a.js", "https://x/"), "//cdn/a.js");
        assert_eq!(resolve_url("a.css", "assets/"), "assets/a.css");
    }

    #[test]
    fn test_base_url_of() {
        assert_eq!(base_url_of("https://x/app/index.html"), "https://x/app/");
        assert_eq!(base_url_of("https://x/app"), "https://x/app/");
        assert_eq!(base_url_of("https://x/app/?v=1"), "https://x/app/");
        assert_eq!(base_url_of("https://x"), "https://x/");
        assert_eq!(base_url_of("apps/demo/index.html"), "apps/demo/");
    }

    #[test]
    fn test_extract_demo_markup() {
        let mut doc = Document::new();
        let mut tables = SourceTables::default();
        let html = r#"<html><head><link rel="stylesheet" href="a.css"><link rel="icon" href="f.ico"></head><body><div id="app"></div><script>window.flag=1</script></body></html>"#;

        let fragment = extractor().extract(&mut doc, html, &mut tables);

        assert_eq!(tables.links.keys(), vec!["https://x/a.css"]);
        assert_eq!(tables.scripts.len(), 1);
        let script = tables.scripts.iter().next().unwrap();
        assert!(!script.is_external);
        assert_eq!(script.code, "window.flag=1");
        assert_eq!(script.key.len(), 32);

        assert_eq!(
            doc.inner_html(fragment),
            r#"<micro-app-head><link rel="icon" href="f.ico"></micro-app-head><micro-app-body><div id="app"></div></micro-app-body>"#
        );
    }

    #[test]
    fn test_nested_resources_are_found_in_order() {
        let mut doc = Document::new();
        let mut tables = SourceTables::default();
        let html = r#"<div><section><script src="/a.js"></script></section><script>b()</script></div><script src="c.js"></script>"#;

        let fragment = extractor().extract(&mut doc, html, &mut tables);

        let keys = tables.scripts.keys();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], "https://x/a.js");
        assert_eq!(tables.scripts.get(&keys[1]).unwrap().code, "b()");
        assert_eq!(keys[2], "https://x/c.js");
        assert!(doc.query_selector(fragment, "script").is_none());
    }

    #[test]
    fn test_non_classic_scripts_stay() {
        let mut doc = Document::new();
        let mut tables = SourceTables::default();
        let html = r#"<script type="text/template"><p>{{x}}</p></script><script type="text/javascript">go()</script><script></script>"#;

        let fragment = extractor().extract(&mut doc, html, &mut tables);

        assert_eq!(tables.scripts.len(), 1);
        assert_eq!(doc.query_selector_all(fragment, "script").len(), 2);
        assert!(doc.query_selector(fragment, "script[type=\"text/template\"]").is_some());
    }

    #[test]
    fn test_inline_styles_are_scoped() {
        let mut doc = Document::new();
        let mut tables = SourceTables::default();
        let fragment = extractor().extract(
            &mut doc,
            "<style>body { margin: 0 } .a { color: red }</style><style></style>",
            &mut tables,
        );

        let styles = doc.query_selector_all(fragment, "style");
        assert_eq!(
            doc.text_content(styles[0]),
            "micro-app[name=demo] { margin: 0 }micro-app[name=demo] .a { color: red }"
        );
        assert!(doc.has_observer(styles[1]));

        doc.set_text_content(styles[1], "p { top: 0 }");
        assert_eq!(doc.text_content(styles[1]), "micro-app[name=demo] p { top: 0 }");
        assert!(!doc.has_observer(styles[1]));

        // One-shot: later content is left alone
        doc.set_text_content(styles[1], "p { top: 1px }");
        assert_eq!(doc.text_content(styles[1]), "p { top: 1px }");
    }

    #[test]
    fn test_insert_stylesheet_targets_head_region() {
        let mut doc = Document::new();
        let mut tables = SourceTables::default();
        let extractor = extractor();
        let with_head = extractor.extract(&mut doc, "<head></head><body></body>", &mut tables);
        extractor.insert_stylesheet(&mut doc, with_head, ".a{b:c}");
        assert_eq!(
            doc.inner_html(with_head),
            "<micro-app-head><style>micro-app[name=demo] .a { b:c }</style></micro-app-head><micro-app-body></micro-app-body>"
        );

        let bare = extractor.extract(&mut doc, "<p>x</p>", &mut tables);
        extractor.insert_stylesheet(&mut doc, bare, ".a{b:c}");
        assert_eq!(
            doc.inner_html(bare),
            "<p>x</p><style>micro-app[name=demo] .a { b:c }</style>"
        );
    }

    #[test]
    fn test_observe_pending_styles_on_copies() {
        let mut doc = Document::new();
        let mut tables = SourceTables::default();
        let extractor = extractor();
        let fragment = extractor.extract(&mut doc, "<div><style></style></div>", &mut tables);
        let copy = doc.clone_subtree(fragment);
        let style = doc.query_selector(copy, "style").unwrap();
        assert!(!doc.has_observer(style));

        observe_pending_styles(&mut doc, copy, extractor.scope());
        doc.set_text_content(style, "html { x: y }");
        assert_eq!(doc.text_content(style), "micro-app[name=demo] { x: y }");
    }
}
