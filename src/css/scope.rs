use std::sync::LazyLock;

use regex::Regex;

use super::parser::{parse_stylesheet, CssRule};

/// Selectors that target the document root as a whole.
static ROOT_SELECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((html[\s>~,]+body)|(html|body|:root))$").expect("valid root selector regex")
});

/// A comma branch that starts with a root token, optionally qualified or
/// followed by a combinator. Group 1 captures whatever follows the token.
static ROOT_BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:html[\s>~+]+body|html|body|:root)(?:$|([\s>~+\[.#:].*))")
        .expect("valid root branch regex")
});

/// Rewrites stylesheets so their rules only match inside one application's
/// container element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleScope {
    prefix: String,
}

impl StyleScope {
    /// Scope for the container `<tag name="name">`.
    pub fn for_app(container_tag: &str, name: &str) -> Self {
        let value = if is_css_ident(name) {
            name.to_string()
        } else {
            format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
        };
        Self {
            prefix: format!("{container_tag}[name={value}]"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse and scope a full stylesheet.
    pub fn scope_stylesheet(&self, text: &str) -> String {
        self.scope_rules(&parse_stylesheet(text))
    }

    pub fn scope_rules(&self, rules: &[CssRule]) -> String {
        let mut out = String::new();
        for rule in rules {
            let emitted = match rule {
                CssRule::Style {
                    selector,
                    declarations,
                } => {
                    let selector = self.scope_selector(selector);
                    if declarations.is_empty() {
                        format!("{selector} {{}}")
                    } else {
                        format!("{selector} {{ {declarations} }}")
                    }
                }
                CssRule::Group {
                    keyword,
                    condition,
                    rules,
                } => {
                    let inner = self.scope_rules(rules);
                    if condition.is_empty() {
                        format!("@{keyword} {{{inner}}}")
                    } else {
                        format!("@{keyword} {condition} {{{inner}}}")
                    }
                }
                CssRule::Verbatim(text) => text.clone(),
            };
            out.push_str(&emitted);
        }
        out
    }

    /// Rewrite one selector list.
    pub fn scope_selector(&self, selector: &str) -> String {
        let selector = selector.trim();
        if selector == "*" {
            return format!("{} *", self.prefix);
        }
        if ROOT_SELECTOR.is_match(selector) {
            return self.prefix.clone();
        }
        split_selector_list(selector)
            .iter()
            .map(|branch| self.scope_branch(branch.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn scope_branch(&self, branch: &str) -> String {
        match ROOT_BRANCH.captures(branch) {
            Some(caps) => match caps.get(1) {
                Some(rest) => format!("{}{}", self.prefix, rest.as_str()),
                None => self.prefix.clone(),
            },
            None => format!("{} {}", self.prefix, branch),
        }
    }
}

/// Split on top-level commas, ignoring those inside brackets, parentheses
/// or strings.
fn split_selector_list(selector: &str) -> Vec<&str> {
    let mut branches = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in selector.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                branches.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    branches.push(&selector[start..]);
    branches
}

fn is_css_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '-' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> StyleScope {
        StyleScope::for_app("micro-app", "demo")
    }

    #[test]
    fn test_prefix_quotes_non_identifiers() {
        assert_eq!(demo().prefix(), "micro-app[name=demo]");
        assert_eq!(
            StyleScope::for_app("micro-app", "my app").prefix(),
            "micro-app[name=\"my app\"]"
        );
        assert_eq!(
            StyleScope::for_app("micro-app", "1st").prefix(),
            "micro-app[name=\"1st\"]"
        );
    }

    #[test]
    fn test_plain_selectors_are_prefixed() {
        let scope = demo();
        assert_eq!(scope.scope_selector(".a"), "micro-app[name=demo] .a");
        assert_eq!(
            scope.scope_selector("h1, .title > span"),
            "micro-app[name=demo] h1, micro-app[name=demo] .title > span"
        );
        assert_eq!(
            scope.scope_selector("a[title=\"x,y\"], :is(b, c)"),
            "micro-app[name=demo] a[title=\"x,y\"], micro-app[name=demo] :is(b, c)"
        );
    }

    #[test]
    fn test_universal_selector() {
        assert_eq!(demo().scope_selector("*"), "micro-app[name=demo] *");
    }

    #[test]
    fn test_root_selectors_are_replaced() {
        let scope = demo();
        for selector in ["html", "body", ":root", "html body", "html > body", "html,body"] {
            assert_eq!(scope.scope_selector(selector), "micro-app[name=demo]", "{selector}");
        }
    }

    #[test]
    fn test_qualified_root_branches() {
        let scope = demo();
        assert_eq!(
            scope.scope_selector("body.dark .a"),
            "micro-app[name=demo].dark .a"
        );
        assert_eq!(
            scope.scope_selector(".x, html[lang=en] p, body > div"),
            "micro-app[name=demo] .x, micro-app[name=demo][lang=en] p, micro-app[name=demo] > div"
        );
        // Tags that merely start with a root name are ordinary selectors
        assert_eq!(scope.scope_selector("bodyguard"), "micro-app[name=demo] bodyguard");
    }

    #[test]
    fn test_groups_are_scoped_recursively() {
        let out = demo().scope_stylesheet(
            "@media (max-width: 600px) { .a { color: red } @supports (display: grid) { body { display: grid } } }",
        );
        assert_eq!(
            out,
            "@media (max-width: 600px) {micro-app[name=demo] .a { color: red }@supports (display: grid) {micro-app[name=demo] { display: grid }}}"
        );
    }

    #[test]
    fn test_unscopable_rules_are_verbatim() {
        let css = "@font-face { font-family: x }@keyframes spin { to { top: 0 } }";
        assert_eq!(demo().scope_stylesheet(css), css);
    }

    #[test]
    fn test_malformed_rule_passes_through() {
        let out = demo().scope_stylesheet(".ok { a: b } .broken { color: red");
        assert_eq!(out, "micro-app[name=demo] .ok { a: b }.broken { color: red");
    }

    #[test]
    fn test_every_style_rule_carries_prefix() {
        let css = "p{margin:0} ul li, ol li {} @media print { .no-print { display: none } }";
        let out = demo().scope_stylesheet(css);
        for rule in parse_stylesheet(&out) {
            if let CssRule::Style { selector, .. } = rule {
                for branch in split_selector_list(&selector) {
                    assert!(branch.trim().starts_with("micro-app[name=demo]"), "{branch}");
                }
            }
        }
    }

    #[test]
    fn test_two_apps_get_distinct_prefixes() {
        let css = "html { color: red } .btn { padding: 0 }";
        let a = StyleScope::for_app("micro-app", "alpha").scope_stylesheet(css);
        let b = StyleScope::for_app("micro-app", "beta").scope_stylesheet(css);
        assert_ne!(a, b);
        assert!(a.contains("[name=alpha]") && !a.contains("[name=beta]"));
        assert!(b.contains("[name=beta]") && !b.contains("[name=alpha]"));
    }
}
