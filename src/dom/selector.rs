//! The selector subset used by `querySelector` on the host page: type,
//! universal, id, class and attribute selectors, combined with descendant
//! and child combinators, in comma-separated lists.

use super::{Document, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList(Vec<ComplexSelector>);

#[derive(Debug, Clone, PartialEq)]
struct ComplexSelector {
    /// Rightmost compound first.
    parts: Vec<(Compound, Combinator)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    /// Relation to the compound on the left; unused for the leftmost.
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Option<Self> {
        let mut list = Vec::new();
        for branch in input.split(',') {
            list.push(ComplexSelector::parse(branch.trim())?);
        }
        Some(Self(list))
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.0.iter().any(|selector| selector.matches(doc, node))
    }
}

impl ComplexSelector {
    fn parse(input: &str) -> Option<Self> {
        if input.is_empty() {
            return None;
        }

        let mut parts: Vec<(Compound, Combinator)> = Vec::new();
        let mut pending = Combinator::Descendant;
        let mut chars = input.chars().peekable();

        loop {
            let mut saw_space = false;
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
                saw_space = true;
            }
            let Some(&c) = chars.peek() else {
                break;
            };
            if c == '>' {
                if parts.is_empty() {
                    return None;
                }
                chars.next();
                pending = Combinator::Child;
                continue;
            }
            if matches!(c, '+' | '~' | ':') {
                return None;
            }
            if !parts.is_empty() && !saw_space && pending != Combinator::Child {
                return None;
            }

            let compound = Compound::parse(&mut chars)?;
            parts.push((compound, pending));
            pending = Combinator::Descendant;
        }

        if parts.is_empty() || pending == Combinator::Child {
            return None;
        }

        // Store right-to-left; each entry keeps the combinator linking it to
        // the compound on its left.
        parts.reverse();
        Some(Self { parts })
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.match_from(doc, node, 0)
    }

    fn match_from(&self, doc: &Document, node: NodeId, index: usize) -> bool {
        let (compound, link) = &self.parts[index];
        if !compound.matches(doc, node) {
            return false;
        }
        if index + 1 == self.parts.len() {
            return true;
        }
        match link {
            Combinator::Child => doc
                .parent(node)
                .is_some_and(|parent| self.match_from(doc, parent, index + 1)),
            Combinator::Descendant => {
                let mut cursor = doc.parent(node);
                while let Some(ancestor) = cursor {
                    if self.match_from(doc, ancestor, index + 1) {
                        return true;
                    }
                    cursor = doc.parent(ancestor);
                }
                false
            }
        }
    }
}

impl Compound {
    fn parse(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<Self> {
        let mut compound = Compound::default();
        let mut any = false;

        if chars.peek() == Some(&'*') {
            chars.next();
            any = true;
        } else {
            let tag = take_ident(chars);
            if !tag.is_empty() {
                compound.tag = Some(tag.to_ascii_lowercase());
                any = true;
            }
        }

        while let Some(&c) = chars.peek() {
            match c {
                '#' => {
                    chars.next();
                    let id = take_ident(chars);
                    if id.is_empty() {
                        return None;
                    }
                    compound.id = Some(id);
                }
                '.' => {
                    chars.next();
                    let class = take_ident(chars);
                    if class.is_empty() {
                        return None;
                    }
                    compound.classes.push(class);
                }
                '[' => {
                    chars.next();
                    compound.attrs.push(parse_attribute(chars)?);
                }
                _ => break,
            }
            any = true;
        }

        any.then_some(compound)
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if !element.tag_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| element.has_class(class)) {
            return false;
        }
        self.attrs.iter().all(|(name, value)| match (element.attr(name), value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn parse_attribute(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Option<(String, Option<String>)> {
    let name = take_ident(chars);
    if name.is_empty() {
        return None;
    }
    match chars.next()? {
        ']' => Some((name, None)),
        '=' => {
            let value = match chars.peek() {
                Some(&quote) if quote == '"' || quote == '\'' => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        let c = chars.next()?;
                        if c == quote {
                            break;
                        }
                        value.push(c);
                    }
                    value
                }
                _ => take_ident(chars),
            };
            (chars.next()? == ']').then_some((name, Some(value)))
        }
        _ => None,
    }
}
