//! Stylesheet rule-list parser.
//!
//! Produces the top-level rule structure of a stylesheet: style rules,
//! conditional group rules with their nested rule lists, and everything else
//! as verbatim text. Comments, strings, escapes and nested blocks are
//! respected when looking for rule boundaries. Malformed input never fails;
//! whatever cannot be structured is kept verbatim.

#[derive(Debug, Clone, PartialEq)]
pub enum CssRule {
    /// `selector { declarations }`
    Style { selector: String, declarations: String },
    /// `@media`, `@supports`, `@container`, `@layer` blocks.
    Group {
        keyword: String,
        condition: String,
        rules: Vec<CssRule>,
    },
    /// Any other rule, emitted unchanged.
    Verbatim(String),
}

/// At-rules whose block contains a nested rule list.
const GROUP_KEYWORDS: &[&str] = &["media", "supports", "container", "layer"];

pub fn parse_stylesheet(text: &str) -> Vec<CssRule> {
    let mut parser = Parser {
        src: text,
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.rule_list()
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rule_list(&mut self) -> Vec<CssRule> {
        let mut rules = Vec::new();
        loop {
            self.skip_trivia();
            if self.pos >= self.bytes.len() {
                break;
            }
            match self.bytes[self.pos] {
                // Stray closing brace at top level
                b'}' | b';' => self.pos += 1,
                b'@' => rules.push(self.at_rule()),
                _ => rules.push(self.qualified_rule()),
            }
        }
        rules
    }

    fn at_rule(&mut self) -> CssRule {
        let start = self.pos;
        self.pos += 1;
        let name_start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'-')
        {
            self.pos += 1;
        }
        let keyword = self.src[name_start..self.pos].to_ascii_lowercase();

        let prelude_start = self.pos;
        match self.scan_prelude() {
            Some(b';') => {
                self.pos += 1;
                CssRule::Verbatim(self.src[start..self.pos].trim().to_string())
            }
            Some(b'{') => {
                let condition = strip_comments(&self.src[prelude_start..self.pos]);
                let block_start = self.pos + 1;
                match self.find_block_end(block_start) {
                    Some(end) => {
                        self.pos = end + 1;
                        if GROUP_KEYWORDS.contains(&keyword.as_str()) {
                            let body = &self.src[block_start..end];
                            CssRule::Group {
                                keyword,
                                condition: condition.trim().to_string(),
                                rules: parse_stylesheet(body),
                            }
                        } else {
                            CssRule::Verbatim(self.src[start..self.pos].trim().to_string())
                        }
                    }
                    None => self.rest_verbatim(start),
                }
            }
            _ => self.rest_verbatim(start),
        }
    }

    fn qualified_rule(&mut self) -> CssRule {
        let start = self.pos;
        match self.scan_prelude() {
            Some(b'{') => {
                let selector = strip_comments(&self.src[start..self.pos]);
                let block_start = self.pos + 1;
                match self.find_block_end(block_start) {
                    Some(end) => {
                        self.pos = end + 1;
                        CssRule::Style {
                            selector: selector.trim().to_string(),
                            declarations: self.src[block_start..end].trim().to_string(),
                        }
                    }
                    None => self.rest_verbatim(start),
                }
            }
            // A qualified rule cannot end with ';'; keep the junk as-is
            Some(_) => {
                self.pos += 1;
                CssRule::Verbatim(self.src[start..self.pos].trim().to_string())
            }
            None => self.rest_verbatim(start),
        }
    }

    fn rest_verbatim(&mut self, start: usize) -> CssRule {
        self.pos = self.bytes.len();
        CssRule::Verbatim(self.src[start..].trim().to_string())
    }

    /// Advance to the first top-level `{`, `;` or `}` and return it without
    /// consuming it.
    fn scan_prelude(&mut self) -> Option<u8> {
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            match b {
                b'"' | b'\'' => {
                    self.pos = skip_string(self.bytes, self.pos);
                    continue;
                }
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    self.pos = skip_comment(self.bytes, self.pos);
                    continue;
                }
                b'\\' => {
                    self.pos += 2;
                    continue;
                }
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'{' | b';' | b'}' if depth == 0 => return Some(b),
                _ => {}
            }
            self.pos += 1;
        }
        self.pos = self.bytes.len();
        None
    }

    /// Index of the `}` closing a block whose content starts at `from`.
    fn find_block_end(&self, from: usize) -> Option<usize> {
        let mut depth = 1usize;
        let mut i = from;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'"' | b'\'' => {
                    i = skip_string(self.bytes, i);
                    continue;
                }
                b'/' if self.bytes.get(i + 1) == Some(&b'*') => {
                    i = skip_comment(self.bytes, i);
                    continue;
                }
                b'\\' => {
                    i += 2;
                    continue;
                }
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        None
    }

    fn skip_trivia(&mut self) {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.bytes[self.pos.min(self.bytes.len())..].starts_with(b"/*") {
                self.pos = skip_comment(self.bytes, self.pos);
            } else if self.bytes[self.pos.min(self.bytes.len())..].starts_with(b"<!--") {
                self.pos += 4;
            } else if self.bytes[self.pos.min(self.bytes.len())..].starts_with(b"-->") {
                self.pos += 3;
            } else {
                break;
            }
        }
    }
}

/// Position just past the string starting at `at`.
fn skip_string(bytes: &[u8], at: usize) -> usize {
    let quote = bytes[at];
    let mut i = at + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Position just past the comment starting at `at`.
fn skip_comment(bytes: &[u8], at: usize) -> usize {
    let mut i = at + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

fn strip_comments(text: &str) -> String {
    if !text.contains("/*") {
        return text.to_string();
    }
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.push_str(&text[copied..i]);
                i = skip_comment(bytes, i);
                copied = i;
            }
            _ => i += 1,
        }
    }
    out.push_str(&text[copied.min(text.len())..]);
    out
}
