//! Style scoping for child applications.
//!
//! Stylesheets are parsed into a rule list first; scoping then rewrites the
//! selectors of every style rule, descending into conditional groups.

pub mod parser;
pub mod scope;

pub use parser::{parse_stylesheet, CssRule};
pub use scope::StyleScope;
