//! Resolution policy for property access on a virtual global scope.
//!
//! The policy never sees values. It only decides where a read, write,
//! existence check or deletion must be served from; the script engine
//! carries out the decision.

use crate::config::SandboxConfig;
use regex::Regex;
use std::sync::LazyLock;

/// Names that mean "the global object itself".
pub const SELF_NAMES: &[&str] = &["window", "self", "globalThis"];

/// Names that mean "the enclosing frame".
pub const FRAME_NAMES: &[&str] = &["top", "parent"];

/// Function sources that look like constructors keep their own receiver.
static CONSTRUCTOR_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(function\s+[A-Z]|class\s+)").expect("valid constructor regex")
});

/// Where a property read is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReadTarget {
    /// The sandboxed view of the global object.
    SandboxView = 0,
    /// The real global object, unmodified.
    RealGlobal = 1,
    /// An existence check that consults the virtual scope and the real global.
    ExistenceCheck = 2,
    /// The real document; marks the application as currently executing.
    Document = 3,
    /// The real code-evaluation capability; marks the application as
    /// currently executing.
    CodeEval = 4,
    /// The virtual scope's own entry.
    VirtualScope = 5,
    /// The real global object, with functions rebound to it.
    Fallback = 6,
}

impl ReadTarget {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether serving this read marks the calling application as the one
    /// currently executing.
    pub fn marks_current_app(self) -> bool {
        matches!(self, ReadTarget::Document | ReadTarget::CodeEval)
    }
}

/// Where a property write lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WriteTarget {
    /// The sandbox is inactive; the write has no effect.
    Ignored = 0,
    /// The key is escape-listed; the real global object receives the write.
    RealGlobal = 1,
    /// The virtual scope receives the write.
    VirtualScope = 2,
}

impl WriteTarget {
    pub fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone)]
pub struct ScopePolicy {
    escape_keys: Vec<String>,
    framed: bool,
}

impl ScopePolicy {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            escape_keys: config.escape_keys.clone(),
            framed: config.framed,
        }
    }

    /// Resolve a read of `key`; `on_virtual` tells whether the virtual scope
    /// currently holds the key.
    pub fn read(&self, key: &str, on_virtual: bool) -> ReadTarget {
        if SELF_NAMES.contains(&key) {
            return ReadTarget::SandboxView;
        }
        if FRAME_NAMES.contains(&key) {
            return if self.framed {
                ReadTarget::RealGlobal
            } else {
                ReadTarget::SandboxView
            };
        }
        match key {
            "hasOwnProperty" => ReadTarget::ExistenceCheck,
            "document" => ReadTarget::Document,
            "eval" => ReadTarget::CodeEval,
            _ if on_virtual => ReadTarget::VirtualScope,
            _ => ReadTarget::Fallback,
        }
    }

    pub fn write(&self, key: &str, active: bool) -> WriteTarget {
        if !active {
            WriteTarget::Ignored
        } else if self.escape_keys.iter().any(|escape| escape == key) {
            WriteTarget::RealGlobal
        } else {
            WriteTarget::VirtualScope
        }
    }
}

/// Whether a function read through to the real global object must be
/// rebound to it. Constructor-looking sources are returned untouched.
pub fn should_bind_receiver(function_source: &str) -> bool {
    !CONSTRUCTOR_SOURCE.is_match(function_source)
}
