//! Host configuration.
//!
//! Every field has a default so a config file only needs to name what it
//! overrides:
//!
//! ```json
//! {
//!   "container_tag": "micro-app",
//!   "sandbox": { "escape_keys": ["location", "history"] },
//!   "fetch": { "allowed_origins": ["https://apps.example.com"], "timeout_ms": 5000 }
//! }
//! ```

use crate::error::{HostError, Result};
use crate::fetch::FetchConfig;
use serde::Deserialize;
use std::path::Path;

/// Configuration for the whole host page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Tag name of container elements. Also names the renamed head/body
    /// regions (`<tag>-head`, `<tag>-body`) and the style scope prefix.
    pub container_tag: String,
    pub sandbox: SandboxConfig,
    pub fetch: FetchConfig,
    /// Maximum V8 heap size in bytes (None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time a single child script may run (None = unlimited)
    pub script_timeout_ms: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            container_tag: String::from("micro-app"),
            sandbox: SandboxConfig::default(),
            fetch: FetchConfig::default(),
            max_heap_size: Some(64 * 1024 * 1024),
            script_timeout_ms: Some(30_000),
        }
    }
}

impl HostConfig {
    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let tag = &self.container_tag;
        let valid = tag.contains('-')
            && tag
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(HostError::Config(format!(
                "container_tag '{}' is not a valid custom element name",
                tag
            )));
        }
        Ok(())
    }

    pub fn head_tag(&self) -> String {
        format!("{}-head", self.container_tag)
    }

    pub fn body_tag(&self) -> String {
        format!("{}-body", self.container_tag)
    }
}

/// Policy knobs for the execution sandbox.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Keys whose writes always go to the real global object.
    pub escape_keys: Vec<String>,
    /// Whether the host page itself is embedded in another frame. When it is,
    /// `top`/`parent` read through to the real values.
    pub framed: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            escape_keys: vec![String::from("location")],
            framed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.container_tag, "micro-app");
        assert_eq!(config.head_tag(), "micro-app-head");
        assert_eq!(config.body_tag(), "micro-app-body");
        assert_eq!(config.sandbox.escape_keys, vec!["location".to_string()]);
        assert!(config.fetch.allowed_origins.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sandbox": {{"escape_keys": ["location", "history"]}}, "script_timeout_ms": null}}"#
        )
        .unwrap();

        let config = HostConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sandbox.escape_keys.len(), 2);
        assert!(!config.sandbox.framed);
        assert_eq!(config.container_tag, "micro-app");
        assert_eq!(config.script_timeout_ms, None);
        assert_eq!(config.max_heap_size, Some(64 * 1024 * 1024));
    }

    #[test]
    fn test_rejects_invalid_container_tag() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"container_tag": "div"}}"#).unwrap();

        let err = HostConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("not a valid custom element name"));
    }
}
