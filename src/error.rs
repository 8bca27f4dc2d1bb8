//! Error type shared by the host, the resource pipeline and the engine glue.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    /// Network or file retrieval failed for one resource.
    #[error("failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    /// Lifecycle call for a name that was never registered.
    #[error("no application registered under '{0}'")]
    UnknownApp(String),

    #[error("application '{0}' is already loading or mounted")]
    DuplicateApp(String),

    #[error("container element is missing the '{attribute}' attribute")]
    MissingAttribute { attribute: &'static str },

    #[error("node is not a container element")]
    NotAContainer,

    #[error("invalid data payload: {0}")]
    InvalidData(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("script engine error: {0}")]
    Engine(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HostError {
    pub fn fetch(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }
}
