//! # Micro-app host
//!
//! A headless micro-frontend host built on deno_core. Child applications are
//! fetched, extracted and mounted into container elements of an in-memory
//! host page; their scripts run in one V8 isolate, each against its own
//! sandboxed view of the global object, and their styles are rewritten to
//! only match inside their own container.
//!
//! ## Isolation Guarantees
//!
//! - **Globals**: writes land on a per-application virtual scope; the real
//!   global object only sees configured escape keys
//! - **Styles**: every scopable rule is prefixed with `<tag>[name=<app>]`
//! - **Listeners**: window and data listeners a child registers are
//!   released when it unmounts
//! - **Queries**: document lookups issued by a child are confined to its
//!   container
//! - **No system access**: child code has no fs, net, env or module loading
//!
//! ## Usage
//!
//! ```rust,ignore
//! use microapp_host::{Host, HostConfig, HttpFetcher};
//! use std::rc::Rc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> microapp_host::Result<()> {
//!     let config = HostConfig::default();
//!     let fetcher = HttpFetcher::new(config.fetch.clone())?;
//!     let host = Host::new(config, Rc::new(fetcher))?;
//!
//!     let container = host.create_container("demo", "https://apps.example.com/demo/");
//!     host.connect(container)?.await?;
//!     host.set_data("demo", serde_json::json!({ "user": "ann" }))?;
//!
//!     println!("{}", host.outer_html(container));
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod css;
pub mod data;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod host;
mod loader;
pub mod markup;
mod ops;
pub mod runtime;
pub mod sandbox;
pub mod sanitize;
pub mod state;

pub use app::{App, AppStatus, ResourceEntry, ResourceTable};
pub use config::{HostConfig, SandboxConfig};
pub use css::StyleScope;
pub use error::{HostError, Result};
pub use fetch::{FetchConfig, HttpFetcher, SourceFetcher, StaticFetcher};
pub use host::{Host, LoadTask};
pub use markup::MarkupExtractor;
pub use ops::ConsoleOutput;
pub use runtime::{JsEngine, ScriptEngine};
pub use sandbox::{ExecutionSandbox, Teardown};
