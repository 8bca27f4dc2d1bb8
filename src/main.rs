//! Micro-app host CLI
//!
//! Loads one child application into a headless host page, mounts it and
//! prints the mounted container markup to stdout. Child console output and
//! host logs go to stderr.
//!
//!   microapp-host <name> <url> [--config host.json] [--base-url URL] [--data JSON]
//!
//! Examples:
//!   microapp-host demo https://apps.example.com/demo/index.html
//!   microapp-host demo file:///srv/apps/demo/index.html --data '{"user":"ann"}'
//!   RUST_LOG=microapp_host=debug microapp-host demo http://localhost:3000/

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use microapp_host::{Host, HostConfig, HttpFetcher};
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "microapp-host", version, about = "Mount a micro-frontend in a headless host page")]
struct Cli {
    /// Application name (container `name` attribute)
    name: String,

    /// URL of the application's HTML entry (http, https or file)
    url: String,

    /// JSON host configuration file
    #[arg(long, env = "MICROAPP_HOST_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL for relative resources (defaults to the entry's directory)
    #[arg(long)]
    base_url: Option<String>,

    /// JSON object sent to the application after it mounts
    #[arg(long)]
    data: Option<String>,

    /// Origins the fetcher may contact (repeatable; overrides the config file)
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,

    /// Maximum time a single child script may run, in milliseconds
    #[arg(long)]
    script_timeout_ms: Option<u64>,

    /// Unmount and destroy the application before exiting
    #[arg(long)]
    destroy: bool,
}

impl Cli {
    fn host_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::from_file(path)
                .with_context(|| format!("Invalid config '{}'", path.display()))?,
            None => HostConfig::default(),
        };
        if !self.allow_origins.is_empty() {
            config.fetch.allowed_origins = Some(self.allow_origins.clone());
        }
        if self.script_timeout_ms.is_some() {
            config.script_timeout_ms = self.script_timeout_ms;
        }
        Ok(config)
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.host_config()?;
    let fetcher = HttpFetcher::new(config.fetch.clone())?;
    let host = Host::new(config, Rc::new(fetcher))?;

    let container = host.create_container(&cli.name, &cli.url);
    if let Some(base_url) = &cli.base_url {
        host.set_attribute(container, "baseurl", base_url.as_str())?;
    }

    host.connect(container)?.await?;

    if let Some(data) = &cli.data {
        let data: serde_json::Value =
            serde_json::from_str(data).map_err(|e| anyhow!("Invalid data JSON: {}", e))?;
        host.set_attribute(container, "data", data)?;
    }

    // Print captured console output to stderr
    let console = host.take_console()?;
    for log in &console.logs {
        eprintln!("[LOG] {}", log);
    }
    for warn in &console.warns {
        eprintln!("[WARN] {}", warn);
    }
    for err in &console.errors {
        eprintln!("[ERROR] {}", err);
    }

    // Print mounted markup to stdout
    println!("{}", host.outer_html(container));

    if cli.destroy {
        host.set_attribute(container, "destroy", "")?;
        host.disconnect(container)?;
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Single isolate, single thread: everything runs on the current thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}
