//! # lookout
//!
//! Inspector protocol server binary: loads settings and documents, then
//! serves the WebSocket endpoint until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lookout_inspector::ContentWindow;
use lookout_inspector::memory::{DocumentSpec, MemoryWindow};
use lookout_server::LookoutServer;
use lookout_settings::LookoutSettings;
use tracing::{info, warn};

/// Lookout inspector server.
#[derive(Parser, Debug)]
#[command(name = "lookout", about = "Remote inspector protocol server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve documents over WebSocket.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// JSON document to offer as a tab (repeatable). A sample page is served
    /// when none is given.
    #[arg(long = "document", value_name = "PATH")]
    documents: Vec<PathBuf>,

    /// Settings file (defaults to `~/.lookout/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level used when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl ServeArgs {
    fn settings_file(&self) -> PathBuf {
        self.settings.clone().unwrap_or_else(lookout_settings::settings_path)
    }

    /// Subscriber level: `--log-level`, then `LOOKOUT_LOG_LEVEL`, then the file.
    fn log_level(
        &self,
        file: &LookoutSettings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> String {
        self.log_level
            .clone()
            .or_else(|| lookup("LOOKOUT_LOG_LEVEL").filter(|v| !v.is_empty()))
            .unwrap_or_else(|| file.logging.level.clone())
    }

    /// Layer `LOOKOUT_*` variables and then the flags over the file settings.
    fn finish_settings(
        &self,
        mut settings: LookoutSettings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> LookoutSettings {
        lookout_settings::apply_env_overrides(&mut settings, lookup);
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings
    }

    fn load_documents(&self) -> Result<Vec<Arc<dyn ContentWindow>>> {
        if self.documents.is_empty() {
            warn!("no --document given, serving the built-in sample page");
            let sample: Arc<dyn ContentWindow> =
                Arc::new(MemoryWindow::from_spec(&DocumentSpec::sample()));
            return Ok(vec![sample]);
        }
        self.documents
            .iter()
            .map(|path| {
                let spec = DocumentSpec::from_file(path)
                    .with_context(|| format!("Failed to read document {}", path.display()))?;
                info!(path = %path.display(), url = %spec.url, "document loaded");
                Ok(Arc::new(MemoryWindow::from_spec(&spec)) as Arc<dyn ContentWindow>)
            })
            .collect()
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let path = args.settings_file();
    let file = lookout_settings::load_settings_file(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    let env = |name: &str| std::env::var(name).ok();
    lookout_core::logging::init_subscriber(&args.log_level(&file, env));
    let settings = args.finish_settings(file, env);
    let documents = args.load_documents()?;

    let server = LookoutServer::new(settings, documents);
    let listener = server.bind().await.context("Failed to bind listener")?;

    let shutdown = server.shutdown_token();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
        }
        shutdown.cancel();
    });

    server.serve(listener).await.context("Server error")?;
    info!("lookout server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
    }
}
