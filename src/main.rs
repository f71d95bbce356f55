// feature-runtime/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::{Path, PathBuf}, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use feature_runtime::{
    Document, NodeSpec, Page, Runtime, RuntimeConfig, SettingsStore, TextHighlightFeature, TomlFileStore,
};

/// Extra wait after the debounce period before reading the document back.
const SETTLE: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "feature-runtime", version, about = "Run page features against a document")]
struct Args {
    /// Runtime config layered over the user config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select the first occurrence of a text and print the annotated document
    Highlight {
        /// Page as a JSON node list
        #[arg(long)]
        page: PathBuf,
        #[arg(long)]
        select: String,
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Reconcile on every settings change; each stdin line selects its text
    Watch {
        #[arg(long)]
        page: PathBuf,
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Print every feature with its settings and stats
    Features {
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Change one feature's settings and persist them
    Set {
        name: String,
        #[arg(long)]
        disable: bool,
        /// New value for a configurable feature
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Forget every stored setting
    Reset {
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = RuntimeConfig::load(args.config.as_deref())?;
    match args.command {
        Command::Highlight { page, select, settings } => highlight(config, &page, &select, settings).await,
        Command::Watch { page, settings } => watch(config, &page, settings).await,
        Command::Features { settings } => features(config, settings).await,
        Command::Set { name, disable, value, settings } => set(config, &name, !disable, value, settings).await,
        Command::Reset { settings } => reset(config, settings).await,
    }
}

async fn load_page(path: &Path) -> Result<Page> {
    let text = tokio::fs::read_to_string(path).await.with_context(|| format!("read {}", path.display()))?;
    let nodes: Vec<NodeSpec> = serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    let url = format!("file://{}", std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()).display());
    Ok(Page::new(url, Document::from_spec(&nodes)))
}

fn build_runtime(config: RuntimeConfig, page: Page) -> Result<Runtime> {
    let runtime = Runtime::new(config, page);
    runtime.register_feature(TextHighlightFeature::new)?;
    Ok(runtime)
}

fn open_store(path: Option<PathBuf>) -> Result<TomlFileStore> {
    let path = match path {
        Some(p) => p,
        None => TomlFileStore::default_path()?,
    };
    Ok(TomlFileStore::new(path))
}

fn render(page: &Page) -> String {
    let doc = page.document();
    doc.render(doc.root())
}

async fn highlight(config: RuntimeConfig, path: &Path, needle: &str, settings: Option<PathBuf>) -> Result<()> {
    let runtime = build_runtime(config, load_page(path).await?)?;
    match settings {
        Some(p) => {
            let snapshot = TomlFileStore::new(p).fetch().await?;
            runtime.reconcile(&snapshot, false).await;
        }
        None => runtime.run_all().await,
    }

    runtime.page().select_text(needle).with_context(|| format!("'{needle}' does not occur in the page"))?;
    tokio::time::sleep(runtime.config().debounce() + SETTLE).await;
    println!("{}", render(runtime.page()));
    runtime.shutdown().await;
    Ok(())
}

async fn watch(config: RuntimeConfig, path: &Path, settings: Option<PathBuf>) -> Result<()> {
    let runtime = build_runtime(config, load_page(path).await?)?;
    let store = open_store(settings)?;
    store.watch()?;
    let mut changes = store.subscribe();
    runtime.reconcile(&store.fetch().await?, false).await;
    let nav = runtime.watch_navigation(runtime.config().navigation_poll());
    info!(settings = %store.path().display(), "watching; type text to select it");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(snapshot) => {
                    let affected = runtime.reconcile(&snapshot, false).await;
                    info!(?affected, "settings applied");
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(missed = n, "settings events lagged; re-reading");
                    runtime.reconcile(&store.fetch().await?, false).await;
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.is_empty() {
                    runtime.page().set_selection(None);
                } else if runtime.page().select_text(&line).is_none() {
                    warn!(text = %line, "not found");
                    continue;
                }
                tokio::time::sleep(runtime.config().debounce() + SETTLE).await;
                println!("{}", render(runtime.page()));
            }
        }
    }

    nav.stop();
    runtime.shutdown().await;
    Ok(())
}

async fn features(config: RuntimeConfig, settings: Option<PathBuf>) -> Result<()> {
    let runtime = build_runtime(config, Page::new("about:blank", Document::new()))?;
    let store = open_store(settings)?;
    runtime.reconcile(&store.fetch().await?, true).await;
    println!("{}", serde_json::to_string_pretty(&runtime.descriptors())?);
    Ok(())
}

async fn set(
    config: RuntimeConfig,
    name: &str,
    enabled: bool,
    value: Option<String>,
    settings: Option<PathBuf>,
) -> Result<()> {
    let runtime = build_runtime(config, Page::new("about:blank", Document::new()))?;
    let store = open_store(settings)?;
    runtime.reconcile(&store.fetch().await?, true).await;
    let change = runtime.update_setting(name, enabled, value.as_deref()).await?;
    store.persist(&change).await?;
    info!(feature = name, path = %store.path().display(), "setting saved");
    Ok(())
}

async fn reset(config: RuntimeConfig, settings: Option<PathBuf>) -> Result<()> {
    let runtime = build_runtime(config, Page::new("about:blank", Document::new()))?;
    let store = open_store(settings)?;
    store.clear().await?;
    runtime.clear_settings().await;
    println!("{}", serde_json::to_string_pretty(&runtime.snapshot())?);
    Ok(())
}
