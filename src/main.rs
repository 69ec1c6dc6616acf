//! index-mcp server entry point.
//!
//! Starts the MCP stdio server and, with `--watch`, a debounced filesystem
//! watcher that keeps the index fresh through incremental ingests. The
//! process reads no positional arguments; stdout belongs to the protocol and
//! diagnostics go to stderr or a log file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use index_mcp::config::{IngestOptions, DEFAULT_DATABASE_NAME};
use index_mcp::embedding::Embedder;
use index_mcp::mcp::serve_stdio;
use index_mcp::tools::ToolContext;
use index_mcp::watch::{run_watcher, WatchOptions, DEFAULT_DEBOUNCE_MS};

#[derive(Parser)]
#[command(
    name = "index-mcp",
    about = "Local code-indexing MCP server: incremental ingest, semantic search, context bundles, and a symbol graph over SQLite",
    version
)]
struct Cli {
    /// Watch the workspace and re-ingest on change
    #[arg(long)]
    watch: bool,

    /// Root to watch (defaults to the current directory)
    #[arg(long, value_name = "path")]
    watch_root: Option<PathBuf>,

    /// Debounce window for change events, in milliseconds
    #[arg(long, value_name = "ms")]
    watch_debounce: Option<u64>,

    /// Skip the initial full ingest at watcher start-up
    #[arg(long)]
    watch_no_initial: bool,

    /// Suppress per-ingest watcher logs
    #[arg(long)]
    watch_quiet: bool,

    /// Database file name used by watcher ingests
    #[arg(long, value_name = "name")]
    watch_database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let embedder = Arc::new(Embedder::new());
    let ctx = ToolContext {
        embedder: embedder.clone(),
    };

    if cli.watch {
        let root = match cli.watch_root.clone() {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let options = WatchOptions {
            root,
            debounce_ms: cli.watch_debounce.unwrap_or(DEFAULT_DEBOUNCE_MS),
            run_initial: !cli.watch_no_initial,
            quiet: cli.watch_quiet,
            ingest: IngestOptions {
                database_name: cli
                    .watch_database
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
                ..Default::default()
            },
        };
        let watch_embedder = embedder.clone();
        tokio::spawn(async move {
            if let Err(err) = run_watcher(watch_embedder, options).await {
                tracing::error!(error = %err, "watcher stopped");
            }
        });
    }

    serve_stdio(ctx).await?;

    // Release embedding pipelines before exit.
    embedder.clear().await;
    Ok(())
}

/// Wire up tracing: stderr console (stdout is the protocol channel) plus an
/// optional log file under `INDEX_MCP_LOG_DIR` / `INDEX_MCP_LOG_FILE`.
fn init_logging() {
    let level = std::env::var("INDEX_MCP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_enabled = std::env::var("INDEX_MCP_LOG_CONSOLE")
        .map(|v| v.trim() != "false")
        .unwrap_or(true);
    if std::env::var("INDEX_MCP_LOG_CONSOLE_STREAM").as_deref() == Ok("stdout") {
        // Stdout carries protocol frames while serving; the request cannot be
        // honored here, so diagnostics stay on stderr.
        eprintln!("index-mcp: INDEX_MCP_LOG_CONSOLE_STREAM=stdout ignored in serve mode");
    }

    let console_layer = console_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(false)
    });

    let log_path = std::env::var("INDEX_MCP_LOG_FILE").ok().map(PathBuf::from).or_else(|| {
        std::env::var("INDEX_MCP_LOG_DIR")
            .ok()
            .map(|dir| PathBuf::from(dir).join("index-mcp.log"))
    });
    let file_layer = log_path.and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
            .map(|file| {
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
            })
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
