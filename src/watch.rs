//! Filesystem watcher driving incremental ingests.
//!
//! Change events are debounced by `notify-debouncer-mini`, translated to
//! workspace-relative paths, and fed to the ingest coordinator as explicit
//! `paths`. The loop awaits each ingest before draining the next batch, so
//! ingests are single-flight; events arriving mid-ingest queue in the
//! channel and trigger a trailing re-run with the accumulated paths.
//! Ingest errors are logged, never fatal.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebounceEventResult};

use crate::config::IngestOptions;
use crate::embedding::Embedder;
use crate::error::{IndexMcpError, Result};
use crate::ingest::{ingest_codebase, IngestRequest};
use crate::resolve::{to_posix, ResolveContext};
use crate::walker::DEFAULT_EXCLUDE_GLOBS;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const MIN_DEBOUNCE_MS: u64 = 50;

/// Watcher configuration, assembled from CLI flags.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub root: PathBuf,
    pub debounce_ms: u64,
    /// Run one full ingest before watching.
    pub run_initial: bool,
    /// Suppress per-ingest summary logs.
    pub quiet: bool,
    pub ingest: IngestOptions,
}

/// Watch `root` until the task is cancelled.
pub async fn run_watcher(embedder: Arc<Embedder>, options: WatchOptions) -> Result<()> {
    let debounce = Duration::from_millis(options.debounce_ms.max(MIN_DEBOUNCE_MS));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
        Ok(events) => {
            let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
            let _ = tx.send(paths);
        }
        Err(err) => tracing::warn!(error = %err, "watch error"),
    })
    .context("initializing filesystem watcher")
    .map_err(IndexMcpError::Internal)?;

    debouncer
        .watcher()
        .watch(&options.root, RecursiveMode::Recursive)
        .context("watching workspace root")
        .map_err(IndexMcpError::Internal)?;

    tracing::info!(root = %options.root.display(), debounce_ms = options.debounce_ms, "watcher started");

    if options.run_initial {
        run_ingest(&embedder, &options, Vec::new()).await;
    }

    let mut pending: BTreeSet<String> = BTreeSet::new();
    while let Some(paths) = rx.recv().await {
        collect_paths(&options, paths, &mut pending);
        // Drain whatever else is already queued so one ingest covers it.
        while let Ok(more) = rx.try_recv() {
            collect_paths(&options, more, &mut pending);
        }
        if pending.is_empty() {
            continue;
        }
        let batch: Vec<String> = std::mem::take(&mut pending).into_iter().collect();
        run_ingest(&embedder, &options, batch).await;
    }

    Ok(())
}

fn collect_paths(options: &WatchOptions, paths: Vec<PathBuf>, pending: &mut BTreeSet<String>) {
    for path in paths {
        let Ok(rel) = path.strip_prefix(&options.root) else {
            continue;
        };
        let rel = to_posix(rel);
        if should_track(&rel, &options.ingest.database_name) {
            pending.insert(rel);
        }
    }
}

/// Filter rule shared with the walker's defaults: never react to the
/// database file, its WAL siblings, or always-excluded directories.
pub fn should_track(rel: &str, database_name: &str) -> bool {
    if rel.is_empty() {
        return false;
    }
    if rel == database_name
        || rel == format!("{database_name}-wal")
        || rel == format!("{database_name}-shm")
    {
        return false;
    }
    let excluded_dirs: Vec<&str> = DEFAULT_EXCLUDE_GLOBS
        .iter()
        .filter_map(|g| g.strip_prefix("**/").and_then(|g| g.strip_suffix("/**")))
        .collect();
    !rel.split('/')
        .any(|segment| excluded_dirs.contains(&segment))
}

async fn run_ingest(embedder: &Embedder, options: &WatchOptions, paths: Vec<String>) {
    let scoped = !paths.is_empty();
    let request = IngestRequest {
        root: Some(options.root.display().to_string()),
        options: IngestOptions {
            paths,
            ..options.ingest.clone()
        },
        context: ResolveContext::from_process_env(),
        sanitizer: None,
    };

    match ingest_codebase(embedder, request).await {
        Ok(result) => {
            if !options.quiet {
                tracing::info!(
                    scoped,
                    files = result.ingested_file_count,
                    deleted = result.deleted_paths.len(),
                    skipped = result.skipped.len(),
                    duration_ms = result.duration_ms,
                    "watch ingest finished"
                );
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "watch ingest failed");
        }
    }
}
