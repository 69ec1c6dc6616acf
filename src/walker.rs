//! Workspace walker with gitignore semantics.
//!
//! Yields candidate files under a root honoring include/exclude globs and
//! `.gitignore` rules (repo-local and nested, negations respected). `.git/`
//! never appears in the output. Ordering is lexicographic by posix path so
//! ingests are deterministic.

use std::path::{Path, PathBuf};

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use crate::error::{IndexMcpError, Result, SkipReason, SkippedFile};
use crate::resolve::to_posix;

/// Exclude globs applied to every walk, before caller excludes.
pub const DEFAULT_EXCLUDE_GLOBS: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/coverage/**",
];

/// A file the walker selected for the ingest pipeline.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// Workspace-relative posix path.
    pub path: String,
    pub absolute: PathBuf,
    pub size: u64,
    /// Modification time, milliseconds since epoch.
    pub modified_ms: i64,
}

/// Walk parameters. `include` empty means `**/*`; `exclude` is merged with
/// [`DEFAULT_EXCLUDE_GLOBS`] and the database-file siblings by the caller.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size_bytes: u64,
}

/// Output of one walk: candidates in deterministic order plus per-file skips.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<WalkedFile>,
    pub skipped: Vec<SkippedFile>,
}

pub fn walk_workspace(root: &Path, options: &WalkOptions) -> Result<WalkOutcome> {
    let default_include = ["**/*".to_string()];
    let include_set = build_globset(if options.include.is_empty() {
        &default_include
    } else {
        &options.include[..]
    })?;

    let mut exclude_patterns: Vec<String> = DEFAULT_EXCLUDE_GLOBS
        .iter()
        .map(|s| s.to_string())
        .collect();
    exclude_patterns.extend(options.exclude.iter().cloned());
    let exclude_set = build_globset(&exclude_patterns)?;

    let walker = WalkBuilder::new(root)
        .follow_links(false)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name().to_str() != Some(".git"))
        .build();

    let mut outcome = WalkOutcome::default();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "walker entry error");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_posix = to_posix(rel);

        if exclude_set.is_match(&rel_posix) || !include_set.is_match(&rel_posix) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                outcome.skipped.push(SkippedFile {
                    path: rel_posix,
                    reason: SkipReason::ReadError,
                    size: None,
                    message: Some(err.to_string()),
                });
                continue;
            }
        };

        let size = metadata.len();
        if size > options.max_file_size_bytes {
            outcome.skipped.push(SkippedFile {
                path: rel_posix,
                reason: SkipReason::FileTooLarge,
                size: Some(size),
                message: None,
            });
            continue;
        }

        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        outcome.files.push(WalkedFile {
            path: rel_posix,
            absolute: entry.path().to_path_buf(),
            size,
            modified_ms,
        });
    }

    outcome.files.sort_by(|a, b| a.path.cmp(&b.path));
    outcome.skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(outcome)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("invalid glob pattern {pattern:?}"))
            .map_err(|e| IndexMcpError::invalid_input(e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .context("building glob set")
        .map_err(IndexMcpError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> WalkOptions {
        WalkOptions {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn walk_is_sorted_and_relative() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("zeta.txt"), "z").unwrap();
        fs::write(tmp.path().join("src/alpha.ts"), "a").unwrap();

        let outcome = walk_workspace(tmp.path(), &options()).unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/alpha.ts", "zeta.txt"]);
    }

    #[test]
    fn gitignore_rules_apply_with_negation() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "*.log\n!keep.log\n").unwrap();
        fs::write(tmp.path().join("debug.log"), "x").unwrap();
        fs::write(tmp.path().join("keep.log"), "x").unwrap();
        fs::write(tmp.path().join("main.rs"), "x").unwrap();

        let outcome = walk_workspace(tmp.path(), &options()).unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"keep.log"));
        assert!(paths.contains(&"main.rs"));
        assert!(!paths.contains(&"debug.log"));
    }

    #[test]
    fn nested_gitignore_applies_to_subtree() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/.gitignore"), "secret.txt\n").unwrap();
        fs::write(tmp.path().join("sub/secret.txt"), "x").unwrap();
        fs::write(tmp.path().join("secret.txt"), "x").unwrap();

        let outcome = walk_workspace(tmp.path(), &options()).unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"secret.txt"));
        assert!(!paths.contains(&"sub/secret.txt"));
    }

    #[test]
    fn oversized_files_are_skipped_with_reason() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("big.bin"), vec![b'x'; 64]).unwrap();
        let outcome = walk_workspace(
            tmp.path(),
            &WalkOptions {
                max_file_size_bytes: 16,
                ..options()
            },
        )
        .unwrap();
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::FileTooLarge);
        assert_eq!(outcome.skipped[0].size, Some(64));
    }

    #[test]
    fn default_excludes_hide_node_modules() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(tmp.path().join("app.js"), "x").unwrap();

        let outcome = walk_workspace(tmp.path(), &options()).unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app.js"]);
    }

    #[test]
    fn include_globs_narrow_the_walk() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.ts"), "x").unwrap();
        fs::write(tmp.path().join("b.md"), "x").unwrap();
        let outcome = walk_workspace(
            tmp.path(),
            &WalkOptions {
                include: vec!["**/*.ts".to_string()],
                ..options()
            },
        )
        .unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.ts"]);
    }
}
