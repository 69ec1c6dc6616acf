//! Workspace-root and changed-path resolution.
//!
//! Callers rarely hand us a clean absolute root: the hints arrive through
//! request metadata, transport headers, or the environment, in descending
//! order of trust. The resolver builds an ordered candidate list, expands
//! `~` and `file://` forms, and keeps only directories that exist.
//!
//! Changed-path hints flow through the same channels and are normalized to
//! workspace-relative posix paths. Entries that escape the root are dropped.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{IndexMcpError, Result};

/// Header keys that may carry the caller's working directory.
const HEADER_ROOT_KEYS: &[&str] = &[
    "x-mcp-cwd",
    "x-workspace-root",
    "x-codex-cwd",
    "x-client-cwd",
];

/// Environment variables that may carry the caller's working directory.
const ENV_ROOT_KEYS: &[&str] = &[
    "MCP_CALLER_CWD",
    "MCP_WORKSPACE_ROOT",
    "CODEX_CWD",
    "PWD",
    "INIT_CWD",
    "GITHUB_WORKSPACE",
];

/// Header keys that may carry a changed-path list.
const HEADER_PATH_KEYS: &[&str] = &["x-mcp-changed-paths", "x-changed-files"];

/// Environment variables that may carry a changed-path list.
const ENV_PATH_KEYS: &[&str] = &["MCP_CHANGED_PATHS", "CHANGED_FILES"];

/// Meta-key suffixes that mark a value as a directory hint.
const META_ROOT_SUFFIXES: &[&str] = &["cwd", "workspace", "project", "root", "path", "directory"];

/// Maximum depth when scanning nested request metadata.
const META_SCAN_DEPTH: usize = 4;

/// Hints available when resolving a root or a changed-path list.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Request metadata (`_meta` on the tool call), if any.
    pub meta: Option<serde_json::Value>,
    /// Transport headers, lowercased keys.
    pub headers: BTreeMap<String, String>,
    /// Environment snapshot; `None` reads the process environment.
    pub env: Option<BTreeMap<String, String>>,
}

impl ResolveContext {
    pub fn from_process_env() -> Self {
        Self::default()
    }

    fn env_var(&self, key: &str) -> Option<String> {
        match &self.env {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }

    fn header(&self, key: &str) -> Option<&String> {
        self.headers.get(key)
    }
}

/// Resolve the workspace root from an optional caller-supplied value plus
/// context hints.
///
/// - absolute `root`: must exist, returned as-is (canonicalized);
/// - relative `root`: resolved against the first valid base directory;
/// - missing/empty `root`: the first valid base directory wins.
pub fn resolve_workspace_root(root: Option<&str>, ctx: &ResolveContext) -> Result<PathBuf> {
    let root = root.map(str::trim).filter(|s| !s.is_empty());

    if let Some(raw) = root {
        let expanded = expand_path_hint(raw);
        if expanded.is_absolute() {
            return require_dir(&expanded);
        }
        let bases = candidate_bases(ctx);
        for base in &bases {
            let joined = base.join(&expanded);
            if joined.is_dir() {
                return require_dir(&joined);
            }
        }
        return Err(IndexMcpError::workspace_unavailable(format!(
            "relative root {raw:?} does not exist under any known base directory"
        )));
    }

    candidate_bases(ctx).into_iter().next().map_or_else(
        || {
            Err(IndexMcpError::workspace_unavailable(
                "no workspace root provided and no usable directory hint found \
                 in headers, environment, or request metadata"
                    .to_string(),
            ))
        },
        |base| require_dir(&base),
    )
}

/// Resolve the changed-path list for an incremental ingest.
///
/// Explicit entries pass through (trimmed, deduplicated). Otherwise the
/// metadata, headers, and environment are scanned for a list value. Every
/// entry is normalized to a workspace-relative posix path; entries escaping
/// the root are silently dropped.
pub fn resolve_ingest_paths(
    root: &Path,
    ctx: &ResolveContext,
    explicit: Option<&[String]>,
) -> Vec<String> {
    let raw: Vec<String> = match explicit {
        Some(paths) if !paths.is_empty() => paths
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => hinted_path_list(ctx),
    };

    let mut seen = std::collections::BTreeSet::new();
    let mut result = Vec::new();
    for entry in raw {
        if let Some(rel) = normalize_workspace_relative(root, &entry) {
            if seen.insert(rel.clone()) {
                result.push(rel);
            }
        }
    }
    result
}

/// Ordered base-directory candidates: headers, then env vars, then metadata.
/// Only existing directories survive.
fn candidate_bases(ctx: &ResolveContext) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut push = |candidate: PathBuf| {
        if candidate.is_dir() && !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    for key in HEADER_ROOT_KEYS {
        if let Some(value) = ctx.header(key) {
            push(expand_path_hint(value));
        }
    }
    for key in ENV_ROOT_KEYS {
        if let Some(value) = ctx.env_var(key) {
            if !value.trim().is_empty() {
                push(expand_path_hint(&value));
            }
        }
    }
    if let Some(meta) = &ctx.meta {
        for value in meta_directory_hints(meta) {
            push(expand_path_hint(&value));
        }
    }
    out
}

/// Walk request metadata collecting values that look like directories, either
/// by key suffix or by value shape (`file://`, `~`). Depth-limited; JSON
/// values are trees so the depth bound doubles as the cycle guard.
fn meta_directory_hints(meta: &serde_json::Value) -> Vec<String> {
    let mut hints = Vec::new();
    collect_meta_hints(meta, None, 0, &mut hints);
    hints
}

fn collect_meta_hints(
    value: &serde_json::Value,
    key: Option<&str>,
    depth: usize,
    out: &mut Vec<String>,
) {
    if depth > META_SCAN_DEPTH {
        return;
    }
    match value {
        serde_json::Value::String(s) => {
            let key_hit = key.map(meta_key_matches).unwrap_or(false);
            let value_hit = s.starts_with("file://") || s.starts_with('~');
            if key_hit || value_hit {
                out.push(s.clone());
            }
        }
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                collect_meta_hints(v, Some(k), depth + 1, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_meta_hints(item, key, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn meta_key_matches(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    META_ROOT_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// First changed-path list found in metadata, headers, or environment.
fn hinted_path_list(ctx: &ResolveContext) -> Vec<String> {
    if let Some(meta) = &ctx.meta {
        let mut found = Vec::new();
        collect_meta_path_lists(meta, 0, &mut found);
        if !found.is_empty() {
            return found;
        }
    }
    for key in HEADER_PATH_KEYS {
        if let Some(value) = ctx.header(key) {
            let parsed = parse_path_list(value);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }
    for key in ENV_PATH_KEYS {
        if let Some(value) = ctx.env_var(key) {
            let parsed = parse_path_list(&value);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }
    Vec::new()
}

fn collect_meta_path_lists(value: &serde_json::Value, depth: usize, out: &mut Vec<String>) {
    if depth > META_SCAN_DEPTH {
        return;
    }
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            let lower = k.to_ascii_lowercase();
            let is_path_list = lower.ends_with("paths") || lower.ends_with("files");
            match v {
                serde_json::Value::String(s) if is_path_list => out.extend(parse_path_list(s)),
                serde_json::Value::Array(items) if is_path_list => {
                    out.extend(
                        items
                            .iter()
                            .filter_map(|i| i.as_str())
                            .map(|s| s.to_string()),
                    );
                }
                serde_json::Value::Object(_) => collect_meta_path_lists(v, depth + 1, out),
                _ => {}
            }
        }
    }
}

/// Parse a list value: JSON string array first, then newline-separated, then
/// semicolon-separated.
fn parse_path_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(trimmed) {
            return items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    let separator = if trimmed.contains('\n') { '\n' } else { ';' };
    trimmed
        .split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Expand `~` and `file://` forms into a plain path.
///
/// RFC 8089 file URIs on Windows encode the drive as `file:///C:/…`; after
/// stripping the scheme the leftover `/C:/…` needs its leading slash removed.
fn expand_path_hint(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("file://") {
        let rest = if rest.starts_with('/')
            && rest.len() >= 3
            && rest.as_bytes()[1].is_ascii_alphabetic()
            && rest.as_bytes()[2] == b':'
        {
            &rest[1..]
        } else {
            rest
        };
        return PathBuf::from(rest.trim_end_matches('/'));
    }
    if raw == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

fn require_dir(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(IndexMcpError::workspace_unavailable(format!(
            "{} is not an existing directory",
            path.display()
        )));
    }
    Ok(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
}

/// Normalize one entry to a workspace-relative posix path, or `None` if it
/// escapes the root. Purely lexical: the entry may name a deleted file.
fn normalize_workspace_relative(root: &Path, entry: &str) -> Option<String> {
    let expanded = expand_path_hint(entry);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    let rel = normalized.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(to_posix(rel))
}

/// Render a relative path with `/` separators.
pub fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx_with_env(pairs: &[(&str, &str)]) -> ResolveContext {
        ResolveContext {
            env: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn absolute_root_must_exist() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx_with_env(&[]);
        let resolved =
            resolve_workspace_root(Some(tmp.path().to_str().unwrap()), &ctx).unwrap();
        assert!(resolved.is_dir());

        let missing = tmp.path().join("nope");
        let err = resolve_workspace_root(Some(missing.to_str().unwrap()), &ctx).unwrap_err();
        assert_eq!(err.kind(), "WorkspaceUnavailable");
    }

    #[test]
    fn relative_root_resolves_against_env_base() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let ctx = ctx_with_env(&[("MCP_WORKSPACE_ROOT", tmp.path().to_str().unwrap())]);
        let resolved = resolve_workspace_root(Some("sub"), &ctx).unwrap();
        assert!(resolved.ends_with("sub"));
    }

    #[test]
    fn missing_root_falls_back_to_first_base() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx_with_env(&[("MCP_CALLER_CWD", tmp.path().to_str().unwrap())]);
        let resolved = resolve_workspace_root(None, &ctx).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(tmp.path()).unwrap());
    }

    #[test]
    fn no_hints_is_an_error() {
        let ctx = ctx_with_env(&[]);
        let err = resolve_workspace_root(None, &ctx).unwrap_err();
        assert_eq!(err.kind(), "WorkspaceUnavailable");
    }

    #[test]
    fn meta_hints_are_recognized_by_suffix() {
        let tmp = TempDir::new().unwrap();
        let meta = serde_json::json!({
            "client": { "projectRoot": tmp.path().to_str().unwrap() }
        });
        let ctx = ResolveContext {
            meta: Some(meta),
            env: Some(BTreeMap::new()),
            ..Default::default()
        };
        let resolved = resolve_workspace_root(None, &ctx).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(tmp.path()).unwrap());
    }

    #[test]
    fn explicit_paths_pass_through_trimmed_and_deduped() {
        let tmp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        let ctx = ctx_with_env(&[]);
        let paths = vec![
            " src/a.ts ".to_string(),
            "src/a.ts".to_string(),
            "src/b.ts".to_string(),
        ];
        let resolved = resolve_ingest_paths(&root, &ctx, Some(&paths));
        assert_eq!(resolved, vec!["src/a.ts".to_string(), "src/b.ts".to_string()]);
    }

    #[test]
    fn entries_escaping_root_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        let ctx = ctx_with_env(&[]);
        let paths = vec!["../outside.txt".to_string(), "inside.txt".to_string()];
        let resolved = resolve_ingest_paths(&root, &ctx, Some(&paths));
        assert_eq!(resolved, vec!["inside.txt".to_string()]);
    }

    #[test]
    fn env_path_list_parses_json_newline_and_semicolon() {
        let tmp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();

        for value in [
            r#"["a.ts","b.ts"]"#.to_string(),
            "a.ts\nb.ts".to_string(),
            "a.ts;b.ts".to_string(),
        ] {
            let ctx = ResolveContext {
                env: Some(BTreeMap::from([("MCP_CHANGED_PATHS".to_string(), value)])),
                ..Default::default()
            };
            let resolved = resolve_ingest_paths(&root, &ctx, None);
            assert_eq!(resolved, vec!["a.ts".to_string(), "b.ts".to_string()]);
        }
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let tmp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        let ctx = ctx_with_env(&[]);
        let first = resolve_ingest_paths(
            &root,
            &ctx,
            Some(&["src/./x/../y.ts".to_string(), "z.ts".to_string()]),
        );
        let second = resolve_ingest_paths(&root, &ctx, Some(&first));
        assert_eq!(first, second);
        assert_eq!(first, vec!["src/y.ts".to_string(), "z.ts".to_string()]);
    }
}
