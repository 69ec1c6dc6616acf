//! Git subprocess interface.
//!
//! Two callers: index-status reads `git rev-parse HEAD` (failure tolerated,
//! returns `None`), and the commit-timeline tool runs `git log` with a
//! machine-parsable record format. Records are separated by `\x1e` and
//! fields by `\x1f`:
//!
//! ```text
//! %H %an %ae %aI %cn %ce %cI %s %P
//! ```
//!
//! Numstat and patch text, when requested, trail the formatted fields inside
//! each record and attach to that commit.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context};
use serde::Serialize;
use tokio::process::Command;

const RECORD_SEP: char = '\x1e';
const FIELD_SEP: char = '\x1f';
const LOG_FORMAT: &str = "%x1e%H%x1f%an%x1f%ae%x1f%aI%x1f%cn%x1f%ce%x1f%cI%x1f%s%x1f%P";

/// `git rev-parse HEAD` in `root`; `None` when git is missing, the directory
/// is not a repository, or the command fails.
pub async fn rev_parse_head(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("rev-parse")
        .arg("HEAD")
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        None
    } else {
        Some(sha)
    }
}

/// Options for the commit-timeline query.
#[derive(Debug, Clone, Default)]
pub struct TimelineRequest {
    pub branch: Option<String>,
    pub paths: Vec<String>,
    pub since_days: Option<u32>,
    pub include_stats: bool,
    pub include_patches: bool,
    pub no_merges: bool,
    pub grep_pattern: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    /// `None` for binary files (`-` in numstat output).
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author: Signature,
    pub committer: Signature,
    pub subject: String,
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<FileStat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// Run `git log` and parse the record stream. Unlike [`rev_parse_head`],
/// missing git or a non-zero exit is an error here.
pub async fn commit_timeline(root: &Path, req: &TimelineRequest) -> anyhow::Result<Vec<CommitRecord>> {
    let mut cmd = Command::new("git");
    cmd.arg("log")
        .arg("--no-color")
        .arg("--date-order")
        .arg(format!("--format={LOG_FORMAT}"));

    if req.include_stats {
        cmd.arg("--numstat");
    }
    if req.include_patches {
        cmd.arg("--patch");
    }
    if req.no_merges {
        cmd.arg("--no-merges");
    }
    if let Some(pattern) = &req.grep_pattern {
        cmd.arg(format!("-G{pattern}"));
    }
    if let Some(days) = req.since_days {
        cmd.arg(format!("--since={days}.days"));
    }
    if let Some(limit) = req.limit {
        cmd.arg(format!("-n{limit}"));
    }
    if let Some(branch) = &req.branch {
        cmd.arg(branch);
    }
    if !req.paths.is_empty() {
        cmd.arg("--");
        cmd.args(&req.paths);
    }

    let output = cmd
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context("running git log (is git installed?)")?;

    if !output.status.success() {
        bail!(
            "git log failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_timeline_output(&text, req.include_stats, req.include_patches)
}

/// Parse the `\x1e`-separated record stream into structured commits.
pub fn parse_timeline_output(
    text: &str,
    include_stats: bool,
    include_patches: bool,
) -> anyhow::Result<Vec<CommitRecord>> {
    let mut commits = Vec::new();

    for record in text.split(RECORD_SEP) {
        let record = record.trim_start_matches('\n');
        if record.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = record.splitn(9, FIELD_SEP).collect();
        if fields.len() != 9 {
            bail!("malformed git log record: expected 9 fields, got {}", fields.len());
        }

        // The parents field runs to the first newline; anything after is the
        // numstat/patch block for this commit.
        let (parents_raw, trailer) = match fields[8].split_once('\n') {
            Some((parents, rest)) => (parents, rest),
            None => (fields[8], ""),
        };

        let parents: Vec<String> = parents_raw
            .split_whitespace()
            .map(|p| p.to_string())
            .collect();

        let (stats, patch) = parse_trailer(trailer, include_stats, include_patches);

        commits.push(CommitRecord {
            sha: fields[0].to_string(),
            author: Signature {
                name: fields[1].to_string(),
                email: fields[2].to_string(),
                date: fields[3].to_string(),
            },
            committer: Signature {
                name: fields[4].to_string(),
                email: fields[5].to_string(),
                date: fields[6].to_string(),
            },
            subject: fields[7].to_string(),
            parents,
            stats,
            patch,
        });
    }

    Ok(commits)
}

fn parse_trailer(
    trailer: &str,
    include_stats: bool,
    include_patches: bool,
) -> (Option<Vec<FileStat>>, Option<String>) {
    if trailer.trim().is_empty() {
        return (include_stats.then(Vec::new), None);
    }

    let mut stats = Vec::new();
    let mut patch_start: Option<usize> = None;

    if include_stats {
        let mut consumed = 0usize;
        for line in trailer.lines() {
            let parts: Vec<&str> = line.splitn(3, '\t').collect();
            if parts.len() == 3 {
                stats.push(FileStat {
                    additions: parts[0].parse().ok(),
                    deletions: parts[1].parse().ok(),
                    path: parts[2].to_string(),
                });
                consumed += line.len() + 1;
            } else if line.trim().is_empty() {
                consumed += line.len() + 1;
            } else {
                patch_start = Some(consumed);
                break;
            }
        }
    } else if include_patches {
        patch_start = Some(0);
    }

    let patch = if include_patches {
        patch_start
            .and_then(|at| trailer.get(at..))
            .map(|p| p.trim_end().to_string())
            .filter(|p| !p.is_empty())
    } else {
        None
    };

    (include_stats.then_some(stats), patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> String {
        format!("\x1e{}", fields.join("\x1f"))
    }

    #[test]
    fn parses_plain_records() {
        let text = [
            record(&[
                "aaa111", "Ann", "ann@x.dev", "2026-01-02T03:04:05+00:00", "Ann", "ann@x.dev",
                "2026-01-02T03:04:05+00:00", "fix walker ordering", "bbb222",
            ]),
            record(&[
                "bbb222", "Bo", "bo@x.dev", "2026-01-01T00:00:00+00:00", "Bo", "bo@x.dev",
                "2026-01-01T00:00:00+00:00", "initial commit", "",
            ]),
        ]
        .join("\n");

        let commits = parse_timeline_output(&text, false, false).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].sha, "aaa111");
        assert_eq!(commits[0].author.name, "Ann");
        assert_eq!(commits[0].parents, vec!["bbb222".to_string()]);
        assert!(commits[1].parents.is_empty());
        assert!(commits[0].stats.is_none());
    }

    #[test]
    fn numstat_attaches_to_preceding_commit() {
        let text = format!(
            "{}\n3\t1\tsrc/a.ts\n-\t-\tlogo.png\n",
            record(&[
                "ccc333", "Cy", "cy@x.dev", "2026-01-03T00:00:00+00:00", "Cy", "cy@x.dev",
                "2026-01-03T00:00:00+00:00", "add logo", "aaa111",
            ])
        );

        let commits = parse_timeline_output(&text, true, false).unwrap();
        assert_eq!(commits.len(), 1);
        let stats = commits[0].stats.as_ref().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].additions, Some(3));
        assert_eq!(stats[0].deletions, Some(1));
        assert_eq!(stats[0].path, "src/a.ts");
        assert_eq!(stats[1].additions, None, "binary numstat is a dash");
    }

    #[test]
    fn patches_survive_when_requested() {
        let text = format!(
            "{}\ndiff --git a/x b/x\n+added line\n",
            record(&[
                "ddd444", "Di", "di@x.dev", "2026-01-04T00:00:00+00:00", "Di", "di@x.dev",
                "2026-01-04T00:00:00+00:00", "tweak x", "ccc333",
            ])
        );

        let commits = parse_timeline_output(&text, false, true).unwrap();
        let patch = commits[0].patch.as_ref().unwrap();
        assert!(patch.contains("diff --git"));
        assert!(patch.contains("+added line"));
    }

    #[test]
    fn malformed_record_is_an_error() {
        let text = "\x1eonly\x1fthree\x1ffields";
        assert!(parse_timeline_output(text, false, false).is_err());
    }

    #[test]
    fn empty_output_is_no_commits() {
        assert!(parse_timeline_output("", false, false).unwrap().is_empty());
    }
}
