//! File reading, hashing, and binary detection, plus the sanitizer hook.
//!
//! Bytes stream through a SHA-256 hasher in one pass. The first KiB is
//! scanned for a `0x00` byte; finding one marks the file binary and content
//! decoding stops (hashing continues to the end). Text content is decoded as
//! UTF-8 only when the caller needs it.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

const READ_BUF_SIZE: usize = 64 * 1024;
const BINARY_SNIFF_BYTES: usize = 1024;

/// What the reader learned about one candidate file.
#[derive(Debug, Clone)]
pub struct ReadFile {
    pub path: String,
    pub size: u64,
    /// Modification time, milliseconds since epoch.
    pub modified_ms: i64,
    /// Hex SHA-256 of the raw bytes on disk.
    pub hash: String,
    /// Decoded UTF-8 content; `None` for binary files or when content was
    /// not requested.
    pub content: Option<String>,
    pub is_binary: bool,
}

/// Read, hash, and optionally decode one file.
pub fn read_and_hash(
    absolute: &Path,
    rel_path: &str,
    size: u64,
    modified_ms: i64,
    needs_content: bool,
) -> std::io::Result<ReadFile> {
    let mut file = std::fs::File::open(absolute)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    let mut sniffed = 0usize;
    let mut is_binary = false;
    let mut bytes: Vec<u8> = if needs_content {
        Vec::with_capacity(size.min(READ_BUF_SIZE as u64) as usize)
    } else {
        Vec::new()
    };

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let slice = &buf[..n];
        hasher.update(slice);

        if sniffed < BINARY_SNIFF_BYTES {
            let take = (BINARY_SNIFF_BYTES - sniffed).min(n);
            if slice[..take].contains(&0) {
                is_binary = true;
                bytes.clear();
            }
            sniffed += take;
        }

        if needs_content && !is_binary {
            bytes.extend_from_slice(slice);
        }
    }

    let hash = format!("{:x}", hasher.finalize());

    let content = if needs_content && !is_binary {
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                // Valid-looking bytes that are not UTF-8; treat as binary.
                is_binary = true;
                None
            }
        }
    } else {
        None
    };

    Ok(ReadFile {
        path: rel_path.to_string(),
        size,
        modified_ms,
        hash,
        content,
        is_binary,
    })
}

/// Payload handed to a sanitizer.
#[derive(Debug, Clone)]
pub struct SanitizePayload<'a> {
    pub path: &'a str,
    pub absolute_path: &'a Path,
    pub root: &'a Path,
    pub content: &'a str,
}

/// Sanitizer verdict for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeOutcome {
    /// Replace the content with the given text before chunking.
    Replace(String),
    /// Treat the file as empty; no chunks are produced.
    Skip,
    /// Pass the content through untouched.
    Unchanged,
}

/// Content-sanitizer capability. Errors are fatal for that file only.
pub type Sanitizer =
    Arc<dyn Fn(&SanitizePayload<'_>) -> anyhow::Result<SanitizeOutcome> + Send + Sync>;

/// Apply an optional sanitizer, returning the effective content to chunk.
/// `None` means the file produces no chunks.
pub fn apply_sanitizer(
    sanitizer: Option<&Sanitizer>,
    payload: &SanitizePayload<'_>,
) -> anyhow::Result<Option<String>> {
    match sanitizer {
        None => Ok(Some(payload.content.to_string())),
        Some(hook) => match hook(payload)? {
            SanitizeOutcome::Replace(text) => Ok(Some(text)),
            SanitizeOutcome::Skip => Ok(None),
            SanitizeOutcome::Unchanged => Ok(Some(payload.content.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn read(tmp: &TempDir, name: &str, needs_content: bool) -> ReadFile {
        let path = tmp.path().join(name);
        let size = fs::metadata(&path).unwrap().len();
        read_and_hash(&path, name, size, 0, needs_content).unwrap()
    }

    #[test]
    fn hashes_match_known_sha256() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("hello.txt"), "hello\n").unwrap();
        let out = read(&tmp, "hello.txt", true);
        // sha256 of "hello\n"
        assert_eq!(
            out.hash,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert_eq!(out.content.as_deref(), Some("hello\n"));
        assert!(!out.is_binary);
    }

    #[test]
    fn null_byte_marks_binary_and_drops_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blob.bin"), b"abc\x00def").unwrap();
        let out = read(&tmp, "blob.bin", true);
        assert!(out.is_binary);
        assert!(out.content.is_none());
        assert_eq!(out.hash.len(), 64);
    }

    #[test]
    fn invalid_utf8_without_nulls_is_binary() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("latin1.txt"), [0xE9, 0x20, 0x65]).unwrap();
        let out = read(&tmp, "latin1.txt", true);
        assert!(out.is_binary);
        assert!(out.content.is_none());
    }

    #[test]
    fn content_not_requested_is_none() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "text").unwrap();
        let out = read(&tmp, "a.txt", false);
        assert!(out.content.is_none());
        assert!(!out.is_binary);
    }

    #[test]
    fn sanitizer_outcomes() {
        let tmp = TempDir::new().unwrap();
        let abs = tmp.path().join("x.txt");
        let payload = SanitizePayload {
            path: "x.txt",
            absolute_path: &abs,
            root: tmp.path(),
            content: "original",
        };

        assert_eq!(
            apply_sanitizer(None, &payload).unwrap(),
            Some("original".to_string())
        );

        let replace: Sanitizer =
            Arc::new(|_| Ok(SanitizeOutcome::Replace("scrubbed".to_string())));
        assert_eq!(
            apply_sanitizer(Some(&replace), &payload).unwrap(),
            Some("scrubbed".to_string())
        );

        let skip: Sanitizer = Arc::new(|_| Ok(SanitizeOutcome::Skip));
        assert_eq!(apply_sanitizer(Some(&skip), &payload).unwrap(), None);

        let fail: Sanitizer = Arc::new(|_| anyhow::bail!("bad file"));
        assert!(apply_sanitizer(Some(&fail), &payload).is_err());
    }
}
