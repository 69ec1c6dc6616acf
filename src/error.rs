//! Stable error kinds surfaced to tool callers.
//!
//! Internal plumbing uses `anyhow` for context chains; the tool layer
//! converts everything into [`IndexMcpError`] so callers always see one of
//! the documented kind names plus a short operator-friendly message.

use thiserror::Error;

/// Errors surfaced across the tool boundary.
///
/// The kind name (see [`IndexMcpError::kind`]) is part of the contract and
/// must stay stable; the message text is free-form.
#[derive(Debug, Error)]
pub enum IndexMcpError {
    /// Missing or blank required argument, malformed globs, empty query.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The workspace root could not be resolved or does not exist.
    #[error("workspace unavailable: {0}")]
    WorkspaceUnavailable(String),

    /// A read tool was called but the database file is absent.
    #[error("index missing: {0}")]
    IndexMissing(String),

    /// A bundle or graph target references a file/symbol not in the index.
    #[error("not indexed: {0}")]
    NotIndexed(String),

    /// Search without `model` while several embedding models are present.
    #[error("embedding model ambiguous: {0}")]
    ModelAmbiguous(String),

    /// No embedding provider is configured while embeddings are required.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A graph node descriptor matched more than one row.
    #[error("ambiguous: {0}")]
    Ambiguous(String),

    /// The caller aborted the operation.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected I/O, SQLite, or subprocess failure.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IndexMcpError {
    /// Stable kind name for structured error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::WorkspaceUnavailable(_) => "WorkspaceUnavailable",
            Self::IndexMissing(_) => "IndexMissing",
            Self::NotIndexed(_) => "NotIndexed",
            Self::ModelAmbiguous(_) => "ModelAmbiguous",
            Self::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            Self::Ambiguous(_) => "Ambiguous",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn workspace_unavailable(msg: impl Into<String>) -> Self {
        Self::WorkspaceUnavailable(msg.into())
    }
}

impl From<sqlx::Error> for IndexMcpError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(anyhow::Error::new(err).context("sqlite"))
    }
}

impl From<std::io::Error> for IndexMcpError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(anyhow::Error::new(err).context("io"))
    }
}

pub type Result<T> = std::result::Result<T, IndexMcpError>;

/// Reasons a file can be skipped during ingest; these are per-file and never
/// abort the run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    FileTooLarge,
    ReadError,
    SanitizerError,
}

/// A per-file skip entry recorded in `IngestResult.skipped`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(IndexMcpError::invalid_input("x").kind(), "InvalidInput");
        assert_eq!(
            IndexMcpError::ModelAmbiguous("two models".into()).kind(),
            "ModelAmbiguous"
        );
        assert_eq!(IndexMcpError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            IndexMcpError::Internal(anyhow::anyhow!("boom")).kind(),
            "Internal"
        );
    }

    #[test]
    fn skip_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&SkipReason::FileTooLarge).unwrap();
        assert_eq!(json, "\"file-too-large\"");
        let json = serde_json::to_string(&SkipReason::ReadError).unwrap();
        assert_eq!(json, "\"read-error\"");
    }
}
