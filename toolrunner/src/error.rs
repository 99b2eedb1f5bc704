//! Crate-wide error taxonomy.
//!
//! Mirrors the split seen in the codebase this crate is extracted from:
//! public entry points return a typed [`RuntimeError`] so callers can branch
//! on `.kind()`, while call-site glue freely uses `anyhow::Result` with
//! `.context(...)` and converts at the boundary. Every variant's `Display`
//! embeds the canonical substring the testable properties match on
//! (`blacklist`, `required key missing`, `unexpected EOF`, `closed`, ...).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Policy,
    Resolution,
    Runtime,
    Abnormal,
    Wire,
    Closed,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("blacklist: command blocked")]
    Blacklist,

    #[error("required key missing: {0}")]
    RequiredKeyMissing(String),

    #[error("binary not found: {0}")]
    BinaryNotFound(String),

    #[error("empty command")]
    EmptyCommand,

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("abnormal termination: {0}")]
    Abnormal(String),

    #[error("jsonrpc error ({code}): {message}")]
    JsonRpc { code: i64, message: String },

    #[error("unexpected EOF")]
    UnexpectedEof,

    #[error("wire error: {0}")]
    Wire(String),

    #[error("client closed")]
    Closed,

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        use RuntimeError::*;
        match self {
            Configuration(_) => ErrorKind::Configuration,
            Validation(_) | RequiredKeyMissing(_) | EmptyCommand => ErrorKind::Validation,
            Blacklist => ErrorKind::Policy,
            BinaryNotFound(_) => ErrorKind::Resolution,
            Runtime(_) => ErrorKind::Runtime,
            Abnormal(_) | Cancelled | DeadlineExceeded => ErrorKind::Abnormal,
            JsonRpc { .. } | UnexpectedEof | Wire(_) => ErrorKind::Wire,
            Closed => ErrorKind::Closed,
            UnknownServer(_) => ErrorKind::Resolution,
            Other(_) => ErrorKind::Runtime,
        }
    }
}
