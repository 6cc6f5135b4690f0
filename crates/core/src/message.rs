//! Uniform formatting of the short messages carried in `ERROR`, `OK`, and
//! `READY` frame payloads.
//!
//! The wire protocol has no structured error format — just UTF-8 text — but
//! internally we want every call site to classify *why* an operation failed
//! so the session loop can decide things like "does this close the
//! connection" without re-parsing a string. [`ErrorMessage`] carries both.

use std::fmt;

/// Broad classification of a failure, matching the taxonomy in the protocol
/// design: framing errors close the connection, the rest are reported to
/// the client and the session continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed frame: bad opcode, short header/body, oversized payload.
    Framing,
    /// Well-formed frame rejected because of session state (e.g. a chunk
    /// with no open upload) or malformed payload contents.
    Protocol,
    /// The requested filesystem operation failed (open/write/mkdir/unlink).
    Filesystem,
    /// Allocation or other resource exhaustion.
    Resource,
}

impl ErrorKind {
    /// Whether an error of this kind should tear down the connection rather
    /// than simply reply with an `ERROR` frame.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Framing)
    }
}

/// A short, client-facing error message paired with its [`ErrorKind`].
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    kind: ErrorKind,
    text: String,
}

impl ErrorMessage {
    /// Builds a new message from any `Display`-able payload.
    pub fn new(kind: ErrorKind, text: impl fmt::Display) -> Self {
        Self {
            kind,
            text: text.to_string(),
        }
    }

    /// The classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::error::Error for ErrorMessage {}
