//! Error taxonomy shared by every operation handler.
//!
//! Every failure a handler can produce is one of four kinds, matching the
//! protocol design's error-handling section: framing errors close the
//! connection; protocol, filesystem, and resource errors are reported to
//! the client as an `ERROR` frame and the session continues.

use std::io;

use core::message::{ErrorKind as WireErrorKind, ErrorMessage};

use crate::wire::{Frame, RespKind};

/// A daemon-level error, classified by how the session loop must react.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// A short read/write on the header or body, or a payload larger than
    /// the connection buffer cap. The session must be torn down; no
    /// response is sent (the peer is presumed gone or misbehaving).
    #[error("framing error: {0}")]
    Framing(String),

    /// A well-formed frame rejected because of session state or malformed
    /// payload contents (e.g. `UPLOAD_CHUNK` with no open upload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A filesystem syscall (open/write/mkdir/unlink/stat) failed.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] io::Error),

    /// Allocation or other resource exhaustion.
    #[error("resource error: {0}")]
    Resource(String),
}

impl DaemonError {
    /// Convenience constructor for a protocol-kind error.
    pub fn protocol(message: impl Into<String>) -> Self {
        DaemonError::Protocol(message.into())
    }

    /// Convenience constructor for a resource-kind error.
    pub fn resource(message: impl Into<String>) -> Self {
        DaemonError::Resource(message.into())
    }

    /// Convenience constructor for a framing-kind error.
    pub fn framing(message: impl Into<String>) -> Self {
        DaemonError::Framing(message.into())
    }

    /// Whether this error must close the connection rather than simply
    /// produce an `ERROR` frame.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaemonError::Framing(_))
    }

    /// Renders this error as the wire-level message the client sees.
    #[must_use]
    pub fn wire_message(&self) -> ErrorMessage {
        let kind = match self {
            DaemonError::Framing(_) => WireErrorKind::Framing,
            DaemonError::Protocol(_) => WireErrorKind::Protocol,
            DaemonError::Filesystem(_) => WireErrorKind::Filesystem,
            DaemonError::Resource(_) => WireErrorKind::Resource,
        };
        ErrorMessage::new(kind, self)
    }

    /// Renders this error as an `ERROR` frame, ready to be written to the
    /// socket. Callers are responsible for also tearing down the
    /// connection when [`DaemonError::is_fatal`] is true — this method
    /// only produces the frame, since a framing error produces no frame at
    /// all in practice (the peer already failed to deliver bytes).
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::new(RespKind::Error as u8, self.wire_message().to_string().into_bytes())
    }
}
