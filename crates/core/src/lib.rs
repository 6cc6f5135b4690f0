#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `core` holds the small set of facilities shared by every other crate in
//! the workspace: the protocol's opcode/response numbering (re-exported so a
//! single source of truth backs both the wire codec and anything that wants
//! to print a human-readable opcode name), the daemon's version string, and
//! a uniform way to turn an internal error into the short message text that
//! gets written back to a client on the wire.
//!
//! # Design
//!
//! Higher layers (principally the `daemon` crate) construct a
//! [`message::ErrorMessage`] at the point an operation fails and let
//! [`message::ErrorMessage::to_string`] produce the exact bytes that go into
//! an `ERROR` frame's payload. This keeps wire-message wording in one place
//! instead of scattered across call sites, mirroring how upstream-style
//! rsync implementations centralize diagnostic formatting.
//!
//! # Examples
//!
//! ```
//! use core::message::{ErrorMessage, ErrorKind};
//!
//! let rendered = ErrorMessage::new(ErrorKind::Filesystem, "disk full").to_string();
//! assert_eq!(rendered, "disk full");
//! ```

/// Error-message formatting shared by every operation handler.
pub mod message;
/// Daemon version/identification constants.
pub mod version;
