#![deny(missing_docs)]

//! # Overview
//!
//! `daemon` implements the wharfd session, locking, and upload engine: the
//! length-prefixed request/response framing ([`wire`]), the per-connection
//! session state machine and its upload sub-state-machine ([`session`],
//! [`upload`]), the per-path lock table that lets parallel writes to
//! *different* files proceed while serializing writes to the *same* file
//! ([`locks`]), the streaming long-running operations that interleave
//! progress frames with a terminal status frame ([`fsutil`], [`progress`],
//! [`index`]), and the small closed set of shell built-ins ([`shell`]).
//!
//! [`server::run`] ties these together: it binds the listening socket,
//! tunes it, and spawns one worker per accepted connection.
//!
//! # Design
//!
//! Every module maps to exactly one component of the protocol design: the
//! wire codec, the lock registry, filesystem helpers, the progress emitter,
//! the upload engine, the download streamer, the directory enumerator, the
//! index builder/searcher, the shell built-ins, and the acceptor/session
//! loop. None of them depend on a shared mutable global beyond the two the
//! design calls for — the path-lock registry and the index — both of which
//! are owned by [`server::Daemon`] and threaded into every handler as a
//! parameter, never reached via `static`.
//!
//! # Invariants
//!
//! - A path-lock entry's reference count never reaches zero while anything
//!   still holds a [`locks::PathLockHandle`] for it ([`locks`]).
//! - `UPLOAD_CHUNK` and `END_UPLOAD` only succeed while the session's upload
//!   state is [`session::UploadState::Open`] ([`session`], [`upload`]).
//! - A progress-emitting operation's terminal frame is always the next
//!   frame sent on that connection after its last `PROGRESS` frame
//!   ([`progress`]).
//!
//! # Errors
//!
//! [`error::DaemonError`] classifies every failure into the taxonomy the
//! protocol design calls for (framing, protocol, filesystem, resource);
//! [`error::DaemonError::to_frame`] renders the classification into the
//! response frame the session loop sends back.

/// Daemon-wide configuration (bind address, buffer sizes, thresholds).
pub mod config;
/// Shared download-body streaming helper.
pub mod download;
/// Error taxonomy and wire-frame rendering.
pub mod error;
/// Recursive filesystem helpers (mkdir, rmdir, file counting, normalization).
pub mod fsutil;
/// The in-memory filesystem name index: builder and searcher.
pub mod index;
/// Directory listing (`LIST_DIR`) support.
pub mod listing;
/// The per-path lock registry.
pub mod locks;
/// Progress-frame emission for long-running operations.
pub mod progress;
/// The acceptor and per-connection session loop.
pub mod server;
/// Per-connection session state and the upload sub-state-machine types.
pub mod session;
/// Shell built-in command dispatch.
pub mod shell;
/// The upload engine (`START_UPLOAD`/`UPLOAD_CHUNK`/`END_UPLOAD`).
pub mod upload;
/// Wire codec: opcodes, response kinds, and frame (de)serialization.
pub mod wire;

pub use config::ServerConfig;
pub use server::{run, Daemon};
