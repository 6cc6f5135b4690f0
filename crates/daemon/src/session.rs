//! Per-connection session state.
//!
//! A [`Session`] is created when a connection is accepted and lives for
//! exactly that connection's lifetime; it is never shared across
//! connections and never outlives the worker task that owns it.

use std::path::PathBuf;
use tokio::fs::File;

use crate::locks::PathLockHandle;

/// The upload sub-state-machine. See the crate-level invariants: only
/// [`UploadState::Open`] accepts `UPLOAD_CHUNK`/`END_UPLOAD`.
pub enum UploadState {
    /// No upload is in progress.
    Idle,
    /// An upload is open; chunks are being written to `handle`.
    Open(OpenUpload),
    /// The most recent upload attempt failed; a fresh `START_UPLOAD` is
    /// required to recover. Distinguished from `Idle` only for
    /// diagnostics — both reject `UPLOAD_CHUNK`/`END_UPLOAD` identically.
    Failed,
}

/// State for a currently open upload.
pub struct OpenUpload {
    /// The open file handle chunks are written to.
    pub handle: File,
    /// The destination path, for error messages and the final chmod.
    pub path: PathBuf,
    /// Total size declared by `START_UPLOAD`.
    pub total_size: u64,
    /// Bytes received so far (starts at `chunk_offset`).
    pub received: u64,
    /// Keeps the registry's refcount for this path alive for the lifetime
    /// of the upload. Does not itself hold a lock — [`crate::upload::start`]
    /// and [`crate::upload::chunk`] take the lock only around each
    /// individual open/write.
    pub lock: PathLockHandle,
}

impl Default for UploadState {
    fn default() -> Self {
        UploadState::Idle
    }
}

impl UploadState {
    /// Whether an upload is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, UploadState::Open(_))
    }

    /// Takes the current state, replacing it with [`UploadState::Idle`].
    /// Used when a handler needs to consume the open upload (to close its
    /// file handle and release its lock) without fighting the borrow
    /// checker over `&mut self`.
    pub fn take(&mut self) -> UploadState {
        std::mem::replace(self, UploadState::Idle)
    }
}

/// Working-directory state for the shell built-ins (`SHELL_OPEN`/`SHELL_EXEC`/
/// `SHELL_CLOSE`).
pub struct ShellState {
    /// Whether `SHELL_OPEN` has been issued without a matching `SHELL_CLOSE`.
    pub active: bool,
    /// The current working directory commands resolve relative paths
    /// against.
    pub working_dir: PathBuf,
}

/// The default working directory a shell session starts in.
pub const DEFAULT_SHELL_DIR: &str = "/data";

impl Default for ShellState {
    fn default() -> Self {
        Self {
            active: false,
            working_dir: PathBuf::from(DEFAULT_SHELL_DIR),
        }
    }
}

/// Everything scoped to one accepted connection.
#[derive(Default)]
pub struct Session {
    /// The upload sub-state-machine.
    pub upload: UploadState,
    /// The shell built-ins' working-directory state.
    pub shell: ShellState,
}

impl Session {
    /// Creates a fresh session: no upload open, shell inactive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_no_open_upload() {
        let session = Session::new();
        assert!(!session.upload.is_open());
    }

    #[test]
    fn new_session_shell_starts_at_default_dir_and_inactive() {
        let session = Session::new();
        assert!(!session.shell.active);
        assert_eq!(session.shell.working_dir, PathBuf::from(DEFAULT_SHELL_DIR));
    }

    #[test]
    fn take_resets_to_idle() {
        let mut state = UploadState::Failed;
        let taken = state.take();
        assert!(matches!(taken, UploadState::Failed));
        assert!(matches!(state, UploadState::Idle));
    }
}
