//! Recursive filesystem helpers.
//!
//! Every function here offloads its syscalls to [`tokio::task::spawn_blocking`]
//! so a slow disk never stalls the async runtime's worker threads —
//! blocking I/O belongs on the blocking pool, not inline in an `async fn`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DaemonError;
use crate::progress::ProgressEmitter;

/// Lexically normalizes `path`: collapses runs of `/` into a single `/` and
/// trims exactly one trailing `/` (so `mkdir_recursive` never tries to
/// create a component named `""`). Deliberately does **not** resolve `.` or
/// `..` components or check the result against any root — path sandboxing
/// is out of scope. Does not touch the filesystem and does not require
/// `path` to exist.
#[must_use]
pub fn normalize_path(path: &str) -> PathBuf {
    let mut collapsed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                collapsed.push(c);
            }
            last_was_slash = true;
        } else {
            collapsed.push(c);
            last_was_slash = false;
        }
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    if collapsed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(collapsed)
    }
}

/// Creates `path` and all missing parent directories, matching `mkdir -p`.
///
/// Each component that didn't already exist is created with mode `0777`
/// and explicitly chmodded to `0777` afterward (a freshly created directory's
/// mode is subject to the process umask, so the explicit chmod is what
/// actually guarantees `0777` regardless of umask). Components that already
/// exist are left untouched.
pub async fn mkdir_recursive(path: PathBuf) -> Result<(), DaemonError> {
    tokio::task::spawn_blocking(move || mkdir_recursive_blocking(&path))
        .await
        .map_err(|e| DaemonError::resource(format!("mkdir task panicked: {e}")))?
}

fn mkdir_recursive_blocking(path: &Path) -> Result<(), DaemonError> {
    let components: Vec<&Path> = path.ancestors().collect();
    for ancestor in components.into_iter().rev() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        match fs::create_dir(ancestor) {
            Ok(()) => chmod_dir_0777(ancestor)?,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(DaemonError::Filesystem(e)),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn chmod_dir_0777(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(DaemonError::Filesystem)
}

#[cfg(not(unix))]
fn chmod_dir_0777(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

/// Recursively deletes `path` (file or directory), emitting a `PROGRESS`
/// frame via `progress` every [`crate::progress::DELETE_COUNT_THRESHOLD`]
/// files or [`crate::progress::DELETE_TIME_THRESHOLD`], whichever comes
/// first.
///
/// The walk and every `remove_file`/`remove_dir` call happen on the
/// blocking pool; only the throttled progress sends cross back onto the
/// async side, via the unbounded channel [`ProgressEmitter`] wraps.
pub async fn rmdir_recursive(
    path: PathBuf,
    mut progress: ProgressEmitter,
) -> Result<u64, DaemonError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u64>();

    let walker = tokio::task::spawn_blocking(move || remove_tree(&path, &tx));

    let mut total = 0u64;
    while let Some(n) = rx.recv().await {
        total = n;
        // A full channel send never blocks (unbounded); a dropped-receiver
        // error here just means the peer disconnected mid-delete, so let
        // the blocking walk finish (it owns the only remaining real work)
        // rather than aborting a destructive operation partway through.
        let _ = progress.tick(total, 1);
    }

    walker
        .await
        .map_err(|e| DaemonError::resource(format!("rmdir task panicked: {e}")))?
}

fn remove_tree(path: &Path, counted: &tokio::sync::mpsc::UnboundedSender<u64>) -> Result<u64, DaemonError> {
    let metadata = fs::symlink_metadata(path).map_err(DaemonError::Filesystem)?;
    let mut count = 0u64;
    remove_tree_inner(path, metadata.is_dir(), counted, &mut count)?;
    Ok(count)
}

fn remove_tree_inner(
    path: &Path,
    is_dir: bool,
    counted: &tokio::sync::mpsc::UnboundedSender<u64>,
    count: &mut u64,
) -> Result<(), DaemonError> {
    if is_dir {
        for entry in fs::read_dir(path).map_err(DaemonError::Filesystem)? {
            let entry = entry.map_err(DaemonError::Filesystem)?;
            let child_is_dir = entry.file_type().map_err(DaemonError::Filesystem)?.is_dir();
            remove_tree_inner(&entry.path(), child_is_dir, counted, count)?;
        }
        fs::remove_dir(path).map_err(DaemonError::Filesystem)?;
    } else {
        fs::remove_file(path).map_err(DaemonError::Filesystem)?;
    }
    *count += 1;
    let _ = counted.send(*count);
    Ok(())
}

/// Recursively counts the regular files plus directories under `path`,
/// emitting progress via `progress` every
/// [`crate::progress::SCAN_COUNT_THRESHOLD`] entries or
/// [`crate::progress::SCAN_TIME_THRESHOLD`].
pub async fn count_files_recursive(
    path: PathBuf,
    mut progress: ProgressEmitter,
) -> Result<u64, DaemonError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u64>();

    let walker = tokio::task::spawn_blocking(move || count_tree(&path, &tx));

    let mut total = 0u64;
    while let Some(n) = rx.recv().await {
        total = n;
        let _ = progress.tick(total, 1);
    }

    walker
        .await
        .map_err(|e| DaemonError::resource(format!("count task panicked: {e}")))?
}

fn count_tree(path: &Path, counted: &tokio::sync::mpsc::UnboundedSender<u64>) -> Result<u64, DaemonError> {
    let mut count = 0u64;
    count_tree_inner(path, counted, &mut count)?;
    Ok(count)
}

fn count_tree_inner(
    path: &Path,
    counted: &tokio::sync::mpsc::UnboundedSender<u64>,
    count: &mut u64,
) -> Result<(), DaemonError> {
    let metadata = fs::symlink_metadata(path).map_err(DaemonError::Filesystem)?;
    *count += 1;
    let _ = counted.send(*count);
    if metadata.is_dir() {
        for entry in fs::read_dir(path).map_err(DaemonError::Filesystem)? {
            let entry = entry.map_err(DaemonError::Filesystem)?;
            count_tree_inner(&entry.path(), counted, count)?;
        }
    }
    Ok(())
}
