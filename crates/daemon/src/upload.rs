//! The `START_UPLOAD` / `UPLOAD_CHUNK` / `END_UPLOAD` state machine.
//!
//! Pre-allocation on `START_UPLOAD` is the mechanism that makes parallel
//! chunk uploads to the *same* file safe: by the time any chunk writer
//! seeks to its `chunk_offset`, the file is already at its final size, so
//! the seek always lands inside the file rather than racing an extension.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::DaemonError;
use crate::fsutil::{self, normalize_path};
use crate::locks::PathLockRegistry;
use crate::session::{OpenUpload, Session, UploadState};

/// Threshold above which a new upload's destination is pre-allocated to
/// its final size before any chunk is written.
pub const PREALLOCATE_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

/// A parsed `START_UPLOAD` payload: `path(NUL-terminated) ‖ total_size(8, LE) ‖ chunk_offset(8, LE, optional)`.
struct StartUploadRequest {
    path: String,
    total_size: u64,
    chunk_offset: u64,
}

fn parse_start_upload(payload: &[u8]) -> Result<StartUploadRequest, DaemonError> {
    let (path, rest) = crate::wire::split_nul_terminated(payload)?;
    if rest.len() < 8 {
        return Err(DaemonError::protocol(
            "START_UPLOAD payload is shorter than path + total_size",
        ));
    }
    let total_size = u64::from_le_bytes(rest[0..8].try_into().unwrap());
    let chunk_offset = if rest.len() >= 16 {
        u64::from_le_bytes(rest[8..16].try_into().unwrap())
    } else {
        0
    };
    Ok(StartUploadRequest {
        path,
        total_size,
        chunk_offset,
    })
}

/// Handles `START_UPLOAD`: closes any prior open upload on this session,
/// creates parent directories, opens (and, for a new large file,
/// pre-allocates) the destination, and stores the result as the session's
/// open upload.
///
/// Returns the message to send as `RESP_READY`'s payload on success.
pub async fn start(
    session: &mut Session,
    locks: &PathLockRegistry,
    payload: &[u8],
) -> Result<String, DaemonError> {
    let request = parse_start_upload(payload)?;

    // A second START_UPLOAD while one is already OPEN closes the prior
    // file and releases its lock before proceeding, per the state machine.
    if let UploadState::Open(prior) = session.upload.take() {
        drop(prior);
    }

    let path = normalize_path(&request.path);
    let lock = locks.acquire(&path);

    let guard = lock.lock().await;
    let opened = open_destination(&path, request.total_size, request.chunk_offset).await;
    drop(guard);

    match opened {
        Ok((handle, received)) => {
            session.upload = UploadState::Open(OpenUpload {
                handle,
                path,
                total_size: request.total_size,
                received,
                lock,
            });
            Ok(String::new())
        }
        Err(err) => {
            session.upload = UploadState::Idle;
            Err(err)
        }
    }
}

async fn open_destination(
    path: &Path,
    total_size: u64,
    chunk_offset: u64,
) -> Result<(tokio::fs::File, u64), DaemonError> {
    if let Some(parent) = path.parent() {
        fsutil::mkdir_recursive(parent.to_path_buf()).await?;
    }

    if chunk_offset > 0 {
        let mut handle = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(DaemonError::Filesystem)?;
        handle
            .seek(SeekFrom::Start(chunk_offset))
            .await
            .map_err(DaemonError::Filesystem)?;
        return Ok((handle, chunk_offset));
    }

    let mut handle = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(DaemonError::Filesystem)?;

    if total_size > PREALLOCATE_THRESHOLD_BYTES {
        if let Err(err) = preallocate(&mut handle, total_size).await {
            drop(handle);
            let _ = tokio::fs::remove_file(path).await;
            return Err(DaemonError::resource(format!("Disk full: {err}")));
        }
    }

    Ok((handle, 0))
}

async fn preallocate(handle: &mut tokio::fs::File, total_size: u64) -> std::io::Result<()> {
    handle.seek(SeekFrom::Start(total_size - 1)).await?;
    handle.write_all(&[0u8]).await?;
    handle.seek(SeekFrom::Start(0)).await?;
    Ok(())
}

/// Handles `UPLOAD_CHUNK`: writes `payload` at the upload's current
/// position. No response is sent on success — the caller (session loop)
/// must not write anything back to the client in that case.
///
/// On a short/failed write, the upload is torn down (closed, lock
/// released) and the session moves to [`UploadState::Idle`].
pub async fn chunk(session: &mut Session, payload: &[u8]) -> Result<(), DaemonError> {
    let UploadState::Open(open) = &mut session.upload else {
        return Err(DaemonError::protocol("UPLOAD_CHUNK with no open upload"));
    };

    let guard = open.lock.lock().await;
    let result = open.handle.write_all(payload).await;
    drop(guard);

    match result {
        Ok(()) => {
            open.received += payload.len() as u64;
            Ok(())
        }
        Err(err) => {
            session.upload = UploadState::Idle;
            Err(DaemonError::Filesystem(err))
        }
    }
}

/// Handles `END_UPLOAD`: closes the handle, releases the lock, chmods the
/// file to 0777, and returns to [`UploadState::Idle`].
pub async fn end(session: &mut Session) -> Result<String, DaemonError> {
    let UploadState::Open(open) = session.upload.take() else {
        session.upload = UploadState::Idle;
        return Err(DaemonError::protocol("END_UPLOAD with no open upload"));
    };

    let path = open.path.clone();
    drop(open); // closes the handle and releases the path lock

    chmod_0777(&path).await?;

    Ok("Upload complete".to_string())
}

#[cfg(unix)]
async fn chmod_0777(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(0o777);
    tokio::fs::set_permissions(path, permissions)
        .await
        .map_err(DaemonError::Filesystem)
}

#[cfg(not(unix))]
async fn chmod_0777(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
