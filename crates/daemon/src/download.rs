//! `DOWNLOAD_FILE`: a sized `DATA` frame followed by the raw file body.
//!
//! The body is sent with no framing at all — the client reads exactly
//! `size` bytes immediately after the sized `DATA` frame. That means the
//! body must go out through the same [`crate::wire::Outbound`] channel the
//! sized frame did, in the same send order, or a concurrent write on the
//! connection (there shouldn't be one, but the channel makes it impossible
//! rather than merely unlikely) could interleave with it.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::DOWNLOAD_CHUNK_BYTES;
use crate::error::DaemonError;
use crate::wire::{Frame, Outbound};

/// Streams `path` to `sender`: one `DATA` frame carrying the 8-byte
/// little-endian file size, then the file's bytes as a sequence of
/// [`Outbound::Raw`] chunks of up to [`DOWNLOAD_CHUNK_BYTES`].
///
/// Errors discovered before the size frame (file missing, not readable)
/// are returned so the caller can reply `RESP_ERROR`. An error partway
/// through the body is also returned, but by then the size frame has
/// already gone out — per the protocol design there is no way to recover
/// mid-stream, so the caller must tear the connection down rather than
/// send an `ERROR` frame after raw body bytes.
pub async fn stream(
    path: &Path,
    sender: &UnboundedSender<Outbound>,
) -> Result<(), DaemonError> {
    let mut file = File::open(path).await.map_err(DaemonError::Filesystem)?;
    let size = file
        .metadata()
        .await
        .map_err(DaemonError::Filesystem)?
        .len();

    sender
        .send(Outbound::from(Frame::data(size.to_le_bytes().to_vec())))
        .map_err(|_| DaemonError::resource("connection closed before download could start"))?;

    let mut buf = vec![0u8; DOWNLOAD_CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await.map_err(DaemonError::Filesystem)?;
        if n == 0 {
            break;
        }
        sender
            .send(Outbound::Raw(buf[..n].to_vec()))
            .map_err(|_| DaemonError::resource("connection closed mid-download"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn streams_size_frame_then_body_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        stream(&path, &tx).await.unwrap();
        drop(tx);

        let first = rx.recv().await.unwrap();
        match first {
            Outbound::Frame(frame) => {
                assert_eq!(frame.opcode, crate::wire::RespKind::Data as u8);
                let size = u64::from_le_bytes(frame.payload.try_into().unwrap());
                assert_eq!(size, 11);
            }
            Outbound::Raw(_) => panic!("expected the sized DATA frame first"),
        }

        let mut body = Vec::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Raw(bytes) => body.extend_from_slice(&bytes),
                Outbound::Frame(_) => panic!("unexpected framed message in the body"),
            }
        }
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn missing_file_is_a_filesystem_error() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = stream(&dir.path().join("nope.bin"), &tx).await.unwrap_err();
        assert!(matches!(err, DaemonError::Filesystem(_)));
    }
}
