//! Wire codec: `opcode(1) ‖ length(4, little-endian) ‖ payload(length bytes)`.
//!
//! Both requests and responses share this shape; only the meaning of the
//! leading byte differs ([`Opcode`] for requests, [`RespKind`] for
//! responses). The header and payload are always written in a single
//! `write_all` call so the kernel sees one contiguous buffer rather than
//! two small packets.

use std::convert::TryFrom;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use core::version::MAX_PAYLOAD_BYTES;

use crate::error::DaemonError;

/// Request opcodes understood by the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Liveness check; always answered with `OK "PONG"`.
    Ping = 0x01,
    /// Pack and return one directory's entries.
    ListDir = 0x03,
    /// Recursively create a directory.
    CreateDir = 0x04,
    /// Delete a single file.
    DeleteFile = 0x05,
    /// Recursively delete a directory, emitting progress frames.
    DeleteDir = 0x06,
    /// Rename a path.
    Rename = 0x07,
    /// Copy a file.
    CopyFile = 0x08,
    /// Move a file.
    MoveFile = 0x09,
    /// Open (or re-open) an upload.
    StartUpload = 0x10,
    /// Write a chunk to the currently open upload.
    UploadChunk = 0x11,
    /// Close the currently open upload.
    EndUpload = 0x12,
    /// Stream a file to the client.
    DownloadFile = 0x13,
    /// Begin a shell session.
    ShellOpen = 0x20,
    /// Execute one shell built-in.
    ShellExec = 0x21,
    /// Interrupt the running shell command (unimplemented stub).
    ShellInterrupt = 0x22,
    /// End the shell session.
    ShellClose = 0x23,
    /// Start a background index scan.
    IndexStart = 0x40,
    /// Report index scan status.
    IndexStatus = 0x41,
    /// Query the index.
    SearchIndex = 0x42,
    /// Cancel an in-progress index scan (unimplemented stub).
    IndexCancel = 0x43,
    /// Reply `OK` and terminate the process.
    Shutdown = 0xFF,
}

impl TryFrom<u8> for Opcode {
    type Error = DaemonError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Opcode::Ping),
            // 0x02 (LIST_STORAGE) is historically defined but intentionally
            // unsupported in the current wire contract.
            0x03 => Ok(Opcode::ListDir),
            0x04 => Ok(Opcode::CreateDir),
            0x05 => Ok(Opcode::DeleteFile),
            0x06 => Ok(Opcode::DeleteDir),
            0x07 => Ok(Opcode::Rename),
            0x08 => Ok(Opcode::CopyFile),
            0x09 => Ok(Opcode::MoveFile),
            0x10 => Ok(Opcode::StartUpload),
            0x11 => Ok(Opcode::UploadChunk),
            0x12 => Ok(Opcode::EndUpload),
            0x13 => Ok(Opcode::DownloadFile),
            0x20 => Ok(Opcode::ShellOpen),
            0x21 => Ok(Opcode::ShellExec),
            0x22 => Ok(Opcode::ShellInterrupt),
            0x23 => Ok(Opcode::ShellClose),
            0x40 => Ok(Opcode::IndexStart),
            0x41 => Ok(Opcode::IndexStatus),
            0x42 => Ok(Opcode::SearchIndex),
            0x43 => Ok(Opcode::IndexCancel),
            0xFF => Ok(Opcode::Shutdown),
            0x02 => Err(DaemonError::protocol(
                "LIST_STORAGE (0x02) is not supported by this server",
            )),
            other => Err(DaemonError::protocol(format!(
                "unknown opcode 0x{other:02x}"
            ))),
        }
    }
}

/// Response opcodes, written as the leading byte of every frame the daemon
/// sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RespKind {
    /// Terminal success.
    Ok = 0x01,
    /// Terminal failure.
    Error = 0x02,
    /// Carries a data payload (directory listing, search hit, download size).
    Data = 0x03,
    /// Terminal success specifically for `START_UPLOAD`.
    Ready = 0x04,
    /// Advisory progress update during a long-running operation.
    Progress = 0x05,
}

/// One message queued for a connection's writer task.
///
/// A connection has exactly one task with access to the socket's write
/// half, so every other task — handlers computing a response, the
/// download streamer, a background delete/scan emitting progress — sends
/// through this channel instead of touching the stream directly. That
/// makes send order the only ordering guarantee anyone needs to reason
/// about, which is what gives `DOWNLOAD_FILE`'s unframed body and
/// `DELETE_DIR`'s interleaved `PROGRESS` frames their well-defined
/// ordering relative to every other frame on the connection.
#[derive(Debug)]
pub enum Outbound {
    /// A length-prefixed frame.
    Frame(Frame),
    /// Raw bytes written with no framing at all — used only for a
    /// download's file body, immediately after its sized `DATA` frame.
    Raw(Vec<u8>),
}

impl Outbound {
    /// Writes this message to `writer`: a [`Frame`] through [`Frame::write_to`],
    /// raw bytes through a plain `write_all`.
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            Outbound::Frame(frame) => frame.write_to(writer).await,
            Outbound::Raw(bytes) => writer.write_all(bytes).await,
        }
    }
}

impl From<Frame> for Outbound {
    fn from(frame: Frame) -> Self {
        Outbound::Frame(frame)
    }
}

/// A decoded frame: a one-byte kind/opcode plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The raw leading byte: an [`Opcode`] for requests, a [`RespKind`] for
    /// responses.
    pub opcode: u8,
    /// The frame's payload, whose length is carried on the wire as a
    /// 4-byte little-endian prefix.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame from its raw opcode byte and payload.
    #[must_use]
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Builds an `OK` response carrying `message` as UTF-8 text.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(RespKind::Ok as u8, message.into().into_bytes())
    }

    /// Builds a `READY` response carrying `message` as UTF-8 text.
    #[must_use]
    pub fn ready(message: impl Into<String>) -> Self {
        Self::new(RespKind::Ready as u8, message.into().into_bytes())
    }

    /// Builds a `DATA` response carrying an arbitrary byte payload.
    #[must_use]
    pub fn data(payload: Vec<u8>) -> Self {
        Self::new(RespKind::Data as u8, payload)
    }

    /// Builds a `PROGRESS` response carrying `message` as UTF-8 text, with
    /// any trailing NUL stripped (the original implementation's fixed
    /// `char[]` buffers sometimes carry one through).
    #[must_use]
    pub fn progress(message: impl AsRef<str>) -> Self {
        let trimmed = message.as_ref().trim_end_matches('\0');
        Self::new(RespKind::Progress as u8, trimmed.as_bytes().to_vec())
    }

    /// Serializes this frame as `opcode ‖ len(LE u32) ‖ payload` into a
    /// single buffer, then writes it in one `write_all` call.
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(5 + self.payload.len());
        buf.push(self.opcode);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        writer.write_all(&buf).await
    }

    /// Reads one frame from `reader`, rejecting payloads larger than
    /// [`MAX_PAYLOAD_BYTES`] with a [`DaemonError::Framing`].
    ///
    /// A short read of the 5-byte header or of the body is also reported
    /// as [`DaemonError::Framing`] — the caller must tear down the session
    /// on any `Err` here, per the protocol design.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, DaemonError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 5];
        reader
            .read_exact(&mut header)
            .await
            .map_err(|e| DaemonError::framing(format!("short header read: {e}")))?;

        let opcode = header[0];
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);

        if len > MAX_PAYLOAD_BYTES {
            return Err(DaemonError::framing(format!(
                "payload length {len} exceeds cap {MAX_PAYLOAD_BYTES}"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        if len > 0 {
            reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| DaemonError::framing(format!("short body read: {e}")))?;
        }

        Ok(Frame { opcode, payload })
    }
}

/// Splits a NUL-terminated path out of the front of `payload`, returning
/// the path (as lossily-decoded UTF-8) and the remaining bytes after the
/// NUL.
///
/// Used by every opcode whose payload starts with a path, per the protocol
/// design (`LIST_DIR`, `CREATE_DIR`, `START_UPLOAD`, ...).
pub fn split_nul_terminated(payload: &[u8]) -> Result<(String, &[u8]), DaemonError> {
    let nul_at = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DaemonError::protocol("payload is missing its NUL-terminated path"))?;
    let path = String::from_utf8_lossy(&payload[..nul_at]).into_owned();
    Ok((path, &payload[nul_at + 1..]))
}
