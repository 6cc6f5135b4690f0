//! The acceptor and per-connection session loop.
//!
//! [`Daemon::bind`] builds and tunes the listening socket; [`Daemon::serve`]
//! accepts connections forever, spawning one task per connection. Each
//! connection gets its own writer task (see [`crate::wire::Outbound`]) so
//! handlers, background progress emitters, and the download streamer never
//! contend over the socket directly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};

use logging_sink::{NotificationSink, SystemNotificationSink};

use crate::config::{
    ServerConfig, KEEPALIVE_IDLE_SECS, KEEPALIVE_INTERVAL_SECS, KEEPALIVE_RETRIES,
    LISTEN_BACKLOG, SOCKET_BUFFER_BYTES, TCP_MAXSEG,
};
use crate::error::DaemonError;
use crate::index::IndexStore;
use crate::locks::PathLockRegistry;
use crate::session::Session;
use crate::wire::{Frame, Opcode, Outbound, RespKind};

/// The daemon's process-wide shared state: the path-lock registry and the
/// filesystem index. Cheaply cloneable; every connection gets its own
/// clone, never a reference into a `static`.
#[derive(Clone)]
pub struct Daemon {
    locks: PathLockRegistry,
    index: IndexStore,
    notifier: Arc<dyn NotificationSink>,
}

impl Daemon {
    /// Builds a daemon with an empty lock table, an empty index, and the
    /// production (syslog) notification sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: PathLockRegistry::new(),
            index: IndexStore::new(),
            notifier: Arc::new(SystemNotificationSink),
        }
    }

    /// Builds a daemon using `notifier` instead of the syslog sink — used
    /// by tests so a run doesn't actually touch the host's syslog.
    #[must_use]
    pub fn with_notifier(notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            locks: PathLockRegistry::new(),
            index: IndexStore::new(),
            notifier,
        }
    }

    /// Binds and tunes the listening socket per the protocol design:
    /// `SO_REUSEADDR`, 16 MiB `SO_RCVBUF`/`SO_SNDBUF`, backlog 128.
    pub fn bind(&self, config: &ServerConfig) -> io::Result<TcpListener> {
        let domain = match config.bind_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_BYTES)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_BYTES)?;
        socket.bind(&config.bind_addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener)
    }

    /// Accepts connections forever, spawning one task per connection. Never
    /// returns under normal operation; a `SHUTDOWN` request terminates the
    /// whole process from inside the connection task, per the protocol
    /// design.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let local_addr = listener.local_addr()?;
        self.notifier
            .notify(&format!("server running at {local_addr}"));
        info!(%local_addr, "daemon listening");

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let daemon = self.clone();
            tokio::spawn(async move {
                if let Err(err) = daemon.handle_connection(stream).await {
                    warn!(%peer_addr, error = %err, "connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> io::Result<()> {
        tune_connection(&stream)?;

        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if message.write_to(&mut write_half).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let mut session = Session::new();

        loop {
            let frame = match Frame::read_from(&mut read_half).await {
                Ok(frame) => frame,
                Err(_) => break, // framing error or EOF: tear the session down
            };

            let Ok(opcode) = Opcode::try_from(frame.opcode) else {
                let err = DaemonError::protocol(format!("unknown opcode 0x{:02x}", frame.opcode));
                if tx.send(Outbound::from(err.to_frame())).is_err() {
                    break;
                }
                continue;
            };

            if matches!(opcode, Opcode::Shutdown) {
                let _ = tx.send(Outbound::from(Frame::ok("Shutting down")));
                drop(tx);
                let _ = writer.await;
                std::process::exit(0);
            }

            if self
                .dispatch(&mut session, opcode, frame.payload, &tx)
                .await
                .is_err()
            {
                break;
            }
        }

        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        opcode: Opcode,
        payload: Vec<u8>,
        tx: &UnboundedSender<Outbound>,
    ) -> Result<(), ()> {
        let result = self.run_opcode(session, opcode, &payload, tx).await;
        match result {
            Ok(Some(frame)) => tx.send(Outbound::from(frame)).map_err(|_| ()),
            Ok(None) => Ok(()), // handler already sent everything it needed to (chunk, streaming ops)
            Err(err) => {
                let fatal = err.is_fatal();
                let _ = tx.send(Outbound::from(err.to_frame()));
                if fatal {
                    Err(())
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn run_opcode(
        &self,
        session: &mut Session,
        opcode: Opcode,
        payload: &[u8],
        tx: &UnboundedSender<Outbound>,
    ) -> Result<Option<Frame>, DaemonError> {
        match opcode {
            Opcode::Ping => Ok(Some(Frame::ok("PONG"))),

            Opcode::ListDir => {
                let path = crate::listing::parse_request(payload)?;
                let path = crate::fsutil::normalize_path(&path);
                let body = crate::listing::list_dir(&path).await;
                Ok(Some(Frame::data(body)))
            }

            Opcode::CreateDir => {
                let (path, _) = crate::wire::split_nul_terminated(payload)?;
                crate::fsutil::mkdir_recursive(crate::fsutil::normalize_path(&path)).await?;
                Ok(Some(Frame::ok("OK")))
            }

            Opcode::DeleteFile => {
                let (path, _) = crate::wire::split_nul_terminated(payload)?;
                tokio::fs::remove_file(crate::fsutil::normalize_path(&path))
                    .await
                    .map_err(DaemonError::Filesystem)?;
                Ok(Some(Frame::ok("OK")))
            }

            Opcode::DeleteDir => {
                let (path, _) = crate::wire::split_nul_terminated(payload)?;
                let path = crate::fsutil::normalize_path(&path);
                let progress = crate::progress::ProgressEmitter::for_delete(tx.clone());
                let removed = crate::fsutil::rmdir_recursive(path, progress).await?;
                Ok(Some(Frame::ok(format!("deleted {removed} entries"))))
            }

            Opcode::Rename | Opcode::MoveFile => {
                let (src, rest) = crate::wire::split_nul_terminated(payload)?;
                let (dst, _) = crate::wire::split_nul_terminated(rest)?;
                tokio::fs::rename(
                    crate::fsutil::normalize_path(&src),
                    crate::fsutil::normalize_path(&dst),
                )
                .await
                .map_err(DaemonError::Filesystem)?;
                Ok(Some(Frame::ok("OK")))
            }

            Opcode::CopyFile => {
                let (src, rest) = crate::wire::split_nul_terminated(payload)?;
                let (dst, _) = crate::wire::split_nul_terminated(rest)?;
                tokio::fs::copy(
                    crate::fsutil::normalize_path(&src),
                    crate::fsutil::normalize_path(&dst),
                )
                .await
                .map_err(DaemonError::Filesystem)?;
                Ok(Some(Frame::ok("OK")))
            }

            Opcode::StartUpload => {
                let message = crate::upload::start(session, &self.locks, payload).await?;
                // The connection-wide receive buffer is already tuned to
                // UPLOAD_RECV_BUFFER_BYTES at accept time (see
                // `tune_connection`), which happens to match the value the
                // protocol design calls for bumping to on START_UPLOAD — so
                // there is nothing further to raise here.
                Ok(Some(Frame::ready(message)))
            }

            Opcode::UploadChunk => {
                crate::upload::chunk(session, payload).await?;
                Ok(None) // no response on a successful chunk
            }

            Opcode::EndUpload => {
                let message = crate::upload::end(session).await?;
                Ok(Some(Frame::ok(message)))
            }

            Opcode::DownloadFile => {
                let (path, _) = crate::wire::split_nul_terminated(payload)?;
                crate::download::stream(&crate::fsutil::normalize_path(&path), tx).await?;
                Ok(None) // the streamer already sent the size frame and body
            }

            Opcode::ShellOpen => {
                session.shell.active = true;
                session.shell.working_dir =
                    std::path::PathBuf::from(crate::session::DEFAULT_SHELL_DIR);
                Ok(Some(Frame::ok("OK")))
            }

            Opcode::ShellExec => {
                let command = String::from_utf8_lossy(payload).into_owned();
                let output = crate::shell::exec(&mut session.shell, &command).await?;
                for line in output.data {
                    tx.send(Outbound::from(Frame::data(line)))
                        .map_err(|_| DaemonError::resource("connection closed mid-command"))?;
                }
                Ok(Some(Frame::ok(output.message)))
            }

            Opcode::ShellInterrupt => Err(DaemonError::protocol("not supported")),

            Opcode::ShellClose => {
                session.shell.active = false;
                Ok(Some(Frame::ok("OK")))
            }

            Opcode::IndexStart => {
                let roots_text = String::from_utf8_lossy(payload).into_owned();
                let roots = roots_text
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(std::path::PathBuf::from)
                    .collect::<Vec<_>>();
                let progress = crate::progress::ProgressEmitter::for_scan(tx.clone());
                self.index.start_scan(roots, progress);
                Ok(Some(Frame::ok("Indexing started")))
            }

            Opcode::IndexStatus => Ok(Some(Frame::ok(self.index.status_summary()))),

            Opcode::SearchIndex => {
                let query = String::from_utf8_lossy(payload).into_owned();
                let results = self.index.search(&query)?;
                let count = results.len();
                for entry in results {
                    tx.send(Outbound::from(Frame::data(encode_search_hit(&entry))))
                        .map_err(|_| DaemonError::resource("connection closed mid-search"))?;
                }
                Ok(Some(Frame::ok(format!("Found {count} results"))))
            }

            Opcode::IndexCancel => Err(DaemonError::protocol("not implemented")),

            Opcode::Shutdown => unreachable!("handled before dispatch"),
        }
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_search_hit(entry: &crate::index::IndexEntry) -> Vec<u8> {
    let path_bytes = entry.path.to_string_lossy().into_owned().into_bytes();
    let name_bytes = entry.name.clone().into_bytes();

    let mut out = Vec::with_capacity(4 + path_bytes.len() + 4 + name_bytes.len() + 17);
    out.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&path_bytes);
    out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&name_bytes);
    out.extend_from_slice(&entry.size.to_le_bytes());
    out.extend_from_slice(&entry.mtime.to_le_bytes());
    out.push(u8::from(entry.is_dir));
    out
}

/// Applies per-connection socket tuning: `TCP_NODELAY`, `TCP_MAXSEG`,
/// buffer sizes, and `TCP_KEEPALIVE`.
fn tune_connection(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let sock_ref = SockRef::from(stream);
    sock_ref.set_recv_buffer_size(SOCKET_BUFFER_BYTES)?;
    sock_ref.set_send_buffer_size(SOCKET_BUFFER_BYTES)?;

    let keepalive = TcpKeepalive::new()
        .with_time(std::time::Duration::from_secs(KEEPALIVE_IDLE_SECS))
        .with_interval(std::time::Duration::from_secs(KEEPALIVE_INTERVAL_SECS))
        .with_retries(KEEPALIVE_RETRIES);
    sock_ref.set_tcp_keepalive(&keepalive)?;

    set_tcp_maxseg(stream)?;

    Ok(())
}

/// `TCP_MAXSEG` isn't exposed by `socket2` or `std`, so it's set with a raw
/// `setsockopt` call — the same fallback pattern used for socket options
/// the portable wrappers don't cover.
#[cfg(unix)]
fn set_tcp_maxseg(stream: &TcpStream) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let raw = stream.as_raw_fd();
    let value = TCP_MAXSEG;
    // SAFETY: `raw` is a valid, open socket fd for the lifetime of this
    // call (borrowed from `stream`); `value` is a valid `libc::c_int` whose
    // address and size are passed correctly to `setsockopt`.
    let ret = unsafe {
        libc::setsockopt(
            raw,
            libc::IPPROTO_TCP,
            libc::TCP_MAXSEG,
            std::ptr::from_ref(&value).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(unix))]
fn set_tcp_maxseg(_stream: &TcpStream) -> io::Result<()> {
    Ok(())
}

/// Binds, tunes, and serves forever using [`ServerConfig::default`] — the
/// binary's entire `main`.
pub async fn run(config: ServerConfig) -> io::Result<()> {
    logging::init(logging::Verbosity::default());
    let daemon = Daemon::new();
    let listener = daemon.bind(&config)?;
    daemon.serve(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use logging_sink::CapturingNotificationSink;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    async fn spawn_test_daemon() -> (SocketAddr, Arc<CapturingNotificationSink>) {
        let sink = Arc::new(CapturingNotificationSink::new());
        let daemon = Daemon::with_notifier(sink.clone());
        let listener = daemon.bind(&ServerConfig::ephemeral()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(daemon.serve(listener));
        (addr, sink)
    }

    #[tokio::test]
    async fn ping_replies_with_pong() {
        let (addr, _sink) = spawn_test_daemon().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0x01, 0, 0, 0, 0]).await.unwrap();

        let mut header = [0u8; 5];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], RespKind::Ok as u8);
        let len = u32::from_le_bytes(header[1..5].try_into().unwrap());
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(body, b"PONG");
    }

    #[tokio::test]
    async fn unknown_opcode_gets_an_error_frame_and_stays_connected() {
        let (addr, _sink) = spawn_test_daemon().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0x02, 0, 0, 0, 0]).await.unwrap();
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], RespKind::Error as u8);

        // connection survives a protocol-level error: a second PING works
        stream.write_all(&[0x01, 0, 0, 0, 0]).await.unwrap();
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], RespKind::Ok as u8);
    }
}
