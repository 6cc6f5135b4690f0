//! Daemon-wide configuration.
//!
//! The protocol has no handshake for negotiating these values and the
//! binary takes no CLI flags and reads no environment variables (see the
//! protocol design's external-interfaces section) — [`ServerConfig`] exists
//! so tests can bind to an OS-assigned port (`0`) instead of the fixed
//! production port, not so an operator can tune the daemon.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use core::version::DEFAULT_PORT;

/// Listener backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: i32 = 128;

/// Socket buffer size (`SO_RCVBUF`/`SO_SNDBUF`) applied at bind time and to
/// every accepted connection.
pub const SOCKET_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Receive buffer size applied to a connection once it starts an upload.
pub const UPLOAD_RECV_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// `TCP_MAXSEG` applied to every accepted connection.
pub const TCP_MAXSEG: i32 = 1460;

/// TCP keepalive idle time before the first probe.
pub const KEEPALIVE_IDLE_SECS: u64 = 10;
/// TCP keepalive probe interval.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 5;
/// TCP keepalive probe count before the peer is considered dead.
pub const KEEPALIVE_RETRIES: u32 = 3;

/// Read/write size used when streaming a file download.
pub const DOWNLOAD_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Runtime configuration for [`crate::server::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
        }
    }
}

impl ServerConfig {
    /// Builds a configuration bound to an OS-assigned port on loopback,
    /// for use in tests that need to know the concrete port afterwards.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        }
    }
}
