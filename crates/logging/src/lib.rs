#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Verbosity levels and `tracing-subscriber` wiring shared by the daemon.
//!
//! The daemon takes no CLI flags and reads no environment variables for its
//! own behavior (see the protocol spec's external-interfaces section), but
//! the *log filter* is still allowed to come from `RUST_LOG` the way any
//! `tracing-subscriber`-based binary supports, since that's an operability
//! knob, not a protocol or feature toggle.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Coarse verbosity levels, in increasing order of chattiness.
///
/// `Verbosity` maps onto a `tracing` level rather than introducing its own
/// parallel filtering: `Quiet` installs a filter that only prints `warn`
/// and above, `Normal` adds `info`, `Debug` enables everything down to
/// `trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    /// Warnings, errors, and informational connection/operation events.
    Normal,
    /// Everything, including per-frame tracing.
    Debug,
}

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Debug => "debug",
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Normal
    }
}

/// Installs a global `tracing` subscriber writing to stderr.
///
/// Safe to call more than once (from multiple tests in the same process,
/// for example) — subsequent calls are no-ops. `RUST_LOG`, if set,
/// overrides `verbosity`.
pub fn init(verbosity: Verbosity) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .ok();
    });
}
