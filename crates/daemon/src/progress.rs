//! Progress-frame emission for long-running operations.
//!
//! `DELETE_DIR`, the index scan, and the file-count helper both periodically
//! interleave a `PROGRESS` frame with their eventual terminal frame. A
//! connection has exactly one task that owns its write half; handlers never
//! touch the socket directly, they send [`crate::wire::Outbound`] messages
//! down an [`tokio::sync::mpsc::UnboundedSender`] and the writer task
//! serializes them onto the wire in send order. [`ProgressEmitter`] wraps
//! that sender with the count/time throttling so a fast operation doesn't
//! flood the channel with one frame per file, and is threaded through as an
//! ordinary parameter — never a global — which also makes concurrent
//! recursive deletes on different connections independent of each other.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::UnboundedSender;

use crate::wire::{Frame, Outbound};

/// Emits throttled `PROGRESS` frames onto a connection's outbound channel.
pub struct ProgressEmitter {
    sender: UnboundedSender<Outbound>,
    count_threshold: u64,
    time_threshold: Duration,
    count_since_last: u64,
    last_emit: Instant,
    format: fn(u64) -> String,
}

impl ProgressEmitter {
    /// Builds an emitter sending on `sender`, reporting every
    /// `count_threshold` items or every `time_threshold`, whichever comes
    /// first. `format` renders the running total into the frame's text.
    #[must_use]
    pub fn new(
        sender: UnboundedSender<Outbound>,
        count_threshold: u64,
        time_threshold: Duration,
        format: fn(u64) -> String,
    ) -> Self {
        Self {
            sender,
            count_threshold,
            time_threshold,
            count_since_last: 0,
            last_emit: Instant::now(),
            format,
        }
    }

    /// Builds an emitter using the delete cadence ([`DELETE_COUNT_THRESHOLD`]/
    /// [`DELETE_TIME_THRESHOLD`]).
    #[must_use]
    pub fn for_delete(sender: UnboundedSender<Outbound>) -> Self {
        Self::new(sender, DELETE_COUNT_THRESHOLD, DELETE_TIME_THRESHOLD, |n| {
            format!("deleted {n} files")
        })
    }

    /// Builds an emitter using the scan cadence ([`SCAN_COUNT_THRESHOLD`]/
    /// [`SCAN_TIME_THRESHOLD`]).
    #[must_use]
    pub fn for_scan(sender: UnboundedSender<Outbound>) -> Self {
        Self::new(sender, SCAN_COUNT_THRESHOLD, SCAN_TIME_THRESHOLD, |n| {
            format!("scanned {n} files")
        })
    }

    /// Records that `n` more items were processed, sending a `PROGRESS`
    /// frame if either threshold has been crossed since the last send.
    ///
    /// Returns an error only if the connection's writer task has already
    /// gone away; callers should treat that as reason to abandon the
    /// operation rather than keep working for a peer that's disappeared.
    pub fn tick(&mut self, total_so_far: u64, n: u64) -> Result<(), SendError<Outbound>> {
        self.count_since_last += n;
        let should_emit = self.count_since_last >= self.count_threshold
            || self.last_emit.elapsed() >= self.time_threshold;
        if should_emit {
            self.emit_now(total_so_far)?;
        }
        Ok(())
    }

    /// Unconditionally sends a `PROGRESS` frame for `total_so_far`,
    /// resetting the throttle counters.
    pub fn emit_now(&mut self, total_so_far: u64) -> Result<(), SendError<Outbound>> {
        let frame = Frame::progress((self.format)(total_so_far));
        self.sender.send(Outbound::from(frame))?;
        self.count_since_last = 0;
        self.last_emit = Instant::now();
        Ok(())
    }
}

/// Progress-frame cadence for [`crate::fsutil::rmdir_recursive`]: every 50
/// files or every 2 seconds.
pub const DELETE_COUNT_THRESHOLD: u64 = 50;
/// See [`DELETE_COUNT_THRESHOLD`].
pub const DELETE_TIME_THRESHOLD: Duration = Duration::from_secs(2);

/// Progress-frame cadence for [`crate::fsutil::count_files_recursive`] and
/// the index scan: every 500 files or every 3 seconds.
pub const SCAN_COUNT_THRESHOLD: u64 = 500;
/// See [`SCAN_COUNT_THRESHOLD`].
pub const SCAN_TIME_THRESHOLD: Duration = Duration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RespKind;

    fn unwrap_frame(outbound: Outbound) -> Frame {
        match outbound {
            Outbound::Frame(frame) => frame,
            Outbound::Raw(_) => panic!("expected a Frame, got Raw bytes"),
        }
    }

    #[test]
    fn emits_once_the_count_threshold_is_crossed() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut emitter = ProgressEmitter::new(tx, 5, Duration::from_secs(3600), |n| {
            format!("deleted {n}")
        });

        emitter.tick(3, 3).unwrap();
        assert!(rx.try_recv().is_err());

        emitter.tick(6, 3).unwrap();
        let frame = unwrap_frame(rx.try_recv().unwrap());
        assert_eq!(frame.opcode, RespKind::Progress as u8);
        assert_eq!(frame.payload, b"deleted 6");
    }

    #[test]
    fn emit_now_always_sends_and_resets() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut emitter = ProgressEmitter::new(tx, 1000, Duration::from_secs(3600), |n| {
            format!("{n}")
        });
        emitter.emit_now(7).unwrap();
        assert!(rx.try_recv().is_ok());
        assert_eq!(emitter.count_since_last, 0);
    }

    #[test]
    fn send_error_surfaces_once_the_receiver_is_dropped() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut emitter = ProgressEmitter::for_delete(tx);
        assert!(emitter.emit_now(1).is_err());
    }
}
