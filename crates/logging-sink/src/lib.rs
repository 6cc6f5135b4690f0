#![deny(missing_docs)]

//! The host notification sink.
//!
//! The protocol spec treats "show this string to whoever is watching the
//! host" as an external collaborator accessed through a single narrow call,
//! used only once at startup to announce `ip:port`. This crate is that
//! interface: [`NotificationSink`] is the trait, [`SystemNotificationSink`]
//! is the production implementation (syslog on Unix, stderr elsewhere), and
//! [`CapturingNotificationSink`]/[`NullNotificationSink`] back tests.

use std::sync::Mutex;

/// A fire-and-forget "show this string to the host" notification.
///
/// Implementations must not block meaningfully or fail loudly: a
/// notification is advisory, not part of the protocol's correctness
/// surface, so `notify` has no return value.
pub trait NotificationSink: Send + Sync {
    /// Delivers `message` to whatever the host considers "notifications".
    fn notify(&self, message: &str);
}

/// Production sink. On Unix this writes to syslog's `user` facility at
/// `notice` priority; on other platforms it writes a line to stderr.
#[derive(Debug, Default)]
pub struct SystemNotificationSink;

impl NotificationSink for SystemNotificationSink {
    fn notify(&self, message: &str) {
        #[cfg(unix)]
        {
            use std::ffi::CString;

            let Ok(c_message) = CString::new(message) else {
                return;
            };
            // SAFETY: the format string is a static "%s" literal and
            // `c_message` is a valid NUL-terminated C string for the
            // duration of the call; syslog(3) reads no further than that.
            unsafe {
                libc::syslog(
                    libc::LOG_USER | libc::LOG_NOTICE,
                    c"%s".as_ptr(),
                    c_message.as_ptr(),
                );
            }
        }
        #[cfg(not(unix))]
        {
            eprintln!("{message}");
        }
    }
}

/// A sink that discards every notification. Used where a [`NotificationSink`]
/// is required but the test doesn't care about its content.
#[derive(Debug, Default)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn notify(&self, _message: &str) {}
}

/// A sink that records every notification it receives, for assertions in
/// tests.
#[derive(Debug, Default)]
pub struct CapturingNotificationSink {
    messages: Mutex<Vec<String>>,
}

impl CapturingNotificationSink {
    /// Creates an empty capturing sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every message captured so far, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("capturing sink mutex poisoned").clone()
    }
}

impl NotificationSink for CapturingNotificationSink {
    fn notify(&self, message: &str) {
        self.messages
            .lock()
            .expect("capturing sink mutex poisoned")
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_sink_records_messages_in_order() {
        let sink = CapturingNotificationSink::new();
        sink.notify("server running at 0.0.0.0:9113");
        sink.notify("second message");
        assert_eq!(
            sink.messages(),
            vec![
                "server running at 0.0.0.0:9113".to_string(),
                "second message".to_string(),
            ]
        );
    }

    #[test]
    fn null_sink_accepts_any_message_without_panicking() {
        let sink = NullNotificationSink;
        sink.notify("ignored");
    }
}
