//! Log message bridge between the vendor library and the host.
//!
//! The vendor calls a C logger with a severity and a message it allocated.
//! [`LogForwarder`] decides which messages reach the diagnostic stream and
//! makes sure every message goes back to the library exactly once.

use std::ffi::{c_char, c_int, CStr};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Highest severity forwarded by default (0 = fatal, 1 = error).
pub const DEFAULT_MAX_FORWARDED_LEVEL: i32 = 1;

/// Helper trait to recover from poisoned mutexes.
///
/// The logger may be invoked from vendor threads; a panic in one delivery
/// must not silence every later message.
trait RecoverMutex<T> {
    fn lock_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> RecoverMutex<T> for Mutex<T> {
    fn lock_recover(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Log writer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// What happened to a delivered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the diagnostic stream and released.
    Forwarded,
    /// Below the forwarding threshold; released without being written.
    Filtered,
    /// Null message pointer; nothing to write or release.
    Ignored,
}

/// Forwards vendor log messages at or below a severity threshold.
pub struct LogForwarder {
    /// Highest severity that gets written.
    max_level: i32,

    /// Diagnostic stream.
    out: Mutex<Box<dyn Write + Send>>,

    forwarded: AtomicU64,
    filtered: AtomicU64,
}

impl LogForwarder {
    /// Create a forwarder writing to `out`.
    pub fn new(max_level: i32, out: Box<dyn Write + Send>) -> Self {
        Self {
            max_level,
            out: Mutex::new(out),
            forwarded: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
        }
    }

    /// Forwarder writing to standard output.
    pub fn stdout(max_level: i32) -> Self {
        Self::new(max_level, Box::new(std::io::stdout()))
    }

    /// Forwarder writing to standard error.
    pub fn stderr(max_level: i32) -> Self {
        Self::new(max_level, Box::new(std::io::stderr()))
    }

    pub fn max_level(&self) -> i32 {
        self.max_level
    }

    /// Whether a message at `level` is written.
    pub fn accepts(&self, level: i32) -> bool {
        level <= self.max_level
    }

    /// Number of messages written so far.
    pub fn forwarded_count(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Number of messages dropped by the severity filter so far.
    pub fn filtered_count(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    /// Consume one vendor message.
    ///
    /// Accepted messages are written as `[level] text` and flushed. Every
    /// non-null message, accepted or filtered, is passed to `release`
    /// exactly once after it has been read.
    ///
    /// # Safety
    ///
    /// `msg` must be null or point to a NUL-terminated string that stays
    /// valid until `release` is called.
    pub unsafe fn deliver<F>(&self, level: c_int, msg: *const c_char, release: F) -> Delivery
    where
        F: FnOnce(*const c_char),
    {
        if msg.is_null() {
            return Delivery::Ignored;
        }

        let delivery = if self.accepts(level) {
            // SAFETY: non-null and NUL-terminated per the caller contract
            let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
            let mut out = self.out.lock_recover();
            if let Err(e) = writeln!(out, "[{}] {}", level, text).and_then(|_| out.flush()) {
                tracing::warn!(error = %e, "Failed to write vendor log message");
            }
            self.forwarded.fetch_add(1, Ordering::Relaxed);
            Delivery::Forwarded
        } else {
            tracing::trace!(level, "Dropped vendor log message below threshold");
            self.filtered.fetch_add(1, Ordering::Relaxed);
            Delivery::Filtered
        };

        release(msg);
        delivery
    }
}

impl std::fmt::Debug for LogForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogForwarder")
            .field("max_level", &self.max_level)
            .field("forwarded", &self.forwarded_count())
            .field("filtered", &self.filtered_count())
            .finish()
    }
}
