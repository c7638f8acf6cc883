//! Per-connection message rate limiting
//!
//! Fixed-window counter: the first message in a window sets the reset time
//! and counts as 1; subsequent messages increment until the cap, and the
//! window re-arms once its reset time passes. A burst straddling a window
//! boundary can land up to `2 * max` messages in a short span - the
//! accepted trade-off for O(1) memory per connection and no timers.
//!
//! Entries are removed on disconnect; there is no TTL sweep because
//! lifecycle removal already bounds the table.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counter state for one connection's current window
#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: Instant,
}

/// Fixed-window rate limiter keyed by session ID
///
/// A `max` of 0 means unlimited.
#[derive(Debug)]
pub struct RateLimiter {
    entries: Mutex<HashMap<u32, RateLimitEntry>>,
    window: Duration,
    max: u32,
}

impl RateLimiter {
    /// Create a rate limiter allowing `max` messages per `window`
    #[must_use]
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            max,
        }
    }

    /// Record one message from a session and report whether it is allowed
    ///
    /// Always records the attempt; callers drop the message when this
    /// returns false. No error is surfaced to the sender (fail-silent, so
    /// abusers get no timing oracle).
    pub fn check_and_record(&self, session_id: u32) -> bool {
        if self.max == 0 {
            return true;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rate limiter lock");

        match entries.get_mut(&session_id) {
            Some(entry) if now <= entry.window_reset_at => {
                entry.count += 1;
                entry.count <= self.max
            }
            _ => {
                // First message, or the previous window has expired
                entries.insert(
                    session_id,
                    RateLimitEntry {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Drop a session's counter (called on disconnect)
    pub fn forget(&self, session_id: u32) {
        let mut entries = self.entries.lock().expect("rate limiter lock");
        entries.remove(&session_id);
    }
}
