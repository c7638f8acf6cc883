//! Wall-clock helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds
///
/// # Panics
///
/// Panics if system time is set before the Unix epoch (January 1, 1970).
/// This should never happen on properly configured systems.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before Unix epoch - check system clock configuration")
        .as_millis() as u64
}
