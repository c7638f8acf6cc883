//! Connection admission for DoS protection
//!
//! Enforces a global live-connection cap and a per-origin (IP) cap so one
//! host cannot exhaust broker resources. The check and the counter
//! increment happen under a single lock, so two racing admissions can never
//! both observe spare capacity and both succeed.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Outcome of an admission attempt
///
/// On `Admitted` the returned guard holds the slot; dropping it releases
/// both counters. Rejections name which limit fired, checked global-first.
#[derive(Debug)]
pub enum AdmissionResult {
    Admitted(ConnectionGuard),
    RejectedGlobalLimit,
    RejectedOriginLimit,
}

impl AdmissionResult {
    /// Whether this result carries an admission guard
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionResult::Admitted(_))
    }
}

/// Live-connection accounting: global count plus per-origin counts
#[derive(Debug, Default)]
struct TrackerState {
    total: usize,
    per_origin: HashMap<IpAddr, usize>,
}

/// Tracks live connections against global and per-origin limits
///
/// A limit of 0 means unlimited connections are allowed for that check.
#[derive(Debug)]
pub struct ConnectionTracker {
    state: Arc<Mutex<TrackerState>>,
    /// Maximum live connections across all origins (0 = unlimited)
    max_connections: usize,
    /// Maximum live connections per origin address (0 = unlimited)
    max_connections_per_origin: usize,
}

impl ConnectionTracker {
    /// Create a new connection tracker with the specified limits
    #[must_use]
    pub fn new(max_connections: usize, max_connections_per_origin: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            max_connections,
            max_connections_per_origin,
        }
    }

    /// Try to acquire a connection slot for the given origin
    ///
    /// The global limit is checked first, then the per-origin limit. On
    /// admission both counters are incremented before the lock is released,
    /// atomically with the decision.
    pub fn try_admit(&self, origin: IpAddr) -> AdmissionResult {
        let mut state = self.state.lock().expect("connection tracker lock");

        // 0 means unlimited
        if self.max_connections > 0 && state.total >= self.max_connections {
            return AdmissionResult::RejectedGlobalLimit;
        }

        let count = state.per_origin.entry(origin).or_insert(0);
        if self.max_connections_per_origin > 0 && *count >= self.max_connections_per_origin {
            return AdmissionResult::RejectedOriginLimit;
        }

        *count += 1;
        state.total += 1;
        AdmissionResult::Admitted(ConnectionGuard {
            origin,
            state: self.state.clone(),
        })
    }
}

/// RAII guard that releases a connection slot when dropped
///
/// This ensures slots are always released, even if the connection handler
/// panics or returns early. Origin entries that reach zero are removed to
/// bound the map.
#[derive(Debug)]
pub struct ConnectionGuard {
    origin: IpAddr,
    state: Arc<Mutex<TrackerState>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("connection tracker lock");
        state.total = state.total.saturating_sub(1);
        if let Some(count) = state.per_origin.get_mut(&self.origin) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_origin.remove(&self.origin);
            }
        }
    }
}
