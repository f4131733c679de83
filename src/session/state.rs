//! Session lifecycle states.
//!
//! ```text
//! Idle ──subscribed──▶ Connected ──first chunk──▶ Logging
//!  │                      │                          │
//!  └──────────────────────┴──────────┬───────────────┘
//!                                    ▼
//!                                 Closing ──▶ Closed
//! ```
//!
//! `Idle → Closing` covers sessions that end before subscribing (zero duration,
//! cancelled early, subscription refused).

use std::fmt;

use serde::Serialize;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Store open, transport not yet subscribed.
    Idle,
    /// Subscribed, no data yet.
    Connected,
    /// Receiving and persisting samples.
    Logging,
    /// Unsubscribing, flushing and closing the store.
    Closing,
    /// Everything released.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connected)
                | (Idle, Closing)
                | (Connected, Logging)
                | (Connected, Closing)
                | (Logging, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connected => "connected",
            SessionState::Logging => "logging",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
