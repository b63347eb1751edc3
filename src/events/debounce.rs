//! Software debounce applied on top of whatever the controller coalesces.

use std::time::Duration;
use tokio::time::Instant;

/// Per-pin debounce memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceState {
    last_accepted: Option<Instant>,
}

impl DebounceState {
    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

/// Outcome of a debounce check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Minimum-interval gate shared by every pin.
///
/// The gate itself holds only the bouncetime; all per-pin memory lives in
/// the [`DebounceState`] passed to [`DebounceGate::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceGate {
    bouncetime: Duration,
}

impl DebounceGate {
    pub fn new(bouncetime: Duration) -> Self {
        Self { bouncetime }
    }

    pub fn bouncetime(&self) -> Duration {
        self.bouncetime
    }

    /// Decide whether an edge at `now` is a new press, recording it if so.
    ///
    /// An edge exactly `bouncetime` after the last accepted one is accepted.
    /// An instant earlier than the last accepted one never moves the state
    /// backwards.
    pub fn check(&self, state: &mut DebounceState, now: Instant) -> Decision {
        let accept = match state.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.bouncetime,
        };

        if !accept {
            return Decision::Reject;
        }

        state.last_accepted = Some(match state.last_accepted {
            Some(last) if last > now => last,
            _ => now,
        });
        Decision::Accept
    }
}
