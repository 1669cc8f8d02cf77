use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of the telemetry connection.
///
/// Exactly one state is current at any time. Only the connection manager
/// mutates it, and only along the edges accepted by [`ConnectionState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Closing,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 6] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
        ConnectionState::Error,
        ConnectionState::Closing,
    ];

    /// Legal edges of the connection state machine.
    ///
    /// `Error` is reachable from anywhere (transport-level failure) and so is
    /// `Closing` (manual disconnect). Re-entering the current state is not a
    /// transition and is rejected.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self == next {
            return false;
        }

        match (self, next) {
            (_, Error) | (_, Closing) => true,
            (Disconnected, Connecting) => true,
            (Error, Connecting) => true,
            (Reconnecting, Connecting) => true,
            (Connecting, Connected) => true,
            (Reconnecting, Connected) => true,
            (Connected, Reconnecting) => true,
            (Error, Reconnecting) => true,
            (Reconnecting, Disconnected) => true,
            (Closing, Disconnected) => true,
            _ => false,
        }
    }

    /// States from which no automatic transition will follow.
    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Error => "ERROR",
            ConnectionState::Closing => "CLOSING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded reconnection bookkeeping owned by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryState {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            interval,
        }
    }

    /// Count one unplanned close. Returns `true` when another reconnect may be scheduled.
    pub fn record_unplanned_close(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts < self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_edges_are_legal() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Connected.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Disconnected));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));
    }

    #[test]
    fn test_error_and_closing_reachable_from_every_other_state() {
        for state in ConnectionState::ALL {
            if state != ConnectionState::Error {
                assert!(state.can_transition_to(ConnectionState::Error), "{state} -> ERROR");
            }
            if state != ConnectionState::Closing {
                assert!(state.can_transition_to(ConnectionState::Closing), "{state} -> CLOSING");
            }
        }
    }

    #[test]
    fn test_undocumented_edges_are_rejected() {
        use ConnectionState::*;
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connecting.can_transition_to(Reconnecting));
        assert!(!Closing.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_retry_state_exhausts_at_max() {
        let mut retry = RetryState::new(2, Duration::from_millis(100));
        assert!(retry.record_unplanned_close());
        assert!(!retry.record_unplanned_close());
        assert!(retry.is_exhausted());
        assert_eq!(retry.attempts, 2);

        retry.reset();
        assert_eq!(retry.attempts, 0);
        assert!(!retry.is_exhausted());
    }

    #[test]
    fn test_zero_max_attempts_never_schedules() {
        let mut retry = RetryState::new(0, Duration::from_millis(10));
        assert!(retry.is_exhausted());
        assert!(!retry.record_unplanned_close());
    }
}
