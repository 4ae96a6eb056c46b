//! Connection lifecycle state

use serde::{Deserialize, Serialize};

/// Connection lifecycle state owned by the orchestrator.
///
/// Exactly one live instance exists per orchestrator. Legal transitions:
///
/// ```text
/// Disconnected -> Connecting -> Connected
/// Connected    -> Disconnected            (explicit disconnect)
/// Connected    -> Reconnecting            (unexpected drop, auto_reconnect on)
/// Reconnecting -> Connected               (retry succeeded)
/// Reconnecting -> Error                   (retries exhausted / abort)
/// Error        -> Disconnected            (manual reset)
/// Error        -> Reconnecting            (retry policy)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No driver constructed, or torn down
    Disconnected,
    /// Driver open in progress
    Connecting,
    /// Driver open, data flowing
    Connected,
    /// Lost the connection unexpectedly, retrying on a timer
    Reconnecting,
    /// Retries exhausted or fatal driver fault
    Error,
}

impl ConnectionState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Error)
                | (Reconnecting, Disconnected)
                | (Error, Disconnected)
                | (Error, Reconnecting)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
    }

    #[test]
    fn reconnect_cycle_transitions_are_legal() {
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Error));
        assert!(Error.can_transition_to(Reconnecting));
        assert!(Error.can_transition_to(Disconnected));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connected));
    }
}
