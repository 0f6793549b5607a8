use std::fmt;

/// Lifecycle of a tunnel session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Constructed, or a `start()` attempt failed
    #[default]
    Idle,
    /// `start()` is opening the inbound source
    Connecting,
    /// Accepting and relaying connections
    Running,
    /// `stop()` is tearing down
    Stopping,
    /// Torn down; may be started again
    Stopped,
}

impl SessionState {
    /// Whether the session currently owns live resources
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Per-session connection counter value, used to tag logs
pub type ConnectionId = u64;

/// Result of a single close or cleanup step.
///
/// Close operations are idempotent: closing something twice yields
/// `AlreadyClosed` instead of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
    Failed(String),
}

impl CloseOutcome {
    pub fn from_io(result: std::io::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Closed,
            // The peer got there first
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Self::AlreadyClosed,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::AlreadyClosed => f.write_str("already closed"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_default_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_session_state_active() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Running.is_active());
        assert!(SessionState::Stopping.is_active());
        assert!(!SessionState::Stopped.is_active());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Running.to_string(), "running");
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_close_outcome_from_io() {
        assert_eq!(CloseOutcome::from_io(Ok(())), CloseOutcome::Closed);

        let not_connected = std::io::Error::new(std::io::ErrorKind::NotConnected, "gone");
        assert_eq!(CloseOutcome::from_io(Err(not_connected)), CloseOutcome::AlreadyClosed);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let outcome = CloseOutcome::from_io(Err(other));
        assert!(outcome.is_failed());
        assert_eq!(outcome.to_string(), "failed: boom");
    }
}
