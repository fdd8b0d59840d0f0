//! Session state enum for wake-button operation.

/// Routing state for captured audio while the device is armed.
///
/// Exactly one state holds at a time; it is stored as an `AtomicU8` inside
/// [`SessionManager`](crate::session::SessionManager) so the audio callback
/// thread can read it without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Idle: captured audio goes to the bounded wake pre-roll buffer.
    Sleeping = 0,
    /// Woken, response not yet playing: audio is forwarded with no silence
    /// evaluation (the user is still asking).
    WaitingResponse = 1,
    /// Conversing: audio is forwarded and also fed to the silence window;
    /// a silent window ends the session.
    Active = 2,
}

impl SessionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitingResponse,
            2 => Self::Active,
            _ => Self::Sleeping,
        }
    }

    /// Short human-readable name for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sleeping => "sleeping",
            Self::WaitingResponse => "waiting-response",
            Self::Active => "active",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        for state in [
            SessionState::Sleeping,
            SessionState::WaitingResponse,
            SessionState::Active,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn unknown_value_defaults_to_sleeping() {
        assert_eq!(SessionState::from_u8(99), SessionState::Sleeping);
    }
}
