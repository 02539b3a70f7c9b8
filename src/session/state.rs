//! Session lifecycle states.

use std::fmt;

/// Lifecycle of a download session.
///
/// ```text
/// StandBy --start--> Downloading --pause--> Paused --resume--> Downloading
/// {Downloading, Paused} --stop--> Stopped --(all acknowledged)--> StandBy
/// Downloading --(every file done)--> Completed --clean--> StandBy
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Initial state; files may be added.
    #[default]
    StandBy,
    /// Transfers are admitted and running.
    Downloading,
    /// In-flight transfers are paused; nothing new is admitted.
    Paused,
    /// Waiting for in-flight transfers to acknowledge a stop.
    Stopped,
    /// Every file finished; `stats()` stays readable until `clean()`.
    Completed,
}

impl SessionState {
    /// Returns the lowercase state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StandBy => "stand_by",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }

    /// True while transfers are admitted or paused in place.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_stand_by() {
        assert_eq!(SessionState::default(), SessionState::StandBy);
    }

    #[test]
    fn test_is_active() {
        assert!(SessionState::Downloading.is_active());
        assert!(SessionState::Paused.is_active());
        assert!(!SessionState::Stopped.is_active());
        assert!(!SessionState::Completed.is_active());
        assert!(!SessionState::StandBy.is_active());
    }

    #[test]
    fn test_display_uses_snake_case() {
        assert_eq!(SessionState::StandBy.to_string(), "stand_by");
        assert_eq!(SessionState::Paused.to_string(), "paused");
    }
}
