use std::fmt;

use serde::{Deserialize, Serialize};

/// Session lifecycle. `Closed` is terminal; a new session must be spawned
/// to stream again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Active)
                | (Connecting, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// Language edits are accepted until teardown begins
    pub fn accepts_language_change(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Connecting | SessionState::Active
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
