use serde::{Deserialize, Serialize};
use std::fmt;

/// Online/offline availability of the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PresenceState {
    /// Not receiving orders, no location reporting
    #[default]
    Offline,
    /// Tracking started, waiting for the backend to confirm
    TransitioningOnline,
    /// Receiving orders and reporting location
    Online,
    /// Tracking stopped, waiting for the backend to acknowledge
    TransitioningOffline,
}

impl PresenceState {
    pub fn is_transitioning(self) -> bool {
        matches!(
            self,
            PresenceState::TransitioningOnline | PresenceState::TransitioningOffline
        )
    }

    /// Location reporting runs exactly in these states.
    pub fn is_tracking(self) -> bool {
        matches!(
            self,
            PresenceState::TransitioningOnline | PresenceState::Online
        )
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceState::Offline => write!(f, "Offline"),
            PresenceState::TransitioningOnline => write!(f, "Going online"),
            PresenceState::Online => write!(f, "Online"),
            PresenceState::TransitioningOffline => write!(f, "Going offline"),
        }
    }
}
