use serde::{Deserialize, Serialize};

/// Readiness of the served model as observed from cluster status.
///
/// Pending → Provisioning → {Ready | Failed | TimedOut | Cancelled}. The last
/// four are terminal and never left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Pending,
    Provisioning,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
}

impl ReadinessState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Whether `self → next` is an allowed move. Staying put is allowed for
    /// non-terminal states so repeated polls can report the same state.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (Self::Pending, Self::Pending) => true,
            (Self::Pending, _) => true,
            (Self::Provisioning, Self::Pending) => false,
            (Self::Provisioning, _) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [
            ReadinessState::Ready,
            ReadinessState::Failed,
            ReadinessState::TimedOut,
            ReadinessState::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ReadinessState::Provisioning));
            assert!(!terminal.can_transition_to(ReadinessState::Ready));
        }
    }

    #[test]
    fn test_forward_moves() {
        assert!(ReadinessState::Pending.can_transition_to(ReadinessState::Provisioning));
        assert!(ReadinessState::Pending.can_transition_to(ReadinessState::Failed));
        assert!(ReadinessState::Provisioning.can_transition_to(ReadinessState::Provisioning));
        assert!(ReadinessState::Provisioning.can_transition_to(ReadinessState::Ready));
        assert!(!ReadinessState::Provisioning.can_transition_to(ReadinessState::Pending));
    }
}
