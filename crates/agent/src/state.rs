//! Conversation states
//!
//! Transitions are the only way state changes; anything outside this
//! table is a programming bug and gets forced back to Idle.

/// Conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationState {
    /// Waiting for a wake word
    #[default]
    Idle,
    /// Playing the wake acknowledgement
    Wakeup,
    /// Capturing an utterance
    Listening,
    /// Running STT, intent routing, and reply generation
    Processing,
    /// Playing a reply, watching for barge-in
    Speaking,
    /// Recovering from an unexpected failure
    Error,
    /// Terminal state during shutdown
    Stopped,
}

impl ConversationState {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConversationState::Idle => "Idle",
            ConversationState::Wakeup => "Wakeup",
            ConversationState::Listening => "Listening",
            ConversationState::Processing => "Processing",
            ConversationState::Speaking => "Speaking",
            ConversationState::Error => "Error",
            ConversationState::Stopped => "Stopped",
        }
    }

    /// Get all valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [ConversationState] {
        use ConversationState::*;
        match self {
            // Idle reaches Speaking directly when an alarm fires, and
            // Listening directly in music-control mode.
            Idle => &[Wakeup, Listening, Speaking, Error, Stopped],
            Wakeup => &[Listening, Error, Stopped],
            Listening => &[Processing, Idle, Error, Stopped],
            // Processing returns to Listening on echo suppression and
            // after list-style intents that expect a follow-up.
            Processing => &[Speaking, Listening, Idle, Error, Stopped],
            Speaking => &[Listening, Idle, Error, Stopped],
            Error => &[Idle, Stopped],
            Stopped => &[],
        }
    }

    pub fn can_transition_to(&self, to: ConversationState) -> bool {
        self.valid_transitions().contains(&to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;

    #[test]
    fn happy_path_is_valid() {
        let path = [Idle, Wakeup, Listening, Processing, Speaking, Idle];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0].display_name(),
                pair[1].display_name()
            );
        }
    }

    #[test]
    fn barge_in_path_is_valid() {
        assert!(Speaking.can_transition_to(Listening));
    }

    #[test]
    fn alarm_fire_path_is_valid() {
        assert!(Idle.can_transition_to(Speaking));
    }

    #[test]
    fn illegal_jumps_are_rejected() {
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Wakeup.can_transition_to(Speaking));
        assert!(!Processing.can_transition_to(Wakeup));
    }

    #[test]
    fn stopped_is_terminal() {
        assert!(Stopped.valid_transitions().is_empty());
    }

    #[test]
    fn every_state_can_stop_except_error_and_stopped() {
        for state in [Idle, Wakeup, Listening, Processing, Speaking] {
            assert!(state.can_transition_to(Stopped));
        }
        assert!(!Error.can_transition_to(Wakeup));
    }
}
