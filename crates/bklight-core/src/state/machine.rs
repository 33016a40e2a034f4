//! Handshake states for one image transfer.

use std::fmt;

/// Position of the transfer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Nothing written yet; stage reset.
    #[default]
    Idle,
    /// First handshake written.
    Stage1Sent,
    /// Stage 1 acknowledged.
    Stage1Acked,
    /// Second handshake written.
    Stage2Sent,
    /// Stage 2 wait over, acknowledged or skipped.
    Stage2Outcome { acked: bool },
    /// Frame written.
    FrameSent,
    /// Frame acknowledged; terminal success.
    FrameAcked,
    /// Terminal failure for this attempt.
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Idle => write!(f, "IDLE"),
            HandshakeState::Stage1Sent => write!(f, "STAGE1_SENT"),
            HandshakeState::Stage1Acked => write!(f, "STAGE1_ACKED"),
            HandshakeState::Stage2Sent => write!(f, "STAGE2_SENT"),
            HandshakeState::Stage2Outcome { acked: true } => write!(f, "STAGE2_ACKED"),
            HandshakeState::Stage2Outcome { acked: false } => write!(f, "STAGE2_SKIPPED"),
            HandshakeState::FrameSent => write!(f, "FRAME_SENT"),
            HandshakeState::FrameAcked => write!(f, "FRAME_ACKED"),
            HandshakeState::Failed => write!(f, "FAILED"),
        }
    }
}

impl HandshakeState {
    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::FrameAcked | HandshakeState::Failed)
    }

    /// Check if a transition to `next` follows the protocol order.
    pub fn can_advance_to(&self, next: HandshakeState) -> bool {
        use HandshakeState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, Stage1Sent)
                | (Stage1Sent, Stage1Acked)
                | (Stage1Acked, Stage2Sent)
                | (Stage2Sent, Stage2Outcome { .. })
                | (Stage2Outcome { .. }, FrameSent)
                | (FrameSent, FrameAcked)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_order() {
        let path = [
            HandshakeState::Idle,
            HandshakeState::Stage1Sent,
            HandshakeState::Stage1Acked,
            HandshakeState::Stage2Sent,
            HandshakeState::Stage2Outcome { acked: false },
            HandshakeState::FrameSent,
            HandshakeState::FrameAcked,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(HandshakeState::FrameAcked.is_terminal());
    }

    #[test]
    fn test_no_skipping_ahead() {
        assert!(!HandshakeState::Idle.can_advance_to(HandshakeState::FrameSent));
        assert!(!HandshakeState::Stage1Sent.can_advance_to(HandshakeState::Stage2Sent));
        assert!(!HandshakeState::Failed.can_advance_to(HandshakeState::Failed));
        assert!(HandshakeState::FrameSent.can_advance_to(HandshakeState::Failed));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            HandshakeState::Stage2Outcome { acked: false }.to_string(),
            "STAGE2_SKIPPED"
        );
        assert_eq!(HandshakeState::default().to_string(), "IDLE");
    }
}
