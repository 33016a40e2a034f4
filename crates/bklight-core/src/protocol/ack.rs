//! Acknowledgment stages and notification classification.
//!
//! The display answers each transfer step with a notification. Only the first
//! [`ACK_PREFIX_LEN`] bytes identify the step; the tail varies between
//! firmware builds.

use std::fmt;

use super::constants::*;

/// Numbered checkpoint signalled by the display during one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AckStage {
    /// Nothing acknowledged yet.
    #[default]
    None,
    /// First handshake accepted.
    Stage1,
    /// Second handshake accepted (optional).
    Stage2,
    /// Frame accepted.
    Stage3,
}

impl AckStage {
    /// Numeric value as used in logs (0..=3).
    pub const fn value(self) -> u8 {
        match self {
            AckStage::None => 0,
            AckStage::Stage1 => 1,
            AckStage::Stage2 => 2,
            AckStage::Stage3 => 3,
        }
    }

    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(AckStage::None),
            1 => Some(AckStage::Stage1),
            2 => Some(AckStage::Stage2),
            3 => Some(AckStage::Stage3),
            _ => None,
        }
    }
}

impl fmt::Display for AckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStage::None => write!(f, "none"),
            other => write!(f, "stage {}", other.value()),
        }
    }
}

/// Reference prefixes in match order.
const ACK_PATTERNS: [(&[u8], AckStage); 5] = [
    (&ACK_STAGE_ONE, AckStage::Stage1),
    (&ACK_STAGE_ONE_ALT, AckStage::Stage1),
    (&ACK_STAGE_TWO, AckStage::Stage2),
    (&ACK_STAGE_TWO_ALT, AckStage::Stage2),
    (&ACK_STAGE_THREE, AckStage::Stage3),
];

/// Map a raw notification to the stage it acknowledges.
///
/// Returns `None` for payloads shorter than five bytes and for anything that
/// matches no known prefix. Unrecognized payloads are not errors.
pub fn classify(payload: &[u8]) -> Option<AckStage> {
    let prefix = payload.get(..ACK_PREFIX_LEN)?;
    ACK_PATTERNS
        .iter()
        .find(|(pattern, _)| &pattern[..ACK_PREFIX_LEN] == prefix)
        .map(|&(_, stage)| stage)
}

/// Hex rendering for log lines.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
