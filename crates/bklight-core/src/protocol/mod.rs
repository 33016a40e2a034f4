//! Protocol module - BK Light wire definitions.

pub mod ack;
pub mod constants;
pub mod frame;

pub use ack::{AckStage, classify};
pub use constants::*;
pub use frame::{Frame, FrameError, FrameHeader, build_frame};
