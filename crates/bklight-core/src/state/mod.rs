//! Transfer state: the handshake machine and its acknowledgment slot.

pub mod handshake;
pub mod machine;
pub mod signal;

pub use handshake::Handshake;
pub use machine::HandshakeState;
pub use signal::{AckSignal, AckWait};
