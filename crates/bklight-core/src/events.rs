//! Event system for UI decoupling.
//!
//! Lets a host application follow connects, handshake progress and raw
//! traffic without the session knowing about it.

use std::fmt;

use crate::protocol::AckStage;
use crate::protocol::ack::to_hex;
use crate::state::HandshakeState;

/// Events emitted by a device session.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Link up and notifications subscribed.
    Connected { address: String },
    /// Link released.
    Disconnected { address: String },
    /// Handshake state transition.
    StateChanged {
        from: HandshakeState,
        to: HandshakeState,
    },
    /// BLE packet sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Notification classified as an acknowledgment.
    AckReceived { stage: AckStage },
    /// Optional acknowledgment did not arrive; transfer continued.
    AckSkipped { stage: AckStage },
    /// Operation failed.
    Error { message: String },
    /// Frame accepted by the display.
    Complete { frame_len: usize },
}

/// BLE packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Display (write)
    Rx, // Display -> Host (notification)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving device events.
///
/// Called from the session's thread, and for `Rx` packets and
/// acknowledgments from the transport's notification thread.
pub trait DeviceObserver: Send + Sync {
    fn on_event(&self, event: &DeviceEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DeviceObserver for NullObserver {
    fn on_event(&self, _event: &DeviceEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DeviceObserver for TracingObserver {
    fn on_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Connected { address } => {
                tracing::info!(address = %address, "Display connected");
            }
            DeviceEvent::Disconnected { address } => {
                tracing::info!(address = %address, "Display disconnected");
            }
            DeviceEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Handshake state");
            }
            DeviceEvent::Packet {
                direction,
                length,
                data,
            } => {
                tracing::trace!(
                    dir = %direction,
                    len = length,
                    head = %data.as_deref().map(to_hex).unwrap_or_default(),
                    "BLE packet"
                );
            }
            DeviceEvent::AckReceived { stage } => {
                tracing::debug!(stage = %stage, "ACK received");
            }
            DeviceEvent::AckSkipped { stage } => {
                tracing::debug!(stage = %stage, "ACK skipped");
            }
            DeviceEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            DeviceEvent::Complete { frame_len } => {
                tracing::info!(frame_len = frame_len, "Image sent");
            }
        }
    }
}
