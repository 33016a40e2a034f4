//! Errors reported by a device session.

use thiserror::Error;

use crate::protocol::{AckStage, FrameError};
use crate::raster::RasterError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Display {address} not found by any discovery strategy")]
    Discovery { address: String },

    #[error("Connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("Handshake timeout: no {stage} ACK within {timeout_ms}ms")]
    HandshakeTimeout { stage: AckStage, timeout_ms: u64 },

    #[error("Handshake out of order: expected {expected} ACK, got {received}")]
    UnexpectedAck {
        expected: AckStage,
        received: AckStage,
    },

    #[error("Transport write failed: {0}")]
    TransportWrite(#[source] TransportError),

    #[error("Frame encoding failed: {0}")]
    Frame(#[from] FrameError),

    #[error("Image preprocessing failed: {0}")]
    Raster(#[from] RasterError),

    #[error("Not connected")]
    NotConnected,
}

impl DeviceError {
    /// Link-level failure after which the connection should not be reused.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            DeviceError::Connect(_)
                | DeviceError::TransportWrite(TransportError::Disconnected)
                | DeviceError::NotConnected
        )
    }
}
