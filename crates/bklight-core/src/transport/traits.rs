//! BLE transport layer abstraction.
//!
//! Defines the `BleTransport` / `BleConnection` traits the session drives,
//! allowing different implementations (btleplug, mock, etc.).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Callback the transport invokes for every notification, from its own
/// delivery thread.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Whether a characteristic write waits for the link-layer response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// A peripheral seen during a scan.
#[derive(Debug, Clone)]
pub struct Discovered<P> {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub peripheral: P,
}

/// Abstract BLE central.
///
/// This trait enables:
/// - Production implementation using btleplug
/// - Mock implementation for unit testing
pub trait BleTransport: Send + Sync {
    /// Resolved, not yet connected, peripheral.
    type Peripheral: Send;
    /// Live link to a peripheral.
    type Connection: BleConnection;

    /// Look up a peripheral by address.
    ///
    /// With `cached` the adapter's list of previously seen devices may answer;
    /// without it only a fresh advertisement within `timeout` counts.
    fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
        cached: bool,
    ) -> Result<Option<Self::Peripheral>, TransportError>;

    /// Scan for `timeout` and return everything seen.
    fn scan(&self, timeout: Duration)
    -> Result<Vec<Discovered<Self::Peripheral>>, TransportError>;

    /// Open a link to a resolved peripheral.
    fn connect(&self, peripheral: Self::Peripheral) -> Result<Self::Connection, TransportError>;
}

/// A live GATT link.
pub trait BleConnection: Send + Sync {
    /// Write raw bytes to a characteristic.
    fn write(&self, characteristic: Uuid, data: &[u8], mode: WriteMode)
    -> Result<(), TransportError>;

    /// Route notifications of `characteristic` to `handler`.
    fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;

    fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if the link is still up.
    fn is_connected(&self) -> bool;
}
