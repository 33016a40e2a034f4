//! Transport layer module.

#[cfg(feature = "ble")]
pub mod ble;
pub mod mock;
pub mod traits;

#[cfg(feature = "ble")]
pub use ble::{BtleplugConnection, BtleplugTransport};
pub use mock::{MockConnection, MockLookup, MockPeripheral, MockReply, MockTransport, MockWrite};
pub use traits::{
    BleConnection, BleTransport, Discovered, NotificationHandler, TransportError, WriteMode,
};
