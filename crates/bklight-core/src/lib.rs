//! BKLight-Core: BK Light 32×32 BLE LED display protocol in Rust.
//!
//! This crate drives the display's image upload: discover the panel, open a
//! GATT link, run the acknowledged handshake and deliver one PNG frame.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: UUIDs, handshake bytes, ACK classifier, frame envelope
//! - **Transport**: BLE central abstraction (btleplug behind the `ble` feature, mock)
//! - **Discovery**: Ordered address/cache/name-scan strategies
//! - **Raster**: Fit, rotate, dim and PNG-encode images
//! - **Text**: Centred text and clock faces drawn onto a panel canvas
//! - **State**: Handshake state machine and ACK signal
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use bklight_core::{DeviceConfig, DeviceSession, MockTransport};
//!
//! let config = DeviceConfig::new("CC:42:DE:9A:B7:3B");
//! let transport = MockTransport::responsive(&config.address);
//! let mut session = DeviceSession::new(transport, config);
//!
//! let image = image::open("sprite.png").expect("image");
//! session.send_image(&image).expect("transfer failed");
//! session.disconnect();
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod protocol;
pub mod raster;
pub mod session;
pub mod state;
pub mod text;
pub mod transport;

// Re-exports for convenience
pub use config::{ConfigError, DeviceConfig, DiscoveryConfig, HandshakeTiming};
pub use discovery::DiscoveryStrategy;
pub use error::DeviceError;
pub use events::{DeviceEvent, DeviceObserver, NullObserver, PacketDirection, TracingObserver};
pub use protocol::{AckStage, Frame, FrameError, FrameHeader, build_frame};
pub use raster::{RasterError, Rotation};
pub use session::DeviceSession;
pub use state::HandshakeState;
pub use text::{TextStyle, render_clock, render_text};
#[cfg(feature = "ble")]
pub use transport::BtleplugTransport;
pub use transport::{BleConnection, BleTransport, MockTransport, TransportError};
