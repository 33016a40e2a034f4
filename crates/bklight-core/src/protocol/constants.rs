//! Protocol constants for the BK Light ACT1026 display.
//!
//! Byte sequences captured from the vendor app; the firmware accepts nothing else.

use uuid::Uuid;

// ============================================================================
// Device Identification
// ============================================================================

/// Default display name for new configurations.
pub const DEFAULT_NAME: &str = "BK Light Display";

/// Advertised local-name prefixes of known units.
pub const KNOWN_NAME_PREFIXES: &[&str] = &["LED_BLE_", "BK_LIGHT", "BJ_LED"];

// ============================================================================
// GATT Characteristics
// ============================================================================

/// Characteristic the host writes handshakes and frames to.
pub const UUID_WRITE: Uuid = Uuid::from_u128(0x0000fa02_0000_1000_8000_00805f9b34fb);

/// Characteristic the display notifies acknowledgments on.
pub const UUID_NOTIFY: Uuid = Uuid::from_u128(0x0000fa03_0000_1000_8000_00805f9b34fb);

// ============================================================================
// Display Geometry
// ============================================================================

pub const DISPLAY_WIDTH: u32 = 32;
pub const DISPLAY_HEIGHT: u32 = 32;

// ============================================================================
// Handshake (Host -> Device)
// ============================================================================

/// First handshake, answered by a stage 1 acknowledgment.
pub const HANDSHAKE_FIRST: [u8; 8] = [0x08, 0x00, 0x01, 0x80, 0x0E, 0x06, 0x32, 0x00];

/// Second handshake, sometimes answered by a stage 2 acknowledgment.
pub const HANDSHAKE_SECOND: [u8; 4] = [0x04, 0x00, 0x05, 0x80];

// ============================================================================
// Acknowledgments (Device -> Host)
// ============================================================================

/// Only this many leading bytes of a notification are compared.
pub const ACK_PREFIX_LEN: usize = 5;

pub const ACK_STAGE_ONE: [u8; 12] = [
    0x0C, 0x00, 0x01, 0x80, 0x81, 0x06, 0x32, 0x00, 0x00, 0x01, 0x00, 0x01,
];
pub const ACK_STAGE_ONE_ALT: [u8; 11] = [
    0x0B, 0x00, 0x01, 0x80, 0x83, 0x06, 0x32, 0x00, 0x00, 0x01, 0x00,
];
pub const ACK_STAGE_TWO: [u8; 8] = [0x08, 0x00, 0x05, 0x80, 0x0B, 0x03, 0x07, 0x02];
pub const ACK_STAGE_TWO_ALT: [u8; 8] = [0x08, 0x00, 0x05, 0x80, 0x0E, 0x03, 0x07, 0x01];

/// Frame accepted and shown.
pub const ACK_STAGE_THREE: [u8; 5] = [0x05, 0x00, 0x02, 0x00, 0x03];

// ============================================================================
// Frame Envelope
// ============================================================================

/// Fixed header size in front of the payload.
pub const FRAME_HEADER_SIZE: usize = 15;

/// Image frame type marker.
pub const FRAME_TYPE_IMAGE: u8 = 0x02;

/// Trailing two header bytes.
pub const FRAME_SUFFIX: [u8; 2] = [0x00, 0x65];

/// Largest payload whose total length still fits the 16-bit length field.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - FRAME_HEADER_SIZE;

// ============================================================================
// Timing
// ============================================================================

/// Mandatory acknowledgment wait (stage 1 and stage 3).
pub const ACK_TIMEOUT_MS: u64 = 5000;

/// Stage 2 wait; the firmware does not always answer.
pub const OPTIONAL_ACK_TIMEOUT_MS: u64 = 2000;

/// Pause between handshake writes required by the firmware.
pub const STAGE_DELAY_MS: u64 = 200;

/// Per-strategy discovery timeout.
pub const DISCOVERY_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_BRIGHTNESS: f32 = 0.85;
pub const MIN_BRIGHTNESS: f32 = 0.1;
pub const MAX_BRIGHTNESS: f32 = 1.0;
