//! Image frame envelope.
//!
//! ```text
//! 0      2    3      5        7      9         13       15
//! +------+----+------+--------+------+---------+--------+---------
//! | total| 02 | 0000 | length | 0000 | crc32   | 00 65  | payload
//! +------+----+------+--------+------+---------+--------+---------
//! ```
//!
//! All integers little-endian. `total = length + 15`; the checksum covers the
//! payload only.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{FRAME_HEADER_SIZE, FRAME_SUFFIX, FRAME_TYPE_IMAGE, MAX_PAYLOAD_SIZE};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid type marker: 0x{0:02X}")]
    InvalidMarker(u8),
    #[error("Invalid suffix: {0:02X?}")]
    InvalidSuffix([u8; 2]),
    #[error("Length mismatch: total {total}, payload {payload}")]
    LengthMismatch { total: u16, payload: u16 },
    #[error("Trailing data: {extra} bytes past the declared payload")]
    TrailingBytes { extra: usize },
    #[error("Checksum mismatch: header 0x{expected:08X}, payload 0x{actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CRC-32 (IEEE) as the display firmware computes it.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Fixed 15-byte header in front of every image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_length: u16,
    pub payload_length: u16,
    pub checksum: u32,
}

impl FrameHeader {
    pub const SIZE: usize = FRAME_HEADER_SIZE;

    /// Header describing `payload`.
    pub fn for_payload(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let payload_length = payload.len() as u16;
        Ok(Self {
            total_length: payload_length + Self::SIZE as u16,
            payload_length,
            checksum: checksum(payload),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), FrameError> {
        buf.write_u16::<LittleEndian>(self.total_length)?;
        buf.write_u8(FRAME_TYPE_IMAGE)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(self.payload_length)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.checksum)?;
        buf.extend_from_slice(&FRAME_SUFFIX);
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < Self::SIZE {
            return Err(FrameError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let total_length = cursor.read_u16::<LittleEndian>()?;
        let marker = cursor.read_u8()?;
        if marker != FRAME_TYPE_IMAGE {
            return Err(FrameError::InvalidMarker(marker));
        }
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let payload_length = cursor.read_u16::<LittleEndian>()?;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let checksum = cursor.read_u32::<LittleEndian>()?;
        let suffix = [cursor.read_u8()?, cursor.read_u8()?];
        if suffix != FRAME_SUFFIX {
            return Err(FrameError::InvalidSuffix(suffix));
        }
        if total_length as usize != payload_length as usize + Self::SIZE {
            return Err(FrameError::LengthMismatch {
                total: total_length,
                payload: payload_length,
            });
        }
        Ok(Self {
            total_length,
            payload_length,
            checksum,
        })
    }
}

/// Wrap `payload` in the image envelope.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let header = FrameHeader::for_payload(payload)?;
    let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    header.write_to(&mut frame)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decoded and verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse an envelope and check its lengths and checksum.
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::from_bytes(data)?;
        let payload = &data[FrameHeader::SIZE..];
        let declared = header.payload_length as usize;
        if payload.len() < declared {
            return Err(FrameError::BufferTooSmall {
                expected: FrameHeader::SIZE + declared,
                actual: data.len(),
            });
        }
        if payload.len() > declared {
            return Err(FrameError::TrailingBytes {
                extra: payload.len() - declared,
            });
        }
        let actual = checksum(payload);
        if actual != header.checksum {
            return Err(FrameError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hundred_byte_payload_layout() {
        let payload: Vec<u8> = (0..100u8).collect();
        let frame = build_frame(&payload).unwrap();

        assert_eq!(frame.len(), 115);
        assert_eq!(&frame[0..2], &[0x73, 0x00]);
        assert_eq!(frame[2], 0x02);
        assert_eq!(&frame[3..5], &[0x00, 0x00]);
        assert_eq!(&frame[5..7], &[0x64, 0x00]);
        assert_eq!(&frame[7..9], &[0x00, 0x00]);
        assert_eq!(&frame[9..13], &checksum(&payload).to_le_bytes());
        assert_eq!(&frame[13..15], &[0x00, 0x65]);
        assert_eq!(&frame[15..], payload.as_slice());
    }

    #[test]
    fn test_known_checksum() {
        // CRC-32/IEEE check value.
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
        let frame = build_frame(b"123456789").unwrap();
        assert_eq!(&frame[9..13], &[0x26, 0x39, 0xF4, 0xCB]);
    }

    #[test]
    fn test_checksum_ignores_header() {
        let payload = [0xAA; 32];
        let frame = build_frame(&payload).unwrap();
        let header = FrameHeader::from_bytes(&frame).unwrap();
        assert_eq!(header.checksum, checksum(&payload));
        assert_ne!(header.checksum, checksum(&frame));
    }

    #[test]
    fn test_empty_payload() {
        let frame = build_frame(&[]).unwrap();
        assert_eq!(frame.len(), FrameHeader::SIZE);
        let header = FrameHeader::from_bytes(&frame).unwrap();
        assert_eq!(header.total_length, 15);
        assert_eq!(header.payload_length, 0);
        assert_eq!(header.checksum, 0);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            build_frame(&payload),
            Err(FrameError::PayloadTooLarge { .. })
        ));
        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        let frame = build_frame(&payload).unwrap();
        assert_eq!(&frame[0..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let mut frame = build_frame(b"hello display").unwrap();
        frame[20] ^= 0x01;
        assert!(matches!(
            Frame::parse(&frame),
            Err(FrameError::ChecksumMismatch { .. })
        ));

        let mut frame = build_frame(b"hello display").unwrap();
        frame[2] = 0x03;
        assert!(matches!(
            Frame::parse(&frame),
            Err(FrameError::InvalidMarker(0x03))
        ));

        let mut frame = build_frame(b"hello display").unwrap();
        frame[14] = 0x66;
        assert!(matches!(
            Frame::parse(&frame),
            Err(FrameError::InvalidSuffix(_))
        ));

        let frame = build_frame(b"hello display").unwrap();
        assert!(matches!(
            Frame::parse(&frame[..frame.len() - 1]),
            Err(FrameError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_trailing_bytes() {
        let mut frame = build_frame(b"hello display").unwrap();
        frame.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert!(matches!(
            Frame::parse(&frame),
            Err(FrameError::TrailingBytes { extra: 3 })
        ));
    }

    #[test]
    fn test_header_too_small() {
        assert!(matches!(
            FrameHeader::from_bytes(&[0x0F, 0x00, 0x02]),
            Err(FrameError::BufferTooSmall {
                expected: 15,
                actual: 3
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_lengths_and_checksum(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = build_frame(&payload).unwrap();
            let parsed = Frame::parse(&frame).unwrap();
            prop_assert_eq!(parsed.header.total_length as usize, payload.len() + 15);
            prop_assert_eq!(parsed.header.payload_length as usize, payload.len());
            prop_assert_eq!(parsed.header.checksum, crc32fast::hash(&payload));
            prop_assert_eq!(parsed.payload, payload.as_slice());
        }
    }
}
