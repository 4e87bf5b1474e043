//! Fixed 14-byte frame header.
//!
//! # Layout (little-endian)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 2 | stream label (`u16`) |
//! | 2 | 2 | sequence id (`u16`) |
//! | 4 | 4 | total length (`i32`) |
//! | 8 | 4 | chunk offset (`i32`) |
//! | 12 | 1 | compressed flag (0/1) |
//! | 13 | 1 | payload format |

// ============================================================================
// Imports
// ============================================================================

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::identifiers::{SequenceId, StreamLabel};

// ============================================================================
// Constants
// ============================================================================

/// Size of the encoded header in bytes.
pub const HEADER_LEN: usize = 14;

/// Largest logical payload a header may declare.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

// ============================================================================
// PayloadFormat
// ============================================================================

/// Describes what a logical payload contains.
///
/// The receiver uses it to pick a consumer; the encoder uses it to decide
/// whether compression is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadFormat {
    /// Opaque application bytes.
    Binary = 0,
    /// UTF-8 text.
    Text = 1,
    /// PCM16 audio packet.
    Audio = 2,
    /// Already-compressed image data (JPEG/PNG).
    Image = 3,
    /// Networked-object control message.
    Object = 4,
    /// Batched transform snapshots.
    Sync = 5,
}

impl PayloadFormat {
    /// Decodes a format byte, returning `None` for unknown values.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Binary),
            1 => Some(Self::Text),
            2 => Some(Self::Audio),
            3 => Some(Self::Image),
            4 => Some(Self::Object),
            5 => Some(Self::Sync),
            _ => None,
        }
    }

    /// Returns the wire byte.
    #[inline]
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns `false` for formats that are already compressed.
    #[inline]
    #[must_use]
    pub const fn allows_compression(self) -> bool {
        !matches!(self, Self::Image)
    }
}

// ============================================================================
// FrameHeader
// ============================================================================

/// Header carried in front of every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream the chunk belongs to.
    pub label: StreamLabel,
    /// Logical payload within the stream.
    pub sequence: SequenceId,
    /// Length of the full (possibly compressed) logical payload.
    pub total_length: u32,
    /// Byte offset of this chunk within the logical payload.
    pub chunk_offset: u32,
    /// Whether the logical payload is deflate-compressed.
    pub compressed: bool,
    /// Payload format.
    pub format: PayloadFormat,
}

impl FrameHeader {
    /// Appends the encoded header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN);
        buf.put_u16_le(self.label.as_u16());
        buf.put_u16_le(self.sequence.as_u16());
        buf.put_i32_le(self.total_length as i32);
        buf.put_i32_le(self.chunk_offset as i32);
        buf.put_u8(u8::from(self.compressed));
        buf.put_u8(self.format.as_byte());
    }

    /// Parses a header from the start of `raw`.
    ///
    /// Returns the header and the chunk bytes that follow it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the input is shorter than
    /// [`HEADER_LEN`], a length field is negative, the declared total
    /// exceeds [`MAX_PAYLOAD_LEN`], the chunk runs past the declared total,
    /// or the format byte is unknown.
    pub fn parse(raw: &[u8]) -> Result<(Self, &[u8])> {
        if raw.len() < HEADER_LEN {
            return Err(Error::malformed_frame(format!(
                "truncated header: {} bytes",
                raw.len()
            )));
        }

        let label = u16::from_le_bytes([raw[0], raw[1]]);
        let sequence = u16::from_le_bytes([raw[2], raw[3]]);
        let total_length = i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let chunk_offset = i32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let compressed = match raw[12] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::malformed_frame(format!(
                    "invalid compressed flag: {other}"
                )));
            }
        };
        let format = PayloadFormat::from_byte(raw[13])
            .ok_or_else(|| Error::malformed_frame(format!("unknown format: {}", raw[13])))?;

        if total_length < 0 || chunk_offset < 0 {
            return Err(Error::malformed_frame("negative length or offset"));
        }
        if total_length as u32 > MAX_PAYLOAD_LEN {
            return Err(Error::malformed_frame(format!(
                "total length {total_length} exceeds {MAX_PAYLOAD_LEN}"
            )));
        }

        let body = &raw[HEADER_LEN..];
        let end = chunk_offset as u64 + body.len() as u64;
        if end > total_length as u64 {
            return Err(Error::malformed_frame(format!(
                "chunk ends at {end} past total length {total_length}"
            )));
        }

        let header = Self {
            label: StreamLabel::new(label),
            sequence: SequenceId::new(sequence),
            total_length: total_length as u32,
            chunk_offset: chunk_offset as u32,
            compressed,
            format,
        };

        Ok((header, body))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameHeader {
        FrameHeader {
            label: StreamLabel::new(1001),
            sequence: SequenceId::new(42),
            total_length: 3000,
            chunk_offset: 1010,
            compressed: true,
            format: PayloadFormat::Audio,
        }
    }

    #[test]
    fn test_encoded_layout() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf);

        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[0..2], &1001u16.to_le_bytes());
        assert_eq!(&buf[2..4], &42u16.to_le_bytes());
        assert_eq!(&buf[4..8], &3000i32.to_le_bytes());
        assert_eq!(&buf[8..12], &1010i32.to_le_bytes());
        assert_eq!(buf[12], 1);
        assert_eq!(buf[13], PayloadFormat::Audio.as_byte());
    }

    #[test]
    fn test_parse_returns_body() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf);
        buf.extend_from_slice(&[9u8; 16]);

        let (header, body) = FrameHeader::parse(&buf).expect("valid header");
        assert_eq!(header, sample());
        assert_eq!(body, &[9u8; 16]);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(FrameHeader::parse(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_parse_rejects_overrun() {
        let mut header = sample();
        header.total_length = 1015;
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(&[0u8; 6]);

        assert!(matches!(
            FrameHeader::parse(&buf),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_oversized_total() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1000);
        buf.put_u16_le(0);
        buf.put_i32_le(i32::MAX);
        buf.put_i32_le(0);
        buf.put_u8(0);
        buf.put_u8(PayloadFormat::Binary.as_byte());
        buf.put_u8(7);

        assert!(matches!(
            FrameHeader::parse(&buf),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_format() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf);
        buf[13] = 200;
        assert!(FrameHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_image_forbids_compression() {
        assert!(!PayloadFormat::Image.allows_compression());
        assert!(PayloadFormat::Binary.allows_compression());
    }
}
