//! Frame codec: splits payloads into header-prefixed chunks.
//!
//! # Chunking
//!
//! With a configured chunk size `C`, every chunk carries up to
//! `C - HEADER_LEN` payload bytes. A 3000-byte payload with `C = 1024`
//! becomes three chunks at offsets 0, 1010 and 2020, each declaring a
//! total length of 3000.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{SequenceId, StreamLabel};

use super::compression::{COMPRESSION_THRESHOLD, deflate};
use super::header::{FrameHeader, HEADER_LEN, MAX_PAYLOAD_LEN, PayloadFormat};

// ============================================================================
// FrameEncoder
// ============================================================================

/// Stateful encoder tracking one sequence counter per stream label.
#[derive(Debug)]
pub struct FrameEncoder {
    /// Transport chunk size including the header.
    chunk_size: usize,
    /// Whether large payloads are deflated.
    compression: bool,
    /// Next sequence id per label.
    sequences: FxHashMap<StreamLabel, SequenceId>,
}

impl FrameEncoder {
    /// Creates an encoder for the given transport chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `chunk_size` leaves no room
    /// for payload after the header.
    pub fn new(chunk_size: usize, compression: bool) -> Result<Self> {
        if chunk_size <= HEADER_LEN {
            return Err(Error::invalid_argument(format!(
                "chunk size {chunk_size} must exceed header size {HEADER_LEN}"
            )));
        }

        Ok(Self {
            chunk_size,
            compression,
            sequences: FxHashMap::default(),
        })
    }

    /// Returns the configured chunk size.
    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the payload bytes carried per chunk.
    #[inline]
    #[must_use]
    pub fn payload_per_chunk(&self) -> usize {
        self.chunk_size - HEADER_LEN
    }

    /// Encodes one logical payload into chunks.
    ///
    /// An empty payload produces a single header-only chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the encoded payload exceeds
    /// [`MAX_PAYLOAD_LEN`], or [`Error::Io`] if compression fails.
    pub fn encode(
        &mut self,
        label: StreamLabel,
        format: PayloadFormat,
        payload: &[u8],
    ) -> Result<Vec<Bytes>> {
        let compress =
            self.compression && format.allows_compression() && payload.len() >= COMPRESSION_THRESHOLD;

        let deflated;
        let body: &[u8] = if compress {
            deflated = deflate(payload)?;
            &deflated
        } else {
            payload
        };

        let total_length = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| {
                Error::invalid_argument(format!("payload of {} bytes is too large", body.len()))
            })?;

        let sequence = self.advance(label);
        let per_chunk = self.payload_per_chunk();

        let mut header = FrameHeader {
            label,
            sequence,
            total_length,
            chunk_offset: 0,
            compressed: compress,
            format,
        };

        if body.is_empty() {
            let mut buf = BytesMut::with_capacity(HEADER_LEN);
            header.encode(&mut buf);
            return Ok(vec![buf.freeze()]);
        }

        let mut chunks = Vec::with_capacity(body.len().div_ceil(per_chunk));
        for (index, piece) in body.chunks(per_chunk).enumerate() {
            header.chunk_offset = (index * per_chunk) as u32;

            let mut buf = BytesMut::with_capacity(HEADER_LEN + piece.len());
            header.encode(&mut buf);
            buf.extend_from_slice(piece);
            chunks.push(buf.freeze());
        }

        trace!(
            label = %label,
            sequence = %sequence,
            total_length,
            chunks = chunks.len(),
            compressed = compress,
            "Payload encoded"
        );

        Ok(chunks)
    }

    /// Returns the sequence id for the next payload on `label` and bumps it.
    fn advance(&mut self, label: StreamLabel) -> SequenceId {
        let slot = self.sequences.entry(label).or_default();
        let current = *slot;
        *slot = current.next();
        current
    }
}

// ============================================================================
// Tests
// ============================================================================
