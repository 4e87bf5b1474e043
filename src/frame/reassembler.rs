//! Frame reassembler: rebuilds logical payloads from chunks.
//!
//! Chunks are stored by their declared offset, so delivery order does not
//! matter and a repeated chunk replaces the same range without being counted
//! twice. A chunk overlapping a different stored range is dropped. Memory
//! grows with the bytes actually received, never with the declared total.
//!
//! Chunk sets are keyed by sender and stream label; a chunk with a different
//! sequence id supersedes whatever set was in progress, and a chunk arriving
//! after its set completed starts a new one.
//!
//! Lost chunks leave a set incomplete. Without an idle timeout that set is
//! only released when a newer sequence arrives on the same label; with one,
//! [`Reassembler::evict_idle`] drops it.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::identifiers::{SequenceId, SocketId, StreamLabel};

use super::compression::inflate;
use super::header::{FrameHeader, PayloadFormat};

// ============================================================================
// Types
// ============================================================================

/// Reassembly key: one in-progress payload per sender and label.
type SetKey = (SocketId, StreamLabel);

/// A fully reassembled (and inflated) logical payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletePayload {
    /// Stream the payload arrived on.
    pub label: StreamLabel,
    /// Sequence id it was sent with.
    pub sequence: SequenceId,
    /// Declared payload format.
    pub format: PayloadFormat,
    /// Original payload bytes.
    pub data: Bytes,
}

// ============================================================================
// ChunkSet
// ============================================================================

/// Reassembly state for one logical payload.
struct ChunkSet {
    sequence: SequenceId,
    compressed: bool,
    format: PayloadFormat,
    total_length: u32,
    /// Received ranges by offset; never overlapping.
    pieces: BTreeMap<u32, Vec<u8>>,
    received: usize,
    last_touched: Instant,
}

impl ChunkSet {
    fn new(header: &FrameHeader, now: Instant) -> Self {
        Self {
            sequence: header.sequence,
            compressed: header.compressed,
            format: header.format,
            total_length: header.total_length,
            pieces: BTreeMap::new(),
            received: 0,
            last_touched: now,
        }
    }

    fn matches(&self, header: &FrameHeader) -> bool {
        self.sequence == header.sequence
            && self.total_length == header.total_length
            && self.compressed == header.compressed
            && self.format == header.format
    }

    /// Stores a chunk. Returns `false` if it overlaps a different range.
    fn write(&mut self, offset: u32, body: &[u8], now: Instant) -> bool {
        self.last_touched = now;
        if body.is_empty() {
            return true;
        }

        let end = u64::from(offset) + body.len() as u64;

        if let Some((&start, piece)) = self.pieces.range(..=offset).next_back() {
            if start == offset && piece.len() == body.len() {
                self.pieces.insert(offset, body.to_vec());
                return true;
            }
            if u64::from(start) + piece.len() as u64 > u64::from(offset) {
                return false;
            }
        }

        if let Some((&next, _)) = self.pieces.range(offset.saturating_add(1)..).next() {
            if u64::from(next) < end {
                return false;
            }
        }

        self.pieces.insert(offset, body.to_vec());
        self.received += body.len();
        true
    }

    fn is_complete(&self) -> bool {
        self.received >= self.total_length as usize
    }

    fn into_buffer(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.total_length as usize);
        for piece in self.pieces.into_values() {
            buffer.extend_from_slice(&piece);
        }
        buffer
    }
}

// ============================================================================
// Reassembler
// ============================================================================

/// Buffers chunks until their logical payload is complete.
pub struct Reassembler {
    /// In-progress chunk sets.
    sets: FxHashMap<SetKey, ChunkSet>,
    /// Idle chunk sets older than this are evicted.
    idle_timeout: Option<Duration>,
}

impl Reassembler {
    /// Creates a reassembler.
    ///
    /// `idle_timeout = None` keeps incomplete sets until superseded.
    #[must_use]
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            sets: FxHashMap::default(),
            idle_timeout,
        }
    }

    /// Returns the number of incomplete chunk sets.
    #[inline]
    #[must_use]
    pub fn pending_sets(&self) -> usize {
        self.sets.len()
    }

    /// Feeds one raw chunk from `source`.
    ///
    /// Returns the completed payload when this chunk finishes it. Malformed
    /// and overlapping chunks are dropped without surfacing an error.
    pub fn on_chunk(
        &mut self,
        source: &SocketId,
        raw: &[u8],
        now: Instant,
    ) -> Option<CompletePayload> {
        let (header, body) = match FrameHeader::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!(error = %e, source = %source, "Dropping malformed chunk");
                return None;
            }
        };

        let key = (source.clone(), header.label);

        let in_progress = self.sets.get(&key).is_some_and(|set| set.matches(&header));
        if !in_progress {
            if let Some(old) = self.sets.remove(&key) {
                debug!(
                    label = %header.label,
                    old = %old.sequence,
                    new = %header.sequence,
                    received = old.received,
                    total = old.total_length,
                    "Incomplete chunk set superseded"
                );
            }
            self.sets.insert(key.clone(), ChunkSet::new(&header, now));
        }

        let set = self.sets.get_mut(&key)?;
        if !set.write(header.chunk_offset, body, now) {
            trace!(
                label = %header.label,
                offset = header.chunk_offset,
                len = body.len(),
                "Dropping overlapping chunk"
            );
            return None;
        }

        if !set.is_complete() {
            return None;
        }

        let set = self.sets.remove(&key)?;
        let sequence = set.sequence;
        let format = set.format;
        let compressed = set.compressed;
        let buffer = set.into_buffer();

        let data = if compressed {
            match inflate(&buffer) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, label = %header.label, "Dropping undecompressable payload");
                    return None;
                }
            }
        } else {
            buffer
        };

        trace!(label = %header.label, sequence = %sequence, len = data.len(), "Payload reassembled");

        Some(CompletePayload {
            label: header.label,
            sequence,
            format,
            data: Bytes::from(data),
        })
    }

    /// Drops chunk sets idle for longer than the configured timeout.
    ///
    /// Returns the number of evicted sets; always 0 without a timeout.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };

        let before = self.sets.len();
        self.sets
            .retain(|_, set| now.saturating_duration_since(set.last_touched) <= timeout);
        let evicted = before - self.sets.len();

        if evicted > 0 {
            debug!(evicted, "Evicted idle chunk sets");
        }
        evicted
    }

    /// Drops in-progress sets whose sender fails `keep`.
    ///
    /// Returns the number of dropped sets.
    pub fn retain_sources<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&SocketId) -> bool,
    {
        let before = self.sets.len();
        self.sets.retain(|(source, _), _| keep(source));
        before - self.sets.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(None)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::frame::FrameEncoder;

    fn peer() -> SocketId {
        SocketId::new("peer")
    }

    fn encode(chunk_size: usize, compression: bool, payload: &[u8]) -> Vec<Bytes> {
        FrameEncoder::new(chunk_size, compression)
            .unwrap()
            .encode(StreamLabel::new(1000), PayloadFormat::Binary, payload)
            .unwrap()
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let chunks = encode(1024, false, &payload);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        assert!(reassembler.on_chunk(&peer(), &chunks[2], now).is_none());
        assert!(reassembler.on_chunk(&peer(), &chunks[0], now).is_none());
        let done = reassembler
            .on_chunk(&peer(), &chunks[1], now)
            .expect("payload complete");

        assert_eq!(done.data.as_ref(), payload.as_slice());
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_duplicate_chunk_not_double_counted() {
        let payload = vec![3u8; 2500];
        let chunks = encode(1024, false, &payload);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        assert!(reassembler.on_chunk(&peer(), &chunks[0], now).is_none());
        assert!(reassembler.on_chunk(&peer(), &chunks[0], now).is_none());
        assert!(reassembler.on_chunk(&peer(), &chunks[1], now).is_none());
        let done = reassembler.on_chunk(&peer(), &chunks[2], now).unwrap();
        assert_eq!(done.data.len(), 2500);
    }

    #[test]
    fn test_reused_sequence_after_wrap_starts_new_set() {
        let mut encoder = FrameEncoder::new(64, false).unwrap();
        let label = StreamLabel::new(1000);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        let first = encoder.encode(label, PayloadFormat::Binary, b"first").unwrap();
        let done = reassembler.on_chunk(&peer(), &first[0], now).unwrap();

        // The sender wraps its counter talking to other peers.
        for _ in 0..1024 {
            encoder.encode(label, PayloadFormat::Binary, b"elsewhere").unwrap();
        }

        let second = encoder.encode(label, PayloadFormat::Binary, b"second").unwrap();
        let again = reassembler.on_chunk(&peer(), &second[0], now).expect("second payload");
        assert_eq!(again.sequence, done.sequence);
        assert_eq!(again.data.as_ref(), b"second");
    }

    #[test]
    fn test_chunk_after_completion_starts_new_set() {
        let chunks = encode(64, false, &[4u8; 100]);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        assert!(reassembler.on_chunk(&peer(), &chunks[0], now).is_none());
        assert!(reassembler.on_chunk(&peer(), &chunks[1], now).is_some());
        assert!(reassembler.on_chunk(&peer(), &chunks[0], now).is_none());
        assert_eq!(reassembler.pending_sets(), 1);
    }

    #[test]
    fn test_overlapping_chunk_rejected() {
        let label = StreamLabel::new(1000);
        let chunk = |offset: u32, body: &[u8]| {
            let mut buf = bytes::BytesMut::new();
            FrameHeader {
                label,
                sequence: SequenceId::new(0),
                total_length: 20,
                chunk_offset: offset,
                compressed: false,
                format: PayloadFormat::Binary,
            }
            .encode(&mut buf);
            buf.extend_from_slice(body);
            buf.freeze()
        };
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        assert!(reassembler.on_chunk(&peer(), &chunk(0, &[1u8; 10]), now).is_none());
        // Overlaps [0, 10) and would otherwise count 10 more bytes.
        assert!(reassembler.on_chunk(&peer(), &chunk(5, &[2u8; 10]), now).is_none());
        assert!(reassembler.on_chunk(&peer(), &chunk(12, &[3u8; 8]), now).is_none());
        assert!(reassembler.on_chunk(&peer(), &chunk(10, &[4u8; 4]), now).is_none());
        let done = reassembler.on_chunk(&peer(), &chunk(10, &[4u8; 2]), now).unwrap();

        let mut expected = vec![1u8; 10];
        expected.extend_from_slice(&[4, 4]);
        expected.extend_from_slice(&[3u8; 8]);
        assert_eq!(done.data.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_oversized_declaration_holds_no_buffer() {
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        for label in 1000..1200u16 {
            let mut buf = bytes::BytesMut::new();
            FrameHeader {
                label: StreamLabel::new(label),
                sequence: SequenceId::new(0),
                total_length: i32::MAX as u32,
                chunk_offset: 0,
                compressed: false,
                format: PayloadFormat::Binary,
            }
            .encode(&mut buf);
            buf.extend_from_slice(&[0u8]);
            assert!(reassembler.on_chunk(&peer(), &buf, now).is_none());
        }
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_retain_sources() {
        let chunks = encode(64, false, &[5u8; 200]);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        reassembler.on_chunk(&peer(), &chunks[0], now);
        reassembler.on_chunk(&SocketId::new("other"), &chunks[0], now);
        assert_eq!(reassembler.retain_sources(|s| *s != peer()), 1);
        assert_eq!(reassembler.pending_sets(), 1);
    }

    #[test]
    fn test_compressed_round_trip() {
        let payload = b"compress me ".repeat(400);
        let chunks = encode(256, true, &payload);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        let mut result = None;
        for chunk in chunks.iter().rev() {
            result = reassembler.on_chunk(&peer(), chunk, now).or(result);
        }
        assert_eq!(result.unwrap().data.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_empty_payload_completes_immediately() {
        let chunks = encode(64, false, &[]);
        let mut reassembler = Reassembler::default();
        let done = reassembler
            .on_chunk(&peer(), &chunks[0], Instant::now())
            .unwrap();
        assert!(done.data.is_empty());
    }

    #[test]
    fn test_newer_sequence_supersedes() {
        let mut encoder = FrameEncoder::new(64, false).unwrap();
        let label = StreamLabel::new(1000);
        let first = encoder.encode(label, PayloadFormat::Binary, &[1u8; 200]).unwrap();
        let second = encoder.encode(label, PayloadFormat::Binary, &[2u8; 10]).unwrap();
        let mut reassembler = Reassembler::default();
        let now = Instant::now();

        assert!(reassembler.on_chunk(&peer(), &first[0], now).is_none());
        let done = reassembler.on_chunk(&peer(), &second[0], now).unwrap();
        assert_eq!(done.data.as_ref(), &[2u8; 10]);
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_sources_do_not_collide() {
        let payload_a = vec![0xAAu8; 150];
        let payload_b = vec![0xBBu8; 150];
        let a = encode(64, false, &payload_a);
        let b = encode(64, false, &payload_b);
        let mut reassembler = Reassembler::default();
        let now = Instant::now();
        let other = SocketId::new("other");

        assert!(reassembler.on_chunk(&peer(), &a[0], now).is_none());
        assert!(reassembler.on_chunk(&other, &b[0], now).is_none());
        assert!(reassembler.on_chunk(&peer(), &a[1], now).is_none());
        assert!(reassembler.on_chunk(&other, &b[1], now).is_none());
        assert_eq!(
            reassembler.on_chunk(&other, &b[2], now).unwrap().data.as_ref(),
            payload_b.as_slice()
        );
        assert_eq!(
            reassembler.on_chunk(&peer(), &a[2], now).unwrap().data.as_ref(),
            payload_a.as_slice()
        );
    }

    #[test]
    fn test_malformed_chunk_dropped() {
        let mut reassembler = Reassembler::default();
        assert!(reassembler.on_chunk(&peer(), &[1, 2, 3], Instant::now()).is_none());
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_idle_eviction() {
        let chunks = encode(64, false, &[5u8; 200]);
        let mut reassembler = Reassembler::new(Some(Duration::from_secs(10)));
        let start = Instant::now();

        reassembler.on_chunk(&peer(), &chunks[0], start);
        assert_eq!(reassembler.evict_idle(start + Duration::from_secs(5)), 0);
        assert_eq!(reassembler.evict_idle(start + Duration::from_secs(11)), 1);
        assert_eq!(reassembler.pending_sets(), 0);
    }

    #[test]
    fn test_no_eviction_without_timeout() {
        let chunks = encode(64, false, &[5u8; 200]);
        let mut reassembler = Reassembler::default();
        let start = Instant::now();

        reassembler.on_chunk(&peer(), &chunks[0], start);
        assert_eq!(reassembler.evict_idle(start + Duration::from_secs(3600)), 0);
        assert_eq!(reassembler.pending_sets(), 1);
    }
}
