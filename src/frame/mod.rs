//! Chunked frame codec.
//!
//! Logical payloads are split into chunks small enough for the transport,
//! each prefixed with a 14-byte [`FrameHeader`]. The receiving side feeds
//! chunks into a [`Reassembler`] in any order.
//!
//! ```text
//! payload ──► FrameEncoder ──► [hdr|chunk] [hdr|chunk] ... ──► WebSocket
//!                                                                 │
//! payload ◄── Reassembler ◄───────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `header` | Header layout and payload formats |
//! | `compression` | Deflate helpers |
//! | `encoder` | Chunking with per-label sequence ids |
//! | `reassembler` | Offset-indexed chunk buffering |

// ============================================================================
// Submodules
// ============================================================================

/// Deflate helpers.
pub mod compression;

/// Chunking encoder.
pub mod encoder;

/// Header layout.
pub mod header;

/// Chunk reassembly.
pub mod reassembler;

// ============================================================================
// Re-exports
// ============================================================================

pub use encoder::FrameEncoder;
pub use header::{FrameHeader, HEADER_LEN, MAX_PAYLOAD_LEN, PayloadFormat};
pub use reassembler::{CompletePayload, Reassembler};

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    use proptest::prelude::*;

    use crate::identifiers::{SocketId, StreamLabel};

    fn reassemble_in_order(chunks: &[bytes::Bytes], order: &[usize]) -> Option<CompletePayload> {
        let mut reassembler = Reassembler::default();
        let source = SocketId::new("sender");
        let now = Instant::now();
        let mut done = None;
        for &index in order {
            if let Some(payload) = reassembler.on_chunk(&source, &chunks[index], now) {
                done = Some(payload);
            }
        }
        done
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip_any_order(
            payload in proptest::collection::vec(any::<u8>(), 0..20_000),
            chunk_size in 16usize..4096,
            compression in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let mut encoder = FrameEncoder::new(chunk_size, compression).unwrap();
            let chunks = encoder
                .encode(StreamLabel::new(1000), PayloadFormat::Binary, &payload)
                .unwrap();

            let mut order: Vec<usize> = (0..chunks.len()).collect();
            let mut state = seed;
            for i in (1..order.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                order.swap(i, (state >> 33) as usize % (i + 1));
            }

            let done = reassemble_in_order(&chunks, &order).expect("payload completes");
            prop_assert_eq!(done.data.as_ref(), payload.as_slice());
        }

        #[test]
        fn prop_duplicates_do_not_corrupt(
            payload in proptest::collection::vec(any::<u8>(), 1..8_000),
            chunk_size in 16usize..1024,
            dup in any::<prop::sample::Index>(),
        ) {
            let mut encoder = FrameEncoder::new(chunk_size, false).unwrap();
            let chunks = encoder
                .encode(StreamLabel::new(1000), PayloadFormat::Binary, &payload)
                .unwrap();

            let extra = dup.index(chunks.len());
            let mut order: Vec<usize> = (0..chunks.len()).collect();
            order.insert(0, extra);

            let done = reassemble_in_order(&chunks, &order).expect("payload completes");
            prop_assert_eq!(done.data.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_multi_megabyte_round_trip() {
        let payload: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i * 31 % 257) as u8).collect();
        let mut encoder = FrameEncoder::new(64 * 1024, true).unwrap();
        let chunks = encoder
            .encode(StreamLabel::new(1000), PayloadFormat::Binary, &payload)
            .unwrap();

        let order: Vec<usize> = (0..chunks.len()).rev().collect();
        let done = reassemble_in_order(&chunks, &order).unwrap();
        assert_eq!(done.data.len(), payload.len());
        assert!(done.data.as_ref() == payload.as_slice());
    }
}
