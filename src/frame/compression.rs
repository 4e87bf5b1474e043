//! Deflate compression for large payloads.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::{Error, Result};

use super::header::MAX_PAYLOAD_LEN;

/// Payloads shorter than this are sent uncompressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Upper bound on inflated output, guards against decompression bombs.
pub const MAX_INFLATED_LEN: u64 = MAX_PAYLOAD_LEN as u64;

/// Compresses `data` with raw deflate.
///
/// # Errors
///
/// Returns [`Error::Io`] if the encoder fails.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses raw deflate `data`.
///
/// # Errors
///
/// Returns [`Error::Io`] on corrupt input and [`Error::Protocol`] if the
/// output would exceed [`MAX_INFLATED_LEN`].
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    DeflateDecoder::new(data)
        .take(MAX_INFLATED_LEN + 1)
        .read_to_end(&mut out)?;

    if out.len() as u64 > MAX_INFLATED_LEN {
        return Err(Error::protocol("inflated payload exceeds limit"));
    }

    Ok(out)
}
