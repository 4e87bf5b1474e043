//! Little-endian field helpers shared by the binary message codecs.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::identifiers::SocketId;

/// Fails with a protocol error unless `buf` holds at least `len` bytes.
#[inline]
pub(crate) fn ensure(buf: &impl Buf, len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::protocol(format!(
            "truncated {what}: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Writes a `u16` length-prefixed UTF-8 string.
pub(crate) fn put_str(buf: &mut impl BufMut, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16_le(len as u16);
    buf.put_slice(&bytes[..len]);
}

/// Reads a `u16` length-prefixed UTF-8 string.
pub(crate) fn get_str(buf: &mut impl Buf, what: &str) -> Result<String> {
    ensure(&*buf, 2, what)?;
    let len = buf.get_u16_le() as usize;
    ensure(&*buf, len, what)?;
    let mut raw = vec![0; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| Error::protocol(format!("{what} is not UTF-8")))
}

/// Reads a length-prefixed socket id.
#[inline]
pub(crate) fn get_socket_id(buf: &mut impl Buf, what: &str) -> Result<SocketId> {
    get_str(buf, what).map(SocketId::new)
}

/// Reads a little-endian `i32`.
#[inline]
pub(crate) fn get_i32(buf: &mut impl Buf, what: &str) -> Result<i32> {
    ensure(&*buf, 4, what)?;
    Ok(buf.get_i32_le())
}

/// Reads a little-endian `f32`.
#[inline]
pub(crate) fn get_f32(buf: &mut impl Buf, what: &str) -> Result<f32> {
    ensure(&*buf, 4, what)?;
    Ok(buf.get_f32_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut buf = Vec::new();
        put_str(&mut buf, "Marker");
        let mut slice = buf.as_slice();
        assert_eq!(get_str(&mut slice, "prefab").unwrap(), "Marker");
        assert!(slice.is_empty());
    }

    #[test]
    fn test_truncated_string() {
        let mut slice: &[u8] = &[5, 0, b'a'];
        assert!(get_str(&mut slice, "prefab").is_err());
    }
}
