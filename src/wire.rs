//! The schema registry message header: a zero magic byte followed by the
//! schema ID as a big-endian `u32`, then the Avro body.

use crate::config::{HEADER_LEN, MAGIC_BYTE};
use crate::error::{AvrowErr, AvrowResult};
use byteorder::{BigEndian, ByteOrder};

/// Appends the header for schema `id` to `buf`.
///
/// ```rust
/// let mut buf = vec![];
/// avrow_typed::append_schema_id(&mut buf, 258).unwrap();
/// assert_eq!(buf, [0, 0, 0, 1, 2]);
/// ```
pub fn append_schema_id(buf: &mut Vec<u8>, id: i64) -> AvrowResult<()> {
    let id = u32::try_from(id).map_err(|_| AvrowErr::SchemaIdOutOfRange(id))?;
    let mut header = [MAGIC_BYTE; HEADER_LEN];
    BigEndian::write_u32(&mut header[1..], id);
    buf.extend_from_slice(&header);
    Ok(())
}

/// Splits a message into its schema ID and body. Returns `None` if the
/// message is too short or does not start with the magic byte.
pub fn decode_schema_id(msg: &[u8]) -> Option<(i64, &[u8])> {
    if msg.len() < HEADER_LEN || msg[0] != MAGIC_BYTE {
        return None;
    }
    let id = BigEndian::read_u32(&msg[1..HEADER_LEN]);
    Some((i64::from(id), &msg[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let mut buf = vec![9];
        append_schema_id(&mut buf, 0x0102_0304).unwrap();
        assert_eq!(buf, [9, 0, 1, 2, 3, 4]);
        buf.extend_from_slice(b"body");
        assert_eq!(decode_schema_id(&buf[1..]), Some((0x0102_0304, &b"body"[..])));
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(decode_schema_id(&[0, 0, 0]), None);
        assert_eq!(decode_schema_id(&[1, 0, 0, 0, 1]), None);
        assert_eq!(decode_schema_id(&[0, 0, 0, 0, 1]), Some((1, &[][..])));
        let mut buf = vec![];
        assert_eq!(
            append_schema_id(&mut buf, -1),
            Err(AvrowErr::SchemaIdOutOfRange(-1))
        );
        assert_eq!(
            append_schema_id(&mut buf, i64::from(u32::MAX) + 1),
            Err(AvrowErr::SchemaIdOutOfRange(i64::from(u32::MAX) + 1))
        );
        assert!(buf.is_empty());
    }
}
