use crate::error::{read_err, AvrowErr, AvrowResult};
use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarIntReader;
use integer_encoding::VarIntWriter;

// Primitive readers over an in-memory message body. Each call advances the slice.

// A zig-zag encoded i64 never spans more than ten bytes.
const MAX_VARINT_LEN: usize = 10;

pub(crate) fn decode_long(reader: &mut &[u8]) -> AvrowResult<i64> {
    let window = &reader[..reader.len().min(MAX_VARINT_LEN)];
    if !window.iter().any(|b| b & 0x80 == 0) {
        return Err(if window.len() < MAX_VARINT_LEN {
            AvrowErr::Eof
        } else {
            AvrowErr::MalformedVarint
        });
    }
    reader.read_varint::<i64>().map_err(read_err)
}

pub(crate) fn decode_int(reader: &mut &[u8]) -> AvrowResult<i32> {
    let v = decode_long(reader)?;
    if v < i32::MIN as i64 || v > i32::MAX as i64 {
        return Err(AvrowErr::DecodeFailed(format!("int value {} out of range", v)));
    }
    Ok(v as i32)
}

pub(crate) fn decode_bool(reader: &mut &[u8]) -> AvrowResult<bool> {
    let buf = take(reader, 1)?;
    match buf[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(AvrowErr::DecodeFailed(format!("invalid boolean byte {}", other))),
    }
}

pub(crate) fn decode_float(reader: &mut &[u8]) -> AvrowResult<f32> {
    Ok(LittleEndian::read_f32(take(reader, 4)?))
}

pub(crate) fn decode_double(reader: &mut &[u8]) -> AvrowResult<f64> {
    Ok(LittleEndian::read_f64(take(reader, 8)?))
}

pub(crate) fn decode_bytes(reader: &mut &[u8]) -> AvrowResult<Vec<u8>> {
    let len = decode_long(reader)?;
    if len < 0 {
        return Err(AvrowErr::DecodeFailed(format!("negative length {}", len)));
    }
    // The length is checked against the remaining input before allocating.
    let len = usize::try_from(len).map_err(|_| AvrowErr::Eof)?;
    Ok(take(reader, len)?.to_vec())
}

pub(crate) fn decode_string(reader: &mut &[u8]) -> AvrowResult<String> {
    let buf = decode_bytes(reader)?;
    String::from_utf8(buf)
        .map_err(|_| AvrowErr::DecodeFailed("Failed decoding string from bytes".to_string()))
}

pub(crate) fn decode_fixed(reader: &mut &[u8], size: usize) -> AvrowResult<Vec<u8>> {
    Ok(take(reader, size)?.to_vec())
}

fn take<'a>(reader: &mut &'a [u8], n: usize) -> AvrowResult<&'a [u8]> {
    if reader.len() < n {
        return Err(AvrowErr::Eof);
    }
    let (head, tail) = reader.split_at(n);
    *reader = tail;
    Ok(head)
}

// Writers append to a growable buffer and cannot fail.

pub(crate) fn encode_long(value: i64, writer: &mut Vec<u8>) {
    // Writes into a Vec are infallible.
    let _ = writer.write_varint(value);
}

pub(crate) fn encode_bool(value: bool, writer: &mut Vec<u8>) {
    writer.push(value as u8);
}

pub(crate) fn encode_float(value: f32, writer: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    LittleEndian::write_f32(&mut buf, value);
    writer.extend_from_slice(&buf);
}

pub(crate) fn encode_double(value: f64, writer: &mut Vec<u8>) {
    let mut buf = [0u8; 8];
    LittleEndian::write_f64(&mut buf, value);
    writer.extend_from_slice(&buf);
}

pub(crate) fn encode_bytes(value: &[u8], writer: &mut Vec<u8>) {
    encode_long(value.len() as i64, writer);
    writer.extend_from_slice(value);
}

pub(crate) fn encode_raw_bytes(value: &[u8], writer: &mut Vec<u8>) {
    writer.extend_from_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_longs() {
        let mut buf = vec![];
        encode_long(20, &mut buf);
        encode_long(-1, &mut buf);
        encode_long(34, &mut buf);
        assert_eq!(buf, vec![40, 1, 68]);

        let mut input = buf.as_slice();
        assert_eq!(decode_long(&mut input).unwrap(), 20);
        assert_eq!(decode_long(&mut input).unwrap(), -1);
        assert_eq!(decode_long(&mut input).unwrap(), 34);
        assert_eq!(decode_long(&mut input), Err(AvrowErr::Eof));
    }

    #[test]
    fn truncated_varint_is_eof() {
        let mut input: &[u8] = &[0x80, 0x80];
        assert_eq!(decode_long(&mut input), Err(AvrowErr::Eof));
    }

    #[test]
    fn overlong_varint_is_malformed() {
        let mut input: &[u8] = &[0xff; 11];
        assert_eq!(decode_long(&mut input), Err(AvrowErr::MalformedVarint));
    }

    #[test]
    fn int_out_of_range() {
        let mut buf = vec![];
        encode_long(i64::from(i32::MAX) + 1, &mut buf);
        assert!(decode_int(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn bytes_length_longer_than_input() {
        let mut buf = vec![];
        encode_long(1 << 40, &mut buf);
        buf.push(1);
        assert_eq!(decode_bytes(&mut buf.as_slice()), Err(AvrowErr::Eof));
    }

    #[test]
    fn floats_are_little_endian() {
        let mut buf = vec![];
        encode_float(1.0, &mut buf);
        assert_eq!(buf, vec![0, 0, 0x80, 0x3f]);
        assert_eq!(decode_float(&mut buf.as_slice()).unwrap(), 1.0);
    }
}
