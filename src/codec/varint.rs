//! 7-bit encoded integers.
//!
//! Little end first, seven payload bits per byte, top bit set on every byte but the
//! last. At most five bytes (35 bits) are accepted; anything longer is corrupt.

use std::io::{Read, Write};

use crate::error::{Result, ShuffleError};

pub const MAX_VARINT_LEN: usize = 5;

pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<usize> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Encode into `buf`, returning the number of bytes used.
pub fn encode_varint(mut value: u32, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

pub fn encoded_len(value: u32) -> usize {
    match value {
        0..0x80 => 1,
        0x80..0x4000 => 2,
        0x4000..0x20_0000 => 3,
        0x20_0000..0x1000_0000 => 4,
        _ => 5,
    }
}

pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    read_varint_or_eof(reader)?
        .ok_or_else(|| ShuffleError::format("stream ended before a 7-bit encoded length"))
}

/// Like [`read_varint`], but a stream that ends before the first byte yields `None`.
pub fn read_varint_or_eof<R: Read + ?Sized>(reader: &mut R) -> Result<Option<u32>> {
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        let n = read_byte(reader, &mut byte)?;
        if n == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(ShuffleError::format(
                "stream ended inside a 7-bit encoded length",
            ));
        }
        let b = byte[0];
        if i == MAX_VARINT_LEN - 1 && b > 0x0f {
            return Err(ShuffleError::format("invalid 7-bit encoded length"));
        }
        result |= u32::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(Some(result));
        }
    }
    Err(ShuffleError::format("invalid 7-bit encoded length"))
}

/// Decode from the start of a byte slice, returning the value and its encoded size.
pub fn decode_varint(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut result: u32 = 0;
    for (i, &b) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        if i == MAX_VARINT_LEN - 1 && b > 0x0f {
            return Err(ShuffleError::format("invalid 7-bit encoded length"));
        }
        result |= u32::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    if bytes.len() < MAX_VARINT_LEN {
        Err(ShuffleError::format("truncated 7-bit encoded length"))
    } else {
        Err(ShuffleError::format("invalid 7-bit encoded length"))
    }
}

fn read_byte<R: Read + ?Sized>(reader: &mut R, byte: &mut [u8; 1]) -> Result<usize> {
    loop {
        match reader.read(byte) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
