// Serialization utilities for blocks and transactions

use crate::error::{ChainError, Result};
use std::io::{self, Cursor, Read};

/// Trait for types with a canonical binary encoding
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self>
    where
        Self: Sized;

    /// Decode a complete buffer. Trailing bytes are rejected.
    fn deserialize(data: &[u8]) -> Result<Self>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(data);
        let value = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(ChainError::Codec(format!(
                "{} trailing bytes",
                data.len() - cursor.position() as usize
            )));
        }
        Ok(value)
    }
}

fn codec_err(e: io::Error) -> ChainError {
    ChainError::Codec(e.to_string())
}

/// Write a variable-length integer (VarInt)
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let first = read_array::<R, 1>(reader)?[0];

    match first {
        0..=0xfc => Ok(first as u64),
        0xfd => Ok(u16::from_le_bytes(read_array(reader)?) as u64),
        0xfe => Ok(u32::from_le_bytes(read_array(reader)?) as u64),
        0xff => Ok(u64::from_le_bytes(read_array(reader)?)),
    }
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Upper bound for any length prefix, keeps a corrupt prefix from allocating gigabytes
pub const MAX_VAR_LEN: u64 = 32 * 1024 * 1024;

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_len(reader)?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(codec_err)?;
    Ok(data)
}

/// Read a VarInt used as an element count
pub fn read_len<R: Read + ?Sized>(reader: &mut R) -> Result<usize> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_LEN {
        return Err(ChainError::Codec(format!("Length prefix too large: {}", len)));
    }
    Ok(len as usize)
}

/// Read a fixed-size array
pub fn read_array<R: Read + ?Sized, const N: usize>(
    reader: &mut R,
) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(codec_err)?;
    Ok(bytes)
}
