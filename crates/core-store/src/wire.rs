//! Bit-exact entry serialization.
//!
//! Layout:
//! 1. 4 bytes: code-point count, little-endian unsigned.
//! 2. The paragraph's UTF-8 byte string; its byte length is the sum of the
//!    lead lengths of `count` sequences, so decoding walks the leads.
//! 3. The RLE-encoded style sequence (see [`crate::rle`]).

use crate::rle::{self, ByteCursor};
use crate::{Entry, StreamError};

pub fn encode_entry(entry: &Entry) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + entry.string.len() + entry.styles.len() * 10 + 1);
    bytes.extend_from_slice(&(entry.styles.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&entry.string);
    rle::encode(&entry.styles, &mut bytes);
    bytes
}

pub fn decode_entry(bytes: &[u8]) -> Result<Entry, StreamError> {
    let mut cursor = ByteCursor::new(bytes);
    let count = cursor.take_u32_le()?;
    let string = take_string(&mut cursor, count)?.to_vec();
    let styles = rle::decode(&mut cursor)?;

    if styles.len() != count as usize {
        return Err(StreamError::CountMismatch);
    }

    Ok(Entry { styles, string })
}

/// Code-point count of a serialized entry; reads only the prefix.
pub fn code_point_count(bytes: &[u8]) -> Result<u32, StreamError> {
    ByteCursor::new(bytes).take_u32_le()
}

/// String portion of a serialized entry; deserializes nothing else.
pub fn string_slice(bytes: &[u8]) -> Result<&[u8], StreamError> {
    let mut cursor = ByteCursor::new(bytes);
    let count = cursor.take_u32_le()?;
    take_string(&mut cursor, count)
}

/// Advance past `count` UTF-8 sequences and return them as one slice.
fn take_string<'a>(cursor: &mut ByteCursor<'a>, count: u32) -> Result<&'a [u8], StreamError> {
    let begin = cursor.position();

    for _ in 0..count {
        let lead = cursor.take_u8()?;
        let length = core_codec::lead_length(lead)?;
        cursor.take(length - 1)?;
    }

    Ok(cursor.window(begin, cursor.position()))
}
