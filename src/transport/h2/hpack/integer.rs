//! HPACK prefix integers (RFC 7541 Section 5.1).

use super::error::HpackError;

/// Decode an integer whose first octet carries a `prefix_bits`-bit prefix.
///
/// Returns `(value, octets consumed)`, the count including the first octet.
pub fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    let first = *data.first().ok_or(HpackError::UnexpectedEof)?;
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = first as usize & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (offset, &byte) in data[1..].iter().enumerate() {
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value = value
            .checked_add(((byte & 0x7f) as usize) << shift)
            .ok_or(HpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok((value, offset + 2));
        }
        shift += 7;
    }
    Err(HpackError::UnexpectedEof)
}
