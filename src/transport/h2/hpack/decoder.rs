//! Annotating HPACK decoder (RFC 7541 Section 6).
//!
//! Unlike a plain decoder, every decoded field carries the representation it
//! arrived in, so the frame renderer can show how the peer's encoder used the
//! static and dynamic tables.

use super::dynamic_table::DynamicTable;
use super::error::HpackError;
use super::huffman::huffman_decode;
use super::integer::decode_integer;
use super::static_table::{static_entry, STATIC_TABLE_LEN};
use super::{HeaderBlockEntry, HeaderField, Representation};

#[derive(Clone, Copy)]
enum Indexing {
    Incremental,
    Without,
    Never,
}

/// HPACK decoder for one direction of one connection.
#[derive(Debug, Default)]
pub struct Decoder {
    table: DynamicTable,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current dynamic table size in bytes.
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Current dynamic table limit.
    pub fn max_table_size(&self) -> usize {
        self.table.max_size()
    }

    /// Decode a complete header block into annotated entries, in block order.
    ///
    /// On error the dynamic table keeps whatever insertions happened before
    /// the failing field.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderBlockEntry>, HpackError> {
        let mut entries = Vec::new();
        let mut seen_field = false;
        let mut pos = 0;

        while pos < block.len() {
            let rest = &block[pos..];
            let byte = rest[0];

            if byte & 0x80 != 0 {
                // 1xxxxxxx: indexed field
                let (index, consumed) = decode_integer(rest, 7)?;
                let (name, value) = self.lookup(index)?;
                pos += consumed;
                seen_field = true;
                entries.push(HeaderBlockEntry::Field(HeaderField::new(
                    &name,
                    &value,
                    Representation::Indexed(index),
                )));
            } else if byte & 0xe0 == 0x20 {
                // 001xxxxx: dynamic table size update
                let (size, consumed) = decode_integer(rest, 5)?;
                if seen_field {
                    return Err(HpackError::LateSizeUpdate(size));
                }
                self.table.set_max_size(size);
                pos += consumed;
                entries.push(HeaderBlockEntry::SizeUpdate(size));
            } else {
                let (prefix_bits, indexing) = if byte & 0xc0 == 0x40 {
                    (6, Indexing::Incremental)
                } else if byte & 0xf0 == 0x10 {
                    (4, Indexing::Never)
                } else {
                    (4, Indexing::Without)
                };
                let (field, consumed) = self.decode_literal(rest, prefix_bits, indexing)?;
                pos += consumed;
                seen_field = true;
                entries.push(HeaderBlockEntry::Field(field));
            }
        }

        Ok(entries)
    }

    fn decode_literal(
        &mut self,
        data: &[u8],
        prefix_bits: u8,
        indexing: Indexing,
    ) -> Result<(HeaderField, usize), HpackError> {
        let (name_index, mut pos) = decode_integer(data, prefix_bits)?;
        let name = if name_index == 0 {
            let (name, consumed) = decode_string(&data[pos..])?;
            pos += consumed;
            name
        } else {
            self.lookup(name_index)?.0
        };
        let (value, consumed) = decode_string(&data[pos..])?;
        pos += consumed;

        let name_index = (name_index != 0).then_some(name_index);
        let representation = match indexing {
            Indexing::Incremental => Representation::IncrementalIndexing { name_index },
            Indexing::Without => Representation::WithoutIndexing { name_index },
            Indexing::Never => Representation::NeverIndexed { name_index },
        };
        let field = HeaderField::new(&name, &value, representation);

        if let Indexing::Incremental = indexing {
            self.table.insert(name, value);
        }
        Ok((field, pos))
    }

    /// Resolve an index in the combined static + dynamic address space.
    fn lookup(&self, index: usize) -> Result<(Vec<u8>, Vec<u8>), HpackError> {
        if index == 0 {
            return Err(HpackError::InvalidIndex(0));
        }
        if index <= STATIC_TABLE_LEN {
            return static_entry(index)
                .map(|(name, value)| (name.as_bytes().to_vec(), value.as_bytes().to_vec()))
                .ok_or(HpackError::InvalidIndex(index));
        }
        self.table
            .get(index - STATIC_TABLE_LEN)
            .map(|(name, value)| (name.to_vec(), value.to_vec()))
            .ok_or(HpackError::InvalidIndex(index))
    }
}

/// Decode a string literal (RFC 7541 Section 5.2), returning the bytes and
/// the octets consumed.
fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    let huffman = data.first().ok_or(HpackError::UnexpectedEof)? & 0x80 != 0;
    let (len, header) = decode_integer(data, 7)?;
    let end = header.checked_add(len).ok_or(HpackError::IntegerOverflow)?;
    let raw = data.get(header..end).ok_or(HpackError::UnexpectedEof)?;
    let decoded = if huffman {
        huffman_decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((decoded, end))
}
