//! HPACK decoding with representation annotations (RFC 7541).
//!
//! Only the decode side is implemented: the inspector observes header blocks
//! produced by the real client's encoder and by the peer, it never encodes.

mod decoder;
mod dynamic_table;
mod error;
mod huffman;
mod integer;
mod static_table;

pub use decoder::Decoder;
pub use error::HpackError;

/// How a header field was encoded in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Fully indexed field (Section 6.1), carrying the table index.
    Indexed(usize),
    /// Literal with incremental indexing (Section 6.2.1).
    IncrementalIndexing { name_index: Option<usize> },
    /// Literal without indexing (Section 6.2.2).
    WithoutIndexing { name_index: Option<usize> },
    /// Literal never indexed (Section 6.2.3), used for sensitive values.
    NeverIndexed { name_index: Option<usize> },
}

impl Representation {
    /// Tag shown in front of the field when rendering a header block.
    pub fn tag(&self) -> String {
        match *self {
            Self::Indexed(index) => format!("INDEXED ({})", index),
            Self::NeverIndexed { .. } => "SENSITIVE".to_string(),
            Self::IncrementalIndexing {
                name_index: Some(index),
            }
            | Self::WithoutIndexing {
                name_index: Some(index),
            } => format!("NAME INDEXED ({})", index),
            Self::IncrementalIndexing { name_index: None } => "+ NEW INDEX".to_string(),
            Self::WithoutIndexing { name_index: None } => "- NOT INDEXED".to_string(),
        }
    }
}

/// One decoded header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
    pub representation: Representation,
}

impl HeaderField {
    pub fn new(name: &[u8], value: &[u8], representation: Representation) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
            representation,
        }
    }
}

/// An entry of a decoded header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBlockEntry {
    Field(HeaderField),
    /// Dynamic table size update (Section 6.3).
    SizeUpdate(usize),
}

impl HeaderBlockEntry {
    /// The field, if this entry is one.
    pub fn field(&self) -> Option<&HeaderField> {
        match self {
            Self::Field(field) => Some(field),
            Self::SizeUpdate(_) => None,
        }
    }
}
