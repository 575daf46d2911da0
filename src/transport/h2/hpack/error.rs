//! HPACK-specific error types.

use thiserror::Error;

/// HPACK decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HpackError {
    #[error("Unexpected end of header block")]
    UnexpectedEof,

    #[error("Integer overflow")]
    IntegerOverflow,

    #[error("Invalid Huffman code")]
    InvalidHuffmanCode,

    #[error("Invalid index: {0}")]
    InvalidIndex(usize),

    #[error("Dynamic table size update to {0} outside the start of a header block")]
    LateSizeUpdate(usize),
}
