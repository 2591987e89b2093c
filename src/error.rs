use std::io;

use thiserror::Error;

use crate::map_list::MapMismatch;

/// Errors raised while decoding a DEX buffer.
///
/// All variants except `InconsistentMap` are structural: the record being
/// decoded cannot be recovered and the decode call aborts. `InconsistentMap`
/// is only returned in strict mode; by default map disagreements are logged
/// and decoding proceeds on header authority.
#[derive(Debug, Error)]
pub enum DexError {
    /// A read of `wanted` bytes at `offset` would cross the end of the buffer.
    #[error("read of {wanted} byte(s) at offset {offset:#x} crosses end of buffer (length {len:#x})")]
    OutOfBounds {
        offset: usize,
        wanted: usize,
        len: usize,
    },

    /// The header magic or version suffix is not a recognised DEX magic.
    #[error("unrecognised DEX magic {found:02x?}")]
    BadMagic { found: [u8; 8] },

    /// The declared header_size differs from the fixed 0x70-byte layout.
    #[error("header_size is {found:#x}, expected 0x70")]
    BadHeaderSize { found: u32 },

    /// A LEB128 sequence is truncated or needs more than 5 bytes / 32 bits.
    #[error("malformed LEB128 sequence at offset {offset:#x}")]
    MalformedVarint { offset: usize },

    /// A byte sequence is not a valid MUTF-8 1/2/3-byte encoding.
    #[error("malformed MUTF-8 string data at offset {offset:#x}")]
    MalformedStringData { offset: usize },

    /// The map_list disagrees with a header-derived table (strict mode only).
    #[error("map_list disagrees with header: {0}")]
    InconsistentMap(MapMismatch),

    #[error("i/o error reading DEX file")]
    Io(#[from] io::Error),
}
