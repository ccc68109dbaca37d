//! # Format: JSONBLite on-disk layout
//!
//! Codecs for the two fixed parts of a JSONBLite database file: the 36-byte
//! header and the CBOR-encoded key index.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (fixed 36 bytes)                       │
//! │                                               │
//! │ magic "jsonblite" (9) | version (u8)          │
//! │ index_size (u32 LE) | data_size (u48 LE)      │
//! │ last_modified (i64 LE) | last_vacuum (i64 LE) │
//! ├───────────────────────────────────────────────┤
//! │ DATA REGION (append-only CBOR value records)  │
//! │                                               │
//! │ ... one CBOR item per committed write ...     │
//! ├───────────────────────────────────────────────┤
//! │ INDEX REGION (single CBOR map)                │
//! │                                               │
//! │ { key (text): [offset (uint), size (uint)] }  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All header integers are little-endian. The index map preserves key
//! insertion order, both in memory and on the wire.

mod header;
mod index;

pub use header::{
    Header, DATA_SIZE_BYTES, FORMAT_VERSION, HEADER_SIZE, LAST_MODIFIED_OFFSET, MAGIC,
};
pub use index::Index;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("header truncated: got {0} bytes, need {HEADER_SIZE}")]
    Truncated(usize),
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported format version {0}")]
    BadVersion(u8),
    #[error("index does not encode: {0}")]
    IndexEncode(String),
    #[error("index bytes do not decode as a map: {0}")]
    IndexDecode(String),
}
