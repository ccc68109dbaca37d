use byteorder::{ByteOrder, LittleEndian};

use crate::FormatError;

/// Magic bytes at offset 0 of every JSONBLite file (ASCII `jsonblite`).
pub const MAGIC: &[u8; 9] = b"jsonblite";

/// Current file format version.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 36;

/// Byte offset of the `last_modified` stamp within the file.
///
/// Handles re-read just these 8 bytes to detect external mutations.
pub const LAST_MODIFIED_OFFSET: u64 = 20;

/// On-disk width of the `data_size` field.
pub const DATA_SIZE_BYTES: usize = 6;

/// Decoded form of the fixed 36-byte file header.
///
/// Field widths on disk: `index_size` is u32, `data_size` is u48, both
/// timestamps are i64 (milliseconds since epoch, monotonically advanced by
/// the engine). Layout:
///
/// ```text
/// [magic: 9][version: 1][index_size: 4][data_size: 6][last_modified: 8][last_vacuum: 8]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// Byte length of the index region.
    pub index_size: u32,
    /// Byte length of the data region.
    pub data_size: u64,
    /// Stamp of the last committed mutation.
    pub last_modified: i64,
    /// Stamp of the last completed vacuum.
    pub last_vacuum: i64,
}

impl Header {
    /// Header of a freshly initialized, empty database.
    pub fn new() -> Self {
        Header {
            version: FORMAT_VERSION,
            index_size: 0,
            data_size: 0,
            last_modified: 0,
            last_vacuum: 0,
        }
    }

    /// File offset one past the data region; values append here and the
    /// index region starts here.
    pub fn data_tail(&self) -> u64 {
        HEADER_SIZE as u64 + self.data_size
    }

    /// Exact file length implied by the declared region sizes.
    pub fn file_size(&self) -> u64 {
        self.data_tail() + self.index_size as u64
    }

    /// Encodes the header into a fresh 36-byte buffer.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..9].copy_from_slice(MAGIC);
        buf[9] = self.version;
        LittleEndian::write_u32(&mut buf[10..14], self.index_size);
        LittleEndian::write_uint(&mut buf[14..20], self.data_size, DATA_SIZE_BYTES);
        LittleEndian::write_i64(&mut buf[20..28], self.last_modified);
        LittleEndian::write_i64(&mut buf[28..36], self.last_vacuum);
        buf
    }

    /// Decodes and validates a header from the first 36 bytes of `buf`.
    ///
    /// Fails on short input, wrong magic, or an unsupported version.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_SIZE {
            return Err(FormatError::Truncated(buf.len()));
        }
        if &buf[..9] != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = buf[9];
        if version != FORMAT_VERSION {
            return Err(FormatError::BadVersion(version));
        }
        Ok(Header {
            version,
            index_size: LittleEndian::read_u32(&buf[10..14]),
            data_size: LittleEndian::read_uint(&buf[14..20], DATA_SIZE_BYTES),
            last_modified: LittleEndian::read_i64(&buf[20..28]),
            last_vacuum: LittleEndian::read_i64(&buf[28..36]),
        })
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
