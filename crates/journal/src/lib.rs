//! # Journal: write-ahead journal and crash recovery
//!
//! A mutation is made durable in three steps:
//!
//! 1. **Begin**: the full transaction (value bytes, new index, new header,
//!    target offset) is encoded as one CBOR record and written to
//!    `<db>.journal` with create-or-truncate semantics, then fsynced. This
//!    is the commit point: a journal that reached disk will be replayed.
//! 2. **Apply**: the record's bytes are written into the database file at
//!    positions derived entirely from the record itself.
//! 3. **Commit**: the journal file is removed.
//!
//! A crash between steps leaves either no journal (the mutation was never
//! durable) or a journal whose replay converges the file to the committed
//! state. Replay is idempotent: every apply step is a positional overwrite,
//! so re-applying rewrites the same bytes.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

use format::HEADER_SIZE;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt journal: {0}")]
    Corrupt(String),
    #[error("journal does not encode: {0}")]
    Encode(String),
}

/// The operation a journal record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOp {
    Write,
    Delete,
}

/// A single pending transaction, stored as one CBOR map at `<db>.journal`.
///
/// `data_offset` is the byte offset immediately after the appended value:
/// for a write the value occupies `[data_offset - data.len(), data_offset)`;
/// for a delete it equals the current data tail. The new index is written at
/// `data_offset` and the file truncated to `data_offset + index.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Key the transaction touches. Advisory, kept for debugging.
    pub key: String,
    pub operation: JournalOp,
    /// Encoded value bytes for a write; absent for a delete.
    pub data: Option<ByteBuf>,
    /// The fully serialized new index.
    pub index: ByteBuf,
    /// The fully serialized new header, exactly 36 bytes.
    pub header: ByteBuf,
    /// Byte offset immediately after the appended value.
    pub data_offset: u64,
}

impl JournalRecord {
    /// Applies this record to the database file with positional overwrites,
    /// truncates to the exact committed length, and fsyncs.
    ///
    /// Offsets are validated before the first write, so a record rejected as
    /// corrupt here has not touched the file.
    pub fn apply(&self, db: &mut File) -> Result<(), JournalError> {
        if self.header.len() != HEADER_SIZE {
            return Err(JournalError::Corrupt(format!(
                "journal header is {} bytes, expected {HEADER_SIZE}",
                self.header.len()
            )));
        }
        let value_start = match &self.data {
            Some(data) => Some(
                self.data_offset
                    .checked_sub(data.len() as u64)
                    .filter(|&start| start >= HEADER_SIZE as u64)
                    .ok_or_else(|| {
                        JournalError::Corrupt(
                            "value bytes extend outside the data region".to_string(),
                        )
                    })?,
            ),
            None => {
                if self.data_offset < HEADER_SIZE as u64 {
                    return Err(JournalError::Corrupt(
                        "data_offset points inside the header".to_string(),
                    ));
                }
                None
            }
        };

        if let (Some(start), Some(data)) = (value_start, &self.data) {
            db.seek(SeekFrom::Start(start))?;
            db.write_all(data)?;
        }
        db.seek(SeekFrom::Start(0))?;
        db.write_all(&self.header)?;
        db.seek(SeekFrom::Start(self.data_offset))?;
        db.write_all(&self.index)?;
        // a shrinking index (delete) must not leave tail bytes behind
        db.set_len(self.data_offset + self.index.len() as u64)?;
        db.sync_all()?;
        Ok(())
    }
}

/// Handle on the journal file paired with a database path.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Journal sibling of `db_path`: the full file name plus `.journal`.
    pub fn for_db(db_path: &Path) -> Self {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".journal");
        Journal {
            path: PathBuf::from(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Writes `record` to the journal file with create-or-truncate
    /// semantics and fsyncs it. Once this returns, the transaction is the
    /// one that recovery will complete.
    pub fn begin(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(record, &mut buf)
            .map_err(|e| JournalError::Encode(e.to_string()))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads the pending record back.
    ///
    /// A journal that does not decode (truncated mid-write or otherwise
    /// mangled) is [`JournalError::Corrupt`]; the caller treats it as
    /// absent because the database image was never touched for it.
    pub fn load(&self) -> Result<JournalRecord, JournalError> {
        let file = File::open(&self.path)?;
        let record: JournalRecord = match ciborium::de::from_reader(BufReader::new(file)) {
            Ok(record) => record,
            Err(ciborium::de::Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(JournalError::Corrupt("journal truncated".to_string()))
            }
            Err(ciborium::de::Error::Io(e)) => return Err(JournalError::Io(e)),
            Err(e) => return Err(JournalError::Corrupt(e.to_string())),
        };
        if record.operation == JournalOp::Write && record.data.is_none() {
            return Err(JournalError::Corrupt(
                "write record carries no value bytes".to_string(),
            ));
        }
        Ok(record)
    }

    /// Removes the journal file, completing the transaction.
    pub fn commit(&self) -> Result<(), JournalError> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Removes the journal file if present; used to drop a corrupt journal.
    pub fn discard(&self) -> Result<(), JournalError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JournalError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format::Header;
    use std::io::Read;
    use tempfile::tempdir;

    fn fresh_db(path: &Path) -> File {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .unwrap();
        let mut header = Header::new();
        header.index_size = 1;
        file.write_all(&header.encode()).unwrap();
        file.write_all(&[0xA0]).unwrap(); // empty CBOR map
        file
    }

    fn write_record(value: &[u8], index: Vec<u8>, data_size: u64) -> JournalRecord {
        let mut header = Header::new();
        header.data_size = data_size;
        header.index_size = index.len() as u32;
        header.last_modified = 1;
        JournalRecord {
            key: "k".to_string(),
            operation: JournalOp::Write,
            data: Some(ByteBuf::from(value.to_vec())),
            index: ByteBuf::from(index),
            header: ByteBuf::from(header.encode().to_vec()),
            data_offset: HEADER_SIZE as u64 + data_size,
        }
    }

    fn file_bytes(path: &Path) -> Vec<u8> {
        let mut buf = Vec::new();
        File::open(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn begin_load_commit_roundtrip() {
        let dir = tempdir().unwrap();
        let journal = Journal::for_db(&dir.path().join("a.db"));
        let record = write_record(b"hello", vec![0xA0], 5);

        assert!(!journal.exists());
        journal.begin(&record).unwrap();
        assert!(journal.exists());
        assert_eq!(journal.load().unwrap(), record);
        journal.commit().unwrap();
        assert!(!journal.exists());
    }

    #[test]
    fn journal_path_is_db_path_plus_suffix() {
        let journal = Journal::for_db(Path::new("/t/a.db"));
        assert_eq!(journal.path(), Path::new("/t/a.db.journal"));
    }

    #[test]
    fn apply_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("a.db");
        let mut db = fresh_db(&db_path);

        let index = {
            let mut index = format::Index::new();
            index.insert("k", HEADER_SIZE as u64, 5);
            index.encode().unwrap()
        };
        let record = write_record(b"hello", index, 5);

        record.apply(&mut db).unwrap();
        let once = file_bytes(&db_path);
        record.apply(&mut db).unwrap();
        let twice = file_bytes(&db_path);

        assert_eq!(once, twice);
        assert_eq!(
            once.len() as u64,
            record.data_offset + record.index.len() as u64
        );
    }

    #[test]
    fn apply_truncates_shrinking_index() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("a.db");
        let mut db = fresh_db(&db_path);
        db.set_len(200).unwrap();

        let mut header = Header::new();
        header.index_size = 1;
        let record = JournalRecord {
            key: "k".to_string(),
            operation: JournalOp::Delete,
            data: None,
            index: ByteBuf::from(vec![0xA0]),
            header: ByteBuf::from(header.encode().to_vec()),
            data_offset: HEADER_SIZE as u64,
        };
        record.apply(&mut db).unwrap();
        assert_eq!(file_bytes(&db_path).len(), HEADER_SIZE + 1);
    }

    #[test]
    fn apply_rejects_bad_header_length() {
        let dir = tempdir().unwrap();
        let mut db = fresh_db(&dir.path().join("a.db"));
        let mut record = write_record(b"hello", vec![0xA0], 5);
        record.header = ByteBuf::from(vec![0u8; 10]);
        assert!(matches!(
            record.apply(&mut db),
            Err(JournalError::Corrupt(_))
        ));
    }

    #[test]
    fn apply_rejects_value_outside_data_region() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("a.db");
        let mut db = fresh_db(&db_path);
        let before = file_bytes(&db_path);

        let mut record = write_record(b"hello", vec![0xA0], 5);
        record.data_offset = 3; // value would start before the header ends
        assert!(matches!(
            record.apply(&mut db),
            Err(JournalError::Corrupt(_))
        ));
        // rejected before any write
        assert_eq!(file_bytes(&db_path), before);
    }

    #[test]
    fn load_detects_garbage() {
        let dir = tempdir().unwrap();
        let journal = Journal::for_db(&dir.path().join("a.db"));
        std::fs::write(journal.path(), b"\xFF\x13not cbor").unwrap();
        assert!(matches!(journal.load(), Err(JournalError::Corrupt(_))));
    }

    #[test]
    fn load_detects_truncation() {
        let dir = tempdir().unwrap();
        let journal = Journal::for_db(&dir.path().join("a.db"));
        let record = write_record(b"hello", vec![0xA0], 5);
        journal.begin(&record).unwrap();

        let full = std::fs::read(journal.path()).unwrap();
        std::fs::write(journal.path(), &full[..full.len() / 2]).unwrap();
        assert!(matches!(journal.load(), Err(JournalError::Corrupt(_))));
    }

    #[test]
    fn load_missing_is_io_error() {
        let dir = tempdir().unwrap();
        let journal = Journal::for_db(&dir.path().join("a.db"));
        assert!(matches!(journal.load(), Err(JournalError::Io(_))));
    }

    #[test]
    fn discard_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let journal = Journal::for_db(&dir.path().join("a.db"));
        journal.discard().unwrap();
    }
}
