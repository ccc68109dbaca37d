//! The storage engine: a [`Db`] handle over one database file.
//!
//! Every operation follows the same discipline: acquire a whole-file
//! advisory lock (exclusive for mutations and recovery, shared for reads),
//! replay any pending journal, reload in-memory state if another handle
//! committed since we last looked, do the work, release the lock.
//!
//! Mutations are journaled before they touch the file:
//!
//! ```text
//! lock_exclusive
//!   recover / sync
//!   mutate in-memory image (on a copy)
//!   journal.begin(record)      <- commit point
//!   record.apply(file)
//!   journal.commit()
//! unlock
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_bytes::ByteBuf;
use tracing::{debug, info, warn};

use format::{Header, Index, HEADER_SIZE, LAST_MODIFIED_OFFSET};
use journal::{Journal, JournalError, JournalOp, JournalRecord};

use crate::dump;
use crate::error::{Error, Result};
use crate::lock;

/// Open-time options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Emit informational tracing events for each operation.
    pub verbose: bool,
}

/// A handle on one JSONBLite database file.
///
/// Handles cache the header and index in memory and refresh them whenever
/// the on-disk `last_modified` stamp changes, so several handles on the
/// same path, across processes or within one, observe each other's
/// committed writes. A handle must not be shared between threads without
/// external coordination; operations take `&mut self` and run to
/// completion.
pub struct Db {
    file: File,
    path: PathBuf,
    journal: Journal,
    header: Header,
    index: Index,
    verbose: bool,
}

impl Db {
    /// Opens the database at `path` with default options, creating it with
    /// a valid empty image if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, Options::default())
    }

    /// Opens the database at `path`.
    ///
    /// Existing files are validated (magic, version, declared region sizes
    /// against the real file length, index bounds) and any pending journal
    /// is replayed first. Fails with [`Error::CorruptFile`] when validation
    /// fails.
    pub fn open_with<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let journal = Journal::for_db(&path);
        let mut db = Db {
            file,
            path,
            journal,
            header: Header::new(),
            index: Index::new(),
            verbose: options.verbose,
        };
        db.with_exclusive(|db| {
            if db.file.metadata()?.len() == 0 {
                db.init_fresh()
            } else {
                db.recover_pending_locked()?;
                db.load_image()
            }
        })?;
        Ok(db)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp of the last committed mutation, as cached by this handle.
    pub fn last_modified(&self) -> i64 {
        self.header.last_modified
    }

    /// Stamp of the last completed vacuum, as cached by this handle.
    pub fn last_vacuum(&self) -> i64 {
        self.header.last_vacuum
    }

    /// Number of live keys, as cached by this handle.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Reads the value stored under `key`, or `None` if the key is absent.
    ///
    /// Takes `&mut self` because the handle may refresh its cached header
    /// and index from disk before looking the key up.
    pub fn read<V: DeserializeOwned>(&mut self, key: &str) -> Result<Option<V>> {
        check_key(key)?;
        self.with_shared(|db| {
            db.sync_locked()?;
            let Some((offset, size)) = db.index.get(key) else {
                return Ok(None);
            };
            let bytes = db.read_region(offset, size)?;
            let value = ciborium::de::from_reader(bytes.as_slice()).map_err(|e| {
                Error::CorruptFile(format!("value for {key:?} does not decode: {e}"))
            })?;
            Ok(Some(value))
        })
    }

    /// Stores `value` under `key`, overwriting any previous value.
    ///
    /// The previous value's bytes stay in the data region until the next
    /// [`vacuum`](Db::vacuum).
    pub fn write<V: Serialize + ?Sized>(&mut self, key: &str, value: &V) -> Result<()> {
        check_key(key)?;
        let mut data = Vec::new();
        ciborium::ser::into_writer(value, &mut data)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))?;
        self.with_exclusive(|db| db.write_locked(key, data))
    }

    /// Removes `key`.
    ///
    /// Deleting an absent key still commits and advances `last_modified`,
    /// so other handles observe the attempt and resync. The value's bytes
    /// stay in the data region until the next [`vacuum`](Db::vacuum).
    pub fn delete(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        self.with_exclusive(|db| db.delete_locked(key))
    }

    /// A snapshot of the keys in insertion order.
    pub fn keys(&mut self) -> Result<Vec<String>> {
        self.with_shared(|db| {
            db.sync_locked()?;
            Ok(db.index.keys().map(str::to_string).collect())
        })
    }

    /// Renders the whole store as a JSON document: `meta` (version, region
    /// sizes, `last_vacuum` as a decimal string) plus `data`, an object
    /// with one member per key in insertion order.
    ///
    /// Values are decoded from CBOR and re-encoded as JSON with these
    /// degradations: non-finite floats become `null`, byte strings become
    /// arrays of numbers, integers beyond 64 bits become decimal strings,
    /// non-text map keys are omitted, tags unwrap to their inner value.
    pub fn dump(&mut self) -> Result<String> {
        self.with_shared(|db| {
            db.sync_locked()?;
            let slots: Vec<(String, u64, u64)> = db
                .index
                .iter()
                .map(|(key, (offset, size))| (key.to_string(), offset, size))
                .collect();
            let mut entries = Vec::with_capacity(slots.len());
            for (key, offset, size) in slots {
                let bytes = db.read_region(offset, size)?;
                let value = ciborium::de::from_reader(bytes.as_slice()).map_err(|e| {
                    Error::CorruptFile(format!("value for {key:?} does not decode: {e}"))
                })?;
                entries.push((key, value));
            }
            Ok(dump::render(&db.header, entries))
        })
    }

    /// Writes [`dump`](Db::dump) output to `path` as UTF-8 JSON.
    pub fn dump_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let text = self.dump()?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Compacts the file by rewriting live values densely into a sibling
    /// `<db>.temp` file and atomically renaming it over the live file.
    ///
    /// Dead bytes from overwrites and deletes are reclaimed; key order is
    /// preserved; `last_modified` and `last_vacuum` both advance. On any
    /// failure the temp file is removed and the original left untouched.
    pub fn vacuum(&mut self) -> Result<()> {
        self.with_exclusive(|db| {
            db.recover_pending_locked()?;
            db.sync_locked()?;
            let temp_path = temp_path_for(&db.path);
            let result = db.rewrite_into(&temp_path);
            if result.is_err() {
                let _ = std::fs::remove_file(&temp_path);
            }
            result
        })
    }

    // ---- lock discipline -------------------------------------------------

    /// Runs `body` under the exclusive lock, releasing it on both exits.
    ///
    /// The lock is taken through a duplicated handle so `body` keeps full
    /// use of `self`; both handles share one open file description, hence
    /// one lock.
    fn with_exclusive<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let lock_file = self.file.try_clone()?;
        lock::exclusive(&lock_file)?;
        let out = body(self);
        let released = lock::unlock(&lock_file);
        match (out, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Runs `body` under the shared lock.
    ///
    /// Recovery writes, so it cannot run under a shared lock: any pending
    /// journal is replayed first under a short exclusive lock. A journal
    /// appearing after that belongs to a live writer currently holding the
    /// exclusive lock, so the shared acquisition below blocks until that
    /// writer commits.
    fn with_shared<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.journal.exists() {
            self.with_exclusive(|db| db.recover_pending_locked())?;
        }
        let lock_file = self.file.try_clone()?;
        lock::shared(&lock_file)?;
        let out = body(self);
        let released = lock::unlock(&lock_file);
        match (out, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    // ---- recovery and coherence -----------------------------------------

    /// Replays a pending journal, if any. Caller holds the exclusive lock.
    ///
    /// A journal that does not decode, or whose offsets are inconsistent,
    /// never touched the database image; it is logged and discarded.
    fn recover_pending_locked(&mut self) -> Result<()> {
        if !self.journal.exists() {
            return Ok(());
        }
        let outcome = self.journal.load().and_then(|record| {
            record.apply(&mut self.file)?;
            Ok(record)
        });
        match outcome {
            Ok(record) => {
                self.journal.commit()?;
                self.load_image()?;
                if self.verbose {
                    info!(key = %record.key, "replayed pending journal");
                }
                Ok(())
            }
            Err(JournalError::Corrupt(reason)) => {
                warn!(%reason, "journal does not decode, treating as absent");
                self.journal.discard()?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reloads header and index when another handle committed since this
    /// one last looked. Caller holds a lock.
    fn sync_locked(&mut self) -> Result<()> {
        let mut stamp = [0u8; 8];
        self.file.seek(SeekFrom::Start(LAST_MODIFIED_OFFSET))?;
        self.file.read_exact(&mut stamp)?;
        let on_disk = i64::from_le_bytes(stamp);
        if on_disk != self.header.last_modified {
            if self.verbose {
                debug!(
                    cached = self.header.last_modified,
                    on_disk, "external change detected, reloading"
                );
            }
            self.load_image()?;
        }
        Ok(())
    }

    /// Rebuilds the in-memory image from disk, validating everything the
    /// header declares against the real file.
    fn load_image(&mut self) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(Error::CorruptFile(format!(
                "file is {file_len} bytes, shorter than the {HEADER_SIZE}-byte header"
            )));
        }
        let mut buf = [0u8; HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        let header = Header::decode(&buf)?;
        if file_len != header.file_size() {
            return Err(Error::CorruptFile(format!(
                "file is {file_len} bytes but header declares {}",
                header.file_size()
            )));
        }
        let index_bytes = self.read_region(header.data_tail(), header.index_size as u64)?;
        let index = Index::decode(&index_bytes)?;
        for (key, (offset, size)) in index.iter() {
            if offset < HEADER_SIZE as u64 || offset + size > header.data_tail() {
                return Err(Error::CorruptFile(format!(
                    "index entry for {key:?} points outside the data region"
                )));
            }
        }
        self.header = header;
        self.index = index;
        Ok(())
    }

    // ---- mutation internals ---------------------------------------------

    /// Writes the default empty image. Caller holds the exclusive lock on a
    /// zero-length file.
    fn init_fresh(&mut self) -> Result<()> {
        let index = Index::new();
        let index_bytes = index.encode()?;
        let mut header = Header::new();
        header.index_size = index_bytes.len() as u32;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.encode())?;
        self.file.write_all(&index_bytes)?;
        self.file.set_len(HEADER_SIZE as u64 + index_bytes.len() as u64)?;
        self.file.sync_all()?;
        self.header = header;
        self.index = index;
        if self.verbose {
            info!(path = %self.path.display(), "initialized fresh database");
        }
        Ok(())
    }

    fn write_locked(&mut self, key: &str, data: Vec<u8>) -> Result<()> {
        self.recover_pending_locked()?;
        self.sync_locked()?;

        let offset = self.header.data_tail();
        let size = data.len() as u64;
        let mut index = self.index.clone();
        index.insert(key, offset, size);
        let index_bytes = index.encode()?;

        let mut header = self.header.clone();
        header.data_size += size;
        header.index_size = index_bytes.len() as u32;
        header.last_modified = next_timestamp(self.header.last_modified);

        let record = JournalRecord {
            key: key.to_string(),
            operation: JournalOp::Write,
            data: Some(ByteBuf::from(data)),
            index: ByteBuf::from(index_bytes),
            header: ByteBuf::from(header.encode().to_vec()),
            data_offset: offset + size,
        };
        self.commit_record(&record)?;
        self.header = header;
        self.index = index;
        if self.verbose {
            info!(key, size, "write committed");
        }
        Ok(())
    }

    fn delete_locked(&mut self, key: &str) -> Result<()> {
        self.recover_pending_locked()?;
        self.sync_locked()?;

        let mut index = self.index.clone();
        index.remove(key);
        let index_bytes = index.encode()?;

        let mut header = self.header.clone();
        header.index_size = index_bytes.len() as u32;
        header.last_modified = next_timestamp(self.header.last_modified);

        let record = JournalRecord {
            key: key.to_string(),
            operation: JournalOp::Delete,
            data: None,
            index: ByteBuf::from(index_bytes),
            header: ByteBuf::from(header.encode().to_vec()),
            data_offset: self.header.data_tail(),
        };
        self.commit_record(&record)?;
        self.header = header;
        self.index = index;
        if self.verbose {
            info!(key, "delete committed");
        }
        Ok(())
    }

    /// Begin/apply/commit for one staged transaction. In-memory state is
    /// only adopted by the caller after this returns, so a failure leaves
    /// the handle consistent with the file (or with what recovery will
    /// make of it).
    fn commit_record(&mut self, record: &JournalRecord) -> Result<()> {
        self.journal.begin(record)?;
        record.apply(&mut self.file)?;
        self.journal.commit()?;
        Ok(())
    }

    /// Copies live values densely into `temp_path`, finalizes it, renames
    /// it over the live file and adopts it. Caller holds the exclusive
    /// lock and cleans the temp file up on failure.
    fn rewrite_into(&mut self, temp_path: &Path) -> Result<()> {
        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        temp.write_all(&Header::new().encode())?;

        let slots: Vec<(String, u64, u64)> = self
            .index
            .iter()
            .map(|(key, (offset, size))| (key.to_string(), offset, size))
            .collect();
        let mut new_index = Index::new();
        let mut tail = HEADER_SIZE as u64;
        for (key, offset, size) in slots {
            let bytes = self.read_region(offset, size)?;
            temp.seek(SeekFrom::Start(tail))?;
            temp.write_all(&bytes)?;
            new_index.insert(&key, tail, size);
            tail += size;
        }

        let index_bytes = new_index.encode()?;
        let stamp = next_timestamp(self.header.last_modified);
        let mut header = Header::new();
        header.data_size = tail - HEADER_SIZE as u64;
        header.index_size = index_bytes.len() as u32;
        header.last_modified = stamp;
        header.last_vacuum = stamp;

        temp.seek(SeekFrom::Start(0))?;
        temp.write_all(&header.encode())?;
        temp.seek(SeekFrom::Start(tail))?;
        temp.write_all(&index_bytes)?;
        temp.set_len(tail + index_bytes.len() as u64)?;
        temp.sync_all()?;

        std::fs::rename(temp_path, &self.path)?;
        // the old handle still refers to the replaced inode
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.header = header;
        self.index = new_index;
        if self.verbose {
            info!(live = self.index.len(), "vacuum complete");
        }
        Ok(())
    }

    fn read_region(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

/// Sibling scratch file used by vacuum: the full file name plus `.temp`.
fn temp_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".temp");
    PathBuf::from(name)
}

/// Wall-clock milliseconds, forced strictly past `last` so the
/// `last_modified` stamp advances even for sub-millisecond write cadence.
fn next_timestamp(last: i64) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    if now > last {
        now
    } else {
        last + 1
    }
}
