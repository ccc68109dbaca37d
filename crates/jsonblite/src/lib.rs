//! # JSONBLite
//!
//! An embeddable, single-file, key-value store for structured values. Keys
//! are non-empty strings; values are arbitrary CBOR-encodable data.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ Db handle (one per opener)                    │
//! │                                               │
//! │ read / keys / dump        write / del / vacuum│
//! │      │ shared lock              │ excl lock   │
//! ├──────▼─────────────────────────▼──────────────┤
//! │ sync: replay pending journal, reload on       │
//! │ last_modified change                          │
//! ├───────────────────────────────────────────────┤
//! │ file: header (36) | data (append-only CBOR)   │
//! │       | index (CBOR map)                      │
//! │ siblings: <db>.journal   <db>.temp            │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is staged in a write-ahead journal before it touches the
//! database file, so a crash at any point leaves the file either unchanged
//! or recoverable; the next open converges it to a committed state.
//! Independent handles, in one process or several, coordinate through
//! whole-file advisory locks and observe each other's writes via the
//! header's `last_modified` stamp.
//!
//! ## Example
//! ```no_run
//! use jsonblite::Db;
//!
//! let mut db = Db::open("app.db")?;
//! db.write("greeting", &"hello")?;
//! assert_eq!(db.read::<String>("greeting")?.as_deref(), Some("hello"));
//! db.delete("greeting")?;
//! # Ok::<(), jsonblite::Error>(())
//! ```

mod db;
mod dump;
mod error;
mod lock;

pub use db::{Db, Options};
pub use error::{Error, Result};
