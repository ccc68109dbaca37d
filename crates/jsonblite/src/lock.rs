//! Advisory whole-file locks over the database file.
//!
//! Thin wrappers over [`fs2::FileExt`]: shared locks may coexist, an
//! exclusive lock excludes all others, acquisition blocks. The engine pairs
//! every acquisition with a release on both the success and error exits of
//! the operation body (see `Db::with_exclusive` / `Db::with_shared`).

use std::fs::File;

use fs2::FileExt;

use crate::error::{Error, Result};

pub(crate) fn exclusive(file: &File) -> Result<()> {
    file.lock_exclusive().map_err(Error::LockFailure)
}

pub(crate) fn shared(file: &File) -> Result<()> {
    file.lock_shared().map_err(Error::LockFailure)
}

pub(crate) fn unlock(file: &File) -> Result<()> {
    file.unlock().map_err(Error::LockFailure)
}
