use std::io;
use std::path::Path;

use ::redb::backends::InMemoryBackend;
use ::redb::{Database, DatabaseError, ReadableTable, Table, TableDefinition, TableError};
use tracing::{debug, warn};

use crate::error::KVError;
use crate::traits::{ChunkSink, StorageEngine};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// RedbEngine is a StorageEngine backed by redb, a pure-Rust embedded
/// key-value database. Every mutation is its own write transaction, so a
/// single record is never observed half-written.
pub struct RedbEngine {
    db: Database,
    read_only: bool,
}

impl RedbEngine {
    /// Open a database file. Writable opens create the file (and the table)
    /// when absent; read-only opens require an existing file.
    pub fn open(path: &Path, read_only: bool) -> Result<Self, KVError> {
        let db = if read_only {
            Database::open(path)
        } else {
            Database::create(path)
        }
        .map_err(open_err)?;

        let engine = Self { db, read_only };
        if !read_only {
            engine.ensure_table()?;
        }
        debug!("RedbEngine: opened {:?} (read_only={})", path, read_only);
        Ok(engine)
    }

    /// Create a private in-memory database. Contents are lost on close.
    pub fn in_memory(read_only: bool) -> Result<Self, KVError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(open_err)?;

        let engine = Self { db, read_only };
        engine.ensure_table()?;
        debug!("RedbEngine: opened in-memory database");
        Ok(engine)
    }

    fn ensure_table(&self) -> Result<(), KVError> {
        self.write(|_table| Ok(()))
    }

    /// Run `f` against the value stored under `key`, borrowed straight out of
    /// a read transaction. The borrow ends when `f` returns.
    fn read_value<R>(
        &self,
        key: &[u8],
        f: impl FnOnce(&[u8]) -> Result<R, KVError>,
    ) -> Result<R, KVError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = match read_txn.open_table(TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Err(KVError::NotFound),
            Err(e) => return Err(storage_err(e)),
        };

        let guard = table
            .get(key)
            .map_err(storage_err)?
            .ok_or(KVError::NotFound)?;
        f(guard.value())
    }

    /// Run `f` inside one write transaction. Commits on success, aborts on
    /// error so a failed mutation leaves nothing behind.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static [u8], &'static [u8]>) -> Result<R, KVError>,
    ) -> Result<R, KVError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let result = {
            let mut table = write_txn.open_table(TABLE).map_err(storage_err)?;
            f(&mut table)
        };

        match result {
            Ok(value) => {
                write_txn.commit().map_err(storage_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = write_txn.abort() {
                    warn!("RedbEngine: abort after {} failed: {}", e.name(), abort_err);
                }
                Err(e)
            }
        }
    }
}

impl StorageEngine for RedbEngine {
    fn fetch(&self, key: &[u8], dest: Option<&mut [u8]>) -> Result<u64, KVError> {
        self.read_value(key, |value| {
            if let Some(dest) = dest {
                let n = dest.len().min(value.len());
                dest[..n].copy_from_slice(&value[..n]);
            }
            Ok(value.len() as u64)
        })
    }

    fn fetch_chunks(
        &self,
        key: &[u8],
        chunk_size: usize,
        sink: &mut ChunkSink<'_>,
    ) -> Result<(), KVError> {
        self.read_value(key, |value| {
            for chunk in value.chunks(chunk_size.max(1)) {
                sink(chunk)?;
            }
            Ok(())
        })
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVError> {
        self.write(|table| {
            table.insert(key, value).map_err(storage_err)?;
            Ok(())
        })
    }

    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVError> {
        self.write(|table| {
            let existing = table
                .get(key)
                .map_err(storage_err)?
                .map(|guard| guard.value().to_vec());

            match existing {
                None => {
                    table.insert(key, value).map_err(storage_err)?;
                }
                Some(mut combined) => {
                    combined
                        .try_reserve_exact(value.len())
                        .map_err(|_| KVError::NoMem)?;
                    combined.extend_from_slice(value);
                    table.insert(key, combined.as_slice()).map_err(storage_err)?;
                }
            }
            Ok(())
        })
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), KVError> {
        self.write(|table| match table.remove(key).map_err(storage_err)? {
            Some(_) => Ok(()),
            None => Err(KVError::NotFound),
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn close(self: Box<Self>) -> Result<(), KVError> {
        drop(self.db);
        debug!("RedbEngine: closed");
        Ok(())
    }
}

/// Map a failure to open the database.
fn open_err(err: DatabaseError) -> KVError {
    let code = match &err {
        DatabaseError::DatabaseAlreadyOpen => KVError::Busy,
        _ => KVError::CantOpen,
    };
    warn!("RedbEngine: open failed ({}): {}", code.name(), err);
    code
}

/// Map any redb failure onto the nearest result code. The backend detail is
/// logged here since the code carries none.
fn storage_err(err: impl Into<::redb::Error>) -> KVError {
    let err = err.into();
    let code = match &err {
        ::redb::Error::Io(e) => io_code(e),
        ::redb::Error::Corrupted(_) => KVError::Corrupt,
        ::redb::Error::ValueTooLarge(_) => KVError::Limit,
        ::redb::Error::DatabaseAlreadyOpen => KVError::Busy,
        ::redb::Error::LockPoisoned(_) => KVError::LockErr,
        ::redb::Error::TableDoesNotExist(_) => KVError::NotFound,
        _ => KVError::IoErr,
    };
    warn!("RedbEngine: storage error ({}): {}", code.name(), err);
    code
}

fn io_code(err: &io::Error) -> KVError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => KVError::Perm,
        io::ErrorKind::OutOfMemory => KVError::NoMem,
        io::ErrorKind::StorageFull => KVError::Full,
        io::ErrorKind::ReadOnlyFilesystem => KVError::ReadOnly,
        io::ErrorKind::WouldBlock => KVError::Busy,
        _ => KVError::IoErr,
    }
}
