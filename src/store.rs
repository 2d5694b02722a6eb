use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use crate::config::{Location, StoreConfig};
use crate::error::KVError;
use crate::redb::RedbEngine;
use crate::stream::{Bridge, Consumer};
use crate::traits::{StorageEngine, alloc_value};

type EngineGuard<'a> = MutexGuard<'a, Option<Box<dyn StorageEngine>>>;

/// Engine slot shared between a Store and its closers. `engine` is `None`
/// once the store has been released by anyone. `holder` names the thread
/// currently running an operation, so a consumer calling back into the
/// store is refused instead of waiting on itself.
struct Slot {
    engine: Mutex<Option<Box<dyn StorageEngine>>>,
    holder: Mutex<Option<ThreadId>>,
}

impl Slot {
    fn new(engine: Box<dyn StorageEngine>) -> Self {
        Self {
            engine: Mutex::new(Some(engine)),
            holder: Mutex::new(None),
        }
    }

    /// Lock the engine. `Locked` when the calling thread already holds it.
    fn lock(&self) -> Result<EngineGuard<'_>, KVError> {
        let me = thread::current().id();
        let reentered = self
            .holder
            .lock()
            .map(|holder| *holder == Some(me))
            .unwrap_or(false);
        if reentered {
            warn!("Store: re-entrant call from inside an operation refused");
            return Err(KVError::Locked);
        }
        self.engine.lock().map_err(|_| KVError::LockErr)
    }

    /// Mark the calling thread as the holder until the returned guard drops.
    /// Only call with the engine lock held.
    fn hold(&self) -> Holding<'_> {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = Some(thread::current().id());
        }
        Holding(self)
    }
}

struct Holding<'a>(&'a Slot);

impl Drop for Holding<'_> {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.0.holder.lock() {
            *holder = None;
        }
    }
}

/// Store is the handle to one open key-value store.
///
/// It is move-only: `close(self)` consumes it, so a closed store cannot be
/// used again. Dropping an unclosed store releases it as well.
///
/// Every operation borrows the store and is serialized by an internal lock,
/// which makes the handle `Send + Sync`. A [`StoreCloser`] lets a second
/// owner release the store from elsewhere; operations that start after that
/// fail with `KVError::Abort`.
///
/// ```
/// use openerp_kvapi::{KVError, Store};
///
/// let store = Store::open(":mem:")?;
/// store.store(b"user:1", b"alice")?;
/// store.append(b"user:1", b"-smith")?;
/// assert_eq!(store.fetch(b"user:1")?, b"alice-smith");
/// store.delete(b"user:1")?;
/// assert_eq!(store.fetch(b"user:1"), Err(KVError::NotFound));
/// store.close()?;
/// # Ok::<(), KVError>(())
/// ```
pub struct Store {
    slot: Arc<Slot>,
    config: StoreConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.config.location)
            .field("read_only", &self.config.read_only)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open a store at `location`. `:mem:` gives a private in-memory store;
    /// anything else is a database file path.
    pub fn open(location: &str) -> Result<Self, KVError> {
        Self::open_with(StoreConfig::new(location))
    }

    /// Open a store with explicit options.
    pub fn open_with(config: StoreConfig) -> Result<Self, KVError> {
        let engine: Box<dyn StorageEngine> = match config.resolve_location() {
            Some(Location::Memory) => Box::new(RedbEngine::in_memory(config.read_only)?),
            Some(Location::File(path)) => Box::new(RedbEngine::open(&path, config.read_only)?),
            None => {
                warn!("Store: empty location");
                return Err(KVError::CantOpen);
            }
        };
        debug!("Store: opened {:?}", config.location);
        Ok(Self::with_engine(engine, config))
    }

    /// Wrap an already-open engine. `config.location` is informational only.
    pub fn with_engine(engine: Box<dyn StorageEngine>, config: StoreConfig) -> Self {
        Self {
            slot: Arc::new(Slot::new(engine)),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A token that can release this store from another owner.
    pub fn closer(&self) -> StoreCloser {
        StoreCloser {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Release the store. `Abort` if a closer already released it.
    pub fn close(self) -> Result<(), KVError> {
        let engine = take_engine(&self.slot)?;
        debug!("Store: closing {:?}", self.config.location);
        engine.close()
    }

    /// Create or replace the record for `key`.
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<(), KVError> {
        check_key(key)?;
        self.with_writable(|engine| engine.put(key, value))
    }

    /// Create the record for `key`, or add `value` after its current bytes.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<(), KVError> {
        check_key(key)?;
        self.with_writable(|engine| engine.append(key, value))
    }

    /// Remove the record for `key`. `NotFound` if there is none.
    pub fn delete(&self, key: &[u8]) -> Result<(), KVError> {
        check_key(key)?;
        self.with_writable(|engine| engine.remove(key))
    }

    /// Return an owned copy of the value stored under `key`.
    ///
    /// Runs the probe/fill sequence: learn the exact length, allocate
    /// exactly that much, then copy. If the fill sees a different length
    /// (or the record vanished) the sequence restarts, up to
    /// `fetch_retries` extra rounds, after which the fetch is `Corrupt`.
    pub fn fetch(&self, key: &[u8]) -> Result<Vec<u8>, KVError> {
        check_key(key)?;
        let retries = self.config.fetch_retries;
        self.with_locked(|engine| {
            for attempt in 0..=retries {
                let len = engine.fetch(key, None)?;
                let mut buf = alloc_value(len)?;
                match engine.fetch(key, Some(&mut buf)) {
                    Ok(filled) if filled == len => return Ok(buf),
                    Ok(filled) => {
                        warn!(
                            "Store: record changed length between probe ({}) and fill ({}), attempt {}",
                            len, filled, attempt
                        );
                    }
                    Err(KVError::NotFound) => {
                        warn!("Store: record vanished between probe and fill, attempt {}", attempt);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(KVError::Corrupt)
        })
    }

    /// Probe/fill primitive for callers that manage their own buffer
    /// (the C ABI). See [`StorageEngine::fetch`].
    pub(crate) fn fetch_raw(&self, key: &[u8], dest: Option<&mut [u8]>) -> Result<u64, KVError> {
        check_key(key)?;
        self.with_locked(|engine| engine.fetch(key, dest))
    }

    /// Deliver the value stored under `key` to `consumer`, in order, in
    /// chunks of at most `chunk_size` bytes.
    ///
    /// - An empty value calls the consumer zero times and returns `Ok(())`.
    /// - A missing key never calls the consumer and returns `NotFound`.
    /// - If the consumer returns an error, delivery stops at once and that
    ///   error is returned unchanged; the consumer is not called again.
    ///
    /// The consumer runs on the calling thread while the store's lock is
    /// held. Calls it makes back into this store (or its closers) fail with
    /// `Locked`.
    pub fn fetch_streaming<C>(&self, key: &[u8], consumer: &mut C) -> Result<(), KVError>
    where
        C: Consumer + ?Sized,
    {
        check_key(key)?;
        let chunk_size = self.config.effective_chunk_size();
        self.with_locked(|engine| {
            let mut bridge = Bridge::new(consumer);
            let result = engine.fetch_chunks(key, chunk_size, &mut |chunk| bridge.deliver(chunk));
            bridge.finish(result)
        })
    }

    fn with_locked<R>(
        &self,
        f: impl FnOnce(&mut dyn StorageEngine) -> Result<R, KVError>,
    ) -> Result<R, KVError> {
        let mut guard = self.slot.lock()?;
        let engine = guard.as_deref_mut().ok_or(KVError::Abort)?;
        // Dropped before `guard`, so the holder is cleared while still locked.
        let _holding = self.slot.hold();
        f(engine)
    }

    fn with_writable<R>(
        &self,
        f: impl FnOnce(&mut dyn StorageEngine) -> Result<R, KVError>,
    ) -> Result<R, KVError> {
        self.with_locked(|engine| {
            if engine.is_read_only() {
                return Err(KVError::ReadOnly);
            }
            f(engine)
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let Ok(mut guard) = self.slot.lock() else {
            return;
        };
        if let Some(engine) = guard.take() {
            debug!("Store: releasing {:?} on drop", self.config.location);
            if let Err(e) = engine.close() {
                warn!("Store: release on drop failed: {}", e);
            }
        }
    }
}

/// Releases a [`Store`] on behalf of another owner, e.g. a shutdown path on a
/// different thread. Operations issued through the store afterwards fail with
/// `KVError::Abort` instead of touching released resources.
#[derive(Clone)]
pub struct StoreCloser {
    slot: Arc<Slot>,
}

impl StoreCloser {
    /// Release the store. Waits for an in-flight operation to finish.
    /// `Abort` if it was already released, `Locked` from inside a consumer
    /// of that store.
    pub fn close(&self) -> Result<(), KVError> {
        let engine = take_engine(&self.slot)?;
        debug!("StoreCloser: releasing store");
        engine.close()
    }

    /// Whether the store has been released, by anyone.
    pub fn is_closed(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.is_none(),
            // Asked from inside a running operation, so still open.
            Err(KVError::Locked) => false,
            Err(_) => true,
        }
    }
}

fn take_engine(slot: &Slot) -> Result<Box<dyn StorageEngine>, KVError> {
    slot.lock()?.take().ok_or(KVError::Abort)
}

fn check_key(key: &[u8]) -> Result<(), KVError> {
    if key.is_empty() {
        return Err(KVError::Invalid);
    }
    Ok(())
}
