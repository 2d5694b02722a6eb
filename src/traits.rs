use crate::error::KVError;

/// Receives chunks from an engine. Returning an error stops delivery.
pub type ChunkSink<'a> = dyn FnMut(&[u8]) -> Result<(), KVError> + 'a;

/// StorageEngine is the raw record interface a [`Store`](crate::Store) drives.
///
/// Keys are never empty by the time they reach an engine; the store rejects
/// them first. Read-only enforcement also happens in the store, based on
/// [`is_read_only`](StorageEngine::is_read_only).
///
/// Engines map their own failures onto [`KVError`] once, at this boundary.
pub trait StorageEngine: Send {
    /// Two-phase raw read.
    ///
    /// With `dest == None` this is the probe: report the exact length of the
    /// value without copying. With a buffer it is the fill: copy
    /// `min(len, dest.len())` bytes into `dest` and report the length the
    /// value has *now*. Callers compare that against the probe to detect a
    /// record that changed in between.
    fn fetch(&self, key: &[u8], dest: Option<&mut [u8]>) -> Result<u64, KVError>;

    /// Deliver the value in order, in chunks of at most `chunk_size` bytes.
    /// An empty value delivers nothing. The sink's error is returned as-is.
    ///
    /// The default goes through the probe/fill path and slices the copy;
    /// engines that can hand out borrowed storage should override it.
    fn fetch_chunks(
        &self,
        key: &[u8],
        chunk_size: usize,
        sink: &mut ChunkSink<'_>,
    ) -> Result<(), KVError> {
        let len = self.fetch(key, None)?;
        let mut buf = alloc_value(len)?;
        let filled = self.fetch(key, Some(&mut buf))?;
        if filled != len {
            return Err(KVError::Corrupt);
        }
        for chunk in buf.chunks(chunk_size.max(1)) {
            sink(chunk)?;
        }
        Ok(())
    }

    /// Create or replace a record.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVError>;

    /// Create a record, or extend an existing one with `value`.
    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVError>;

    /// Remove a record. `NotFound` if there is none.
    fn remove(&mut self, key: &[u8]) -> Result<(), KVError>;

    /// Whether the engine was opened without write access.
    fn is_read_only(&self) -> bool;

    /// Release backend resources. Called at most once.
    fn close(self: Box<Self>) -> Result<(), KVError>;
}

/// Allocate a zeroed buffer of exactly `len` bytes, reporting allocation
/// failure as `NoMem` instead of aborting.
pub(crate) fn alloc_value(len: u64) -> Result<Vec<u8>, KVError> {
    let len = usize::try_from(len).map_err(|_| KVError::Limit)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| KVError::NoMem)?;
    buf.resize(len, 0);
    Ok(buf)
}
