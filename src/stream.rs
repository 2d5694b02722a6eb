//! Streaming fetch: hands a value to caller logic chunk by chunk.
//!
//! A [`Consumer`] sees each chunk as a borrowed slice that is only valid for
//! that one call. It copies out whatever it wants to keep and answers with
//! `Ok(())` to continue or an error code to stop. The stop code becomes the
//! result of the whole fetch, unchanged.
//!
//! The `Bridge` sits between the engine and the consumer and guarantees the
//! consumer is never called again once it has asked to stop, whatever the
//! engine does afterwards.

use tracing::{debug, trace};

use crate::error::KVError;

/// Caller-supplied logic invoked once per chunk of a streamed value.
///
/// Any per-fetch context lives in the implementor (or in a closure's
/// captures), so one consumer type can serve many independent fetches.
pub trait Consumer {
    /// Receive the next chunk. Returning an error ends the fetch with that
    /// error.
    fn consume(&mut self, chunk: &[u8]) -> Result<(), KVError>;
}

impl<F> Consumer for F
where
    F: FnMut(&[u8]) -> Result<(), KVError>,
{
    fn consume(&mut self, chunk: &[u8]) -> Result<(), KVError> {
        self(chunk)
    }
}

/// Consumer that gathers the whole value into one buffer.
#[derive(Debug, Default)]
pub struct Collect {
    pub bytes: Vec<u8>,
}

impl Consumer for Collect {
    fn consume(&mut self, chunk: &[u8]) -> Result<(), KVError> {
        self.bytes
            .try_reserve(chunk.len())
            .map_err(|_| KVError::NoMem)?;
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Stopped(KVError),
}

/// Delivery side of one streaming fetch. Lives for exactly one call.
pub(crate) struct Bridge<'c, C: Consumer + ?Sized> {
    consumer: &'c mut C,
    state: State,
    chunks: u64,
    bytes: u64,
}

impl<'c, C: Consumer + ?Sized> Bridge<'c, C> {
    pub(crate) fn new(consumer: &'c mut C) -> Self {
        Self {
            consumer,
            state: State::Open,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Forward one chunk. Empty chunks are dropped so an empty value reaches
    /// the consumer zero times.
    pub(crate) fn deliver(&mut self, chunk: &[u8]) -> Result<(), KVError> {
        if let State::Stopped(code) = self.state {
            return Err(code);
        }
        if chunk.is_empty() {
            return Ok(());
        }

        self.chunks += 1;
        self.bytes += chunk.len() as u64;
        trace!("Bridge: chunk {} ({} bytes)", self.chunks, chunk.len());

        match self.consumer.consume(chunk) {
            Ok(()) => Ok(()),
            Err(code) => {
                self.state = State::Stopped(code);
                Err(code)
            }
        }
    }

    /// Settle the overall result. A consumer stop wins over whatever the
    /// engine reported while unwinding.
    pub(crate) fn finish(self, engine_result: Result<(), KVError>) -> Result<(), KVError> {
        match self.state {
            State::Stopped(code) => {
                debug!(
                    "Bridge: consumer stopped with {} after {} chunks ({} bytes)",
                    code.name(),
                    self.chunks,
                    self.bytes
                );
                Err(code)
            }
            State::Open => {
                if engine_result.is_ok() {
                    debug!("Bridge: delivered {} chunks ({} bytes)", self.chunks, self.bytes);
                }
                engine_result
            }
        }
    }
}
