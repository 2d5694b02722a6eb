//! C-compatible API.
//!
//! Protocol:
//! - Every function returns a raw result code (`0` is OK, see [`KVError::code`]).
//! - A store is an opaque `kv_handle` created by `kv_open` and destroyed by
//!   `kv_close`. Closing twice, or using a handle after close, is undefined.
//! - Keys are `(pointer, length)` with length > 0. Values may be empty, in
//!   which case the pointer may be null.
//! - `kv_fetch` is the two-phase read: pass a null buffer to learn the length,
//!   then pass a buffer of at least that many bytes to receive the value.
//! - `kv_fetch_callback` hands the value to a C function in chunks. The chunk
//!   pointer is valid only until that callback returns. A non-zero return
//!   stops the fetch and is returned from `kv_fetch_callback` unchanged.
//!   Inside the callback, calls on the same handle fail with `LOCKED`.
//! - Null pointers and non-positive key lengths give `KVError::Invalid`.

#![allow(non_camel_case_types)]

use std::ffi::{CStr, c_char, c_int, c_uint, c_void};

use tracing::debug;

use crate::error::{KVError, OK, describe_cstr, to_code};
use crate::store::Store;

/// Opaque handle to an open store.
pub struct kv_handle {
    store: Store,
}

/// Streaming consumer: `(chunk, chunk_len, user_data) -> result code`.
pub type kv_consumer =
    unsafe extern "C" fn(data: *const c_void, data_len: c_uint, user_data: *mut c_void) -> c_int;

/// Open a store. On success `*out` receives the handle.
///
/// # Safety
/// `out` must be valid for writes; `location` must be null or a
/// nul-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_open(out: *mut *mut kv_handle, location: *const c_char) -> c_int {
    if out.is_null() || location.is_null() {
        return KVError::Invalid.code();
    }
    let location = match unsafe { CStr::from_ptr(location) }.to_str() {
        Ok(s) => s,
        Err(_) => return KVError::CantOpen.code(),
    };

    match Store::open(location) {
        Ok(store) => {
            let handle = Box::new(kv_handle { store });
            unsafe { *out = Box::into_raw(handle) };
            OK
        }
        Err(e) => {
            unsafe { *out = std::ptr::null_mut() };
            e.code()
        }
    }
}

/// Close a store and free its handle.
///
/// # Safety
/// `handle` must come from `kv_open` and must not be used again.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_close(handle: *mut kv_handle) -> c_int {
    if handle.is_null() {
        return KVError::Invalid.code();
    }
    let handle = unsafe { Box::from_raw(handle) };
    to_code(&handle.store.close())
}

/// Create or replace a record.
///
/// # Safety
/// `handle` must be live; `key` must point to `key_len` bytes and `value`
/// to `value_len` bytes (or be null when `value_len` is 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_store(
    handle: *mut kv_handle,
    key: *const c_void,
    key_len: c_int,
    value: *const c_void,
    value_len: i64,
) -> c_int {
    let result = unsafe { store_args(handle, key, key_len, value, value_len) }
        .and_then(|(store, key, value)| store.store(key, value));
    to_code(&result)
}

/// Create a record, or append to an existing one.
///
/// # Safety
/// Same as [`kv_store`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_append(
    handle: *mut kv_handle,
    key: *const c_void,
    key_len: c_int,
    value: *const c_void,
    value_len: i64,
) -> c_int {
    let result = unsafe { store_args(handle, key, key_len, value, value_len) }
        .and_then(|(store, key, value)| store.append(key, value));
    to_code(&result)
}

/// Remove a record.
///
/// # Safety
/// `handle` must be live; `key` must point to `key_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_delete(
    handle: *mut kv_handle,
    key: *const c_void,
    key_len: c_int,
) -> c_int {
    let store = match unsafe { handle_ref(handle) } {
        Ok(store) => store,
        Err(e) => return e.code(),
    };
    let result = unsafe { key_slice(key, key_len) }.and_then(|key| store.delete(key));
    to_code(&result)
}

/// Two-phase fetch.
///
/// With `buf == NULL`, writes the value length to `*buf_len`. Otherwise
/// `*buf_len` is the capacity of `buf`: if the value fits it is copied and
/// `*buf_len` set to its length; if not, nothing is copied, `*buf_len` is set
/// to the required length and `KVError::Limit` is returned.
///
/// # Safety
/// `handle` must be live; `key` must point to `key_len` bytes; `buf_len`
/// must be valid for reads and writes; `buf`, when not null, must be valid
/// for `*buf_len` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_fetch(
    handle: *mut kv_handle,
    key: *const c_void,
    key_len: c_int,
    buf: *mut c_void,
    buf_len: *mut i64,
) -> c_int {
    if buf_len.is_null() {
        return KVError::Invalid.code();
    }
    let store = match unsafe { handle_ref(handle) } {
        Ok(store) => store,
        Err(e) => return e.code(),
    };
    let key = match unsafe { key_slice(key, key_len) } {
        Ok(key) => key,
        Err(e) => return e.code(),
    };

    if buf.is_null() {
        return match store.fetch_raw(key, None) {
            Ok(len) => {
                unsafe { *buf_len = len as i64 };
                OK
            }
            Err(e) => e.code(),
        };
    }

    let capacity = match usize::try_from(unsafe { *buf_len }) {
        Ok(n) => n,
        Err(_) => return KVError::Invalid.code(),
    };
    let len = match store.fetch_raw(key, None) {
        Ok(len) => len,
        Err(e) => return e.code(),
    };
    if len > capacity as u64 {
        unsafe { *buf_len = len as i64 };
        return KVError::Limit.code();
    }

    let dest = unsafe { std::slice::from_raw_parts_mut(buf as *mut u8, len as usize) };
    match store.fetch_raw(key, Some(dest)) {
        Ok(filled) if filled == len => {
            unsafe { *buf_len = len as i64 };
            OK
        }
        Ok(filled) => {
            // Changed between our own probe and fill; report the new size.
            unsafe { *buf_len = filled as i64 };
            KVError::Corrupt.code()
        }
        Err(e) => e.code(),
    }
}

/// Streaming fetch through a C callback.
///
/// # Safety
/// `handle` must be live; `key` must point to `key_len` bytes; `consumer`
/// must be safe to call with `user_data` and must not retain the chunk
/// pointer. Calls it makes on this same handle return `LOCKED`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kv_fetch_callback(
    handle: *mut kv_handle,
    key: *const c_void,
    key_len: c_int,
    consumer: Option<kv_consumer>,
    user_data: *mut c_void,
) -> c_int {
    let Some(consumer) = consumer else {
        return KVError::Invalid.code();
    };
    let store = match unsafe { handle_ref(handle) } {
        Ok(store) => store,
        Err(e) => return e.code(),
    };
    let key = match unsafe { key_slice(key, key_len) } {
        Ok(key) => key,
        Err(e) => return e.code(),
    };

    // Raw code from the callback, kept verbatim even when it is not one of
    // ours. The Rust side only needs to know that delivery must stop.
    let mut stopped_with: Option<c_int> = None;
    let result = store.fetch_streaming(key, &mut |chunk: &[u8]| -> Result<(), KVError> {
        // Chunks never exceed the clamped chunk size, which fits c_uint.
        let len = chunk.len() as c_uint;
        let rc = unsafe { consumer(chunk.as_ptr() as *const c_void, len, user_data) };
        if rc == OK {
            return Ok(());
        }
        stopped_with = Some(rc);
        Err(KVError::from_code(rc).unwrap_or(KVError::Abort))
    });

    match stopped_with {
        Some(rc) => {
            debug!("kv_fetch_callback: consumer stopped with {}", rc);
            rc
        }
        None => to_code(&result),
    }
}

/// Fixed description of a result code. The returned string is static.
#[unsafe(no_mangle)]
pub extern "C" fn kv_describe(code: c_int) -> *const c_char {
    describe_cstr(code).as_ptr()
}

unsafe fn handle_ref<'a>(handle: *mut kv_handle) -> Result<&'a Store, KVError> {
    if handle.is_null() {
        return Err(KVError::Invalid);
    }
    Ok(unsafe { &(*handle).store })
}

unsafe fn key_slice<'a>(key: *const c_void, key_len: c_int) -> Result<&'a [u8], KVError> {
    if key.is_null() || key_len <= 0 {
        return Err(KVError::Invalid);
    }
    Ok(unsafe { std::slice::from_raw_parts(key as *const u8, key_len as usize) })
}

unsafe fn value_slice<'a>(value: *const c_void, value_len: i64) -> Result<&'a [u8], KVError> {
    if value_len == 0 {
        return Ok(&[]);
    }
    if value.is_null() || value_len < 0 {
        return Err(KVError::Invalid);
    }
    let len = usize::try_from(value_len).map_err(|_| KVError::Limit)?;
    Ok(unsafe { std::slice::from_raw_parts(value as *const u8, len) })
}

unsafe fn store_args<'a>(
    handle: *mut kv_handle,
    key: *const c_void,
    key_len: c_int,
    value: *const c_void,
    value_len: i64,
) -> Result<(&'a Store, &'a [u8], &'a [u8]), KVError> {
    let store = unsafe { handle_ref(handle) }?;
    let key = unsafe { key_slice(key, key_len) }?;
    let value = unsafe { value_slice(value, value_len) }?;
    Ok((store, key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    use crate::store::tests::growing_store;

    fn open_mem() -> *mut kv_handle {
        let mut handle = ptr::null_mut();
        let location = CString::new(":mem:").unwrap();
        let rc = unsafe { kv_open(&mut handle, location.as_ptr()) };
        assert_eq!(rc, OK);
        assert!(!handle.is_null());
        handle
    }

    fn put(handle: *mut kv_handle, key: &[u8], value: &[u8]) -> c_int {
        unsafe {
            kv_store(
                handle,
                key.as_ptr() as *const c_void,
                key.len() as c_int,
                value.as_ptr() as *const c_void,
                value.len() as i64,
            )
        }
    }

    fn fetch_two_phase(handle: *mut kv_handle, key: &[u8]) -> Result<Vec<u8>, c_int> {
        let mut len: i64 = 0;
        let rc = unsafe {
            kv_fetch(
                handle,
                key.as_ptr() as *const c_void,
                key.len() as c_int,
                ptr::null_mut(),
                &mut len,
            )
        };
        if rc != OK {
            return Err(rc);
        }
        let mut buf = vec![0u8; len as usize];
        // A zero-length Vec still has a non-null dangling pointer.
        let rc = unsafe {
            kv_fetch(
                handle,
                key.as_ptr() as *const c_void,
                key.len() as c_int,
                buf.as_mut_ptr() as *mut c_void,
                &mut len,
            )
        };
        if rc != OK {
            return Err(rc);
        }
        buf.truncate(len as usize);
        Ok(buf)
    }

    unsafe extern "C" fn collect_chunks(
        data: *const c_void,
        data_len: c_uint,
        user_data: *mut c_void,
    ) -> c_int {
        let out = unsafe { &mut *(user_data as *mut Vec<Vec<u8>>) };
        let chunk = unsafe { std::slice::from_raw_parts(data as *const u8, data_len as usize) };
        out.push(chunk.to_vec());
        OK
    }

    unsafe extern "C" fn stop_with_user_code(
        _data: *const c_void,
        _data_len: c_uint,
        user_data: *mut c_void,
    ) -> c_int {
        let calls = unsafe { &mut *(user_data as *mut u32) };
        *calls += 1;
        42
    }

    unsafe extern "C" fn copy_into_same_handle(
        data: *const c_void,
        data_len: c_uint,
        user_data: *mut c_void,
    ) -> c_int {
        let handle = user_data as *mut kv_handle;
        unsafe { kv_append(handle, b"dst".as_ptr() as *const c_void, 3, data, data_len as i64) }
    }

    #[test]
    fn open_store_fetch_close() {
        let handle = open_mem();
        assert_eq!(put(handle, b"k", b"value"), OK);
        assert_eq!(fetch_two_phase(handle, b"k").unwrap(), b"value");
        assert_eq!(unsafe { kv_close(handle) }, OK);
    }

    #[test]
    fn empty_value_with_null_pointer() {
        let handle = open_mem();
        let key = b"empty";
        let rc = unsafe {
            kv_store(handle, key.as_ptr() as *const c_void, key.len() as c_int, ptr::null(), 0)
        };
        assert_eq!(rc, OK);
        assert_eq!(fetch_two_phase(handle, key).unwrap(), b"");
        unsafe { kv_close(handle) };
    }

    #[test]
    fn small_buffer_is_limit_with_required_length() {
        let handle = open_mem();
        put(handle, b"k", b"0123456789");

        let mut buf = [0u8; 4];
        let mut len: i64 = buf.len() as i64;
        let rc = unsafe {
            kv_fetch(
                handle,
                b"k".as_ptr() as *const c_void,
                1,
                buf.as_mut_ptr() as *mut c_void,
                &mut len,
            )
        };
        assert_eq!(rc, KVError::Limit.code());
        assert_eq!(len, 10);
        assert_eq!(buf, [0u8; 4]);
        unsafe { kv_close(handle) };
    }

    #[test]
    fn missing_key_and_bad_arguments() {
        let handle = open_mem();
        assert_eq!(fetch_two_phase(handle, b"nope").unwrap_err(), KVError::NotFound.code());

        let rc = unsafe { kv_delete(handle, b"nope".as_ptr() as *const c_void, 4) };
        assert_eq!(rc, KVError::NotFound.code());

        let rc = unsafe { kv_delete(handle, b"k".as_ptr() as *const c_void, 0) };
        assert_eq!(rc, KVError::Invalid.code());

        let rc = unsafe { kv_delete(ptr::null_mut(), b"k".as_ptr() as *const c_void, 1) };
        assert_eq!(rc, KVError::Invalid.code());

        let rc = unsafe {
            kv_fetch_callback(handle, b"k".as_ptr() as *const c_void, 1, None, ptr::null_mut())
        };
        assert_eq!(rc, KVError::Invalid.code());

        assert_eq!(unsafe { kv_close(ptr::null_mut()) }, KVError::Invalid.code());
        unsafe { kv_close(handle) };
    }

    #[test]
    fn open_null_location_is_invalid() {
        let mut handle = ptr::null_mut();
        assert_eq!(unsafe { kv_open(&mut handle, ptr::null()) }, KVError::Invalid.code());
    }

    #[test]
    fn callback_receives_whole_value_with_user_data() {
        let handle = open_mem();
        let value: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        put(handle, b"big", &value);

        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let rc = unsafe {
            kv_fetch_callback(
                handle,
                b"big".as_ptr() as *const c_void,
                3,
                Some(collect_chunks),
                &mut chunks as *mut Vec<Vec<u8>> as *mut c_void,
            )
        };
        assert_eq!(rc, OK);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), value);
        unsafe { kv_close(handle) };
    }

    #[test]
    fn callback_code_passes_through_verbatim() {
        let handle = open_mem();
        let value = vec![7u8; 20_000];
        put(handle, b"k", &value);

        let mut calls: u32 = 0;
        let rc = unsafe {
            kv_fetch_callback(
                handle,
                b"k".as_ptr() as *const c_void,
                1,
                Some(stop_with_user_code),
                &mut calls as *mut u32 as *mut c_void,
            )
        };
        assert_eq!(rc, 42);
        assert_eq!(calls, 1);
        unsafe { kv_close(handle) };
    }

    #[test]
    fn fill_sees_a_different_length_than_probe() {
        // The record grows by one byte on every probe.
        let (store, _probes) = growing_store(u32::MAX, 0);
        let handle = Box::into_raw(Box::new(kv_handle { store }));

        let mut buf = [0u8; 16];
        let mut len: i64 = buf.len() as i64;
        let rc = unsafe {
            kv_fetch(
                handle,
                b"k".as_ptr() as *const c_void,
                1,
                buf.as_mut_ptr() as *mut c_void,
                &mut len,
            )
        };
        assert_eq!(rc, KVError::Corrupt.code());
        // Probed 3 bytes, the fill found 4: the caller learns the new size.
        assert_eq!(len, 4);
        assert_eq!(&buf[..3], b"abc");

        // A second probe reports the grown record.
        let mut len: i64 = 0;
        let rc = unsafe {
            kv_fetch(handle, b"k".as_ptr() as *const c_void, 1, ptr::null_mut(), &mut len)
        };
        assert_eq!(rc, OK);
        assert_eq!(len, 4);
        assert_eq!(unsafe { kv_close(handle) }, OK);
    }

    #[test]
    fn stable_record_fills_exactly() {
        let (store, _probes) = growing_store(0, 0);
        let handle = Box::into_raw(Box::new(kv_handle { store }));
        assert_eq!(fetch_two_phase(handle, b"k").unwrap(), b"abc");
        assert_eq!(unsafe { kv_close(handle) }, OK);
    }

    #[test]
    fn callback_writing_to_same_handle_gets_locked() {
        let handle = open_mem();
        put(handle, b"src", b"payload");

        let rc = unsafe {
            kv_fetch_callback(
                handle,
                b"src".as_ptr() as *const c_void,
                3,
                Some(copy_into_same_handle),
                handle as *mut c_void,
            )
        };
        assert_eq!(rc, KVError::Locked.code());
        assert_eq!(fetch_two_phase(handle, b"dst").unwrap_err(), KVError::NotFound.code());
        assert_eq!(fetch_two_phase(handle, b"src").unwrap(), b"payload");
        unsafe { kv_close(handle) };
    }

    #[test]
    fn describe_returns_static_strings() {
        let ok = unsafe { CStr::from_ptr(kv_describe(OK)) };
        assert_eq!(ok.to_str().unwrap(), "Successful result");
        let nf = unsafe { CStr::from_ptr(kv_describe(KVError::NotFound.code())) };
        assert_eq!(nf.to_str().unwrap(), "No such record");
    }
}
