use std::ffi::CStr;
use std::fmt;

use thiserror::Error;

/// Raw value of the OK result code.
pub const OK: i32 = 0;

const OK_DESCRIPTION: &CStr = c"Successful result";
const UNKNOWN_DESCRIPTION: &CStr = c"Unknown error code";

/// Every non-OK result code.
///
/// `Ok(())` plays the role of OK, so a `Result<T, KVError>` covers the whole
/// taxonomy. Each variant has a stable raw value (see [`KVError::code`]) that
/// is what crosses the C ABI; the `Display` text is the fixed description
/// from [`KVError::description`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KVError {
    NoMem,
    Abort,
    IoErr,
    Corrupt,
    Locked,
    Busy,
    Done,
    Perm,
    NotImplemented,
    NotFound,
    Noop,
    Invalid,
    Eof,
    Unknown,
    Limit,
    Exists,
    Empty,
    Full,
    CantOpen,
    ReadOnly,
    LockErr,
}

impl KVError {
    /// All codes, in declaration order.
    pub const ALL: [KVError; 21] = [
        KVError::NoMem,
        KVError::Abort,
        KVError::IoErr,
        KVError::Corrupt,
        KVError::Locked,
        KVError::Busy,
        KVError::Done,
        KVError::Perm,
        KVError::NotImplemented,
        KVError::NotFound,
        KVError::Noop,
        KVError::Invalid,
        KVError::Eof,
        KVError::Unknown,
        KVError::Limit,
        KVError::Exists,
        KVError::Empty,
        KVError::Full,
        KVError::CantOpen,
        KVError::ReadOnly,
        KVError::LockErr,
    ];

    /// Stable raw value. Never changes between releases.
    pub const fn code(self) -> i32 {
        match self {
            KVError::NoMem => -1,
            KVError::Abort => -10,
            KVError::IoErr => -2,
            KVError::Corrupt => -24,
            KVError::Locked => -4,
            KVError::Busy => -14,
            KVError::Done => -28,
            KVError::Perm => -19,
            KVError::NotImplemented => -17,
            KVError::NotFound => -6,
            KVError::Noop => -20,
            KVError::Invalid => -9,
            KVError::Eof => -18,
            KVError::Unknown => -13,
            KVError::Limit => -7,
            KVError::Exists => -11,
            KVError::Empty => -3,
            KVError::Full => -73,
            KVError::CantOpen => -74,
            KVError::ReadOnly => -75,
            KVError::LockErr => -76,
        }
    }

    /// Look up a code by raw value. Returns None for OK and for values
    /// outside the taxonomy.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Symbolic name, as used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            KVError::NoMem => "NOMEM",
            KVError::Abort => "ABORT",
            KVError::IoErr => "IOERR",
            KVError::Corrupt => "CORRUPT",
            KVError::Locked => "LOCKED",
            KVError::Busy => "BUSY",
            KVError::Done => "DONE",
            KVError::Perm => "PERM",
            KVError::NotImplemented => "NOTIMPLEMENTED",
            KVError::NotFound => "NOTFOUND",
            KVError::Noop => "NOOP",
            KVError::Invalid => "INVALID",
            KVError::Eof => "EOF",
            KVError::Unknown => "UNKNOWN",
            KVError::Limit => "LIMIT",
            KVError::Exists => "EXISTS",
            KVError::Empty => "EMPTY",
            KVError::Full => "FULL",
            KVError::CantOpen => "CANTOPEN",
            KVError::ReadOnly => "READ_ONLY",
            KVError::LockErr => "LOCKERR",
        }
    }

    /// Fixed description, nul-terminated so the C ABI can hand it out as is.
    pub const fn description(self) -> &'static CStr {
        match self {
            KVError::NoMem => c"Out of memory",
            KVError::Abort => c"Another thread have released this instance",
            KVError::IoErr => c"IO error",
            KVError::Corrupt => c"Corrupt pointer",
            KVError::Locked => c"Forbidden Operation",
            KVError::Busy => c"The database file is locked",
            KVError::Done => c"Operation done",
            KVError::Perm => c"Permission error",
            KVError::NotImplemented => {
                c"Method not implemented by the underlying Key/Value storage engine"
            }
            KVError::NotFound => c"No such record",
            KVError::Noop => c"No such method",
            KVError::Invalid => c"Invalid parameter",
            KVError::Eof => c"End Of Input",
            KVError::Unknown => c"Unknown configuration option",
            KVError::Limit => c"Database limit reached",
            KVError::Exists => c"Record exists",
            KVError::Empty => c"Empty record",
            KVError::Full => c"Full database (unlikely)",
            KVError::CantOpen => c"Unable to open the database file",
            KVError::ReadOnly => c"Read only Key/Value storage engine",
            KVError::LockErr => c"Locking protocol error",
        }
    }
}

impl fmt::Display for KVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Every description is ASCII.
        f.write_str(self.description().to_str().unwrap_or_default())
    }
}

/// Human-readable description of a raw result code.
pub fn describe(code: i32) -> &'static str {
    describe_cstr(code).to_str().unwrap_or_default()
}

/// Nul-terminated variant of [`describe`], for handing to C callers.
pub(crate) fn describe_cstr(code: i32) -> &'static CStr {
    if code == OK {
        return OK_DESCRIPTION;
    }
    KVError::from_code(code).map_or(UNKNOWN_DESCRIPTION, KVError::description)
}

/// Collapse a result into its raw code.
pub fn to_code<T>(result: &Result<T, KVError>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(e) => e.code(),
    }
}
