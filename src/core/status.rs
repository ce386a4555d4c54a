// FILE: src/core/status.rs
//! Result codes exchanged with the storage engine.
//!
//! The shim introduces no codes of its own. Every value here is the engine's
//! (SQLite's) own result code, so a status that comes back from the real
//! backend can be handed to the engine untouched.

use rusqlite::ffi;
use std::fmt;
use std::io;

/// Result type of every engine-facing operation. `Err` never carries `Status::OK`.
pub type VfsResult<T> = std::result::Result<T, Status>;

/// An engine result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    // --- PRIMARY CODES ---
    pub const OK: Status = Status(ffi::SQLITE_OK);
    pub const ERROR: Status = Status(ffi::SQLITE_ERROR);
    pub const PERM: Status = Status(ffi::SQLITE_PERM);
    pub const ABORT: Status = Status(ffi::SQLITE_ABORT);
    pub const BUSY: Status = Status(ffi::SQLITE_BUSY);
    pub const LOCKED: Status = Status(ffi::SQLITE_LOCKED);
    pub const NOMEM: Status = Status(ffi::SQLITE_NOMEM);
    pub const READONLY: Status = Status(ffi::SQLITE_READONLY);
    pub const INTERRUPT: Status = Status(ffi::SQLITE_INTERRUPT);
    pub const IOERR: Status = Status(ffi::SQLITE_IOERR);
    pub const CORRUPT: Status = Status(ffi::SQLITE_CORRUPT);
    pub const NOTFOUND: Status = Status(ffi::SQLITE_NOTFOUND);
    pub const FULL: Status = Status(ffi::SQLITE_FULL);
    pub const CANTOPEN: Status = Status(ffi::SQLITE_CANTOPEN);
    pub const PROTOCOL: Status = Status(ffi::SQLITE_PROTOCOL);
    pub const EMPTY: Status = Status(ffi::SQLITE_EMPTY);
    pub const SCHEMA: Status = Status(ffi::SQLITE_SCHEMA);
    pub const CONSTRAINT: Status = Status(ffi::SQLITE_CONSTRAINT);
    pub const MISMATCH: Status = Status(ffi::SQLITE_MISMATCH);
    pub const MISUSE: Status = Status(ffi::SQLITE_MISUSE);
    pub const NOLFS: Status = Status(ffi::SQLITE_NOLFS);

    // --- EXTENDED I/O CODES ---
    pub const IOERR_READ: Status = Status(ffi::SQLITE_IOERR_READ);
    pub const IOERR_SHORT_READ: Status = Status(ffi::SQLITE_IOERR_SHORT_READ);
    pub const IOERR_WRITE: Status = Status(ffi::SQLITE_IOERR_WRITE);
    pub const IOERR_FSYNC: Status = Status(ffi::SQLITE_IOERR_FSYNC);
    pub const IOERR_DIR_FSYNC: Status = Status(ffi::SQLITE_IOERR_DIR_FSYNC);
    pub const IOERR_TRUNCATE: Status = Status(ffi::SQLITE_IOERR_TRUNCATE);
    pub const IOERR_FSTAT: Status = Status(ffi::SQLITE_IOERR_FSTAT);
    pub const IOERR_UNLOCK: Status = Status(ffi::SQLITE_IOERR_UNLOCK);
    pub const IOERR_RDLOCK: Status = Status(ffi::SQLITE_IOERR_RDLOCK);
    pub const IOERR_DELETE: Status = Status(ffi::SQLITE_IOERR_DELETE);
    pub const IOERR_BLOCKED: Status = Status(ffi::SQLITE_IOERR_BLOCKED);
    pub const IOERR_NOMEM: Status = Status(ffi::SQLITE_IOERR_NOMEM);
    pub const IOERR_ACCESS: Status = Status(ffi::SQLITE_IOERR_ACCESS);
    pub const IOERR_CHECKRESERVEDLOCK: Status = Status(ffi::SQLITE_IOERR_CHECKRESERVEDLOCK);
    pub const IOERR_LOCK: Status = Status(ffi::SQLITE_IOERR_LOCK);
    pub const IOERR_CLOSE: Status = Status(ffi::SQLITE_IOERR_CLOSE);
    pub const IOERR_DIR_CLOSE: Status = Status(ffi::SQLITE_IOERR_DIR_CLOSE);
    pub const IOERR_SHMOPEN: Status = Status(ffi::SQLITE_IOERR_SHMOPEN);
    pub const IOERR_SHMSIZE: Status = Status(ffi::SQLITE_IOERR_SHMSIZE);
    pub const IOERR_SHMLOCK: Status = Status(ffi::SQLITE_IOERR_SHMLOCK);
    pub const IOERR_SHMMAP: Status = Status(ffi::SQLITE_IOERR_SHMMAP);
    pub const IOERR_SEEK: Status = Status(ffi::SQLITE_IOERR_SEEK);
    pub const IOERR_DELETE_NOENT: Status = Status(ffi::SQLITE_IOERR_DELETE_NOENT);
    pub const IOERR_GETTEMPPATH: Status = Status(ffi::SQLITE_IOERR_GETTEMPPATH);
    pub const IOERR_CONVPATH: Status = Status(ffi::SQLITE_IOERR_CONVPATH);

    // --- OTHER EXTENDED CODES ---
    pub const READONLY_DBMOVED: Status = Status(ffi::SQLITE_READONLY_DBMOVED);
    pub const LOCKED_SHAREDCACHE: Status = Status(ffi::SQLITE_LOCKED_SHAREDCACHE);
    pub const BUSY_RECOVERY: Status = Status(ffi::SQLITE_BUSY_RECOVERY);
    pub const CANTOPEN_NOTEMPDIR: Status = Status(ffi::SQLITE_CANTOPEN_NOTEMPDIR);
    pub const CANTOPEN_FULLPATH: Status = Status(ffi::SQLITE_CANTOPEN_FULLPATH);

    /// Wrap a raw code handed over by a backend.
    pub const fn from_code(code: i32) -> Self {
        Status(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self == Status::OK
    }

    /// Collapse an operation result into its code.
    pub fn of<T>(result: &VfsResult<T>) -> Status {
        match result {
            Ok(_) => Status::OK,
            Err(status) => *status,
        }
    }

    pub fn into_result(self) -> VfsResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Reconcile the outcome of an operation issued against the primary and
    /// the replica handle.
    ///
    /// Equal codes pass through. Otherwise a failing primary wins, and a
    /// failing replica is surfaced only when the primary succeeded.
    pub fn combine(primary: Status, replica: Status) -> Status {
        if primary == replica {
            primary
        } else if primary.is_ok() {
            replica
        } else {
            primary
        }
    }

    /// Symbolic name as printed in trace lines, if the code is recognized.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Status::OK => "SQLITE_OK",
            Status::ERROR => "SQLITE_ERROR",
            Status::PERM => "SQLITE_PERM",
            Status::ABORT => "SQLITE_ABORT",
            Status::BUSY => "SQLITE_BUSY",
            Status::LOCKED => "SQLITE_LOCKED",
            Status::NOMEM => "SQLITE_NOMEM",
            Status::READONLY => "SQLITE_READONLY",
            Status::INTERRUPT => "SQLITE_INTERRUPT",
            Status::IOERR => "SQLITE_IOERR",
            Status::CORRUPT => "SQLITE_CORRUPT",
            Status::NOTFOUND => "SQLITE_NOTFOUND",
            Status::FULL => "SQLITE_FULL",
            Status::CANTOPEN => "SQLITE_CANTOPEN",
            Status::PROTOCOL => "SQLITE_PROTOCOL",
            Status::EMPTY => "SQLITE_EMPTY",
            Status::SCHEMA => "SQLITE_SCHEMA",
            Status::CONSTRAINT => "SQLITE_CONSTRAINT",
            Status::MISMATCH => "SQLITE_MISMATCH",
            Status::MISUSE => "SQLITE_MISUSE",
            Status::NOLFS => "SQLITE_NOLFS",
            Status::IOERR_READ => "SQLITE_IOERR_READ",
            Status::IOERR_SHORT_READ => "SQLITE_IOERR_SHORT_READ",
            Status::IOERR_WRITE => "SQLITE_IOERR_WRITE",
            Status::IOERR_FSYNC => "SQLITE_IOERR_FSYNC",
            Status::IOERR_DIR_FSYNC => "SQLITE_IOERR_DIR_FSYNC",
            Status::IOERR_TRUNCATE => "SQLITE_IOERR_TRUNCATE",
            Status::IOERR_FSTAT => "SQLITE_IOERR_FSTAT",
            Status::IOERR_UNLOCK => "SQLITE_IOERR_UNLOCK",
            Status::IOERR_RDLOCK => "SQLITE_IOERR_RDLOCK",
            Status::IOERR_DELETE => "SQLITE_IOERR_DELETE",
            Status::IOERR_BLOCKED => "SQLITE_IOERR_BLOCKED",
            Status::IOERR_NOMEM => "SQLITE_IOERR_NOMEM",
            Status::IOERR_ACCESS => "SQLITE_IOERR_ACCESS",
            Status::IOERR_CHECKRESERVEDLOCK => "SQLITE_IOERR_CHECKRESERVEDLOCK",
            Status::IOERR_LOCK => "SQLITE_IOERR_LOCK",
            Status::IOERR_CLOSE => "SQLITE_IOERR_CLOSE",
            Status::IOERR_DIR_CLOSE => "SQLITE_IOERR_DIR_CLOSE",
            Status::IOERR_SHMOPEN => "SQLITE_IOERR_SHMOPEN",
            Status::IOERR_SHMSIZE => "SQLITE_IOERR_SHMSIZE",
            Status::IOERR_SHMLOCK => "SQLITE_IOERR_SHMLOCK",
            Status::IOERR_SHMMAP => "SQLITE_IOERR_SHMMAP",
            Status::IOERR_SEEK => "SQLITE_IOERR_SEEK",
            Status::IOERR_DELETE_NOENT => "SQLITE_IOERR_DELETE_NOENT",
            Status::IOERR_GETTEMPPATH => "SQLITE_IOERR_GETTEMPPATH",
            Status::IOERR_CONVPATH => "SQLITE_IOERR_CONVPATH",
            Status::READONLY_DBMOVED => "SQLITE_READONLY_DBMOVED",
            Status::LOCKED_SHAREDCACHE => "SQLITE_LOCKED_SHAREDCACHE",
            Status::BUSY_RECOVERY => "SQLITE_BUSY_RECOVERY",
            Status::CANTOPEN_NOTEMPDIR => "SQLITE_CANTOPEN_NOTEMPDIR",
            Status::CANTOPEN_FULLPATH => "SQLITE_CANTOPEN_FULLPATH",
            _ => return None,
        };
        Some(name)
    }

    /// Map an OS error onto the engine vocabulary.
    ///
    /// Out-of-space conditions become `FULL`; everything else becomes the
    /// operation-specific `fallback` (e.g. `IOERR_WRITE`).
    pub fn from_io(err: &io::Error, fallback: Status) -> Status {
        match err.raw_os_error() {
            Some(libc::ENOSPC) => Status::FULL,
            #[cfg(unix)]
            Some(libc::EDQUOT) => Status::FULL,
            _ => fallback,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl std::error::Error for Status {}

/// Lift `Status::combine` to operation results.
///
/// The primary's value is kept when both sides succeed. An absent replica
/// counts as success.
pub fn reconcile<T>(primary: VfsResult<T>, replica: Option<VfsResult<()>>) -> VfsResult<T> {
    let replica_status = replica.as_ref().map(Status::of).unwrap_or(Status::OK);
    match primary {
        Ok(value) => replica_status.into_result().map(|_| value),
        Err(status) => Err(Status::combine(status, replica_status)),
    }
}
