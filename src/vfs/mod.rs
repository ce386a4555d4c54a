// FILE: src/vfs/mod.rs
//! Backend interface.
//!
//! A `Vfs` is anything the engine can open files through: the real OS
//! backend, the mirroring shim, or a test wrapper. Optional capabilities are
//! explicit accessors returning `Option`, so "absent" is observable and a
//! wrapping layer can propagate absence instead of inventing a stub.

pub mod lock;
pub mod os;
pub mod registry;

use crate::core::{AccessFlags, DeviceCharacteristics, LockLevel, OpenFlags, ShmLockFlags, SyncFlags, VfsResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use os::OsVfs;
pub use registry::VfsRegistry;

/// Default maximum pathname length of a backend.
pub const DEFAULT_MAX_PATHNAME: usize = 512;

/// One shared-memory region, as mapped by `SharedMemory::shm_map`.
pub type ShmRegion = Arc<Mutex<Vec<u8>>>;

/// Result of a successful `Vfs::open`.
pub struct OpenedFile {
    pub file: Box<dyn VfsFile>,
    pub out_flags: OpenFlags,
}

impl OpenedFile {
    pub fn new(file: Box<dyn VfsFile>, out_flags: OpenFlags) -> Self {
        Self { file, out_flags }
    }
}

/// Filesystem-level operations of a backend.
pub trait Vfs: Send + Sync {
    fn name(&self) -> &str;

    fn max_pathname(&self) -> usize {
        DEFAULT_MAX_PATHNAME
    }

    /// Open `path`, or an anonymous temp file when `path` is `None`.
    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<OpenedFile>;

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()>;

    fn access(&self, path: &str, flags: AccessFlags) -> VfsResult<bool>;

    fn full_pathname(&self, path: &str) -> VfsResult<String>;

    /// Fill `buf` with random bytes; returns how many were written.
    fn randomness(&self, buf: &mut [u8]) -> usize;

    /// Sleep for at least `duration`; returns the time actually slept.
    fn sleep(&self, duration: Duration) -> Duration;

    /// Current time as a Julian day number.
    fn current_time(&self) -> VfsResult<f64>;

    fn dynamic_library(&self) -> Option<&dyn DynamicLibrary> {
        None
    }

    fn last_error(&self) -> Option<&dyn LastError> {
        None
    }

    fn precise_clock(&self) -> Option<&dyn PreciseClock> {
        None
    }

    fn system_calls(&self) -> Option<&dyn SystemCalls> {
        None
    }
}

/// Per-file operations of an open handle.
pub trait VfsFile: Send {
    fn close(&mut self) -> VfsResult<()>;

    /// Fill `buf` from `offset`. A short read zero-fills the remainder and
    /// returns `Status::IOERR_SHORT_READ`.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<()>;

    fn write(&mut self, buf: &[u8], offset: u64) -> VfsResult<()>;

    fn truncate(&mut self, size: u64) -> VfsResult<()>;

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()>;

    fn file_size(&mut self) -> VfsResult<u64>;

    fn lock(&mut self, level: LockLevel) -> VfsResult<()>;

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()>;

    fn check_reserved_lock(&mut self) -> VfsResult<bool>;

    fn file_control(&mut self, op: &mut FileControl) -> VfsResult<()>;

    fn sector_size(&mut self) -> u32;

    fn device_characteristics(&mut self) -> DeviceCharacteristics;

    fn shared_memory(&mut self) -> Option<&mut dyn SharedMemory> {
        None
    }
}

/// Shared-memory capability of a file (used by WAL mode).
pub trait SharedMemory {
    /// Map region `region` of `region_size` bytes. `Ok(None)` means the region
    /// does not exist yet and `extend` was false.
    fn shm_map(&mut self, region: u32, region_size: usize, extend: bool) -> VfsResult<Option<ShmRegion>>;

    fn shm_lock(&mut self, offset: u32, n: u32, flags: ShmLockFlags) -> VfsResult<()>;

    fn shm_barrier(&mut self);

    fn shm_unmap(&mut self, delete: bool) -> VfsResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyscallPtr(pub usize);

/// Loadable-extension support.
pub trait DynamicLibrary {
    fn dl_open(&self, path: &str) -> Option<LibraryHandle>;
    fn dl_error(&self) -> String;
    fn dl_sym(&self, handle: LibraryHandle, symbol: &str) -> Option<SymbolAddress>;
    fn dl_close(&self, handle: LibraryHandle);
}

/// Most recent OS-level error seen by the backend.
pub trait LastError {
    fn get_last_error(&self) -> (i32, String);
}

/// Millisecond-resolution clock (Julian day * 86_400_000).
pub trait PreciseClock {
    fn current_time_i64(&self) -> VfsResult<i64>;
}

/// System-call override table.
pub trait SystemCalls {
    /// `name = None` restores every default.
    fn set_system_call(&self, name: Option<&str>, call: Option<SyscallPtr>) -> VfsResult<()>;
    fn get_system_call(&self, name: &str) -> Option<SyscallPtr>;
    fn next_system_call(&self, name: Option<&str>) -> Option<String>;
}

// --- FILE CONTROL OPCODES ---
const FCNTL_LOCKSTATE: i32 = 1;
const FCNTL_SIZE_HINT: i32 = 5;
const FCNTL_CHUNK_SIZE: i32 = 6;
const FCNTL_SYNC_OMITTED: i32 = 8;
const FCNTL_PERSIST_WAL: i32 = 10;
const FCNTL_VFSNAME: i32 = 12;
const FCNTL_POWERSAFE_OVERWRITE: i32 = 13;
const FCNTL_PRAGMA: i32 = 14;
const FCNTL_TEMPFILENAME: i32 = 16;

/// A file-control request with its in/out fields.
#[derive(Debug, Clone, PartialEq)]
pub enum FileControl {
    /// Out: the handle's current lock level.
    LockState { level: Option<LockLevel> },
    SizeHint(u64),
    ChunkSize(u32),
    SyncOmitted,
    /// In: `-1` queries, `0`/`1` set. Out: the current setting.
    PersistWal(i32),
    /// Same in/out convention as `PersistWal`.
    PowersafeOverwrite(i32),
    /// Out: the name chain of the backends serving this file.
    VfsName { name: Option<String> },
    /// Out: a fresh temp-file name from the backend.
    TempFilename { name: Option<String> },
    Pragma { name: String, value: Option<String>, result: Option<String> },
    Other(i32),
}

impl FileControl {
    pub fn op_code(&self) -> i32 {
        match self {
            FileControl::LockState { .. } => FCNTL_LOCKSTATE,
            FileControl::SizeHint(_) => FCNTL_SIZE_HINT,
            FileControl::ChunkSize(_) => FCNTL_CHUNK_SIZE,
            FileControl::SyncOmitted => FCNTL_SYNC_OMITTED,
            FileControl::PersistWal(_) => FCNTL_PERSIST_WAL,
            FileControl::PowersafeOverwrite(_) => FCNTL_POWERSAFE_OVERWRITE,
            FileControl::VfsName { .. } => FCNTL_VFSNAME,
            FileControl::TempFilename { .. } => FCNTL_TEMPFILENAME,
            FileControl::Pragma { .. } => FCNTL_PRAGMA,
            FileControl::Other(op) => *op,
        }
    }

    /// Symbolic rendering used by full-verbosity traces.
    pub fn describe(&self) -> String {
        match self {
            FileControl::LockState { .. } => "LOCKSTATE".into(),
            FileControl::SizeHint(n) => format!("SIZE_HINT,{}", n),
            FileControl::ChunkSize(n) => format!("CHUNK_SIZE,{}", n),
            FileControl::SyncOmitted => "SYNC_OMITTED".into(),
            FileControl::PersistWal(v) => format!("PERSIST_WAL,{}", v),
            FileControl::PowersafeOverwrite(v) => format!("POWERSAFE_OVERWRITE,{}", v),
            FileControl::VfsName { .. } => "VFSNAME".into(),
            FileControl::TempFilename { .. } => "TEMPFILENAME".into(),
            FileControl::Pragma { name, value, .. } => {
                format!("PRAGMA,[{},{}]", name, value.as_deref().unwrap_or("null"))
            }
            FileControl::Other(op) => op.to_string(),
        }
    }

    /// String produced by the request, for the requests that yield one.
    pub fn string_result(&self) -> Option<&str> {
        match self {
            FileControl::TempFilename { name } => name.as_deref(),
            FileControl::Pragma { result, .. } => result.as_deref(),
            _ => None,
        }
    }
}
