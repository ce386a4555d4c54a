// FILE: src/vfs/os.rs
//! OS backend: the real storage the shim delegates to.
//!
//! Plain `std::fs` files with positioned reads and writes, the engine's lock
//! protocol enforced in-process through a shared `LockTable`, and anonymous
//! temp files for nameless opens.

use crate::core::{AccessFlags, DeviceCharacteristics, LockLevel, OpenFlags, Status, SyncFlags, VfsResult};
use crate::vfs::lock::{FileLock, LockTable};
use crate::vfs::{FileControl, LastError, OpenedFile, PreciseClock, Vfs, VfsFile, DEFAULT_MAX_PATHNAME};
use rand::RngCore;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const OS_VFS_NAME: &str = "os";

const SECTOR_SIZE: u32 = 4096;
const TEMP_PREFIX: &str = "etilqs_";

// Julian day of the Unix epoch, in days and in milliseconds.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const UNIX_EPOCH_JD_MS: i64 = 210_866_760_000_000;

type ErrorSlot = Arc<Mutex<Option<(i32, String)>>>;

fn record(slot: &ErrorSlot, err: &io::Error, fallback: Status) -> Status {
    if let Ok(mut last) = slot.lock() {
        *last = Some((err.raw_os_error().unwrap_or(0), err.to_string()));
    }
    Status::from_io(err, fallback)
}

/// The real backend.
pub struct OsVfs {
    name: String,
    locks: Arc<LockTable>,
    last_error: ErrorSlot,
    temp_dir: PathBuf,
    max_pathname: usize,
}

impl Default for OsVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl OsVfs {
    pub fn new() -> Self {
        Self::named(OS_VFS_NAME)
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            locks: Arc::new(LockTable::new()),
            last_error: Arc::new(Mutex::new(None)),
            temp_dir: std::env::temp_dir(),
            max_pathname: DEFAULT_MAX_PATHNAME,
        }
    }

    pub fn with_max_pathname(mut self, max: usize) -> Self {
        self.max_pathname = max;
        self
    }

    /// Place anonymous temp files in `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.locks
    }

    fn temp_name(&self) -> PathBuf {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.temp_dir.join(format!("{}{:016x}", TEMP_PREFIX, u64::from_le_bytes(bytes)))
    }

    fn open_options(flags: OpenFlags, writable: bool) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(true);
        if writable {
            opts.write(true);
            if flags.contains(OpenFlags::CREATE) {
                if flags.contains(OpenFlags::EXCLUSIVE) {
                    opts.create_new(true);
                } else {
                    opts.create(true);
                }
            }
        }
        opts
    }
}

impl Vfs for OsVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_pathname(&self) -> usize {
        self.max_pathname
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<OpenedFile> {
        let (path, anonymous) = match path {
            Some(p) => (PathBuf::from(p), false),
            None => (self.temp_name(), true),
        };
        let writable = anonymous || flags.contains(OpenFlags::READWRITE);
        let flags = if anonymous {
            flags | OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE
        } else {
            flags
        };

        let mut out_flags = flags;
        let file = match Self::open_options(flags, writable).open(&path) {
            Ok(file) => file,
            Err(err) if writable && !anonymous && err.kind() == io::ErrorKind::PermissionDenied => {
                // Read-write denied: fall back to read-only like the engine expects.
                tracing::debug!("[OsVfs] {} is not writable, reopening read-only", path.display());
                out_flags = flags.without(OpenFlags::READWRITE | OpenFlags::CREATE) | OpenFlags::READONLY;
                Self::open_options(out_flags, false)
                    .open(&path)
                    .map_err(|e| record(&self.last_error, &e, Status::CANTOPEN))?
            }
            Err(err) => return Err(record(&self.last_error, &err, Status::CANTOPEN)),
        };

        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        let os_file = OsFile {
            file: Some(file),
            path,
            vfs_name: self.name.clone(),
            delete_on_close: anonymous || flags.contains(OpenFlags::DELETEONCLOSE),
            lock: FileLock::new(Arc::clone(&self.locks), key),
            chunk_size: 0,
            persist_wal: false,
            powersafe_overwrite: true,
            last_error: Arc::clone(&self.last_error),
            temp_dir: self.temp_dir.clone(),
        };
        Ok(OpenedFile::new(Box::new(os_file), out_flags))
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() == io::ErrorKind::NotFound {
                return Err(Status::IOERR_DELETE_NOENT);
            }
            return Err(record(&self.last_error, &err, Status::IOERR_DELETE));
        }
        if sync_dir {
            sync_parent(Path::new(path)).map_err(|e| record(&self.last_error, &e, Status::IOERR_DIR_FSYNC))?;
        }
        Ok(())
    }

    fn access(&self, path: &str, flags: AccessFlags) -> VfsResult<bool> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(record(&self.last_error, &err, Status::IOERR_ACCESS)),
        };
        Ok(match flags {
            // An empty regular file counts as absent, like a zero-length journal.
            AccessFlags::Exists => !meta.is_file() || meta.len() > 0,
            AccessFlags::ReadWrite => !meta.permissions().readonly(),
            AccessFlags::Read => true,
        })
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        let full = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            std::env::current_dir()
                .map_err(|e| record(&self.last_error, &e, Status::CANTOPEN_FULLPATH))?
                .join(path)
        };
        let full = full.to_str().ok_or(Status::CANTOPEN_FULLPATH)?.to_string();
        if full.len() > self.max_pathname() {
            return Err(Status::CANTOPEN_FULLPATH);
        }
        Ok(full)
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        rand::thread_rng().fill_bytes(buf);
        buf.len()
    }

    fn sleep(&self, duration: Duration) -> Duration {
        std::thread::sleep(duration);
        duration
    }

    fn current_time(&self) -> VfsResult<f64> {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| Status::ERROR)?;
        Ok(UNIX_EPOCH_JD + since_epoch.as_secs_f64() / 86_400.0)
    }

    fn last_error(&self) -> Option<&dyn LastError> {
        Some(self)
    }

    fn precise_clock(&self) -> Option<&dyn PreciseClock> {
        Some(self)
    }
}

impl LastError for OsVfs {
    fn get_last_error(&self) -> (i32, String) {
        self.last_error
            .lock()
            .ok()
            .and_then(|last| last.clone())
            .unwrap_or_else(|| (0, String::new()))
    }
}

impl PreciseClock for OsVfs {
    fn current_time_i64(&self) -> VfsResult<i64> {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| Status::ERROR)?;
        Ok(UNIX_EPOCH_JD_MS + since_epoch.as_millis() as i64)
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// An open OS file.
pub struct OsFile {
    file: Option<File>,
    path: PathBuf,
    vfs_name: String,
    delete_on_close: bool,
    lock: FileLock,
    chunk_size: u64,
    persist_wal: bool,
    powersafe_overwrite: bool,
    last_error: ErrorSlot,
    temp_dir: PathBuf,
}

impl OsFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VfsFile for OsFile {
    fn close(&mut self) -> VfsResult<()> {
        let _ = self.lock.release(LockLevel::None);
        if self.file.take().is_none() {
            return Ok(());
        }
        if self.delete_on_close {
            if let Err(err) = fs::remove_file(&self.path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(record(&self.last_error, &err, Status::IOERR_CLOSE));
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<()> {
        let file = self.file.as_mut().ok_or(Status::MISUSE)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| record(&self.last_error, &e, Status::IOERR_SEEK))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(record(&self.last_error, &err, Status::IOERR_READ)),
            }
        }
        if filled < buf.len() {
            buf[filled..].fill(0);
            return Err(Status::IOERR_SHORT_READ);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> VfsResult<()> {
        let file = self.file.as_mut().ok_or(Status::MISUSE)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| record(&self.last_error, &e, Status::IOERR_SEEK))?;
        file.write_all(buf)
            .map_err(|e| record(&self.last_error, &e, Status::IOERR_WRITE))
    }

    fn truncate(&mut self, size: u64) -> VfsResult<()> {
        let file = self.file.as_mut().ok_or(Status::MISUSE)?;
        // Round up to the chunk size when one is configured.
        let size = if self.chunk_size > 0 {
            size.div_ceil(self.chunk_size) * self.chunk_size
        } else {
            size
        };
        file.set_len(size)
            .map_err(|e| record(&self.last_error, &e, Status::IOERR_TRUNCATE))
    }

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()> {
        let file = self.file.as_mut().ok_or(Status::MISUSE)?;
        let result = if flags.is_data_only() { file.sync_data() } else { file.sync_all() };
        result.map_err(|e| record(&self.last_error, &e, Status::IOERR_FSYNC))
    }

    fn file_size(&mut self) -> VfsResult<u64> {
        let file = self.file.as_ref().ok_or(Status::MISUSE)?;
        file.metadata()
            .map(|meta| meta.len())
            .map_err(|e| record(&self.last_error, &e, Status::IOERR_FSTAT))
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.lock.acquire(level)
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.lock.release(level)
    }

    fn check_reserved_lock(&mut self) -> VfsResult<bool> {
        Ok(self.lock.reserved_held())
    }

    fn file_control(&mut self, op: &mut FileControl) -> VfsResult<()> {
        match op {
            FileControl::LockState { level } => {
                *level = Some(self.lock.level());
                Ok(())
            }
            FileControl::SizeHint(size) => {
                let size = *size;
                let file = self.file.as_mut().ok_or(Status::MISUSE)?;
                let current = file
                    .metadata()
                    .map(|meta| meta.len())
                    .map_err(|e| record(&self.last_error, &e, Status::IOERR_FSTAT))?;
                if size > current {
                    file.set_len(size)
                        .map_err(|e| record(&self.last_error, &e, Status::IOERR_TRUNCATE))?;
                }
                Ok(())
            }
            FileControl::ChunkSize(size) => {
                self.chunk_size = u64::from(*size);
                Ok(())
            }
            FileControl::SyncOmitted => Ok(()),
            FileControl::PersistWal(value) => {
                if *value >= 0 {
                    self.persist_wal = *value != 0;
                }
                *value = i32::from(self.persist_wal);
                Ok(())
            }
            FileControl::PowersafeOverwrite(value) => {
                if *value >= 0 {
                    self.powersafe_overwrite = *value != 0;
                }
                *value = i32::from(self.powersafe_overwrite);
                Ok(())
            }
            FileControl::VfsName { name } => {
                *name = Some(self.vfs_name.clone());
                Ok(())
            }
            FileControl::TempFilename { name } => {
                let mut bytes = [0u8; 8];
                rand::thread_rng().fill_bytes(&mut bytes);
                let temp = self.temp_dir.join(format!("{}{:016x}", TEMP_PREFIX, u64::from_le_bytes(bytes)));
                *name = Some(temp.to_string_lossy().into_owned());
                Ok(())
            }
            FileControl::Pragma { .. } | FileControl::Other(_) => Err(Status::NOTFOUND),
        }
    }

    fn sector_size(&mut self) -> u32 {
        SECTOR_SIZE
    }

    fn device_characteristics(&mut self) -> DeviceCharacteristics {
        if self.powersafe_overwrite {
            DeviceCharacteristics::POWERSAFE_OVERWRITE
        } else {
            DeviceCharacteristics::default()
        }
    }
}

impl Drop for OsFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = self.close();
        }
    }
}
