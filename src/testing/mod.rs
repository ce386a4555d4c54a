// FILE: src/testing/mod.rs
//! Test support: a backend wrapper that records calls and injects faults.
//!
//! `FaultVfs` wraps any `Vfs`. Every call is recorded as `(op, path)` before
//! the `FaultInjector` is consulted, so a test can assert both what reached
//! the backend and what the shim made of a failure.

pub mod fault;

use crate::core::{AccessFlags, DeviceCharacteristics, LockLevel, OpenFlags, ShmLockFlags, Status, SyncFlags, VfsResult};
use crate::vfs::{
    DynamicLibrary, FileControl, LastError, OpenedFile, PreciseClock, SharedMemory, ShmRegion, SystemCalls, Vfs,
    VfsFile,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use fault::{FaultInjector, FaultOp, FaultPolicy, FaultRule};

const ANONYMOUS: &str = "<temp>";

/// Shared call log.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(FaultOp, String)>>>,
}

impl CallLog {
    fn push(&self, op: FaultOp, path: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((op, path.to_string()));
        }
    }

    pub fn all(&self) -> Vec<(FaultOp, String)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Number of `op` calls on paths containing `fragment`.
    pub fn count(&self, op: FaultOp, fragment: &str) -> usize {
        self.all().iter().filter(|(o, p)| *o == op && p.contains(fragment)).count()
    }

    /// Every recorded call on paths containing `fragment`.
    pub fn ops_on(&self, fragment: &str) -> Vec<FaultOp> {
        self.all().into_iter().filter(|(_, p)| p.contains(fragment)).map(|(op, _)| op).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

pub struct FaultVfs {
    name: String,
    inner: Arc<dyn Vfs>,
    injector: Arc<FaultInjector>,
    log: CallLog,
    shared_memory: bool,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FaultVfs {
    pub fn new(name: &str, inner: Arc<dyn Vfs>) -> Self {
        Self {
            name: name.to_string(),
            inner,
            injector: Arc::new(FaultInjector::new()),
            log: CallLog::default(),
            shared_memory: false,
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Give every opened file an in-memory shared-memory capability.
    pub fn with_shared_memory(mut self) -> Self {
        self.shared_memory = true;
        self
    }

    pub fn injector(&self) -> &Arc<FaultInjector> {
        &self.injector
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Durations passed to `sleep`.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn check(&self, op: FaultOp, path: &str) -> VfsResult<()> {
        self.log.push(op, path);
        match self.injector.should_fault(op, path) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

impl Vfs for FaultVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_pathname(&self) -> usize {
        self.inner.max_pathname()
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<OpenedFile> {
        let label = path.unwrap_or(ANONYMOUS).to_string();
        self.check(FaultOp::Open, &label)?;
        let opened = self.inner.open(path, flags)?;
        let file = FaultFile {
            path: label,
            inner: opened.file,
            injector: Arc::clone(&self.injector),
            log: self.log.clone(),
            shm: self.shared_memory.then(MemoryShm::default),
        };
        Ok(OpenedFile::new(Box::new(file), opened.out_flags))
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        self.check(FaultOp::Delete, path)?;
        self.inner.delete(path, sync_dir)
    }

    fn access(&self, path: &str, flags: AccessFlags) -> VfsResult<bool> {
        self.check(FaultOp::Access, path)?;
        self.inner.access(path, flags)
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        self.inner.full_pathname(path)
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        self.inner.randomness(buf)
    }

    /// Recorded, not slept.
    fn sleep(&self, duration: Duration) -> Duration {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        duration
    }

    fn current_time(&self) -> VfsResult<f64> {
        self.inner.current_time()
    }

    fn dynamic_library(&self) -> Option<&dyn DynamicLibrary> {
        self.inner.dynamic_library()
    }

    fn last_error(&self) -> Option<&dyn LastError> {
        self.inner.last_error()
    }

    fn precise_clock(&self) -> Option<&dyn PreciseClock> {
        self.inner.precise_clock()
    }

    fn system_calls(&self) -> Option<&dyn SystemCalls> {
        self.inner.system_calls()
    }
}

/// Process-local shared memory: regions are plain buffers, locks always succeed.
#[derive(Default)]
struct MemoryShm {
    regions: HashMap<u32, ShmRegion>,
}

impl MemoryShm {
    fn map(&mut self, region: u32, region_size: usize, extend: bool) -> Option<ShmRegion> {
        if let Some(existing) = self.regions.get(&region) {
            return Some(Arc::clone(existing));
        }
        if !extend {
            return None;
        }
        let mapped: ShmRegion = Arc::new(Mutex::new(vec![0u8; region_size]));
        self.regions.insert(region, Arc::clone(&mapped));
        Some(mapped)
    }
}

pub struct FaultFile {
    path: String,
    inner: Box<dyn VfsFile>,
    injector: Arc<FaultInjector>,
    log: CallLog,
    shm: Option<MemoryShm>,
}

impl FaultFile {
    fn check(&self, op: FaultOp) -> VfsResult<()> {
        self.log.push(op, &self.path);
        match self.injector.should_fault(op, &self.path) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

impl VfsFile for FaultFile {
    fn close(&mut self) -> VfsResult<()> {
        self.check(FaultOp::Close)?;
        self.inner.close()
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<()> {
        self.check(FaultOp::Read)?;
        self.inner.read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> VfsResult<()> {
        self.check(FaultOp::Write)?;
        self.inner.write(buf, offset)
    }

    fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.check(FaultOp::Truncate)?;
        self.inner.truncate(size)
    }

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()> {
        self.check(FaultOp::Sync)?;
        self.inner.sync(flags)
    }

    fn file_size(&mut self) -> VfsResult<u64> {
        self.check(FaultOp::FileSize)?;
        self.inner.file_size()
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.check(FaultOp::Lock)?;
        self.inner.lock(level)
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.check(FaultOp::Unlock)?;
        self.inner.unlock(level)
    }

    fn check_reserved_lock(&mut self) -> VfsResult<bool> {
        self.check(FaultOp::CheckReservedLock)?;
        self.inner.check_reserved_lock()
    }

    fn file_control(&mut self, op: &mut FileControl) -> VfsResult<()> {
        self.check(FaultOp::FileControl)?;
        self.inner.file_control(op)
    }

    fn sector_size(&mut self) -> u32 {
        self.log.push(FaultOp::SectorSize, &self.path);
        self.inner.sector_size()
    }

    fn device_characteristics(&mut self) -> DeviceCharacteristics {
        self.log.push(FaultOp::DeviceCharacteristics, &self.path);
        self.inner.device_characteristics()
    }

    fn shared_memory(&mut self) -> Option<&mut dyn SharedMemory> {
        if self.shm.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl SharedMemory for FaultFile {
    fn shm_map(&mut self, region: u32, region_size: usize, extend: bool) -> VfsResult<Option<ShmRegion>> {
        self.check(FaultOp::ShmMap)?;
        let shm = self.shm.as_mut().ok_or(Status::IOERR_SHMMAP)?;
        Ok(shm.map(region, region_size, extend))
    }

    fn shm_lock(&mut self, _offset: u32, _n: u32, _flags: ShmLockFlags) -> VfsResult<()> {
        self.check(FaultOp::ShmLock)
    }

    fn shm_barrier(&mut self) {
        self.log.push(FaultOp::ShmBarrier, &self.path);
    }

    fn shm_unmap(&mut self, delete: bool) -> VfsResult<()> {
        self.check(FaultOp::ShmUnmap)?;
        if delete {
            if let Some(shm) = self.shm.as_mut() {
                shm.regions.clear();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;

    #[test]
    fn test_records_and_faults() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = FaultVfs::new("fault", Arc::new(OsVfs::new()));
        vfs.injector()
            .set_policy(FaultPolicy::with_rules(vec![FaultRule::new(FaultOp::Write, Status::FULL).at_most(1)]));

        let path = dir.path().join("f.db");
        let flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB;
        let mut file = vfs.open(path.to_str(), flags).unwrap().file;
        assert_eq!(file.write(b"x", 0), Err(Status::FULL));
        assert_eq!(file.write(b"x", 0), Ok(()));

        assert_eq!(vfs.log().count(FaultOp::Write, "f.db"), 2);
        assert_eq!(vfs.log().ops_on("f.db")[0], FaultOp::Open);
    }

    #[test]
    fn test_in_memory_shm() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = FaultVfs::new("fault", Arc::new(OsVfs::new())).with_shared_memory();
        let path = dir.path().join("w.db");
        let flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB;
        let mut file = vfs.open(path.to_str(), flags).unwrap().file;

        let shm = file.shared_memory().unwrap();
        assert!(shm.shm_map(0, 32768, false).unwrap().is_none());
        let region = shm.shm_map(0, 32768, true).unwrap().unwrap();
        assert_eq!(region.lock().unwrap().len(), 32768);
        assert!(shm.shm_map(0, 32768, false).unwrap().is_some());
    }
}
