// FILE: src/shim/file.rs
//! The mirrored file handle.
//!
//! Mutating calls (write, truncate, sync, file control, close) go to the
//! primary and then, when present, to the replica, and the two outcomes are
//! reconciled with `Status::combine`. Everything else touches the primary
//! only: the replica is a write-only shadow with no lock state of its own.

use crate::core::{reconcile, DeviceCharacteristics, LockLevel, ShmLockFlags, Status, SyncFlags, VfsResult};
use crate::shim::trace::Tracer;
use crate::vfs::{FileControl, ShmRegion, SharedMemory, VfsFile};
use std::sync::Arc;

/// Placeholder name of files opened without a path.
pub const TEMP_FILE_NAME: &str = "<temp>";

/// The shadow copy of a mirrored file.
pub struct Replica {
    pub path: String,
    pub file: Box<dyn VfsFile>,
}

pub struct MirrorFile {
    tracer: Arc<Tracer>,
    name: String,
    primary: Box<dyn VfsFile>,
    replica: Option<Replica>,
    has_shm: bool,
    closed: bool,
    // Last values seen from the primary, answered after close.
    sector_size: u32,
    device_characteristics: DeviceCharacteristics,
}

impl MirrorFile {
    pub(crate) fn new(tracer: Arc<Tracer>, name: String, mut primary: Box<dyn VfsFile>, replica: Option<Replica>) -> Self {
        let has_shm = primary.shared_memory().is_some();
        let sector_size = primary.sector_size();
        let device_characteristics = primary.device_characteristics();
        Self { tracer, name, primary, replica, has_shm, closed: false, sector_size, device_characteristics }
    }

    /// Base name of the primary path, or `<temp>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_replica(&self) -> bool {
        self.replica.is_some()
    }

    pub fn replica_path(&self) -> Option<&str> {
        self.replica.as_ref().map(|r| r.path.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> VfsResult<()> {
        if self.closed {
            Err(Status::MISUSE)
        } else {
            Ok(())
        }
    }

    fn primary_shm(&mut self) -> VfsResult<&mut dyn SharedMemory> {
        self.ensure_open()?;
        self.primary.shared_memory().ok_or(Status::IOERR_SHMMAP)
    }
}

impl VfsFile for MirrorFile {
    fn close(&mut self) -> VfsResult<()> {
        self.ensure_open()?;
        let primary = self.primary.close();
        // The replica is released exactly once, even if the primary close is retried.
        let replica = self.replica.take().map(|mut r| r.file.close());
        if primary.is_ok() {
            self.closed = true;
        } else {
            tracing::debug!("[MirrorFile] Close of {} failed ({}), handle kept open", self.name, Status::of(&primary));
        }

        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xClose", name).result(&primary).replica(replica.as_ref());
        });
        reconcile(primary, replica)
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<()> {
        self.ensure_open()?;
        let rc = self.primary.read(buf, offset);
        let (name, n) = (&self.name, buf.len());
        self.tracer.call(|t| {
            t.op("xRead", format_args!("{},n={},ofst={}", name, n, offset)).result(&rc);
        });
        rc
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> VfsResult<()> {
        self.ensure_open()?;
        let primary = self.primary.write(buf, offset);
        let replica = self.replica.as_mut().map(|r| r.file.write(buf, offset));
        if primary.is_ok() {
            if let Some(Err(status)) = &replica {
                tracing::debug!("[MirrorFile] Replica write of {} failed: {}", self.name, status);
            }
        }

        let (name, n) = (&self.name, buf.len());
        self.tracer.call(|t| {
            t.op("xWrite", format_args!("{},n={},ofst={}", name, n, offset))
                .result(&primary)
                .replica(replica.as_ref());
        });
        reconcile(primary, replica)
    }

    fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.ensure_open()?;
        let primary = self.primary.truncate(size);
        let replica = self.replica.as_mut().map(|r| r.file.truncate(size));

        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xTruncate", format_args!("{},{}", name, size))
                .result(&primary)
                .replica(replica.as_ref());
        });
        reconcile(primary, replica)
    }

    fn sync(&mut self, flags: SyncFlags) -> VfsResult<()> {
        self.ensure_open()?;
        let primary = self.primary.sync(flags);
        let replica = self.replica.as_mut().map(|r| r.file.sync(flags));

        let (name, full) = (&self.name, self.tracer.is_full());
        self.tracer.call(|t| {
            let flags = if full { flags.describe() } else { flags.bits().to_string() };
            t.op("xSync", format_args!("{},{}", name, flags))
                .result(&primary)
                .replica(replica.as_ref());
        });
        reconcile(primary, replica)
    }

    fn file_size(&mut self) -> VfsResult<u64> {
        self.ensure_open()?;
        let rc = self.primary.file_size();
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xFileSize", name).result(&rc);
            if let Ok(size) = &rc {
                t.field("size", size);
            }
        });
        rc
    }

    fn lock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.ensure_open()?;
        let rc = self.primary.lock(level);
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xLock", format_args!("{},{}", name, level)).result(&rc);
        });
        rc
    }

    fn unlock(&mut self, level: LockLevel) -> VfsResult<()> {
        self.ensure_open()?;
        let rc = self.primary.unlock(level);
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xUnlock", format_args!("{},{}", name, level)).result(&rc);
        });
        rc
    }

    fn check_reserved_lock(&mut self) -> VfsResult<bool> {
        self.ensure_open()?;
        let rc = self.primary.check_reserved_lock();
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xCheckReservedLock", name).result(&rc);
            if let Ok(held) = &rc {
                t.field("out", u8::from(*held));
            }
        });
        rc
    }

    fn file_control(&mut self, op: &mut FileControl) -> VfsResult<()> {
        self.ensure_open()?;
        // The replica works on its own copy so the caller only sees primary outputs.
        let mut shadow = op.clone();
        let described = if self.tracer.is_full() { op.describe() } else { op.op_code().to_string() };

        let primary = self.primary.file_control(op);
        let replica = self.replica.as_mut().map(|r| r.file.file_control(&mut shadow));

        if primary.is_ok() {
            if let FileControl::VfsName { name } = op {
                let chain = match name.take() {
                    Some(inner) => format!("mirror.{}/{}", self.tracer.shim(), inner),
                    None => format!("mirror.{}", self.tracer.shim()),
                };
                *name = Some(chain);
            }
        }

        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xFileControl", format_args!("{},{}", name, described))
                .result(&primary)
                .replica(replica.as_ref());
        });
        if primary.is_ok() {
            if let Some(value) = op.string_result() {
                self.tracer
                    .note(|| format!("xFileControl({},{}) returns {}", name, described, value));
            }
        }
        reconcile(primary, replica)
    }

    fn sector_size(&mut self) -> u32 {
        if !self.closed {
            self.sector_size = self.primary.sector_size();
        }
        let size = self.sector_size;
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xSectorSize", name).field("size", size);
        });
        size
    }

    fn device_characteristics(&mut self) -> DeviceCharacteristics {
        if !self.closed {
            self.device_characteristics = self.primary.device_characteristics();
        }
        let chars = self.device_characteristics;
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xDeviceCharacteristics", name).field("flags", chars);
        });
        chars
    }

    fn shared_memory(&mut self) -> Option<&mut dyn SharedMemory> {
        if self.has_shm {
            Some(self)
        } else {
            None
        }
    }
}

impl SharedMemory for MirrorFile {
    fn shm_map(&mut self, region: u32, region_size: usize, extend: bool) -> VfsResult<Option<ShmRegion>> {
        let rc = self.primary_shm().and_then(|shm| shm.shm_map(region, region_size, extend));
        let name = &self.name;
        self.tracer.call(|t| {
            t.op(
                "xShmMap",
                format_args!("{},iRegion={},szRegion={},isWrite={}", name, region, region_size, u8::from(extend)),
            )
            .result(&rc);
        });
        rc
    }

    fn shm_lock(&mut self, offset: u32, n: u32, flags: ShmLockFlags) -> VfsResult<()> {
        let rc = self.primary_shm().and_then(|shm| shm.shm_lock(offset, n, flags));
        let (name, full) = (&self.name, self.tracer.is_full());
        self.tracer.call(|t| {
            let flags = if full { flags.describe() } else { flags.bits().to_string() };
            t.op("xShmLock", format_args!("{},ofst={},n={},{}", name, offset, n, flags))
                .result(&rc);
        });
        rc
    }

    fn shm_barrier(&mut self) {
        if let Ok(shm) = self.primary_shm() {
            shm.shm_barrier();
        }
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xShmBarrier", name);
        });
    }

    fn shm_unmap(&mut self, delete: bool) -> VfsResult<()> {
        let rc = self.primary_shm().and_then(|shm| shm.shm_unmap(delete));
        let name = &self.name;
        self.tracer.call(|t| {
            t.op("xShmUnmap", format_args!("{},delFlag={}", name, u8::from(delete))).result(&rc);
        });
        rc
    }
}
