// FILE: src/shim/mod.rs
//! The tracing + mirroring shim.
//!
//! `MirrorVfs` sits in front of a root backend and looks exactly like it:
//! every operation is forwarded, traced, and for the main database and main
//! journal also repeated against a replica in the configured directory.

pub mod file;
pub mod trace;

use crate::config::MirrorConfig;
use crate::core::{file_tail, reconcile, replica_path, AccessFlags, OpenFlags, Status, VfsResult};
use crate::error::{MirrorError, Result};
use crate::vfs::{
    DynamicLibrary, LastError, LibraryHandle, OpenedFile, PreciseClock, SymbolAddress, SyscallPtr, SystemCalls, Vfs,
    VfsRegistry,
};
use std::sync::Arc;
use std::time::Duration;

pub use file::{MirrorFile, Replica, TEMP_FILE_NAME};
pub use trace::{BufferSink, StderrSink, TraceLevel, TraceSink, Tracer, TracingSink};

/// Upper bound on replica-open attempts per `open`.
pub const REPLICA_OPEN_ATTEMPTS: u32 = 10;

pub struct MirrorVfs {
    root: Arc<dyn Vfs>,
    config: Arc<MirrorConfig>,
    tracer: Arc<Tracer>,
}

impl MirrorVfs {
    pub fn new(name: &str, root: Arc<dyn Vfs>, config: Arc<MirrorConfig>, sink: Arc<dyn TraceSink>) -> Self {
        let tracer = Arc::new(Tracer::new(name, config.trace_level(), sink));
        Self { root, config, tracer }
    }

    pub fn root(&self) -> &Arc<dyn Vfs> {
        &self.root
    }

    pub fn config(&self) -> &Arc<MirrorConfig> {
        &self.config
    }

    /// Replica location for `path`, if mirroring is possible for it at all.
    fn resolve_replica(&self, path: &str) -> Option<String> {
        let dir = self.config.replica_dir()?;
        if file_tail(path).is_empty() {
            tracing::warn!("[MirrorVfs] No file name in '{}', not mirroring", path);
            return None;
        }
        let resolved = replica_path(dir, path);
        if resolved.len() > self.root.max_pathname() {
            tracing::warn!("[MirrorVfs] Replica path for '{}' is too long, not mirroring", path);
            return None;
        }
        Some(resolved)
    }

    /// Open the replica, retrying through the root's own sleep.
    /// Returns the file (if any) and the last status with the attempt count.
    fn open_replica(&self, path: &str, flags: OpenFlags) -> (Option<Replica>, Status, u32) {
        let mut last = Status::OK;
        for attempt in 1..=REPLICA_OPEN_ATTEMPTS {
            match self.root.open(Some(path), flags) {
                Ok(opened) => {
                    let replica = Replica { path: path.to_string(), file: opened.file };
                    return (Some(replica), Status::OK, attempt);
                }
                Err(status) => {
                    last = status;
                    if attempt < REPLICA_OPEN_ATTEMPTS {
                        self.root.sleep(self.config.retry_delay());
                    }
                }
            }
        }
        tracing::warn!(
            "[MirrorVfs] Replica {} unavailable after {} attempts ({}), continuing primary-only",
            path,
            REPLICA_OPEN_ATTEMPTS,
            last
        );
        (None, last, REPLICA_OPEN_ATTEMPTS)
    }

    /// `Vfs::open` without boxing the handle, plus the out-flags.
    pub fn open_mirrored(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<(MirrorFile, OpenFlags)> {
        let name = path.map(file_tail).unwrap_or(TEMP_FILE_NAME).to_string();
        let primary = self.root.open(path, flags);

        let mut replica_outcome = None;
        let result = primary.map(|opened| {
            let replica = match path {
                Some(path) if flags.is_mirror_eligible() => self.resolve_replica(path).and_then(|resolved| {
                    let (replica, status, attempts) = self.open_replica(&resolved, flags);
                    replica_outcome = Some((status, attempts));
                    replica
                }),
                _ => None,
            };
            let OpenedFile { file, out_flags } = opened;
            (MirrorFile::new(Arc::clone(&self.tracer), name.clone(), file, replica), out_flags)
        });

        self.tracer.call(|t| {
            t.op("xOpen", format_args!("{},flags=0x{:x}", name, flags)).result(&result);
            if let Some((status, attempts)) = replica_outcome {
                t.field("replica", status);
                if !status.is_ok() {
                    t.field("attempts", attempts);
                }
            }
            if let Ok((_, out_flags)) = &result {
                t.field("outFlags", format_args!("0x{:x}", out_flags));
            }
        });
        result
    }
}

impl Vfs for MirrorVfs {
    fn name(&self) -> &str {
        self.tracer.shim()
    }

    fn max_pathname(&self) -> usize {
        self.root.max_pathname()
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<OpenedFile> {
        let (file, out_flags) = self.open_mirrored(path, flags)?;
        Ok(OpenedFile::new(Box::new(file), out_flags))
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        let primary = self.root.delete(path, sync_dir);
        // Deletion is always dual, whether or not the file was ever mirrored.
        let replica = self.resolve_replica(path).map(|resolved| self.root.delete(&resolved, sync_dir));
        let skipped = replica.is_none() && self.config.replica_dir().is_some();

        self.tracer.call(|t| {
            t.op("xDelete", format_args!("\"{}\",{}", path, u8::from(sync_dir)))
                .result(&primary)
                .replica(replica.as_ref());
            if skipped {
                t.field("replica", "skipped");
            }
        });
        reconcile(primary, replica)
    }

    fn access(&self, path: &str, flags: AccessFlags) -> VfsResult<bool> {
        let rc = self.root.access(path, flags);
        self.tracer.call(|t| {
            t.op("xAccess", format_args!("\"{}\",{}", path, flags.code())).result(&rc);
            if let Ok(out) = &rc {
                t.field("out", u8::from(*out));
            }
        });
        rc
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        let rc = self.root.full_pathname(path);
        self.tracer.call(|t| {
            t.op("xFullPathname", format_args!("\"{}\"", path)).result(&rc);
            if let Ok(out) = &rc {
                t.field("out", format_args!("\"{}\"", out));
            }
        });
        rc
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        let n = self.root.randomness(buf);
        let len = buf.len();
        self.tracer.call(|t| {
            t.op("xRandomness", len).field("out", n);
        });
        n
    }

    fn sleep(&self, duration: Duration) -> Duration {
        let slept = self.root.sleep(duration);
        self.tracer.call(|t| {
            t.op("xSleep", duration.as_micros()).field("out", slept.as_micros());
        });
        slept
    }

    fn current_time(&self) -> VfsResult<f64> {
        let rc = self.root.current_time();
        self.tracer.call(|t| {
            t.op("xCurrentTime", "").result(&rc);
            if let Ok(now) = &rc {
                t.field("out", now);
            }
        });
        rc
    }

    fn dynamic_library(&self) -> Option<&dyn DynamicLibrary> {
        self.root.dynamic_library().map(|_| self as &dyn DynamicLibrary)
    }

    fn last_error(&self) -> Option<&dyn LastError> {
        self.root.last_error().map(|_| self as &dyn LastError)
    }

    fn precise_clock(&self) -> Option<&dyn PreciseClock> {
        self.root.precise_clock().map(|_| self as &dyn PreciseClock)
    }

    fn system_calls(&self) -> Option<&dyn SystemCalls> {
        self.root.system_calls().map(|_| self as &dyn SystemCalls)
    }
}

// --- CAPABILITY PASSTHROUGH ---
// Only reachable through the accessors above, which hand these out only when
// the root has the capability.

impl DynamicLibrary for MirrorVfs {
    fn dl_open(&self, path: &str) -> Option<LibraryHandle> {
        self.tracer.note(|| format!("xDlOpen(\"{}\")", path));
        self.root.dynamic_library().and_then(|dl| dl.dl_open(path))
    }

    fn dl_error(&self) -> String {
        let message = self.root.dynamic_library().map(|dl| dl.dl_error()).unwrap_or_default();
        self.tracer.note(|| format!("xDlError() -> \"{}\"", message));
        message
    }

    fn dl_sym(&self, handle: LibraryHandle, symbol: &str) -> Option<SymbolAddress> {
        self.tracer.note(|| format!("xDlSym(\"{}\")", symbol));
        self.root.dynamic_library().and_then(|dl| dl.dl_sym(handle, symbol))
    }

    fn dl_close(&self, handle: LibraryHandle) {
        self.tracer.note(|| "xDlClose()".to_string());
        if let Some(dl) = self.root.dynamic_library() {
            dl.dl_close(handle);
        }
    }
}

impl LastError for MirrorVfs {
    fn get_last_error(&self) -> (i32, String) {
        let last = self
            .root
            .last_error()
            .map(|le| le.get_last_error())
            .unwrap_or_else(|| (0, String::new()));
        self.tracer.note(|| format!("xGetLastError() -> {},\"{}\"", last.0, last.1));
        last
    }
}

impl PreciseClock for MirrorVfs {
    fn current_time_i64(&self) -> VfsResult<i64> {
        let rc = self.root.precise_clock().ok_or(Status::ERROR).and_then(|clock| clock.current_time_i64());
        self.tracer.call(|t| {
            t.op("xCurrentTimeInt64", "").result(&rc);
            if let Ok(now) = &rc {
                t.field("out", now);
            }
        });
        rc
    }
}

impl SystemCalls for MirrorVfs {
    fn set_system_call(&self, name: Option<&str>, call: Option<SyscallPtr>) -> VfsResult<()> {
        let rc = self
            .root
            .system_calls()
            .ok_or(Status::NOTFOUND)
            .and_then(|sys| sys.set_system_call(name, call));
        self.tracer.call(|t| {
            t.op("xSetSystemCall", format_args!("\"{}\"", name.unwrap_or(""))).result(&rc);
        });
        rc
    }

    fn get_system_call(&self, name: &str) -> Option<SyscallPtr> {
        self.tracer.note(|| format!("xGetSystemCall(\"{}\")", name));
        self.root.system_calls().and_then(|sys| sys.get_system_call(name))
    }

    fn next_system_call(&self, name: Option<&str>) -> Option<String> {
        self.tracer.note(|| format!("xNextSystemCall(\"{}\")", name.unwrap_or("")));
        self.root.system_calls().and_then(|sys| sys.next_system_call(name))
    }
}

/// Build a shim over the backend `root_name` (default when `None` or empty)
/// and install it in `registry`.
pub fn register_shim(
    registry: &VfsRegistry,
    config: Arc<MirrorConfig>,
    name: &str,
    root_name: Option<&str>,
    sink: Arc<dyn TraceSink>,
    make_default: bool,
) -> Result<Arc<MirrorVfs>> {
    let root_name = root_name.filter(|n| !n.is_empty());
    let root = registry
        .find(root_name)
        .ok_or_else(|| MirrorError::VfsNotFound(root_name.unwrap_or("<default>").to_string()))?;

    let shim = Arc::new(MirrorVfs::new(name, Arc::clone(&root), config, sink));
    registry.register(Arc::clone(&shim) as Arc<dyn Vfs>, make_default);

    tracing::info!("[MirrorVfs] Registered '{}' over '{}' (default: {})", name, root.name(), make_default);
    shim.tracer.note(|| format!("enabled_for(\"{}\")", root.name()));
    Ok(shim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{FileControl, OsVfs, VfsFile};
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        data: std::path::PathBuf,
        replica: std::path::PathBuf,
        shim: Arc<MirrorVfs>,
        sink: BufferSink,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("a").join("b");
        let replica = dir.path().join("replica");
        fs::create_dir_all(&data).unwrap();
        fs::create_dir_all(&replica).unwrap();

        let config = Arc::new(MirrorConfig::new().with_retry_delay(Duration::from_millis(1)));
        config.set_replica_dir(replica.to_str().unwrap()).unwrap();
        let registry = VfsRegistry::with_os_default();
        let sink = BufferSink::new();
        let shim = register_shim(&registry, config, "trace", None, Arc::new(sink.clone()), false).unwrap();
        Fixture { _dir: dir, data, replica, shim, sink }
    }

    fn rw() -> OpenFlags {
        OpenFlags::READWRITE | OpenFlags::CREATE
    }

    #[test]
    fn test_main_db_gets_replica() {
        let fx = fixture();
        let path = fx.data.join("test.db");
        let (mut file, _) = fx.shim.open_mirrored(path.to_str(), rw() | OpenFlags::MAIN_DB).unwrap();
        assert!(file.has_replica());
        assert_eq!(file.replica_path(), fx.replica.join("test.db").to_str());

        file.write(b"hello", 0).unwrap();
        file.close().unwrap();
        assert_eq!(fs::read(fx.replica.join("test.db")).unwrap(), b"hello");
    }

    #[test]
    fn test_non_eligible_kinds_stay_single() {
        let fx = fixture();
        for kind in [OpenFlags::WAL, OpenFlags::TEMP_DB, OpenFlags::SUBJOURNAL, OpenFlags::TEMP_JOURNAL] {
            let path = fx.data.join("side.db-wal");
            let (mut file, _) = fx.shim.open_mirrored(path.to_str(), rw() | kind).unwrap();
            assert!(!file.has_replica());
            file.close().unwrap();
        }
        assert_eq!(fs::read_dir(&fx.replica).unwrap().count(), 0);
    }

    #[test]
    fn test_anonymous_open_is_temp() {
        let fx = fixture();
        let (mut file, _) = fx.shim.open_mirrored(None, rw() | OpenFlags::MAIN_DB).unwrap();
        assert_eq!(file.name(), TEMP_FILE_NAME);
        assert!(!file.has_replica());
        file.close().unwrap();
    }

    #[test]
    fn test_registration_line() {
        let fx = fixture();
        assert_eq!(fx.sink.lines()[0], "trace.enabled_for(\"os\")");
    }

    #[test]
    fn test_register_unknown_root() {
        let registry = VfsRegistry::new();
        let err = register_shim(
            &registry,
            Arc::new(MirrorConfig::new()),
            "trace",
            Some("nope"),
            Arc::new(BufferSink::new()),
            true,
        )
        .err()
        .unwrap();
        assert_eq!(err.status(), Status::NOTFOUND);
        assert!(registry.find(Some("trace")).is_none());
    }

    #[test]
    fn test_no_replica_dir_means_trace_only() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VfsRegistry::with_os_default();
        let shim = register_shim(
            &registry,
            Arc::new(MirrorConfig::new()),
            "trace",
            None,
            Arc::new(BufferSink::new()),
            false,
        )
        .unwrap();
        let path = dir.path().join("x.db");
        let (mut file, _) = shim.open_mirrored(path.to_str(), rw() | OpenFlags::MAIN_DB).unwrap();
        assert!(!file.has_replica());
        file.close().unwrap();
        assert_eq!(shim.delete(path.to_str().unwrap(), false), Ok(()));
    }

    #[test]
    fn test_unusable_replica_path_is_primary_only() {
        let dir = tempfile::tempdir().unwrap();
        let replica = dir.path().join("replica");
        fs::create_dir_all(&replica).unwrap();
        let replica = replica.to_str().unwrap().to_string();

        // Room for the directory but not for "/test.db" after it.
        let registry = VfsRegistry::new();
        registry.register(Arc::new(OsVfs::new().with_max_pathname(replica.len() + 4)), true);
        let config = Arc::new(MirrorConfig::new().with_retry_delay(Duration::from_millis(1)));
        config.set_replica_dir(&replica).unwrap();
        let sink = BufferSink::new();
        let shim = register_shim(&registry, config, "trace", None, Arc::new(sink.clone()), false).unwrap();

        let path = dir.path().join("test.db");
        let (mut file, _) = shim.open_mirrored(path.to_str(), rw() | OpenFlags::MAIN_DB).unwrap();
        assert!(!file.has_replica());
        file.write(b"primary", 0).unwrap();
        file.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"primary");
        assert_eq!(fs::read_dir(&replica).unwrap().count(), 0);

        assert_eq!(shim.delete(path.to_str().unwrap(), false), Ok(()));
        let delete = &sink.calls("trace", "xDelete")[0];
        assert!(delete.ends_with("-> SQLITE_OK, replica=skipped"), "{}", delete);
    }

    #[test]
    fn test_delete_without_file_name_skips_replica() {
        let fx = fixture();
        let path = format!("{}/", fx.data.to_str().unwrap());
        assert!(fx.shim.delete(&path, false).is_err());
        let delete = &fx.sink.calls("trace", "xDelete")[0];
        assert!(delete.ends_with(", replica=skipped"), "{}", delete);
        assert!(fx.data.is_dir());
    }

    #[test]
    fn test_vfsname_chains_through_nested_shims() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VfsRegistry::with_os_default();
        let sink: Arc<dyn TraceSink> = Arc::new(BufferSink::new());
        register_shim(&registry, Arc::new(MirrorConfig::new()), "inner", None, Arc::clone(&sink), false).unwrap();
        let outer =
            register_shim(&registry, Arc::new(MirrorConfig::new()), "outer", Some("inner"), sink, false).unwrap();

        let path = dir.path().join("nested.db");
        let (mut file, _) = outer.open_mirrored(path.to_str(), rw() | OpenFlags::MAIN_DB).unwrap();
        let mut op = FileControl::VfsName { name: None };
        file.file_control(&mut op).unwrap();
        assert_eq!(op, FileControl::VfsName { name: Some("mirror.outer/mirror.inner/os".into()) });
        file.close().unwrap();
    }

    #[test]
    fn test_capabilities_follow_root() {
        let fx = fixture();
        assert!(fx.shim.last_error().is_some());
        assert!(fx.shim.precise_clock().is_some());
        assert!(fx.shim.dynamic_library().is_none());
        assert!(fx.shim.system_calls().is_none());
        assert_eq!(fx.shim.root().name(), OsVfs::new().name());
    }
}
