// FILE: tests/capabilities.rs
//! Optional backend capabilities: present on the shim exactly when the root
//! has them, and forwarded when called.

use mirrorvfs::vfs::{
    DynamicLibrary, LastError, LibraryHandle, PreciseClock, SymbolAddress, SyscallPtr, SystemCalls,
};
use mirrorvfs::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// OS backend plus every optional capability, backed by plain maps.
struct LoadedVfs {
    os: OsVfs,
    syscalls: Mutex<HashMap<String, SyscallPtr>>,
}

impl LoadedVfs {
    fn new() -> Self {
        let mut syscalls = HashMap::new();
        syscalls.insert("open".to_string(), SyscallPtr(0x1000));
        syscalls.insert("read".to_string(), SyscallPtr(0x2000));
        Self { os: OsVfs::named("loaded"), syscalls: Mutex::new(syscalls) }
    }
}

impl Vfs for LoadedVfs {
    fn name(&self) -> &str {
        self.os.name()
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> VfsResult<OpenedFile> {
        self.os.open(path, flags)
    }

    fn delete(&self, path: &str, sync_dir: bool) -> VfsResult<()> {
        self.os.delete(path, sync_dir)
    }

    fn access(&self, path: &str, flags: AccessFlags) -> VfsResult<bool> {
        self.os.access(path, flags)
    }

    fn full_pathname(&self, path: &str) -> VfsResult<String> {
        self.os.full_pathname(path)
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        buf.fill(7);
        buf.len()
    }

    fn sleep(&self, duration: Duration) -> Duration {
        duration
    }

    fn current_time(&self) -> VfsResult<f64> {
        Ok(2_460_000.5)
    }

    fn dynamic_library(&self) -> Option<&dyn DynamicLibrary> {
        Some(self)
    }

    fn last_error(&self) -> Option<&dyn LastError> {
        Some(self)
    }

    fn precise_clock(&self) -> Option<&dyn PreciseClock> {
        Some(self)
    }

    fn system_calls(&self) -> Option<&dyn SystemCalls> {
        Some(self)
    }
}

impl DynamicLibrary for LoadedVfs {
    fn dl_open(&self, path: &str) -> Option<LibraryHandle> {
        (path == "libext.so").then_some(LibraryHandle(42))
    }

    fn dl_error(&self) -> String {
        "no such library".to_string()
    }

    fn dl_sym(&self, handle: LibraryHandle, symbol: &str) -> Option<SymbolAddress> {
        (handle == LibraryHandle(42) && symbol == "init").then_some(SymbolAddress(0xbeef))
    }

    fn dl_close(&self, _handle: LibraryHandle) {}
}

impl LastError for LoadedVfs {
    fn get_last_error(&self) -> (i32, String) {
        (2, "ENOENT".to_string())
    }
}

impl PreciseClock for LoadedVfs {
    fn current_time_i64(&self) -> VfsResult<i64> {
        Ok(212_544_000_000_000)
    }
}

impl SystemCalls for LoadedVfs {
    fn set_system_call(&self, name: Option<&str>, call: Option<SyscallPtr>) -> VfsResult<()> {
        let mut table = self.syscalls.lock().unwrap();
        match (name, call) {
            (Some(name), Some(call)) if table.contains_key(name) => {
                table.insert(name.to_string(), call);
                Ok(())
            }
            (Some(_), _) => Err(Status::NOTFOUND),
            (None, _) => Ok(()),
        }
    }

    fn get_system_call(&self, name: &str) -> Option<SyscallPtr> {
        self.syscalls.lock().unwrap().get(name).copied()
    }

    fn next_system_call(&self, name: Option<&str>) -> Option<String> {
        let table = self.syscalls.lock().unwrap();
        let mut names: Vec<&String> = table.keys().collect();
        names.sort();
        match name {
            None => names.first().map(|n| n.to_string()),
            Some(current) => names.iter().find(|n| n.as_str() > current).map(|n| n.to_string()),
        }
    }
}

fn shim_over(root: Arc<dyn Vfs>) -> (Arc<MirrorVfs>, BufferSink) {
    let registry = VfsRegistry::new();
    let root_name = root.name().to_string();
    registry.register(root, true);
    let sink = BufferSink::new();
    let config = Arc::new(MirrorConfig::new().with_trace_level(TraceLevel::Full));
    let shim = register_shim(&registry, config, "trace", Some(&root_name), Arc::new(sink.clone()), false).unwrap();
    (shim, sink)
}

#[test]
fn test_full_capability_set_is_forwarded() {
    let (shim, sink) = shim_over(Arc::new(LoadedVfs::new()));

    let dl = shim.dynamic_library().expect("dl propagated");
    let handle = dl.dl_open("libext.so").unwrap();
    assert_eq!(dl.dl_sym(handle, "init"), Some(SymbolAddress(0xbeef)));
    assert_eq!(dl.dl_open("missing.so"), None);
    assert_eq!(dl.dl_error(), "no such library");
    dl.dl_close(handle);

    assert_eq!(shim.last_error().unwrap().get_last_error(), (2, "ENOENT".to_string()));
    assert_eq!(shim.precise_clock().unwrap().current_time_i64(), Ok(212_544_000_000_000));

    let sys = shim.system_calls().expect("syscalls propagated");
    assert_eq!(sys.get_system_call("open"), Some(SyscallPtr(0x1000)));
    assert_eq!(sys.set_system_call(Some("open"), Some(SyscallPtr(0x3000))), Ok(()));
    assert_eq!(sys.get_system_call("open"), Some(SyscallPtr(0x3000)));
    assert_eq!(sys.set_system_call(Some("mmap"), None), Err(Status::NOTFOUND));
    assert_eq!(sys.next_system_call(None).as_deref(), Some("open"));
    assert_eq!(sys.next_system_call(Some("open")).as_deref(), Some("read"));
    assert_eq!(sys.next_system_call(Some("read")), None);

    assert!(!sink.calls("trace", "xDlOpen").is_empty());
    assert!(!sink.calls("trace", "xSetSystemCall").is_empty());
}

#[test]
fn test_absent_capabilities_stay_absent() {
    let (shim, _) = shim_over(Arc::new(OsVfs::new()));
    assert!(shim.dynamic_library().is_none());
    assert!(shim.system_calls().is_none());
    assert!(shim.last_error().is_some());
    assert!(shim.precise_clock().is_some());
}

#[test]
fn test_plain_passthroughs() {
    let (shim, sink) = shim_over(Arc::new(LoadedVfs::new()));
    let mut buf = [0u8; 8];
    assert_eq!(shim.randomness(&mut buf), 8);
    assert_eq!(buf, [7u8; 8]);
    assert_eq!(shim.sleep(Duration::from_micros(250)), Duration::from_micros(250));
    assert_eq!(shim.current_time(), Ok(2_460_000.5));
    assert_eq!(shim.max_pathname(), 512);

    assert_eq!(sink.calls("trace", "xRandomness"), vec!["trace.xRandomness(8), out=8".to_string()]);
    assert_eq!(sink.calls("trace", "xSleep"), vec!["trace.xSleep(250), out=250".to_string()]);
}

#[test]
fn test_shm_absent_when_root_file_lacks_it() {
    let dir = tempfile::tempdir().unwrap();
    let (shim, _) = shim_over(Arc::new(OsVfs::new()));
    let path = dir.path().join("plain.db");
    let (mut file, _) = shim
        .open_mirrored(path.to_str(), OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB)
        .unwrap();
    assert!(file.shared_memory().is_none());
}
