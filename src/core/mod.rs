// FILE: src/core/mod.rs
pub mod flags;
pub mod path;
pub mod status;

pub use flags::{AccessFlags, DeviceCharacteristics, LockLevel, OpenFlags, ShmLockFlags, SyncFlags};
pub use path::{file_tail, replica_path};
pub use status::{reconcile, Status, VfsResult};
