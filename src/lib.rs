//! mirrorvfs: a tracing, mirroring storage shim for the SQLite engine.
//!
//! Layers, bottom up:
//! - core (status codes, open/lock/sync flags, replica path resolution)
//! - vfs (backend traits, registry, the OS backend)
//! - shim (MirrorVfs + MirrorFile: trace every call, mirror the main db and
//!   main journal into a replica directory)
//! - config (one-shot replica directory, settings file)

pub mod config;
pub mod core;
pub mod error;
pub mod shim;
pub mod testing;
pub mod vfs;

pub use crate::config::{MirrorConfig, MirrorSettings, ReplicaDir};
pub use crate::core::{reconcile, AccessFlags, LockLevel, OpenFlags, Status, SyncFlags, VfsResult};
pub use error::{MirrorError, Result};
pub use shim::{register_shim, BufferSink, MirrorFile, MirrorVfs, StderrSink, TraceLevel, TraceSink, TracingSink};
pub use vfs::{FileControl, OpenedFile, OsVfs, Vfs, VfsFile, VfsRegistry};
