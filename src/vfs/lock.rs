// FILE: src/vfs/lock.rs
//! In-process implementation of the engine's five-level file lock protocol.
//!
//! Every handle opened on the same file shares one `InodeLock` record in the
//! `LockTable`, keyed by canonical path. A handle's `FileLock` remembers which
//! of the exclusive flags it owns, so releasing never clears another
//! handle's claim.

use crate::core::{LockLevel, Status, VfsResult};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Default)]
struct InodeLock {
    shared: usize,
    reserved: bool,
    pending: bool,
    exclusive: bool,
}

impl InodeLock {
    fn is_idle(&self) -> bool {
        self.shared == 0 && !self.reserved && !self.pending && !self.exclusive
    }
}

/// Lock records of every file currently locked through one backend.
#[derive(Debug, Default)]
pub struct LockTable {
    inodes: DashMap<PathBuf, InodeLock>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files with at least one lock held.
    pub fn active_files(&self) -> usize {
        self.inodes.len()
    }
}

/// Lock state of one handle.
#[derive(Debug)]
pub struct FileLock {
    table: Arc<LockTable>,
    key: PathBuf,
    level: LockLevel,
    owns_reserved: bool,
    owns_pending: bool,
    owns_exclusive: bool,
}

impl FileLock {
    pub fn new(table: Arc<LockTable>, key: PathBuf) -> Self {
        Self {
            table,
            key,
            level: LockLevel::None,
            owns_reserved: false,
            owns_pending: false,
            owns_exclusive: false,
        }
    }

    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Raise this handle's lock to `target`.
    ///
    /// On contention returns `BUSY`. An EXCLUSIVE request that is blocked by
    /// other readers leaves the handle at PENDING so new readers are kept out.
    pub fn acquire(&mut self, target: LockLevel) -> VfsResult<()> {
        if self.level >= target {
            return Ok(());
        }
        if target > LockLevel::Shared && self.level == LockLevel::None {
            return Err(Status::MISUSE);
        }

        let mut inode = self.table.inodes.entry(self.key.clone()).or_default();
        match target {
            LockLevel::None => {}
            LockLevel::Shared => {
                if inode.pending || inode.exclusive {
                    return Err(Status::BUSY);
                }
                inode.shared += 1;
                self.level = LockLevel::Shared;
            }
            LockLevel::Reserved => {
                if inode.reserved || inode.pending || inode.exclusive {
                    return Err(Status::BUSY);
                }
                inode.reserved = true;
                self.owns_reserved = true;
                self.level = LockLevel::Reserved;
            }
            LockLevel::Pending | LockLevel::Exclusive => {
                if self.level < LockLevel::Pending {
                    if (inode.reserved && !self.owns_reserved) || inode.pending {
                        return Err(Status::BUSY);
                    }
                    inode.pending = true;
                    self.owns_pending = true;
                    self.level = LockLevel::Pending;
                }
                if target == LockLevel::Exclusive {
                    if inode.shared > 1 {
                        return Err(Status::BUSY);
                    }
                    inode.exclusive = true;
                    self.owns_exclusive = true;
                    self.level = LockLevel::Exclusive;
                }
            }
        }
        Ok(())
    }

    /// Drop this handle's lock to `target` (SHARED or NONE).
    pub fn release(&mut self, target: LockLevel) -> VfsResult<()> {
        if target > LockLevel::Shared {
            return Err(Status::MISUSE);
        }
        if self.level <= target {
            return Ok(());
        }

        let idle = {
            let mut inode = self.table.inodes.entry(self.key.clone()).or_default();
            if self.owns_reserved {
                inode.reserved = false;
            }
            if self.owns_pending {
                inode.pending = false;
            }
            if self.owns_exclusive {
                inode.exclusive = false;
            }
            self.owns_reserved = false;
            self.owns_pending = false;
            self.owns_exclusive = false;
            self.level = LockLevel::Shared;

            if target == LockLevel::None {
                inode.shared = inode.shared.saturating_sub(1);
                self.level = LockLevel::None;
            }
            inode.is_idle()
        };

        if idle {
            self.table.inodes.remove_if(&self.key, |_, inode| inode.is_idle());
        }
        Ok(())
    }

    /// Whether any handle on this file holds RESERVED or higher.
    pub fn reserved_held(&self) -> bool {
        self.table
            .inodes
            .get(&self.key)
            .map(|inode| inode.reserved || inode.pending || inode.exclusive)
            .unwrap_or(false)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.release(LockLevel::None);
    }
}
