// FILE: src/core/flags.rs
//! Flag words passed between the engine and a backend.

use rusqlite::ffi;
use std::fmt;
use std::ops::BitOr;

/// Flags of an open request, as handed to `Vfs::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(i32);

impl OpenFlags {
    pub const READONLY: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_READONLY);
    pub const READWRITE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_READWRITE);
    pub const CREATE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_CREATE);
    pub const DELETEONCLOSE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_DELETEONCLOSE);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_EXCLUSIVE);
    pub const MAIN_DB: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_MAIN_DB);
    pub const TEMP_DB: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_TEMP_DB);
    pub const TRANSIENT_DB: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_TRANSIENT_DB);
    pub const MAIN_JOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_MAIN_JOURNAL);
    pub const TEMP_JOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_TEMP_JOURNAL);
    pub const SUBJOURNAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_SUBJOURNAL);
    // Formerly "master journal"; kept numeric across engine versions.
    pub const SUPER_JOURNAL: OpenFlags = OpenFlags(0x0000_4000);
    pub const WAL: OpenFlags = OpenFlags(ffi::SQLITE_OPEN_WAL);

    pub const fn from_bits(bits: i32) -> Self {
        OpenFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: OpenFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 & !other.0)
    }

    /// Whether a replica handle is attempted for this request.
    ///
    /// Only the main database file and its rollback journal are mirrored.
    /// Temp files, WAL segments, sub-journals and super-journals never are.
    pub fn is_mirror_eligible(self) -> bool {
        self.intersects(OpenFlags::MAIN_DB | OpenFlags::MAIN_JOURNAL)
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl fmt::LowerHex for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The engine's five file lock levels, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockLevel {
    #[default]
    None,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

impl LockLevel {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            ffi::SQLITE_LOCK_NONE => Some(LockLevel::None),
            ffi::SQLITE_LOCK_SHARED => Some(LockLevel::Shared),
            ffi::SQLITE_LOCK_RESERVED => Some(LockLevel::Reserved),
            ffi::SQLITE_LOCK_PENDING => Some(LockLevel::Pending),
            ffi::SQLITE_LOCK_EXCLUSIVE => Some(LockLevel::Exclusive),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            LockLevel::None => ffi::SQLITE_LOCK_NONE,
            LockLevel::Shared => ffi::SQLITE_LOCK_SHARED,
            LockLevel::Reserved => ffi::SQLITE_LOCK_RESERVED,
            LockLevel::Pending => ffi::SQLITE_LOCK_PENDING,
            LockLevel::Exclusive => ffi::SQLITE_LOCK_EXCLUSIVE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LockLevel::None => "NONE",
            LockLevel::Shared => "SHARED",
            LockLevel::Reserved => "RESERVED",
            LockLevel::Pending => "PENDING",
            LockLevel::Exclusive => "EXCLUSIVE",
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flags of a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncFlags(i32);

impl SyncFlags {
    pub const NORMAL: SyncFlags = SyncFlags(ffi::SQLITE_SYNC_NORMAL);
    pub const FULL: SyncFlags = SyncFlags(ffi::SQLITE_SYNC_FULL);
    pub const DATAONLY: SyncFlags = SyncFlags(ffi::SQLITE_SYNC_DATAONLY);

    const LEVEL_MASK: i32 = 0x0f;

    pub const fn from_bits(bits: i32) -> Self {
        SyncFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub fn is_full(self) -> bool {
        self.0 & Self::LEVEL_MASK == Self::FULL.0
    }

    pub fn is_data_only(self) -> bool {
        self.0 & Self::DATAONLY.0 != 0
    }

    /// Symbolic rendering, e.g. `FULL|DATAONLY`.
    pub fn describe(self) -> String {
        let mut parts: Vec<String> = Vec::new();
        match self.0 & Self::LEVEL_MASK {
            level if level == Self::FULL.0 => parts.push("FULL".into()),
            level if level == Self::NORMAL.0 => parts.push("NORMAL".into()),
            _ => {}
        }
        if self.is_data_only() {
            parts.push("DATAONLY".into());
        }
        let unknown = self.0 & !(Self::LEVEL_MASK | Self::DATAONLY.0);
        if unknown != 0 {
            parts.push(format!("0x{:x}", unknown));
        }
        if parts.is_empty() {
            return "0".into();
        }
        parts.join("|")
    }
}

impl BitOr for SyncFlags {
    type Output = SyncFlags;

    fn bitor(self, rhs: SyncFlags) -> SyncFlags {
        SyncFlags(self.0 | rhs.0)
    }
}

/// Flags of a shared-memory lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShmLockFlags(i32);

impl ShmLockFlags {
    pub const UNLOCK: ShmLockFlags = ShmLockFlags(ffi::SQLITE_SHM_UNLOCK);
    pub const LOCK: ShmLockFlags = ShmLockFlags(ffi::SQLITE_SHM_LOCK);
    pub const SHARED: ShmLockFlags = ShmLockFlags(ffi::SQLITE_SHM_SHARED);
    pub const EXCLUSIVE: ShmLockFlags = ShmLockFlags(ffi::SQLITE_SHM_EXCLUSIVE);

    pub const fn from_bits(bits: i32) -> Self {
        ShmLockFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: ShmLockFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Symbolic rendering, e.g. `LOCK|EXCLUSIVE`.
    pub fn describe(self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (flag, name) in [
            (Self::UNLOCK, "UNLOCK"),
            (Self::LOCK, "LOCK"),
            (Self::SHARED, "SHARED"),
            (Self::EXCLUSIVE, "EXCLUSIVE"),
        ] {
            if self.contains(flag) {
                parts.push(name.into());
            }
        }
        if self.0 & !0xf != 0 {
            parts.push(format!("0x{:x}", self.0));
        }
        if parts.is_empty() {
            return "0".into();
        }
        parts.join("|")
    }
}

impl BitOr for ShmLockFlags {
    type Output = ShmLockFlags;

    fn bitor(self, rhs: ShmLockFlags) -> ShmLockFlags {
        ShmLockFlags(self.0 | rhs.0)
    }
}

/// What an access check asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFlags {
    Exists,
    ReadWrite,
    Read,
}

impl AccessFlags {
    pub fn code(self) -> i32 {
        match self {
            AccessFlags::Exists => ffi::SQLITE_ACCESS_EXISTS,
            AccessFlags::ReadWrite => ffi::SQLITE_ACCESS_READWRITE,
            AccessFlags::Read => ffi::SQLITE_ACCESS_READ,
        }
    }
}

/// Device characteristic bits reported by a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCharacteristics(u32);

impl DeviceCharacteristics {
    pub const ATOMIC: DeviceCharacteristics = DeviceCharacteristics(0x0000_0001);
    pub const SAFE_APPEND: DeviceCharacteristics = DeviceCharacteristics(0x0000_0200);
    pub const SEQUENTIAL: DeviceCharacteristics = DeviceCharacteristics(0x0000_0400);
    pub const UNDELETABLE_WHEN_OPEN: DeviceCharacteristics = DeviceCharacteristics(0x0000_0800);
    pub const POWERSAFE_OVERWRITE: DeviceCharacteristics = DeviceCharacteristics(0x0000_1000);

    pub const fn from_bits(bits: u32) -> Self {
        DeviceCharacteristics(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: DeviceCharacteristics) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DeviceCharacteristics {
    type Output = DeviceCharacteristics;

    fn bitor(self, rhs: DeviceCharacteristics) -> DeviceCharacteristics {
        DeviceCharacteristics(self.0 | rhs.0)
    }
}

impl fmt::Display for DeviceCharacteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_eligibility() {
        let rw = OpenFlags::READWRITE | OpenFlags::CREATE;
        assert!((rw | OpenFlags::MAIN_DB).is_mirror_eligible());
        assert!((rw | OpenFlags::MAIN_JOURNAL).is_mirror_eligible());

        for kind in [
            OpenFlags::TEMP_DB,
            OpenFlags::TRANSIENT_DB,
            OpenFlags::TEMP_JOURNAL,
            OpenFlags::SUBJOURNAL,
            OpenFlags::SUPER_JOURNAL,
            OpenFlags::WAL,
        ] {
            assert!(!(rw | kind).is_mirror_eligible(), "{:x} must not be mirrored", kind);
        }
    }

    #[test]
    fn test_lock_level_order_and_codes() {
        assert!(LockLevel::None < LockLevel::Shared);
        assert!(LockLevel::Reserved < LockLevel::Exclusive);
        for level in [LockLevel::None, LockLevel::Shared, LockLevel::Reserved, LockLevel::Pending, LockLevel::Exclusive] {
            assert_eq!(LockLevel::from_code(level.code()), Some(level));
        }
        assert_eq!(LockLevel::from_code(17), None);
    }

    #[test]
    fn test_sync_describe() {
        assert_eq!(SyncFlags::NORMAL.describe(), "NORMAL");
        assert_eq!(SyncFlags::FULL.describe(), "FULL");
        assert_eq!((SyncFlags::FULL | SyncFlags::DATAONLY).describe(), "FULL|DATAONLY");
        assert_eq!(SyncFlags::from_bits(0x100).describe(), "0x100");
        assert_eq!(SyncFlags::from_bits(0).describe(), "0");
    }

    #[test]
    fn test_shm_lock_describe() {
        assert_eq!((ShmLockFlags::LOCK | ShmLockFlags::EXCLUSIVE).describe(), "LOCK|EXCLUSIVE");
        assert_eq!((ShmLockFlags::UNLOCK | ShmLockFlags::SHARED).describe(), "UNLOCK|SHARED");
    }

    #[test]
    fn test_device_characteristics_display() {
        assert_eq!(DeviceCharacteristics::POWERSAFE_OVERWRITE.to_string(), "0x00001000");
    }
}
