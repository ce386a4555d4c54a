//! Error types for mirrorvfs setup.
//!
//! Engine-facing operations report `Status` codes instead; this enum covers
//! configuration, registration and the settings file.

use crate::core::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("Replica directory already configured")]
    AlreadyConfigured,

    #[error("Replica directory too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("Replica directory too short: '{0}'")]
    PathTooShort(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("No such backend: {0}")]
    VfsNotFound(String),

    #[error("Backend error: {0}")]
    Vfs(#[from] Status),
}

impl MirrorError {
    /// The engine status code this error corresponds to.
    pub fn status(&self) -> Status {
        match self {
            MirrorError::Io(e) => Status::from_io(e, Status::IOERR),
            MirrorError::Settings(_) => Status::ERROR,
            MirrorError::AlreadyConfigured => Status::MISUSE,
            MirrorError::PathTooLong { .. } => Status::CANTOPEN_FULLPATH,
            MirrorError::PathTooShort(_) | MirrorError::NotADirectory(_) => Status::CANTOPEN,
            MirrorError::VfsNotFound(_) => Status::NOTFOUND,
            MirrorError::Vfs(status) => *status,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
