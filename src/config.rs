// FILE: src/config.rs
//! Mirror configuration.
//!
//! `MirrorConfig` is built once and then shared read-only. The replica
//! directory inside it can be set exactly once; the first successful
//! `configure_replica_directory` also registers the default `trace` shim.

use crate::error::{MirrorError, Result};
use crate::shim::{register_shim, StderrSink, TraceLevel};
use crate::vfs::VfsRegistry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Longest accepted replica directory, in bytes (exclusive).
pub const MAX_REPLICA_DIR_LEN: usize = 260;
/// Shortest replica directory after trailing separators are trimmed.
pub const MIN_REPLICA_DIR_LEN: usize = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5);
/// Name of the shim registered by `configure_replica_directory`.
pub const DEFAULT_SHIM_NAME: &str = "trace";
/// Environment variable overriding the trace level.
pub const TRACE_ENV: &str = "MIRRORVFS_TRACE";

/// A validated replica directory: bounded length, no trailing separators,
/// and an existing directory at the time it was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaDir(String);

impl ReplicaDir {
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(MirrorError::PathTooShort(String::new()));
        }
        if path.len() >= MAX_REPLICA_DIR_LEN {
            return Err(MirrorError::PathTooLong { len: path.len(), max: MAX_REPLICA_DIR_LEN - 1 });
        }

        let mut end = path.len();
        while end > 0 && matches!(path.as_bytes()[end - 1], b'/' | b'\\') {
            end -= 1;
        }
        let trimmed = &path[..end];
        if trimmed.len() < MIN_REPLICA_DIR_LEN {
            return Err(MirrorError::PathTooShort(path.to_string()));
        }
        if !Path::new(trimmed).is_dir() {
            return Err(MirrorError::NotADirectory(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// On-disk settings (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSettings {
    pub replica_dir: Option<String>,
    pub trace_level: TraceLevel,
    pub retry_delay_ms: u64,
    /// Backend to wrap; the registry default when absent.
    pub root_vfs: Option<String>,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            replica_dir: None,
            trace_level: TraceLevel::default(),
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            root_vfs: None,
        }
    }
}

impl MirrorSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Apply `MIRRORVFS_TRACE` if it is set and parses.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(TRACE_ENV) {
            match raw.parse::<TraceLevel>() {
                Ok(level) => self.trace_level = level,
                Err(e) => tracing::warn!("[Config] Ignoring {}: {}", TRACE_ENV, e),
            }
        }
    }
}

#[derive(Debug)]
pub struct MirrorConfig {
    replica_dir: OnceLock<ReplicaDir>,
    retry_delay: Duration,
    trace_level: TraceLevel,
    root_vfs: Option<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorConfig {
    pub fn new() -> Self {
        Self {
            replica_dir: OnceLock::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
            trace_level: TraceLevel::default(),
            root_vfs: None,
        }
    }

    /// Everything except the replica directory, which still goes through
    /// `configure_replica_directory`.
    pub fn from_settings(settings: &MirrorSettings) -> Self {
        Self {
            replica_dir: OnceLock::new(),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            trace_level: settings.trace_level,
            root_vfs: settings.root_vfs.clone().filter(|name| !name.is_empty()),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    pub fn with_root_vfs(mut self, name: &str) -> Self {
        self.root_vfs = Some(name.to_string());
        self
    }

    pub fn replica_dir(&self) -> Option<&str> {
        self.replica_dir.get().map(ReplicaDir::as_str)
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn trace_level(&self) -> TraceLevel {
        self.trace_level
    }

    pub fn root_vfs(&self) -> Option<&str> {
        self.root_vfs.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.replica_dir.get().is_some()
    }

    /// Validate and store the replica directory. One shot.
    pub fn set_replica_dir(&self, path: &str) -> Result<&str> {
        if self.is_configured() {
            return Err(MirrorError::AlreadyConfigured);
        }
        let dir = ReplicaDir::parse(path)?;
        self.replica_dir.set(dir).map_err(|_| MirrorError::AlreadyConfigured)?;
        self.replica_dir().ok_or(MirrorError::AlreadyConfigured)
    }

    /// Accept `path` as the replica directory and register the default
    /// `trace` shim over the root backend, writing to stderr.
    ///
    /// Returns false, changing nothing, when already configured, when the
    /// path is rejected, or when the root backend is not registered.
    pub fn configure_replica_directory(self: &Arc<Self>, registry: &VfsRegistry, path: &str) -> bool {
        if self.is_configured() {
            tracing::debug!("[Config] Replica directory '{}' rejected: {}", path, MirrorError::AlreadyConfigured);
            return false;
        }
        let dir = match ReplicaDir::parse(path) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::debug!("[Config] Replica directory '{}' rejected: {}", path, e);
                return false;
            }
        };
        let root = self.root_vfs().filter(|name| !name.is_empty());
        if registry.find(root).is_none() {
            tracing::warn!(
                "[Config] Root backend '{}' not registered, replica directory not set",
                root.unwrap_or("<default>")
            );
            return false;
        }
        if self.replica_dir.set(dir).is_err() {
            return false;
        }

        match register_shim(
            registry,
            Arc::clone(self),
            DEFAULT_SHIM_NAME,
            root,
            Arc::new(StderrSink),
            true,
        ) {
            Ok(_) => {
                tracing::info!("[Config] Mirroring into {}", self.replica_dir().unwrap_or(path));
                true
            }
            Err(e) => {
                // Root vanished between lookup and registration.
                tracing::error!("[Config] Default shim registration failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_trailing_separators() {
        let dir = tempfile::tempdir().unwrap();
        let raw = format!("{}//", dir.path().display());
        let parsed = ReplicaDir::parse(&raw).unwrap();
        assert_eq!(parsed.as_str(), dir.path().to_str().unwrap());
    }

    #[test]
    fn test_parse_rejects_degenerate_paths() {
        assert!(matches!(ReplicaDir::parse(""), Err(MirrorError::PathTooShort(_))));
        assert!(matches!(ReplicaDir::parse("/"), Err(MirrorError::PathTooShort(_))));
        assert!(matches!(ReplicaDir::parse("///"), Err(MirrorError::PathTooShort(_))));
        assert!(matches!(ReplicaDir::parse("\\"), Err(MirrorError::PathTooShort(_))));
        assert!(matches!(ReplicaDir::parse("a/"), Err(MirrorError::PathTooShort(_))));
    }

    #[test]
    fn test_parse_rejects_long_and_missing() {
        let long = "x".repeat(MAX_REPLICA_DIR_LEN);
        assert!(matches!(ReplicaDir::parse(&long), Err(MirrorError::PathTooLong { .. })));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ReplicaDir::parse(missing.to_str().unwrap()),
            Err(MirrorError::NotADirectory(_))
        ));

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(ReplicaDir::parse(file.to_str().unwrap()), Err(MirrorError::NotADirectory(_))));
    }

    #[test]
    fn test_replica_dir_is_one_shot() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let config = MirrorConfig::new();
        config.set_replica_dir(first.path().to_str().unwrap()).unwrap();
        assert!(matches!(
            config.set_replica_dir(second.path().to_str().unwrap()),
            Err(MirrorError::AlreadyConfigured)
        ));
        assert_eq!(config.replica_dir(), first.path().to_str());
    }

    #[test]
    fn test_configure_registers_default_shim_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VfsRegistry::with_os_default();
        let config = Arc::new(MirrorConfig::new().with_trace_level(TraceLevel::Off));

        assert!(!config.configure_replica_directory(&registry, ""));
        assert_eq!(registry.default_name().as_deref(), Some("os"));

        assert!(config.configure_replica_directory(&registry, dir.path().to_str().unwrap()));
        assert_eq!(registry.default_name().as_deref(), Some(DEFAULT_SHIM_NAME));
        assert!(!config.configure_replica_directory(&registry, dir.path().to_str().unwrap()));
        assert_eq!(registry.names(), vec!["os".to_string(), "trace".to_string()]);
    }

    #[test]
    fn test_configure_with_missing_root_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let registry = VfsRegistry::with_os_default();
        let config = Arc::new(
            MirrorConfig::new()
                .with_root_vfs("missing")
                .with_trace_level(TraceLevel::Off),
        );

        assert!(!config.configure_replica_directory(&registry, path));
        assert!(!config.is_configured());
        assert_eq!(config.replica_dir(), None);
        assert_eq!(registry.default_name().as_deref(), Some("os"));
        assert_eq!(registry.names(), vec!["os".to_string()]);

        // Nothing was stored, so the call succeeds once the root shows up.
        registry.register(Arc::new(crate::vfs::OsVfs::named("missing")), false);
        assert!(config.configure_replica_directory(&registry, path));
        assert_eq!(config.replica_dir(), Some(path.trim_end_matches('/')));
        assert_eq!(registry.default_name().as_deref(), Some(DEFAULT_SHIM_NAME));
    }

    #[test]
    fn test_settings_defaults_and_json() {
        let settings = MirrorSettings::from_json(r#"{ "trace_level": "full", "root_vfs": "os" }"#).unwrap();
        assert_eq!(settings.trace_level, TraceLevel::Full);
        assert_eq!(settings.retry_delay_ms, 5);
        assert_eq!(settings.replica_dir, None);

        let config = MirrorConfig::from_settings(&settings);
        assert_eq!(config.retry_delay(), Duration::from_millis(5));
        assert_eq!(config.root_vfs(), Some("os"));
        assert!(!config.is_configured());

        assert!(matches!(MirrorSettings::from_json("{ nope"), Err(MirrorError::Settings(_))));
    }
}
