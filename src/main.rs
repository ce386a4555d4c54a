// src/main.rs

use anyhow::{bail, Context, Result};
use mirrorvfs::*;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const HEADER: &[u8; 16] = b"SQLite format 3\0";
const PAGE_SIZE: usize = 4096;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <replica_dir> <db_path> [settings.json]", args[0]);
        return Ok(());
    }
    let replica_dir = &args[1];
    let db_path = &args[2];

    // ========== SETTINGS ==========
    let mut settings = match args.get(3) {
        Some(path) => MirrorSettings::load(path).with_context(|| format!("loading settings from {}", path))?,
        None => MirrorSettings::default(),
    };
    settings.apply_env();
    tracing::info!("Trace level: {}", settings.trace_level);

    // ========== REGISTRY + SHIM ==========
    let registry = VfsRegistry::with_os_default();
    let config = Arc::new(MirrorConfig::from_settings(&settings));
    let dir = settings.replica_dir.as_deref().unwrap_or(replica_dir);
    if !config.configure_replica_directory(&registry, dir) {
        bail!("replica directory rejected: {}", dir);
    }
    let vfs = registry.find(None).context("no default backend after configuration")?;
    tracing::info!("✓ Default backend: {}", vfs.name());

    // ========== WORKLOAD ==========
    let full_path = vfs.full_pathname(db_path).context("resolving database path")?;
    run_workload(vfs.as_ref(), &full_path).context("running workload")?;

    tracing::info!("✓ Mirrored {} into {}", full_path, config.replica_dir().unwrap_or("<none>"));
    Ok(())
}

/// Roughly what the engine does for a first write to a fresh database.
fn run_workload(vfs: &dyn Vfs, path: &str) -> VfsResult<()> {
    let flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB;
    let mut db = vfs.open(Some(path), flags)?.file;

    db.lock(LockLevel::Shared)?;
    let mut page = vec![0u8; PAGE_SIZE];
    page[..HEADER.len()].copy_from_slice(HEADER);

    let journal_path = format!("{}-journal", path);
    let journal_flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_JOURNAL;
    let mut journal = vfs.open(Some(journal_path.as_str()), journal_flags)?.file;
    journal.write(&[0u8; 512], 0)?;
    journal.sync(SyncFlags::NORMAL)?;

    db.lock(LockLevel::Reserved)?;
    db.lock(LockLevel::Exclusive)?;
    db.write(&page, 0)?;
    db.sync(SyncFlags::FULL)?;
    tracing::info!("Database size: {} bytes", db.file_size()?);

    let mut name = FileControl::VfsName { name: None };
    db.file_control(&mut name)?;
    if let FileControl::VfsName { name: Some(chain) } = &name {
        tracing::info!("Backend chain: {}", chain);
    }

    journal.close()?;
    if vfs.access(&journal_path, AccessFlags::Exists)? {
        vfs.delete(&journal_path, false)?;
    }
    db.unlock(LockLevel::Shared)?;
    db.unlock(LockLevel::None)?;
    db.close()
}
