//! Crash recovery scenarios.
//!
//! The crash window this engine defends is: WAL entry durable, page flush
//! not yet on disk. The tests construct that state directly by snapshotting
//! component files before a batch of commits, then restoring the snapshot
//! while keeping the WAL files and the lock file, exactly what a process
//! kill between the WAL append and the page writes leaves behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use quarry_common::config::{DatabaseConfig, SyncMode};
use quarry_storage::Database;
use tempfile::TempDir;

fn config() -> DatabaseConfig {
    DatabaseConfig::default().with_wal_sync(SyncMode::Buffered)
}

/// Snapshots every file in the directory into memory.
fn snapshot(dir: &Path) -> HashMap<PathBuf, Vec<u8>> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let data = std::fs::read(&path).unwrap();
            (path, data)
        })
        .collect()
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect()
}

/// Insert a batch of records committing one by one, then reopen against the
/// pre-insert component files: every record must come back from the WAL.
#[test]
fn recovery_replays_unflushed_commits() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    // Phase 1: create the bucket, close cleanly, snapshot the empty state.
    {
        let db = Database::open(dir, config()).unwrap();
        db.create_bucket("v").unwrap();
        db.close().unwrap();
    }
    let before = snapshot(dir);

    // Phase 2: insert 1000 records, one commit each.
    let wal_backup: Vec<(PathBuf, Vec<u8>)>;
    {
        let db = Database::open(dir, config()).unwrap();
        let bucket = db.bucket("v").unwrap();
        let mut session = db.session();
        for i in 0..1000u32 {
            session
                .with_transaction(|ctx| {
                    bucket.create_record(ctx, format!("record-{:04}", i).as_bytes())
                })
                .unwrap();
        }

        // The WAL now holds every commit; grab it before the clean close
        // would delete it.
        wal_backup = files_with_extension(dir, "wal")
            .into_iter()
            .map(|path| {
                let data = std::fs::read(&path).unwrap();
                (path, data)
            })
            .collect();
        assert!(!wal_backup.is_empty());
        db.close().unwrap();
    }

    // Phase 3: simulate the kill. Component files roll back to their
    // pre-insert state; the WAL files and the lock file reappear.
    for (path, data) in &before {
        if path.extension().and_then(|e| e.to_str()) == Some("bkt") {
            std::fs::write(path, data).unwrap();
        }
    }
    for (path, data) in &wal_backup {
        std::fs::write(path, data).unwrap();
    }
    std::fs::write(dir.join("database.lck"), b"quarrydb\n").unwrap();

    // Phase 4: reopen. Recovery must reconstruct the exact post-commit
    // state.
    let db = Database::open(dir, config()).unwrap();
    let bucket = db.bucket("v").unwrap();
    let mut session = db.session();
    session.begin().unwrap();
    {
        let ctx = session.ctx().unwrap();
        assert_eq!(bucket.count(ctx).unwrap(), 1000);
        let mut seen = 0u32;
        bucket
            .scan(ctx, |_, content| {
                assert_eq!(content, format!("record-{:04}", seen).as_bytes());
                seen += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, 1000);
    }
    session.rollback().unwrap();
    db.close().unwrap();

    // The WAL files are gone after a completed recovery.
    assert!(files_with_extension(dir, "wal").is_empty());
}

/// Replaying the same WAL against an already-recovered database is a no-op:
/// every delta is skipped by the version comparison.
#[test]
fn recovery_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    {
        let db = Database::open(dir, config()).unwrap();
        db.create_bucket("idem").unwrap();
        db.close().unwrap();
    }

    let wal_backup: Vec<(PathBuf, Vec<u8>)>;
    {
        let db = Database::open(dir, config()).unwrap();
        let bucket = db.bucket("idem").unwrap();
        let mut session = db.session();
        for i in 0..50u8 {
            session
                .with_transaction(|ctx| bucket.create_record(ctx, &[i; 16]))
                .unwrap();
        }
        wal_backup = files_with_extension(dir, "wal")
            .into_iter()
            .map(|path| (path.clone(), std::fs::read(&path).unwrap()))
            .collect();
        db.close().unwrap();
    }

    // First replay: against fully flushed component files (versions on disk
    // are already >= every delta's new version).
    for (path, data) in &wal_backup {
        std::fs::write(path, data).unwrap();
    }
    std::fs::write(dir.join("database.lck"), b"quarrydb\n").unwrap();
    {
        let db = Database::open(dir, config()).unwrap();
        let bucket = db.bucket("idem").unwrap();
        let mut session = db.session();
        session.begin().unwrap();
        assert_eq!(bucket.count(session.ctx().unwrap()).unwrap(), 50);
        session.rollback().unwrap();
        db.close().unwrap();
    }

    // Second replay of the very same WAL: still 50 records, byte-identical
    // reads.
    for (path, data) in &wal_backup {
        std::fs::write(path, data).unwrap();
    }
    std::fs::write(dir.join("database.lck"), b"quarrydb\n").unwrap();
    {
        let db = Database::open(dir, config()).unwrap();
        let bucket = db.bucket("idem").unwrap();
        let mut session = db.session();
        session.begin().unwrap();
        {
            let ctx = session.ctx().unwrap();
            assert_eq!(bucket.count(ctx).unwrap(), 50);
            let mut i = 0u8;
            bucket
                .scan(ctx, |_, content| {
                    assert_eq!(content, &[i; 16]);
                    i += 1;
                    Ok(true)
                })
                .unwrap();
        }
        session.rollback().unwrap();
        db.close().unwrap();
    }
}

/// Updates that relocated records recover too: the placeholder write and the
/// surrogate write travel in the same WAL entry.
#[test]
fn recovery_preserves_relocated_records() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    // Build a bucket where one record was relocated via placeholder.
    let rid;
    {
        let db = Database::open(dir, config()).unwrap();
        let bucket = db.create_bucket("moved").unwrap();
        let mut session = db.session();
        rid = session
            .with_transaction(|ctx| {
                let rid = bucket.create_record(ctx, b"small")?;
                let filler = vec![0u8; 8 * 1024];
                while ctx.page_count(bucket.file_id())? == 1 {
                    bucket.create_record(ctx, &filler)?;
                }
                Ok(rid)
            })
            .unwrap();
        db.close().unwrap();
    }
    let before = snapshot(dir);

    let grown = vec![b'R'; 20 * 1024];
    let wal_backup: Vec<(PathBuf, Vec<u8>)>;
    {
        let db = Database::open(dir, config()).unwrap();
        let bucket = db.bucket("moved").unwrap();
        let mut session = db.session();
        session
            .with_transaction(|ctx| bucket.update_record(ctx, rid, &grown))
            .unwrap();
        wal_backup = files_with_extension(dir, "wal")
            .into_iter()
            .map(|path| (path.clone(), std::fs::read(&path).unwrap()))
            .collect();
        db.close().unwrap();
    }

    // Roll the bucket file back to before the relocating update.
    for (path, data) in &before {
        if path.extension().and_then(|e| e.to_str()) == Some("bkt") {
            std::fs::write(path, data).unwrap();
        }
    }
    for (path, data) in &wal_backup {
        std::fs::write(path, data).unwrap();
    }
    std::fs::write(dir.join("database.lck"), b"quarrydb\n").unwrap();

    let db = Database::open(dir, config()).unwrap();
    let bucket = db.bucket("moved").unwrap();
    let mut session = db.session();
    session.begin().unwrap();
    assert_eq!(
        bucket.read_record(session.ctx().unwrap(), rid).unwrap(),
        grown
    );
    session.rollback().unwrap();
    db.close().unwrap();
}
