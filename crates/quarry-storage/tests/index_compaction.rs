//! Index compaction and rebuild scenarios.

use quarry_common::config::{DatabaseConfig, SyncMode};
use quarry_common::types::{FileId, Rid};
use quarry_storage::{CompactionPhase, Database, Document, KeyValue, RecordSerializer};
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> DatabaseConfig {
    DatabaseConfig::default().with_wal_sync(SyncMode::Buffered)
}

fn rid(n: u64) -> Rid {
    Rid::new(FileId::new(1), n)
}

fn int_key(n: i64) -> Vec<KeyValue> {
    vec![KeyValue::Int(n)]
}

/// Compaction is observably transparent: identical lookups and ranges
/// immediately before and after a run with no intervening writes.
#[test]
fn compaction_is_transparent() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path(), config()).unwrap();
    let index = db.create_index("scores", false, None).unwrap();

    let mut session = db.session();
    for chunk in 0..4i64 {
        session
            .with_transaction(|ctx| {
                for i in 0..256i64 {
                    let n = chunk * 256 + i;
                    index.put(ctx, &int_key(n), rid(n as u64))?;
                }
                Ok(())
            })
            .unwrap();
    }
    // Tombstone a slice of the keys.
    session
        .with_transaction(|ctx| {
            for n in (0..1024i64).step_by(10) {
                index.remove(ctx, &int_key(n))?;
            }
            Ok(())
        })
        .unwrap();

    let before: Vec<(i64, Vec<Rid>)> = {
        session.begin().unwrap();
        let ctx = session.ctx().unwrap();
        let mut out = Vec::new();
        for n in 0..1024i64 {
            out.push((n, index.get(ctx, &int_key(n)).unwrap()));
        }
        session.rollback().unwrap();
        out
    };
    let range_before = {
        session.begin().unwrap();
        let out = index
            .range(
                session.ctx().unwrap(),
                Some(&int_key(100)),
                Some(&int_key(199)),
            )
            .unwrap();
        session.rollback().unwrap();
        out
    };

    assert!(db.compact_index("scores").unwrap());
    assert_eq!(index.compaction_phase(), CompactionPhase::No);

    session.begin().unwrap();
    {
        let ctx = session.ctx().unwrap();
        for (n, expected) in &before {
            assert_eq!(
                &index.get(ctx, &int_key(*n)).unwrap(),
                expected,
                "key {} changed across compaction",
                n
            );
        }
        let range_after = index
            .range(ctx, Some(&int_key(100)), Some(&int_key(199)))
            .unwrap();
        assert_eq!(range_after, range_before);
    }
    session.rollback().unwrap();
    db.close().unwrap();
}

/// Writes after a compaction land in the fresh mutable component and mask
/// the compacted tier correctly.
#[test]
fn writes_after_compaction_overlay_compacted_tier() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path(), config()).unwrap();
    let index = db.create_index("layered", false, None).unwrap();

    let mut session = db.session();
    session
        .with_transaction(|ctx| {
            for n in 0..100i64 {
                index.put(ctx, &int_key(n), rid(n as u64))?;
            }
            Ok(())
        })
        .unwrap();

    assert!(db.compact_index("layered").unwrap());

    // Overwrite one key and delete another, post-compaction.
    session
        .with_transaction(|ctx| {
            index.remove(ctx, &int_key(7))?;
            index.put(ctx, &int_key(7), rid(700))?;
            index.remove(ctx, &int_key(13))?;
            Ok(())
        })
        .unwrap();

    session.begin().unwrap();
    {
        let ctx = session.ctx().unwrap();
        assert_eq!(index.get(ctx, &int_key(7)).unwrap(), vec![rid(700)]);
        assert!(index.get(ctx, &int_key(13)).unwrap().is_empty());
        assert_eq!(index.get(ctx, &int_key(42)).unwrap(), vec![rid(42)]);
    }
    session.rollback().unwrap();

    // A second compaction folds the overlay in.
    assert!(db.compact_index("layered").unwrap());
    session.begin().unwrap();
    {
        let ctx = session.ctx().unwrap();
        assert_eq!(index.get(ctx, &int_key(7)).unwrap(), vec![rid(700)]);
        assert!(index.get(ctx, &int_key(13)).unwrap().is_empty());
    }
    session.rollback().unwrap();
    db.close().unwrap();
}

/// The compacted component survives a clean close and is rediscovered by
/// its file extension at the next open.
#[test]
fn compacted_component_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let db = Database::open(tmp.path(), config()).unwrap();
        let index = db.create_index("kept", true, None).unwrap();
        let mut session = db.session();
        session
            .with_transaction(|ctx| {
                for n in 0..64i64 {
                    index.put(ctx, &int_key(n), rid(n as u64))?;
                }
                Ok(())
            })
            .unwrap();
        assert!(db.compact_index("kept").unwrap());
        db.close().unwrap();
    }

    let db = Database::open(tmp.path(), config()).unwrap();
    let index = db.index("kept").unwrap();
    assert!(index.is_unique());
    let mut session = db.session();
    session.begin().unwrap();
    assert_eq!(
        index.get(session.ctx().unwrap(), &int_key(33)).unwrap(),
        vec![rid(33)]
    );
    session.rollback().unwrap();
    db.close().unwrap();
}

/// Rebuild streams every bucket record through the same key-extraction path
/// used by live indexing.
#[test]
fn rebuild_rederives_keys_from_bucket() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path(), config()).unwrap();
    let bucket = db.create_bucket("people").unwrap();

    let serializer = quarry_storage::BinarySerializer;
    let extractor: Arc<dyn quarry_storage::KeyExtractor> = Arc::new(move |record: &[u8]| {
        let doc = serializer.deserialize(record).ok()?;
        match doc {
            Document::Map(fields) => match fields.get("age") {
                Some(Document::Int(age)) => Some(vec![KeyValue::Int(*age)]),
                _ => None,
            },
            _ => None,
        }
    });
    let index = db.create_index("people_by_age", false, Some(extractor)).unwrap();

    // Store documents without touching the index.
    let mut session = db.session();
    let rids: Vec<Rid> = session
        .with_transaction(|ctx| {
            let mut rids = Vec::new();
            for age in 20..30i64 {
                let mut fields = std::collections::BTreeMap::new();
                fields.insert("age".to_string(), Document::Int(age));
                fields.insert(
                    "name".to_string(),
                    Document::String(format!("person-{}", age)),
                );
                let bytes = serializer.serialize(&Document::Map(fields))?;
                rids.push(bucket.create_record(ctx, &bytes)?);
            }
            Ok(rids)
        })
        .unwrap();
    drop(session);

    let indexed = db.rebuild_index("people_by_age", "people").unwrap();
    assert_eq!(indexed, 10);

    let mut session = db.session();
    session.begin().unwrap();
    {
        let ctx = session.ctx().unwrap();
        for (i, age) in (20..30i64).enumerate() {
            assert_eq!(index.get(ctx, &int_key(age)).unwrap(), vec![rids[i]]);
        }
        assert!(index.get(ctx, &int_key(99)).unwrap().is_empty());
    }
    session.rollback().unwrap();
    db.close().unwrap();
}
