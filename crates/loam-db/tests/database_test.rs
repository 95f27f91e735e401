//! End-to-end scenarios against the public database handle.

use loam_db::{Database, LoamError, StorageConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;

const PAGE_SIZE: usize = 4096;

fn config(dir: &Path, name: &str) -> StorageConfig {
    StorageConfig {
        path: dir.join(name),
        page_size: PAGE_SIZE,
        direct_io: false,
    }
}

/// A deterministic stand-in for an external word list: pronounceable unique
/// words in a shuffled order.
fn word_list(count: usize) -> Vec<String> {
    const SYLLABLES: [&str; 12] = [
        "ba", "co", "da", "fe", "gi", "ho", "ku", "la", "me", "no", "pi", "ra",
    ];
    let mut words: Vec<String> = (0..count)
        .map(|i| {
            format!(
                "{}{}{}{}",
                SYLLABLES[i % 12],
                SYLLABLES[(i / 12) % 12],
                SYLLABLES[(i / 144) % 12],
                i
            )
        })
        .collect();
    words.shuffle(&mut StdRng::seed_from_u64(7));
    words
}

#[test]
fn test_scenario_single_pair_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "a.db");

    let db = Database::open_with(config.clone()).unwrap();
    db.upsert(b"a", b"1").unwrap();
    assert_eq!(db.find(b"a").unwrap().as_ref(), b"1");
    db.close().unwrap();

    // reserved page 0 plus the root page
    let len = std::fs::metadata(&config.path).unwrap().len();
    assert_eq!(len, 2 * PAGE_SIZE as u64);
}

#[test]
fn test_scenario_first_split_reports_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with(config(dir.path(), "b.db")).unwrap();

    // distinct 10-byte keys and values; each costs 28 bytes of the
    // 4080-byte root budget, so the split lands on a known operation
    let mut split_at = None;
    for i in 0..1000u32 {
        let key = format!("key{:07}", i);
        let value = format!("val{:07}", i);
        let outcome = db.upsert(key.as_bytes(), value.as_bytes()).unwrap();
        if outcome.split {
            split_at = Some(i);
            break;
        }
    }

    let split_at = split_at.expect("root never split");
    assert_eq!(split_at as usize, (PAGE_SIZE - 16) / 28);

    for i in 0..=split_at {
        let key = format!("key{:07}", i);
        let value = format!("val{:07}", i);
        assert_eq!(db.find(key.as_bytes()).unwrap().as_ref(), value.as_bytes());
    }
}

#[test]
fn test_scenario_latest_upsert_wins() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with(config(dir.path(), "c.db")).unwrap();

    db.upsert(b"k", b"v1").unwrap();
    db.upsert(b"k", b"v2").unwrap();
    assert_eq!(db.find(b"k").unwrap().as_ref(), b"v2");
}

#[test]
fn test_scenario_ordered_insertions() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with(config(dir.path(), "d.db")).unwrap();

    db.upsert(b"a", b"1").unwrap();
    db.upsert(b"b", b"2").unwrap();
    db.upsert(b"c", b"3").unwrap();

    assert_eq!(db.find(b"b").unwrap().as_ref(), b"2");
    assert_eq!(db.find(b"a").unwrap().as_ref(), b"1");
    assert_eq!(db.find(b"c").unwrap().as_ref(), b"3");
}

#[test]
fn test_scenario_bulk_load_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "e.db");
    let words = word_list(5000);

    {
        let db = Database::open_with(config.clone()).unwrap();
        for word in &words {
            let value = format!("<{word}>");
            db.upsert(word.as_bytes(), value.as_bytes()).unwrap();
        }
        db.close().unwrap();
    }

    let db = Database::open_with(config).unwrap();
    for word in &words {
        let value = format!("<{word}>");
        assert_eq!(
            db.find(word.as_bytes()).unwrap().as_ref(),
            value.as_bytes(),
            "word {word} lost across reopen"
        );
    }
    db.close().unwrap();
}

#[test]
fn test_scenario_closed_database_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with(config(dir.path(), "f.db")).unwrap();

    db.upsert(b"a", b"1").unwrap();
    db.close().unwrap();

    assert!(matches!(db.find(b"a"), Err(LoamError::DatabaseClosed)));
    assert!(matches!(db.close(), Err(LoamError::DatabaseClosed)));
}

#[test]
fn test_values_survive_updates_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "updates.db");

    {
        let db = Database::open_with(config.clone()).unwrap();
        for i in 0..500u32 {
            let key = format!("key{:07}", i);
            db.upsert(key.as_bytes(), b"first").unwrap();
        }
        for i in 0..500u32 {
            let key = format!("key{:07}", i);
            db.upsert(key.as_bytes(), b"second").unwrap();
        }
        db.close().unwrap();
    }

    let db = Database::open_with(config).unwrap();
    for i in 0..500u32 {
        let key = format!("key{:07}", i);
        assert_eq!(db.find(key.as_bytes()).unwrap().as_ref(), b"second");
    }
}

#[test]
fn test_missing_key_after_load() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with(config(dir.path(), "missing.db")).unwrap();

    for i in 0..200u32 {
        let key = format!("key{:07}", i);
        db.upsert(key.as_bytes(), b"value").unwrap();
    }

    assert!(matches!(
        db.find(b"key9999999"),
        Err(LoamError::KeyNotFound)
    ));
}
