//! Ledger persistence and single-writer enforcement.

use gamiforge::error::StorageError;
use gamiforge::store::{recent_entries, GameStore, Ledger, WriterRegistry};
use serde_json::json;
use tempfile::TempDir;

fn store(dir: &TempDir) -> GameStore {
    GameStore::with_registry(dir.path(), "ledger_game", WriterRegistry::new()).unwrap()
}

#[test]
fn test_append_regenerate_initialize() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    {
        let mut ledger = store.open_ledger().unwrap();
        assert!(ledger.is_empty());
        ledger.append("initialize:cats", json!("A cat platformer")).unwrap();
        ledger.append("revise:night", json!("A cat platformer at night")).unwrap();
        ledger.append("revise:rain", json!("A rainy night platformer")).unwrap();
        assert_eq!(recent_entries(ledger.entries(), 2).len(), 2);
        assert_eq!(recent_entries(ledger.entries(), 2)[0].id, "revise:night");
        assert_eq!(recent_entries(ledger.entries(), 10).len(), 3);
    }

    let on_disk = Ledger::read_entries(&store.ledger_path()).unwrap();
    assert_eq!(on_disk.len(), 3);
    assert_eq!(on_disk[2].content, json!("A rainy night platformer"));

    {
        let mut ledger = store.open_ledger().unwrap();
        let removed = ledger.regenerate().unwrap().unwrap();
        assert_eq!(removed.id, "revise:rain");
        assert_eq!(ledger.entries().last().unwrap().id, "revise:night");
    }
    assert_eq!(Ledger::read_entries(&store.ledger_path()).unwrap().len(), 2);

    {
        let mut ledger = store.open_ledger().unwrap();
        ledger.initialize().unwrap();
        assert_eq!(ledger.regenerate().unwrap(), None);
    }
    assert!(Ledger::read_entries(&store.ledger_path()).unwrap().is_empty());
}

#[test]
fn test_second_writer_is_rejected_until_release() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let first = store.open_ledger().unwrap();
    let second = store.open_ledger();
    assert!(matches!(second, Err(StorageError::ConcurrentWriter(_))));

    // Readers are never blocked.
    assert!(Ledger::read_entries(&store.ledger_path()).is_ok());

    drop(first);
    assert!(store.open_ledger().is_ok());
}

#[test]
fn test_rewrite_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let mut ledger = store.open_ledger().unwrap();
    for i in 0..5 {
        ledger.append(format!("revise:{}", i), json!({"step": i})).unwrap();
    }

    let names: Vec<String> = std::fs::read_dir(store.dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["ledger.json".to_string()]);
}

#[test]
fn test_corrupt_ledger_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.ledger_path(), "[{\"id\": ").unwrap();

    assert!(matches!(
        Ledger::read_entries(&store.ledger_path()),
        Err(StorageError::Serialization(_))
    ));
}
