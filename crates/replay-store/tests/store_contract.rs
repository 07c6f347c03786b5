//! Store contract tests against a real directory

use pretty_assertions::assert_eq;
use replay_artifact::ArtifactKind;
use replay_store::{ArtifactStore, FsArtifactStore, StoreError};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

fn store() -> (tempfile::TempDir, FsArtifactStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::open(dir.path().join("artifacts")).unwrap();
    (dir, store)
}

#[test]
fn missing_last_slot_reads_as_none() {
    let (_dir, store) = store();
    for kind in ArtifactKind::ALL {
        assert!(store.read_last(kind).unwrap().is_none());
    }
}

#[test]
fn missing_history_is_empty() {
    let (_dir, store) = store();
    let snapshot = store
        .read_history(ArtifactKind::ExecutionResult)
        .unwrap()
        .read_all();
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.skipped, 0);
}

#[test]
fn write_last_replaces_previous_slot() {
    let (_dir, store) = store();
    let kind = ArtifactKind::ExecutionRequest;
    store.write_last(kind, &json!({"task_id": "T-1"})).unwrap();
    store.write_last(kind, &json!({"task_id": "T-2"})).unwrap();

    assert_eq!(store.read_last(kind).unwrap(), Some(json!({"task_id": "T-2"})));

    let text = std::fs::read_to_string(store.last_path(kind)).unwrap();
    assert!(text.ends_with("}\n"));
    assert!(text.contains("\n  \"task_id\""), "last slot is pretty printed: {text}");
}

#[test]
fn write_last_leaves_no_temp_files() {
    let (_dir, store) = store();
    store
        .write_last(ArtifactKind::ExecutionResult, &json!({"a": 1}))
        .unwrap();
    let names: Vec<String> = std::fs::read_dir(store.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["last_execution_result.json".to_string()]);
}

#[test]
fn append_writes_canonical_lines() {
    let (_dir, store) = store();
    let kind = ArtifactKind::ExecutionRequest;
    store.append(kind, &json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
    store.append(kind, &json!({"z": true})).unwrap();

    let text = std::fs::read_to_string(store.history_path(kind)).unwrap();
    assert_eq!(text, "{\"a\":{\"c\":3,\"d\":2},\"b\":1}\n{\"z\":true}\n");
}

#[test]
fn history_counts_malformed_lines() {
    let (_dir, store) = store();
    let kind = ArtifactKind::ExecutionResult;
    for i in 0..3 {
        store.append(kind, &json!({"n": i})).unwrap();
    }
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.history_path(kind))
            .unwrap();
        file.write_all(b"{truncated\n\n[1,2,3]\n").unwrap();
    }
    store.append(kind, &json!({"n": 3})).unwrap();

    let snapshot = store.read_history(kind).unwrap().read_all();
    let ns: Vec<i64> = snapshot
        .entries
        .iter()
        .map(|e| e.artifact["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![0, 1, 2, 3]);
    assert_eq!(snapshot.skipped, 2);
    assert_eq!(snapshot.entries[3].line, 7);
}

#[test]
fn history_tolerates_bom_and_missing_trailing_newline() {
    let (_dir, store) = store();
    let kind = ArtifactKind::EvaluationResult;
    std::fs::write(
        store.history_path(kind),
        b"\xEF\xBB\xBF{\"n\":1}\n{\"n\":2}",
    )
    .unwrap();

    let snapshot = store.read_history(kind).unwrap().read_all();
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(snapshot.skipped, 0);
}

#[test]
fn history_snapshot_ignores_later_appends() {
    let (_dir, store) = store();
    let kind = ArtifactKind::ExecutionRequest;
    store.append(kind, &json!({"n": 1})).unwrap();

    let history = store.read_history(kind).unwrap();
    store.append(kind, &json!({"n": 2})).unwrap();

    assert_eq!(history.read_all().entries.len(), 1);
    assert_eq!(store.read_history(kind).unwrap().read_all().entries.len(), 2);
}

#[test]
fn non_object_artifacts_are_refused() {
    let (_dir, store) = store();
    let err = store
        .append(ArtifactKind::ExecutionRequest, &json!("text"))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotAnObject { .. }));
    assert!(!store.history_path(ArtifactKind::ExecutionRequest).exists());
}

#[test]
fn corrupt_last_slot_is_reported() {
    let (_dir, store) = store();
    let kind = ArtifactKind::ExecutionResult;
    std::fs::write(store.last_path(kind), "[1, 2]").unwrap();
    assert!(matches!(
        store.read_last(kind),
        Err(StoreError::CorruptLast { .. })
    ));
}

#[test]
fn concurrent_appends_never_interleave() {
    let (_dir, store) = store();
    let store = Arc::new(store);
    let kind = ArtifactKind::ExecutionResult;
    let padding = "x".repeat(4096);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            let padding = padding.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    store
                        .append(kind, &json!({"thread": t, "i": i, "pad": padding}))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = store.read_history(kind).unwrap().read_all();
    assert_eq!(snapshot.entries.len(), 200);
    assert_eq!(snapshot.skipped, 0);
}
