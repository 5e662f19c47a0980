use factsheet_kv_store::{
    load_json, remove_prefix, save_json, ChangeKind, FileKvStore, InMemoryKvStore, KvStore,
};
use serde_json::json;

async fn exercise_contract(store: &dyn KvStore) {
    let mut changes = store.subscribe();

    store.set("edges_r1.Application", "[]".into()).await.unwrap();
    store.set("edges_r1.Process", "[]".into()).await.unwrap();
    store.set("edges_r2.Application", "[]".into()).await.unwrap();

    let first = changes.recv().await.unwrap();
    assert_eq!(first.key, "edges_r1.Application");
    assert_eq!(first.kind, ChangeKind::Set);

    assert_eq!(
        store.keys_with_prefix("edges_r1.").await.unwrap(),
        vec!["edges_r1.Application".to_string(), "edges_r1.Process".to_string()]
    );

    assert!(store.remove("edges_r1.Process").await.unwrap());
    assert!(!store.remove("edges_r1.Process").await.unwrap());
    assert_eq!(store.get("edges_r1.Process").await.unwrap(), None);

    save_json(store, "r1.Application_resolved", &json!([{"node": {"id": "a"}}]))
        .await
        .unwrap();
    let loaded: Option<serde_json::Value> = load_json(store, "r1.Application_resolved")
        .await
        .unwrap();
    assert_eq!(loaded, Some(json!([{"node": {"id": "a"}}])));

    assert_eq!(remove_prefix(store, "edges_").await.unwrap(), 2);
    assert!(store.keys_with_prefix("edges_").await.unwrap().is_empty());
}

#[tokio::test]
async fn in_memory_store_honours_contract() {
    let store = InMemoryKvStore::new();
    exercise_contract(&store).await;
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn file_store_honours_contract_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    {
        let store = FileKvStore::open(&path).unwrap();
        exercise_contract(&store).await;
    }

    let reopened = FileKvStore::open(&path).unwrap();
    assert!(reopened
        .get("r1.Application_resolved")
        .await
        .unwrap()
        .is_some());
    assert!(reopened.get("edges_r2.Application").await.unwrap().is_none());
}

#[tokio::test]
async fn undecodable_value_is_reported_with_key() {
    let store = InMemoryKvStore::new();
    store.set("broken", "{not json".into()).await.unwrap();
    let err = load_json::<serde_json::Value>(&store, "broken")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("broken"));
}

#[tokio::test]
async fn failed_file_write_leaves_memory_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("nested");
    let store = FileKvStore::open(nested.join("store.json")).unwrap();
    store.set("auth_b1", "token".into()).await.unwrap();

    // Replace the snapshot directory with a plain file so every persist fails.
    std::fs::remove_dir_all(&nested).unwrap();
    std::fs::write(&nested, "").unwrap();

    assert!(store.set("auth_b2", "other".into()).await.is_err());
    assert_eq!(store.get("auth_b2").await.unwrap(), None);

    assert!(store.set("auth_b1", "rotated".into()).await.is_err());
    assert_eq!(store.get("auth_b1").await.unwrap().as_deref(), Some("token"));

    assert!(store.remove("auth_b1").await.is_err());
    assert_eq!(store.get("auth_b1").await.unwrap().as_deref(), Some("token"));
}
