/// Integration tests for entity persistence
///
/// Tests the round trip between live entities and the SQLite store:
/// - full state survives save and load, including memory order and offsets
/// - missing and corrupt state recovery
/// - deletion removes run history
/// - export records load back into an equivalent entity
mod common;

use chrono::{Duration, Utc};
use common::{services_with, setup_db, sleep_for, think, ScriptedProvider};
use sdk::errors::EngineError;
use somnus_engine::db::EntityStore;
use somnus_engine::entity::{EntityOptions, EntityRecord};
use somnus_engine::llm::Completion;
use std::sync::Arc;

/// Storage keeps millisecond timestamps; compare at that precision
fn at_storage_precision(record: EntityRecord) -> EntityRecord {
    serde_json::from_value(serde_json::to_value(record).unwrap()).unwrap()
}

#[tokio::test]
async fn test_entity_survives_restart() {
    let (db, _temp_dir) = setup_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .push(think("one"))
        .push(sleep_for(90))
        .push(Completion::text("Planned the week."))
        .push(think("two"));
    let services = services_with(&provider);

    let mut entity = services
        .create(
            "ada",
            EntityOptions {
                max_messages: Some(4),
                adapters: Some(vec!["journal".to_string()]),
                password: Some("s3cret".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    entity.shift_time(15);
    entity.run().await.unwrap();
    entity.set_sleep_until(None);
    entity.run().await.unwrap();

    let store = db.entities();
    store.save(&entity.to_record()).await.unwrap();

    let loaded = services
        .load_existing(&store, "ada")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.to_record(), at_storage_precision(entity.to_record()));
    assert_eq!(loaded.max_messages(), 4);
    assert_eq!(loaded.adapters(), ["journal".to_string()]);
    assert_eq!(loaded.password(), Some("s3cret"));
    assert_eq!(loaded.time_offset(), 15);
    assert_eq!(loaded.stm().time_offset(), 15);
    assert_eq!(loaded.ltm().len(), 1);

    let seqs: Vec<u64> = loaded.stm().entries().iter().map(|e| e.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort();
    assert_eq!(seqs, sorted);
}

#[tokio::test]
async fn test_load_or_recover_missing_creates_fresh() {
    let (db, _temp_dir) = setup_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let store = db.entities();

    assert!(services.load_existing(&store, "ada").await.unwrap().is_none());

    let entity = services.load_or_recover(&store, "ada").await.unwrap();
    assert_eq!(entity.model(), "test-model");
    assert!(entity.stm().is_empty());
    assert_eq!(store.list_ids().await.unwrap(), vec!["ada".to_string()]);
}

#[tokio::test]
async fn test_load_or_recover_rejects_invalid_id() {
    let (db, _temp_dir) = setup_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);

    let err = services
        .load_or_recover(&db.entities(), "../etc")
        .await
        .unwrap_err();
    assert!(matches!(
        err.root_cause().downcast_ref::<EngineError>(),
        Some(EngineError::InvalidParameter { .. })
    ));
}

#[tokio::test]
async fn test_corrupt_state_is_replaced() {
    let (db, _temp_dir) = setup_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let store = db.entities();

    let mut entity = services.create("ada", EntityOptions::default()).unwrap();
    entity.set_sleep_until(Some(Utc::now() + Duration::days(1)));
    store.save(&entity.to_record()).await.unwrap();

    sqlx::query("UPDATE entities SET ltm = 'garbage' WHERE id = 'ada'")
        .execute(db.pool())
        .await
        .unwrap();

    let recovered = services.load_or_recover(&store, "ada").await.unwrap();
    assert!(recovered.ltm().is_empty());
    assert!(recovered.sleep_until().is_none());

    // The fresh state was written back
    let reloaded = store.load("ada").await.unwrap().unwrap();
    assert!(reloaded.sleep_until.is_none());
}

#[tokio::test]
async fn test_delete_removes_history() {
    let (db, _temp_dir) = setup_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    let services = services_with(&provider);
    let store = db.entities();

    let entity = services.create("ada", EntityOptions::default()).unwrap();
    store.save(&entity.to_record()).await.unwrap();
    db.runs().start_run("ada").await.unwrap();

    assert!(store.delete("ada").await.unwrap());
    assert!(store.load("ada").await.unwrap().is_none());
    assert!(db.runs().recent_runs("ada", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_export_record_imports_into_other_database() {
    let (source, _source_dir) = setup_db().await;
    let (target, _target_dir) = setup_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    provider.push(think("remember me"));
    let services = services_with(&provider);

    let mut entity = services
        .create(
            "ada",
            EntityOptions {
                max_messages: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    entity.run().await.unwrap();
    source.entities().save(&entity.to_record()).await.unwrap();

    let exported = serde_json::to_string_pretty(
        &source.entities().load("ada").await.unwrap().unwrap(),
    )
    .unwrap();
    let record: EntityRecord = serde_json::from_str(&exported).unwrap();
    let imported = services.restore(record);
    target.entities().save(&imported.to_record()).await.unwrap();

    let loaded = target.entities().load("ada").await.unwrap().unwrap();
    assert_eq!(loaded, at_storage_precision(entity.to_record()));
    assert_eq!(loaded.stm.len(), 3);
}
