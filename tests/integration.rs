//! Integration tests for saas-datastore
//!
//! Each test opens its own store, either in a temporary directory or in memory.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use saas_datastore::{
    Datastore, DatastoreError, Entity, EntityDefinition, FieldDefinition, Record, StoreConfig,
    Value, ValueType,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

fn widget() -> EntityDefinition {
    EntityDefinition::new(
        "widget",
        vec![
            FieldDefinition::new("name", ValueType::Text).not_null(),
            FieldDefinition::new("count", ValueType::Integer).default(0),
        ],
    )
}

/// Open a file-backed store in a fresh temporary directory
async fn create_test_store() -> (Datastore, TempDir) {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let store = open_in(&dir).await;
    (store, dir)
}

async fn open_in(dir: &TempDir) -> Datastore {
    let config = StoreConfig::builder(dir.path()).file_name("test.db").build();
    Datastore::open(config).await.expect("Should open store")
}

async fn memory_store() -> Datastore {
    Datastore::open(StoreConfig::in_memory())
        .await
        .expect("Should open in-memory store")
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

// ==================== Registration Tests ====================

#[tokio::test]
async fn test_register_then_read_all_is_empty() {
    let (store, _dir) = create_test_store().await;
    store.register(widget()).await.expect("Should register");

    let dao = store.dao("widget").expect("Should get dao");
    assert!(dao.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reregister_identical_is_noop() {
    let (store, _dir) = create_test_store().await;
    store.register(widget()).await.expect("Should register");

    let dao = store.dao("widget").unwrap();
    dao.create(&Record::new().with("name", "a")).await.unwrap();

    store
        .register(widget())
        .await
        .expect("Identical re-registration should succeed");

    assert_eq!(store.entities().len(), 1);
    assert_eq!(dao.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reregister_conflicting_leaves_data_intact() {
    let (store, _dir) = create_test_store().await;
    store.register(widget()).await.unwrap();

    let dao = store.dao("widget").unwrap();
    let created = dao.create(&Record::new().with("name", "a")).await.unwrap();

    let changed = EntityDefinition::new(
        "Widget",
        vec![FieldDefinition::new("name", ValueType::Integer)],
    );
    let result = store.register(changed).await;
    assert!(matches!(result, Err(DatastoreError::DuplicateEntity(_))));

    assert_eq!(dao.read_all().await.unwrap(), vec![created]);
}

#[tokio::test]
async fn test_reregister_with_widened_default_is_noop() {
    let store = memory_store().await;
    let meter = |default: Value| {
        EntityDefinition::new(
            "meter",
            vec![FieldDefinition::new("r", ValueType::Real).default(default)],
        )
    };

    store.register(meter(Value::Integer(0))).await.unwrap();
    store
        .register(meter(Value::Real(0.0)))
        .await
        .expect("Equivalent default should re-register");

    assert_eq!(store.entities().len(), 1);
    store
        .dao_for(&meter(Value::Real(0.0)))
        .expect("Equivalent definition should resolve");
    assert!(matches!(
        store.dao_for(&meter(Value::Real(1.5))),
        Err(DatastoreError::DuplicateEntity(_))
    ));
}

#[tokio::test]
async fn test_reopen_with_same_definition_keeps_data() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = open_in(&dir).await;
        store.register(widget()).await.unwrap();
        let dao = store.dao("widget").unwrap();
        dao.create(&Record::new().with("name", "a")).await.unwrap();
        dao.create(&Record::new().with("name", "b")).await.unwrap();
        store.close().await;
    }

    let store = open_in(&dir).await;
    store
        .register(widget())
        .await
        .expect("Matching table should be accepted");
    let dao = store.dao("widget").unwrap();

    let all = dao.read_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].get("name"), Some(&text("b")));

    let next = dao.create(&Record::new().with("name", "c")).await.unwrap();
    assert_eq!(next.id, Some(3));
}

#[tokio::test]
async fn test_reopen_with_changed_definition_is_schema_conflict() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = open_in(&dir).await;
        store.register(widget()).await.unwrap();
        store
            .dao("widget")
            .unwrap()
            .create(&Record::new().with("name", "a"))
            .await
            .unwrap();
        store.close().await;
    }

    let store = open_in(&dir).await;
    let changed = widget().field(FieldDefinition::new("color", ValueType::Text));
    let result = store.register(changed).await;

    assert!(matches!(result, Err(DatastoreError::SchemaConflict(_))));
    assert!(store.entities().is_empty());

    // The table was neither altered nor dropped
    store.register(widget()).await.unwrap();
    assert_eq!(store.dao("widget").unwrap().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_existing_foreign_table_is_schema_conflict() {
    let store = memory_store().await;

    {
        let mut conn = store.connections().write().await.unwrap();
        sqlx::query("CREATE TABLE \"widget\" (\"id\" INTEGER PRIMARY KEY, \"label\" TEXT)")
            .execute(&mut *conn)
            .await
            .unwrap();
    }

    let result = store.register(widget()).await;
    assert!(matches!(result, Err(DatastoreError::SchemaConflict(_))));
}

#[tokio::test]
async fn test_entity_names_are_normalized() {
    let store = memory_store().await;
    let schema = store
        .register(EntityDefinition::new(
            "Billing Plan",
            vec![FieldDefinition::new("label", ValueType::Text)],
        ))
        .await
        .unwrap();

    assert_eq!(schema.table_name, "billing_plan");
    assert!(store.dao("billing plan").is_ok());
    assert!(store.dao("BILLING-PLAN").is_ok());
}

#[tokio::test]
async fn test_registration_has_no_ordering_dependency() {
    let store = memory_store().await;
    let order = EntityDefinition::new(
        "purchase",
        vec![FieldDefinition::new("customer_id", ValueType::Integer).not_null()],
    );
    let customer = EntityDefinition::new(
        "customer",
        vec![FieldDefinition::new("email", ValueType::Text).not_null()],
    );

    store.register(order).await.unwrap();
    store.register(customer).await.unwrap();

    let names: Vec<_> = store
        .entities()
        .iter()
        .map(|s| s.table_name.clone())
        .collect();
    assert_eq!(names, vec!["customer", "purchase"]);
}

#[tokio::test]
async fn test_register_from_json_descriptor() {
    let store = memory_store().await;
    let definition = EntityDefinition::from_json(serde_json::json!({
        "name": "audit_entry",
        "fields": [
            {"name": "verb", "type": "string", "nullable": false},
            {"name": "success", "type": "bool", "default": true},
            {"name": "at", "type": "datetime"}
        ]
    }))
    .expect("Should parse descriptor");
    store.register(definition).await.unwrap();

    let dao = store.dao("audit_entry").unwrap();
    let record = Record::from_json(
        dao.schema(),
        &serde_json::json!({"verb": "login", "at": "2024-05-01T12:00:00+02:00"}),
    )
    .unwrap();
    let created = dao.create(&record).await.unwrap();

    assert_eq!(
        created.to_json(),
        serde_json::json!({
            "id": 1,
            "verb": "login",
            "success": true,
            "at": "2024-05-01T10:00:00Z"
        })
    );
}

#[tokio::test]
async fn test_unsupported_type_in_descriptor() {
    let result = EntityDefinition::from_json(serde_json::json!({
        "name": "invoice",
        "fields": [{"name": "total", "type": "decimal"}]
    }));
    assert!(matches!(result, Err(DatastoreError::UnsupportedType(_))));
}

// ==================== DAO Tests ====================

#[tokio::test]
async fn test_widget_lifecycle() {
    let (store, _dir) = create_test_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao_for(&widget()).expect("Should get dao");

    let a = dao.create(&Record::new().with("name", "a")).await.unwrap();
    let b = dao
        .create(&Record::new().with("name", "b").with("count", 5))
        .await
        .unwrap();

    assert_eq!(a.id, Some(1));
    assert_eq!(b.id, Some(2));

    let all = dao.read_all().await.unwrap();
    assert_eq!(
        all,
        vec![
            Record::new().with_id(1).with("name", "a").with("count", 0),
            Record::new().with_id(2).with("name", "b").with("count", 5),
        ]
    );

    dao.delete(1).await.unwrap();

    let remaining = dao.read_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, Some(2));
}

#[tokio::test]
async fn test_round_trip_all_types() {
    let store = memory_store().await;
    store
        .register(EntityDefinition::new(
            "sample",
            vec![
                FieldDefinition::new("i", ValueType::Integer),
                FieldDefinition::new("r", ValueType::Real),
                FieldDefinition::new("t", ValueType::Text),
                FieldDefinition::new("b", ValueType::Boolean),
                FieldDefinition::new("ts", ValueType::Timestamp),
            ],
        ))
        .await
        .unwrap();
    let dao = store.dao("sample").unwrap();

    let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let full = Record::new()
        .with("i", i64::MIN)
        .with("r", 0.1 + 0.2)
        .with("t", "quote ' and \"double\" and ünïcode")
        .with("b", false)
        .with("ts", ts);
    let empty = Record::new();

    for record in [full, empty] {
        let created = dao.create(&record).await.unwrap();
        let id = created.id.expect("Should have id");
        let read = dao.read_by_id(id).await.unwrap().expect("Should exist");

        assert_eq!(read, created);
        for (name, value) in &record.fields {
            assert_eq!(read.get(name), Some(value), "field {}", name);
        }
    }

    let nulls = dao.read_by_id(2).await.unwrap().unwrap();
    assert!(nulls.fields.values().all(Value::is_null));
}

#[tokio::test]
async fn test_create_rejects_missing_required_field() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let result = dao.create(&Record::new().with("count", 3)).await;
    assert!(matches!(result, Err(DatastoreError::Validation(_))));

    let result = dao
        .create(&Record::new().with("name", Value::Null))
        .await;
    assert!(matches!(result, Err(DatastoreError::Validation(_))));

    assert_eq!(dao.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_read_by_id_missing() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    assert!(dao.read_by_id(1).await.unwrap().is_none());
    assert!(dao.read_by_id(-5).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_replaces_fields() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let created = dao
        .create(&Record::new().with("name", "a").with("count", 9))
        .await
        .unwrap();
    let id = created.id.unwrap();

    let updated = dao
        .update(&Record::new().with_id(id).with("name", "renamed"))
        .await
        .expect("Should update");

    assert_eq!(updated.id, Some(id));
    assert_eq!(updated.get("name"), Some(&text("renamed")));
    // Omitted fields fall back to their default
    assert_eq!(updated.get("count"), Some(&Value::Integer(0)));
    assert_eq!(dao.read_by_id(id).await.unwrap().unwrap(), updated);
}

#[tokio::test]
async fn test_update_missing_id_is_not_found() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let result = dao
        .update(&Record::new().with_id(99).with("name", "ghost"))
        .await;

    let err = result.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(dao.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_update_without_id_is_rejected() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let result = dao.update(&Record::new().with("name", "x")).await;
    assert!(matches!(result, Err(DatastoreError::Validation(_))));
}

#[tokio::test]
async fn test_patch_updates_subset() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let created = dao
        .create(&Record::new().with("name", "a").with("count", 2))
        .await
        .unwrap();
    let id = created.id.unwrap();

    let mut changes = BTreeMap::new();
    changes.insert("count".to_string(), Value::Integer(3));
    let patched = dao.patch(id, &changes).await.unwrap();

    assert_eq!(patched, Record::new().with_id(id).with("name", "a").with("count", 3));

    changes.insert("unknown".to_string(), Value::Integer(1));
    assert!(matches!(
        dao.patch(id, &changes).await,
        Err(DatastoreError::Validation(_))
    ));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let created = dao.create(&Record::new().with("name", "a")).await.unwrap();
    let id = created.id.unwrap();

    assert!(dao.delete(id).await.unwrap());
    assert!(!dao.delete(id).await.expect("Second delete should succeed"));
    assert!(!dao.delete(12345).await.unwrap());
    assert!(dao.read_by_id(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ids_are_never_reused() {
    let (store, _dir) = create_test_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    dao.create(&Record::new().with("name", "a")).await.unwrap();
    let b = dao.create(&Record::new().with("name", "b")).await.unwrap();
    dao.delete(b.id.unwrap()).await.unwrap();

    let c = dao.create(&Record::new().with("name", "c")).await.unwrap();
    assert_eq!(c.id, Some(3));
}

#[tokio::test]
async fn test_find_by_field() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    for (name, count) in [("a", 1), ("b", 2), ("c", 1)] {
        dao.create(&Record::new().with("name", name).with("count", count))
            .await
            .unwrap();
    }

    let ones = dao.find_by_field("count", 1).await.unwrap();
    let names: Vec<_> = ones.iter().map(|r| r.get("name").cloned()).collect();
    assert_eq!(names, vec![Some(text("a")), Some(text("c"))]);

    let first = dao.find_one_by_field("count", 1).await.unwrap().unwrap();
    assert_eq!(first.id, Some(1));

    assert!(dao.find_one_by_field("name", "zzz").await.unwrap().is_none());
    assert!(matches!(
        dao.find_by_field("nope", 1).await,
        Err(DatastoreError::Validation(_))
    ));
}

#[tokio::test]
async fn test_read_all_reflects_other_writers() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let reader = store.dao("widget").unwrap();
    let writer = store.clone().dao("widget").unwrap();

    assert!(reader.read_all().await.unwrap().is_empty());
    writer
        .create(&Record::new().with("name", "late"))
        .await
        .unwrap();
    assert_eq!(reader.read_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dao_for_unregistered_entity() {
    let store = memory_store().await;
    assert!(matches!(
        store.dao_for(&widget()),
        Err(DatastoreError::EntityNotFound(_))
    ));
}

#[tokio::test]
async fn test_out_of_range_timestamp_is_rejected() {
    let store = memory_store().await;
    store
        .register(EntityDefinition::new(
            "event",
            vec![FieldDefinition::new("at", ValueType::Timestamp)],
        ))
        .await
        .unwrap();
    let dao = store.dao("event").unwrap();

    let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
    let result = dao.create(&Record::new().with("at", far)).await;
    assert!(matches!(result, Err(DatastoreError::Validation(_))));
    assert!(dao.read_all().await.expect("Table stays readable").is_empty());

    let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
    let created = dao.create(&Record::new().with("at", last)).await.unwrap();
    assert_eq!(
        dao.read_by_id(created.id.unwrap()).await.unwrap(),
        Some(created)
    );
}

// ==================== Typed Entity Tests ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Subscription {
    #[serde(default)]
    id: Option<i64>,
    tier: String,
    seats: i64,
    active: bool,
    renews_at: Option<DateTime<Utc>>,
}

impl Entity for Subscription {
    fn definition() -> EntityDefinition {
        EntityDefinition::new(
            "subscription",
            vec![
                FieldDefinition::new("tier", ValueType::Text).not_null(),
                FieldDefinition::new("seats", ValueType::Integer).default(1),
                FieldDefinition::new("active", ValueType::Boolean)
                    .not_null()
                    .default(true),
                FieldDefinition::new("renews_at", ValueType::Timestamp),
            ],
        )
    }
}

#[tokio::test]
async fn test_typed_dao_round_trip() {
    let (store, _dir) = create_test_store().await;
    store
        .register_entity::<Subscription>()
        .await
        .expect("Should register typed entity");
    let dao = store.typed_dao::<Subscription>().unwrap();

    let sub = Subscription {
        id: None,
        tier: "team".to_string(),
        seats: 10,
        active: true,
        renews_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
    };

    let created = dao.create(&sub).await.unwrap();
    assert_eq!(created.id, Some(1));
    assert_eq!(created.tier, "team");

    let mut changed = created.clone();
    changed.active = false;
    changed.renews_at = None;
    let updated = dao.update(&changed).await.unwrap();
    assert_eq!(updated, changed);

    let found = dao.find_one_by_field("tier", "team").await.unwrap();
    assert_eq!(found, Some(changed));
    assert_eq!(dao.read_all().await.unwrap().len(), 1);
    assert_eq!(dao.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_typed_dao_requires_registration() {
    let store = memory_store().await;
    assert!(matches!(
        store.typed_dao::<Subscription>(),
        Err(DatastoreError::EntityNotFound(_))
    ));
}

// ==================== Concurrency Tests ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_ids() {
    let (store, _dir) = create_test_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let dao = dao.clone();
        handles.push(tokio::spawn(async move {
            dao.create(&Record::new().with("name", format!("w{}", i)))
                .await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let record = handle.await.unwrap().expect("Create should succeed");
        let id = record.id.unwrap();
        assert!(id > 0);
        assert!(ids.insert(id), "id {} handed out twice", id);
    }

    assert_eq!(dao.count().await.unwrap(), 40);
    assert_eq!(dao.read_all().await.unwrap().len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_registration() {
    let (store, _dir) = create_test_store().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.register(widget()).await }));
    }
    for handle in handles {
        handle.await.unwrap().expect("Registration should succeed");
    }

    assert_eq!(store.entities().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_registration() {
    let (store, _dir) = create_test_store().await;
    let names: Vec<String> = (0..8).map(|i| format!("entity_{}", i)).collect();

    let mut handles = Vec::new();
    for name in &names {
        let store = store.clone();
        let definition = EntityDefinition::new(
            name.clone(),
            vec![FieldDefinition::new("label", ValueType::Text)],
        );
        handles.push(tokio::spawn(async move { store.register(definition).await }));
    }
    for handle in handles {
        handle.await.unwrap().expect("Registration should succeed");
    }

    assert_eq!(store.entities().len(), names.len());
    for name in &names {
        store.lookup(name).expect("Should be registered");
        let dao = store.dao(name).unwrap();
        let created = dao
            .create(&Record::new().with("label", name.as_str()))
            .await
            .expect("Table should accept rows");
        assert_eq!(created.id, Some(1));
    }
}

// ==================== Storage Tests ====================

#[tokio::test]
async fn test_unusable_storage_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("occupied");
    std::fs::write(&file, b"x").unwrap();

    let config = StoreConfig::builder(file.join("nested")).build();
    let result = Datastore::open(config).await;

    assert!(matches!(result, Err(DatastoreError::StorageUnavailable(_))));
}

#[tokio::test]
async fn test_closed_store_rejects_access() {
    let store = memory_store().await;
    store.register(widget()).await.unwrap();
    let dao = store.dao("widget").unwrap();

    store.close().await;

    assert!(matches!(
        dao.read_all().await,
        Err(DatastoreError::StorageUnavailable(_))
    ));
}
