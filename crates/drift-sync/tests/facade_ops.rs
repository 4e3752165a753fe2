//! Facade-level behavior: CRUD stamping, tombstone push, raw passthrough,
//! and builder validation.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{init_logging, todo_factory, MockAdapter, TodoItem};
use drift_core::{col, Row, Value};
use drift_db::{SqliteDriver, Statement};
use drift_sync::{OfflineSync, SyncError};

async fn harness(adapter: Arc<MockAdapter>) -> OfflineSync {
    init_logging();
    let sync = OfflineSync::builder()
        .driver(Arc::new(SqliteDriver::in_memory()))
        .adapter(adapter)
        .initialize()
        .await
        .unwrap();
    sync.register_entity("todos", "/todos", None, todo_factory())
        .await
        .unwrap();
    sync
}

fn status_of(row: &Row) -> &str {
    row.get(col::SYNC_STATUS).and_then(Value::as_str).unwrap()
}

#[tokio::test]
async fn builder_requires_a_driver_and_an_adapter() {
    let err = OfflineSync::builder()
        .base_url("https://api.example")
        .initialize()
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidConfig(_)));

    let err = OfflineSync::builder()
        .driver(Arc::new(SqliteDriver::in_memory()))
        .initialize()
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidConfig(_)));
}

#[tokio::test]
async fn save_then_update_keeps_row_pending_and_restamps() {
    let sync = harness(MockAdapter::new(false)).await;

    sync.save(&TodoItem::new("t1", "first", 1_000)).await.unwrap();
    let row = sync.store().find_by_id("todos", "t1").await.unwrap().unwrap();
    let first_updated = row.get(col::UPDATED_AT).unwrap().as_i64().unwrap();
    assert!(first_updated >= 1_000);

    let mut edited = TodoItem::new("t1", "edited", 1_000);
    edited.version = 2;
    sync.update(&edited).await.unwrap();

    let row = sync.store().find_by_id("todos", "t1").await.unwrap().unwrap();
    assert_eq!(status_of(&row), "pending");
    assert!(row.get(col::SYNCED_AT).unwrap().is_null());
    assert_eq!(row.get(col::VERSION).unwrap().as_i64(), Some(2));
    assert!(row.get(col::UPDATED_AT).unwrap().as_i64().unwrap() >= first_updated);

    let entity = sync.find_by_id("todos", "t1").await.unwrap().unwrap();
    assert_eq!(entity.to_json().get("title"), Some(&json!("edited")));
}

#[tokio::test]
async fn update_of_missing_entity_fails() {
    let sync = harness(MockAdapter::new(false)).await;
    let err = sync
        .update(&TodoItem::new("ghost", "nope", 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::EntityNotFound { .. }));
}

#[tokio::test]
async fn soft_deleted_tombstone_is_pushed() {
    let adapter = MockAdapter::new(true);
    let sync = harness(adapter.clone()).await;

    sync.save(&TodoItem::new("t1", "to be removed", 1_000))
        .await
        .unwrap();
    sync.sync().await.unwrap();
    assert_eq!(adapter.posts_to("/todos").len(), 1);

    sync.soft_delete("todos", "t1").await.unwrap();
    let row = sync.store().find_by_id("todos", "t1").await.unwrap().unwrap();
    assert_eq!(status_of(&row), "pending");
    assert_eq!(row.get(col::IS_DELETED).unwrap().as_i64(), Some(1));

    sync.sync().await.unwrap();
    let posts = adapter.posts_to("/todos");
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1]["is_deleted"], json!(true));

    // tombstone stays queryable until hard delete
    assert_eq!(sync.count("todos").await.unwrap(), 1);
    sync.delete("todos", "t1").await.unwrap();
    assert_eq!(sync.count("todos").await.unwrap(), 0);
}

#[tokio::test]
async fn delete_of_missing_row_fails() {
    let sync = harness(MockAdapter::new(false)).await;
    assert!(matches!(
        sync.delete("todos", "ghost").await.unwrap_err(),
        SyncError::EntityNotFound { .. }
    ));
    assert!(matches!(
        sync.soft_delete("todos", "ghost").await.unwrap_err(),
        SyncError::EntityNotFound { .. }
    ));
}

#[tokio::test]
async fn find_all_materializes_every_row() {
    let sync = harness(MockAdapter::new(false)).await;
    for (id, title) in [("a", "one"), ("b", "two"), ("c", "three")] {
        sync.save(&TodoItem::new(id, title, 1_000)).await.unwrap();
    }

    let all = sync.find_all("todos").await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(sync.count("todos").await.unwrap(), 3);
}

#[tokio::test]
async fn raw_passthrough_and_transaction() {
    let sync = harness(MockAdapter::new(false)).await;
    sync.save(&TodoItem::new("t1", "raw", 1_000)).await.unwrap();

    let rows = sync
        .raw_query(
            "SELECT id FROM todos WHERE sync_status = ?",
            &[Value::from("pending")],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id").unwrap().as_str(), Some("t1"));

    let affected = sync
        .raw_execute(
            "UPDATE todos SET version = version + 1 WHERE id = ?",
            &[Value::from("t1")],
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    // a failing batch applies nothing
    let result = sync
        .transaction(&[
            Statement::new(
                "UPDATE todos SET version = 99 WHERE id = 't1'".to_string(),
                vec![],
            ),
            Statement::new("INSERT INTO todos (id) VALUES ('t1')".to_string(), vec![]),
        ])
        .await;
    assert!(result.is_err());

    let row = sync.store().find_by_id("todos", "t1").await.unwrap().unwrap();
    assert_eq!(row.get(col::VERSION).unwrap().as_i64(), Some(2));
}

#[tokio::test]
async fn late_entity_registration_creates_table() {
    let sync = harness(MockAdapter::new(false)).await;
    sync.register_entity("notes", "/notes", None, todo_factory())
        .await
        .unwrap();
    assert_eq!(sync.count("notes").await.unwrap(), 0);
}
