#![cfg(feature = "sqlite")]

use std::sync::Arc;

use serde_json::json;

use loomflow::runtimes::{
    Checkpoint, Checkpointer, RetentionPolicy, SqliteCheckpointer, ThreadStatus,
};
use loomflow::state::VersionedState;
use loomflow::types::NodeKind;

mod common;
use common::*;

async fn temp_store() -> (SqliteCheckpointer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("checkpoints.db");
    let url = format!("sqlite://{}", db_path.display());
    let store = SqliteCheckpointer::connect(&url, Arc::new(research_schema()))
        .await
        .unwrap();
    (store, dir)
}

fn sample_state(topic: &str) -> VersionedState {
    VersionedState::builder(research_schema())
        .with_value("topic", json!(topic))
        .with_value("results", json!(["r1", "r2"]))
        .build()
}

#[tokio::test]
async fn save_load_round_trips_through_sqlite() {
    let (store, _dir) = temp_store().await;
    let state = sample_state("durable");
    store
        .save(Checkpoint::draft(
            "t1",
            state.clone(),
            NodeKind::Custom("summarize".into()),
            ThreadStatus::Running,
            2,
        ))
        .await
        .unwrap();

    let loaded = store.load_latest("t1").await.unwrap().unwrap();
    assert_eq!(loaded.state, state);
    assert_eq!(loaded.next_node, NodeKind::Custom("summarize".into()));
    assert_eq!(loaded.status, ThreadStatus::Running);
    assert_eq!(loaded.sequence, 1);
}

#[tokio::test]
async fn sequences_and_history_are_ordered() {
    let (store, _dir) = temp_store().await;
    for step in 1..=3u64 {
        let sequence = store
            .save(Checkpoint::draft(
                "t1",
                sample_state("x"),
                NodeKind::End,
                ThreadStatus::Running,
                step,
            ))
            .await
            .unwrap();
        assert_eq!(sequence, step);
    }

    let history = store.list("t1").await.unwrap();
    let sequences: Vec<u64> = history.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(store.known_threads().await.unwrap(), vec!["t1".to_string()]);
}

#[tokio::test]
async fn unreadable_snapshot_surfaces_as_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("checkpoints.db");
    let url = format!("sqlite://{}", db_path.display());
    let store = SqliteCheckpointer::connect(&url, Arc::new(research_schema()))
        .await
        .unwrap();

    store
        .save(Checkpoint::draft(
            "t1",
            sample_state("x"),
            NodeKind::End,
            ThreadStatus::Running,
            1,
        ))
        .await
        .unwrap();

    // Mangle the stored payload behind the store's back.
    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query("UPDATE checkpoints SET payload_json = 'not json' WHERE thread_id = 't1'")
        .execute(&pool)
        .await
        .unwrap();

    let err = store.load_latest("t1").await.unwrap_err();
    assert!(
        matches!(
            err,
            loomflow::runtimes::CheckpointerError::Corruption { .. }
        ),
        "got: {err}"
    );
}

#[tokio::test]
async fn fork_and_prune_work_against_sqlite() {
    let (store, _dir) = temp_store().await;
    for step in 1..=4u64 {
        store
            .save(Checkpoint::draft(
                "t1",
                sample_state("x"),
                NodeKind::End,
                ThreadStatus::Completed,
                step,
            ))
            .await
            .unwrap();
    }

    let forked = store.fork("t1", "t2").await.unwrap();
    assert_eq!(forked.forked_from.as_deref(), Some("t1"));
    assert_eq!(forked.sequence, 1);

    let removed = store
        .prune(&RetentionPolicy::KeepLastN { per_thread: 1 })
        .await
        .unwrap();
    assert_eq!(removed, 3);
    assert_eq!(store.list("t1").await.unwrap().len(), 1);
    assert_eq!(store.list("t2").await.unwrap().len(), 1);
}
