//! Durable per-thread snapshot history: trait + in-memory backend.
//!
//! Checkpoints are an append-only log per thread with strictly increasing
//! sequence numbers; "current" is the highest sequence. Concurrent
//! operations against the *same* thread are serialized by a per-thread
//! lock; different threads never block each other.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use super::retention::{CheckpointMeta, RetentionPolicy};
use super::types::ThreadStatus;
use crate::state::VersionedState;
use crate::types::NodeKind;

/// One immutable snapshot of a thread.
///
/// Created at every engine step and never mutated afterwards; retention
/// cleanup is the only deletion path.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Store-assigned, strictly increasing per thread. Drafts carry 0.
    pub sequence: u64,
    pub state: VersionedState,
    /// Node the engine will run next when resuming from this snapshot.
    pub next_node: NodeKind,
    pub status: ThreadStatus,
    /// Engine step counter at save time.
    pub step: u64,
    pub created_at: DateTime<Utc>,
    /// Retention score consumed by `DropBelowImportance`.
    pub importance: f64,
    /// Owner recorded for `MaxThreadsPerOwner` grouping.
    pub owner: Option<String>,
    /// Provenance: thread id this snapshot was forked from, if any.
    pub forked_from: Option<String>,
}

impl Checkpoint {
    /// Build an unsaved draft; the store assigns the sequence on save.
    pub fn draft(
        thread_id: impl Into<String>,
        state: VersionedState,
        next_node: NodeKind,
        status: ThreadStatus,
        step: u64,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sequence: 0,
            state,
            next_node,
            status,
            step,
            created_at: Utc::now(),
            importance: 0.0,
            owner: None,
            forked_from: None,
        }
    }

    #[must_use]
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            thread_id: self.thread_id.clone(),
            sequence: self.sequence,
            created_at: self.created_at,
            importance: self.importance,
            owner: self.owner.clone(),
            status: self.status,
        }
    }
}

/// Errors surfaced by checkpoint stores.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("no checkpoints found for thread {thread_id}")]
    #[diagnostic(code(loomflow::checkpointer::not_found))]
    NotFound { thread_id: String },

    /// Unreadable or inconsistent snapshot found on resume. Surfaced
    /// rather than silently defaulting to a fresh thread.
    #[error("corrupt checkpoint for thread {thread_id}: {message}")]
    #[diagnostic(
        code(loomflow::checkpointer::corruption),
        help("Inspect the stored snapshot; delete or repair it before resuming.")
    )]
    Corruption { thread_id: String, message: String },

    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(loomflow::checkpointer::backend))]
    Backend { message: String },

    #[error("checkpointer error: {message}")]
    #[diagnostic(code(loomflow::checkpointer::other))]
    Other { message: String },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Pluggable checkpoint persistence.
///
/// Implementations must serialize concurrent calls against the same
/// thread id (two in-flight runs must not interleave writes) while
/// keeping distinct threads independent.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a draft; returns the assigned sequence number.
    async fn save(&self, checkpoint: Checkpoint) -> Result<u64>;

    /// Latest checkpoint of a thread, if any.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Full ordered history of a thread (ascending sequence).
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Copy the latest snapshot under a new thread id with fork
    /// provenance. Fails with `NotFound` when the source has no history.
    async fn fork(&self, thread_id: &str, new_thread_id: &str) -> Result<Checkpoint>;

    /// Delete one checkpoint.
    async fn delete(&self, thread_id: &str, sequence: u64) -> Result<()>;

    /// Apply a retention policy out-of-band; returns how many
    /// checkpoints were removed.
    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64>;

    /// Thread ids with at least one stored checkpoint.
    async fn known_threads(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct ThreadLog {
    checkpoints: Vec<Checkpoint>,
}

impl ThreadLog {
    fn next_sequence(&self) -> u64 {
        self.checkpoints.last().map(|c| c.sequence).unwrap_or(0) + 1
    }
}

/// Volatile checkpointer for tests and development.
///
/// The outer map is guarded by a short-lived `RwLock`; each thread's log
/// sits behind its own async mutex, giving the required per-thread
/// serialization without cross-thread blocking.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    threads: RwLock<FxHashMap<String, Arc<Mutex<ThreadLog>>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, thread_id: &str) -> Arc<Mutex<ThreadLog>> {
        if let Some(slot) = self
            .threads
            .read()
            .expect("threads lock poisoned")
            .get(thread_id)
        {
            return slot.clone();
        }
        let mut guard = self.threads.write().expect("threads lock poisoned");
        guard
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ThreadLog::default())))
            .clone()
    }

    fn existing_slot(&self, thread_id: &str) -> Option<Arc<Mutex<ThreadLog>>> {
        self.threads
            .read()
            .expect("threads lock poisoned")
            .get(thread_id)
            .cloned()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, mut checkpoint: Checkpoint) -> Result<u64> {
        let slot = self.slot(&checkpoint.thread_id);
        let mut log = slot.lock().await;
        let sequence = log.next_sequence();
        checkpoint.sequence = sequence;
        log.checkpoints.push(checkpoint);
        Ok(sequence)
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let Some(slot) = self.existing_slot(thread_id) else {
            return Ok(None);
        };
        let log = slot.lock().await;
        Ok(log.checkpoints.last().cloned())
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let Some(slot) = self.existing_slot(thread_id) else {
            return Ok(Vec::new());
        };
        let log = slot.lock().await;
        Ok(log.checkpoints.clone())
    }

    #[instrument(skip(self), err)]
    async fn fork(&self, thread_id: &str, new_thread_id: &str) -> Result<Checkpoint> {
        let source = self
            .load_latest(thread_id)
            .await?
            .ok_or_else(|| CheckpointerError::NotFound {
                thread_id: thread_id.to_string(),
            })?;

        let mut forked = source;
        forked.thread_id = new_thread_id.to_string();
        forked.forked_from = Some(thread_id.to_string());
        forked.created_at = Utc::now();
        forked.sequence = 0;

        let slot = self.slot(new_thread_id);
        let mut log = slot.lock().await;
        forked.sequence = log.next_sequence();
        log.checkpoints.push(forked.clone());
        Ok(forked)
    }

    async fn delete(&self, thread_id: &str, sequence: u64) -> Result<()> {
        let Some(slot) = self.existing_slot(thread_id) else {
            return Ok(());
        };
        let mut log = slot.lock().await;
        log.checkpoints.retain(|c| c.sequence != sequence);
        Ok(())
    }

    #[instrument(skip(self, policy), err)]
    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64> {
        let mut metas: Vec<CheckpointMeta> = Vec::new();
        for thread_id in self.known_threads().await? {
            for checkpoint in self.list(&thread_id).await? {
                metas.push(checkpoint.meta());
            }
        }
        let victims = policy.select_victims(&metas);
        let removed = victims.len() as u64;
        for (thread_id, sequence) in victims {
            self.delete(&thread_id, sequence).await?;
        }
        Ok(removed)
    }

    async fn known_threads(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .threads
            .read()
            .expect("threads lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
