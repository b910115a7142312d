//! Out-of-band checkpoint retention policies.
//!
//! Policies are evaluated against lightweight metadata so every backend
//! shares one victim-selection routine. None of them ever selects the
//! newest checkpoint of a thread whose latest status is `Running` (or a
//! suspension state of a running thread).

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use super::types::ThreadStatus;

/// Cleanup policy applied by [`Checkpointer::prune`](super::Checkpointer::prune).
#[derive(Clone, Debug, PartialEq)]
pub enum RetentionPolicy {
    /// Keep only the N most recent checkpoints of each thread.
    KeepLastN { per_thread: usize },
    /// Drop checkpoints whose importance score is below the floor.
    DropBelowImportance { min_importance: f64 },
    /// Keep at most N threads per owner, evicting the threads with the
    /// oldest latest-checkpoint first. Ownerless threads group together.
    MaxThreadsPerOwner { max_threads: usize },
}

/// Metadata the selection routine needs about one stored checkpoint.
#[derive(Clone, Debug)]
pub struct CheckpointMeta {
    pub thread_id: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub importance: f64,
    pub owner: Option<String>,
    pub status: ThreadStatus,
}

fn is_active(status: ThreadStatus) -> bool {
    !status.is_terminal()
}

impl RetentionPolicy {
    /// Select `(thread_id, sequence)` pairs to delete.
    ///
    /// The invariant holds for every policy: the highest-sequence
    /// checkpoint of a thread that is still active survives.
    pub fn select_victims(&self, metas: &[CheckpointMeta]) -> Vec<(String, u64)> {
        // Group by thread, newest first.
        let mut by_thread: FxHashMap<&str, Vec<&CheckpointMeta>> = FxHashMap::default();
        for meta in metas {
            by_thread.entry(&meta.thread_id).or_default().push(meta);
        }
        for entries in by_thread.values_mut() {
            entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        }

        let mut victims: Vec<(String, u64)> = Vec::new();
        match self {
            RetentionPolicy::KeepLastN { per_thread } => {
                for entries in by_thread.values() {
                    let latest_active = entries.first().is_some_and(|m| is_active(m.status));
                    let keep = if latest_active {
                        (*per_thread).max(1)
                    } else {
                        *per_thread
                    };
                    for meta in entries.iter().skip(keep) {
                        victims.push((meta.thread_id.clone(), meta.sequence));
                    }
                }
            }
            RetentionPolicy::DropBelowImportance { min_importance } => {
                for entries in by_thread.values() {
                    let latest_active = entries.first().is_some_and(|m| is_active(m.status));
                    for (idx, meta) in entries.iter().enumerate() {
                        if meta.importance < *min_importance {
                            if idx == 0 && latest_active {
                                continue; // newest checkpoint of a live thread
                            }
                            victims.push((meta.thread_id.clone(), meta.sequence));
                        }
                    }
                }
            }
            RetentionPolicy::MaxThreadsPerOwner { max_threads } => {
                // Group threads by owner of their newest checkpoint.
                let mut by_owner: FxHashMap<Option<&str>, Vec<&Vec<&CheckpointMeta>>> =
                    FxHashMap::default();
                for entries in by_thread.values() {
                    let Some(latest) = entries.first() else {
                        continue;
                    };
                    by_owner
                        .entry(latest.owner.as_deref())
                        .or_default()
                        .push(entries);
                }
                for threads in by_owner.values_mut() {
                    // Newest thread first (by latest checkpoint time).
                    threads.sort_by(|a, b| {
                        let a_latest = a.first().map(|m| m.created_at);
                        let b_latest = b.first().map(|m| m.created_at);
                        b_latest.cmp(&a_latest)
                    });
                    for entries in threads.iter().skip(*max_threads) {
                        // Active threads are never evicted wholesale.
                        if entries.first().is_some_and(|m| is_active(m.status)) {
                            continue;
                        }
                        for meta in entries.iter() {
                            victims.push((meta.thread_id.clone(), meta.sequence));
                        }
                    }
                }
            }
        }

        victims.sort();
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(
        thread: &str,
        sequence: u64,
        minute: u32,
        importance: f64,
        owner: Option<&str>,
        status: ThreadStatus,
    ) -> CheckpointMeta {
        CheckpointMeta {
            thread_id: thread.to_string(),
            sequence,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, minute, 0).unwrap(),
            importance,
            owner: owner.map(|s| s.to_string()),
            status,
        }
    }

    #[test]
    fn keep_last_n_drops_old_sequences() {
        let metas = vec![
            meta("t1", 1, 0, 0.0, None, ThreadStatus::Completed),
            meta("t1", 2, 1, 0.0, None, ThreadStatus::Completed),
            meta("t1", 3, 2, 0.0, None, ThreadStatus::Completed),
        ];
        let victims = RetentionPolicy::KeepLastN { per_thread: 2 }.select_victims(&metas);
        assert_eq!(victims, vec![("t1".to_string(), 1)]);
    }

    #[test]
    fn keep_last_n_never_drops_newest_of_running_thread() {
        let metas = vec![
            meta("t1", 1, 0, 0.0, None, ThreadStatus::Running),
            meta("t1", 2, 1, 0.0, None, ThreadStatus::Running),
        ];
        let victims = RetentionPolicy::KeepLastN { per_thread: 0 }.select_victims(&metas);
        assert!(!victims.contains(&("t1".to_string(), 2)));
        assert!(victims.contains(&("t1".to_string(), 1)));
    }

    #[test]
    fn importance_floor_spares_newest_of_running_thread() {
        let metas = vec![
            meta("t1", 1, 0, 0.1, None, ThreadStatus::Running),
            meta("t1", 2, 1, 0.1, None, ThreadStatus::Running),
        ];
        let victims =
            RetentionPolicy::DropBelowImportance { min_importance: 0.5 }.select_victims(&metas);
        assert_eq!(victims, vec![("t1".to_string(), 1)]);
    }

    #[test]
    fn max_threads_per_owner_evicts_oldest_completed() {
        let metas = vec![
            meta("t1", 1, 0, 0.0, Some("alice"), ThreadStatus::Completed),
            meta("t2", 1, 5, 0.0, Some("alice"), ThreadStatus::Completed),
            meta("t3", 1, 9, 0.0, Some("alice"), ThreadStatus::Completed),
        ];
        let victims =
            RetentionPolicy::MaxThreadsPerOwner { max_threads: 2 }.select_victims(&metas);
        assert_eq!(victims, vec![("t1".to_string(), 1)]);
    }

    #[test]
    fn max_threads_per_owner_skips_running_threads() {
        let metas = vec![
            meta("t1", 1, 0, 0.0, Some("alice"), ThreadStatus::Running),
            meta("t2", 1, 5, 0.0, Some("alice"), ThreadStatus::Completed),
            meta("t3", 1, 9, 0.0, Some("alice"), ThreadStatus::Completed),
        ];
        let victims =
            RetentionPolicy::MaxThreadsPerOwner { max_threads: 2 }.select_victims(&metas);
        assert!(victims.is_empty());
    }
}
