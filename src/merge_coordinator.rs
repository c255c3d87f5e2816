//! MergeCoordinator: the single linearization point for committing
//! worker-produced diffs back to the live document.
//!
//! The gate is a single `tokio::sync::Mutex`, so "one caller at a time"
//! becomes "one task inside the gate at a time" regardless of how many
//! worker threads the runtime schedules on.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::model::{
    Conflict, MergeRef, MergeStatus, PendingMerge, Severity, Thread, ThreadId, WorkspaceDiff,
};
use crate::version_store::VersionStore;

/// Narrow interface `MergeCoordinator` needs from `ThreadManager`, kept as a
/// trait (rather than a direct dependency) so the two components' mutual
/// reference can be broken with a [`Weak`] pointer — `ThreadManager` owns
/// its `MergeCoordinator` by `Arc`, and hands the coordinator a `Weak`
/// back-reference to itself after construction.
#[async_trait]
pub trait ThreadSink: Send + Sync {
    /// Append a system-role status message to `thread_id`'s transcript and
    /// fire the update callback. `is_error` selects the `⚠️` prefix.
    async fn post_status(&self, thread_id: ThreadId, text: &str, is_error: bool);

    /// Create a system-owned resolution thread with `initial_request` as its
    /// narrated conflict summary, tagged with `peers` as the conflicting
    /// thread ids, and register it so the UI surfaces it. Returns the new
    /// thread's id.
    async fn spawn_resolution_thread(&self, initial_request: String, peers: Vec<ThreadId>) -> ThreadId;
}

/// Result of [`MergeCoordinator::queue_merge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Applied and committed cleanly (possibly as a no-op if every changed
    /// file patched to a byte-identical result).
    Merged {
        /// The commit hash, or `None` if every file was a no-op.
        hash: Option<String>,
    },
    /// Conflicted with one or more pending merges; a resolution thread was
    /// spawned.
    Conflicted(Vec<Conflict>),
    /// Applying the diff failed (parse error, patch drift, or commit
    /// failure); the merge is retained as `Failed`.
    Failed {
        /// Human-readable reason, already posted as a status message.
        reason: String,
    },
    /// The diff carried no changes; nothing was queued.
    Empty,
}

struct GateState {
    pending: Vec<PendingMerge>,
}

/// The single serializing gate for writes to the live document and commits
/// to the version store.
pub struct MergeCoordinator {
    gate: Mutex<GateState>,
    version_store: Arc<VersionStore>,
    document_path: PathBuf,
    sink: Mutex<Option<Weak<dyn ThreadSink>>>,
}

impl MergeCoordinator {
    /// Construct a coordinator over `document_path`, serializing through
    /// `version_store`. The `ThreadSink` back-reference is attached
    /// afterward via [`Self::attach_sink`], once the owning `ThreadManager`
    /// exists.
    #[must_use]
    pub fn new(version_store: Arc<VersionStore>, document_path: PathBuf) -> Self {
        Self {
            gate: Mutex::new(GateState { pending: Vec::new() }),
            version_store,
            document_path,
            sink: Mutex::new(None),
        }
    }

    /// Attach (or replace) the `ThreadManager` back-reference used to post
    /// status messages and spawn resolution threads.
    pub async fn attach_sink(&self, sink: Weak<dyn ThreadSink>) {
        *self.sink.lock().await = Some(sink);
    }

    async fn sink(&self) -> Option<Arc<dyn ThreadSink>> {
        self.sink.lock().await.as_ref().and_then(Weak::upgrade)
    }

    async fn post_status(&self, thread_id: ThreadId, text: &str, is_error: bool) {
        if let Some(sink) = self.sink().await {
            sink.post_status(thread_id, text, is_error).await;
        } else {
            warn!(%thread_id, text, "no ThreadSink attached; status dropped");
        }
    }

    /// Queue a worker-produced diff for a thread's follow-up invocation.
    ///
    /// This is the critical section: everything inside — conflict scan,
    /// apply, commit — runs while the gate [`Mutex`] is held, so at most
    /// one call's body executes at a time regardless of how many workers
    /// finished concurrently.
    pub async fn queue_merge(&self, thread: &mut Thread, diff: WorkspaceDiff) -> QueueOutcome {
        if !diff.has_changes() {
            return QueueOutcome::Empty;
        }

        let ranges = match extract_ranges(&diff) {
            Ok(ranges) => ranges,
            Err(reason) => {
                self.post_status(thread.id, &reason, true).await;
                return QueueOutcome::Failed { reason };
            }
        };

        let mut state = self.gate.lock().await;

        let candidate = PendingMerge {
            thread_id: thread.id,
            message_id: diff.message_id,
            timestamp: diff.timestamp,
            diff,
            ranges,
            status: MergeStatus::Pending,
        };

        let conflicts = detect_conflicts(&state.pending, &candidate);

        if conflicts.is_empty() {
            let outcome = self.apply_and_commit(thread, &candidate).await;
            match &outcome {
                QueueOutcome::Merged { hash } => {
                    info!(thread_id = %thread.id, ?hash, "merge applied cleanly");
                    let mut merged = candidate;
                    merged.status = MergeStatus::Merged;
                    state.pending.push(merged);
                }
                QueueOutcome::Failed { reason } => {
                    let mut failed = candidate;
                    failed.status = MergeStatus::Failed;
                    state.pending.push(failed);
                    self.post_status(thread.id, reason, true).await;
                }
                QueueOutcome::Conflicted(_) | QueueOutcome::Empty => unreachable!(
                    "apply_and_commit never returns Conflicted or Empty"
                ),
            }
            outcome
        } else {
            let mut conflicted = candidate;
            conflicted.status = MergeStatus::Conflicted;
            let merge_ref = conflicted.merge_ref();
            state.pending.push(conflicted);
            drop(state);

            self.escalate(thread, merge_ref, &conflicts).await;
            QueueOutcome::Conflicted(conflicts)
        }
    }

    async fn apply_and_commit(&self, thread: &mut Thread, merge: &PendingMerge) -> QueueOutcome {
        let mut changed_files = Vec::new();
        let mut any_real_change = false;

        for (path, file_diff) in &merge.diff.files {
            let live_path = self.document_path.with_file_name(
                path.file_name().unwrap_or_else(|| path.as_os_str()),
            );
            let current = match tokio::fs::read_to_string(&live_path).await {
                Ok(c) => c,
                Err(e) => {
                    let reason = format!("could not read '{}' to apply merge: {e}", live_path.display());
                    return QueueOutcome::Failed { reason };
                }
            };

            let patched = match file_diff.apply(&current) {
                Ok(p) => p,
                Err(e) => {
                    return QueueOutcome::Failed {
                        reason: format!("patch apply failed for '{}': {e}", path.display()),
                    };
                }
            };

            if patched == current {
                warn!(path = %path.display(), "patched content identical to original; treating as no-op");
                continue;
            }
            any_real_change = true;

            if let Err(e) = tokio::fs::write(&live_path, &patched).await {
                return QueueOutcome::Failed {
                    reason: format!("could not write '{}': {e}", live_path.display()),
                };
            }
            changed_files.push(path.clone());
        }

        if !any_real_change {
            return QueueOutcome::Merged { hash: None };
        }

        let lines_summary = merge
            .ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let message = thread.initial_request.clone();
        let hash = self
            .version_store
            .commit_merge(thread.id, &message, &changed_files, Some(&lines_summary))
            .await;

        if hash.is_empty() {
            return QueueOutcome::Failed {
                reason: "document was patched but the commit could not be recorded".to_owned(),
            };
        }

        thread.record_git_commit(hash.clone(), merge.timestamp);
        QueueOutcome::Merged { hash: Some(hash) }
    }

    async fn escalate(&self, thread: &Thread, merge_ref: MergeRef, conflicts: &[Conflict]) {
        let peers = conflicts
            .iter()
            .flat_map(|c| [c.merge_a.thread_id, c.merge_b.thread_id])
            .filter(|id| *id != merge_ref.thread_id)
            .collect::<Vec<_>>();

        let narration = narrate_conflicts(thread, conflicts);

        let Some(sink) = self.sink().await else {
            warn!(thread_id = %thread.id, "no ThreadSink attached; cannot spawn resolution thread");
            return;
        };
        let resolution_id = sink.spawn_resolution_thread(narration, peers).await;
        info!(thread_id = %thread.id, %resolution_id, "spawned resolution thread for conflict");
    }

    /// Current pending merges, for diagnostics/tests.
    pub async fn pending_snapshot(&self) -> Vec<PendingMerge> {
        self.gate.lock().await.pending.clone()
    }
}

fn extract_ranges(diff: &WorkspaceDiff) -> Result<Vec<crate::model::LineRange>, String> {
    let mut ranges = Vec::new();
    for file_diff in diff.files.values() {
        match file_diff.line_ranges() {
            Ok(r) => ranges.extend(r),
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(ranges)
}

fn detect_conflicts(pending: &[PendingMerge], candidate: &PendingMerge) -> Vec<Conflict> {
    pending
        .iter()
        .filter(|existing| matches!(existing.status, MergeStatus::Pending | MergeStatus::Merged))
        .filter_map(|existing| {
            let pairs: Vec<_> = existing
                .ranges
                .iter()
                .flat_map(|a| candidate.ranges.iter().map(move |b| (a, b)))
                .filter(|(a, b)| a.overlaps(b))
                .map(|(a, b)| (a.clone(), b.clone()))
                .collect();
            Conflict::from_pairs(existing.merge_ref(), candidate.merge_ref(), pairs)
        })
        .collect()
}

fn narrate_conflicts(thread: &Thread, conflicts: &[Conflict]) -> String {
    let mut text = format!(
        "A conflict was detected merging thread {}'s changes. The following threads touch overlapping lines:\n",
        thread.id
    );
    for conflict in conflicts {
        let severity = match conflict.severity {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Blocking => "blocking",
        };
        text.push_str(&format!(
            "- thread {} vs thread {} ({severity}, {} overlapping range(s))\n",
            conflict.merge_a.thread_id,
            conflict.merge_b.thread_id,
            conflict.overlapping_pairs.len(),
        ));
    }
    text.push_str(
        "Choose how to proceed: (1) attempt an intelligent merge, (2) keep one side and discard \
         the other, or (3) describe a custom manual merge.",
    );
    text
}
