//! UndoEngine: revert, redo, and conflict escalation for individual
//! threads' merges.
//!
//! Layered entirely on this crate's own [`VersionStore`] and
//! [`ThreadManager`] rather than introducing any new shared state: this
//! engine never edits files directly — it asks `VersionStore` to revert,
//! and reports through `ThreadManager::post_status`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::merge_coordinator::ThreadSink;
use crate::model::{Thread, ThreadId};
use crate::thread_manager::ThreadManager;
use crate::version_store::{RevertOutcome, VersionStore};

/// How far back `undo` scans version history looking for commits newer
/// than the target, when deciding whether other threads touched it.
const HISTORY_SCAN_LIMIT: usize = 500;

/// Outcome of [`UndoEngine::undo`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The revert applied cleanly; carries the new commit hash.
    Reverted {
        /// The revert commit's hash.
        revert_commit: String,
    },
    /// The revert would conflict; a resolution thread was spawned instead.
    Escalated {
        /// The synthesized resolution thread's id.
        resolution_thread: ThreadId,
        /// The other threads whose commits intervened.
        peers: Vec<ThreadId>,
    },
    /// The thread is not eligible for undo right now (already reverted, no
    /// recorded commit, or unknown). A status message was already posted.
    Ineligible {
        /// Human-readable reason, already posted as a status message.
        reason: String,
    },
}

/// Outcome of [`UndoEngine::redo`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedoOutcome {
    /// The redo (revert-the-revert) applied; carries the new commit hash.
    Redone {
        /// The redo commit's hash.
        redo_commit: String,
    },
    /// Not eligible for redo right now. A status message was already posted.
    Ineligible {
        /// Human-readable reason, already posted as a status message.
        reason: String,
    },
}

/// Revert, redo, and conflict escalation on top of [`VersionStore`] and
/// [`ThreadManager`]. Holds no state of its own beyond references to the
/// two components it coordinates.
pub struct UndoEngine {
    version_store: Arc<VersionStore>,
    thread_manager: Arc<ThreadManager>,
}

impl UndoEngine {
    /// Construct an engine over an already-wired `VersionStore` and
    /// `ThreadManager` (the same instances the `MergeCoordinator` they sit
    /// atop of uses).
    #[must_use]
    pub const fn new(version_store: Arc<VersionStore>, thread_manager: Arc<ThreadManager>) -> Self {
        Self {
            version_store,
            thread_manager,
        }
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Attempt to undo `thread_id`'s recorded merge.
    ///
    /// Eligibility: the thread must exist, carry a `git_commit`, and not
    /// already be `reverted`. If `VersionStore` reports the commit can be
    /// reverted cleanly, the revert is performed and recorded on the
    /// thread. Otherwise, the version history newer than the commit is
    /// scanned for other known threads' commits; a system-owned resolution
    /// thread is spawned naming them, and the document is left untouched.
    #[instrument(skip(self))]
    pub async fn undo(&self, thread_id: ThreadId) -> UndoOutcome {
        let Some(thread) = self.thread_manager.get(thread_id).await else {
            return UndoOutcome::Ineligible {
                reason: format!("no such thread: {thread_id}"),
            };
        };

        let Some(git_commit) = thread.git_commit().map(str::to_owned) else {
            let reason = "thread has no recorded commit to undo".to_owned();
            self.thread_manager.post_status(thread_id, &reason, true).await;
            return UndoOutcome::Ineligible { reason };
        };

        if thread.is_reverted() {
            let reason = "thread has already been undone".to_owned();
            self.thread_manager.post_status(thread_id, &reason, true).await;
            return UndoOutcome::Ineligible { reason };
        }

        if self.version_store.can_revert_cleanly(&git_commit).await {
            if let RevertOutcome::Hash(hash) = self.version_store.revert(&git_commit).await {
                let now = Self::now();
                self.thread_manager
                    .mutate_thread(thread_id, |t| t.record_revert(hash.clone(), now))
                    .await;
                info!(%thread_id, revert_commit = %hash, "undo applied cleanly");
                self.thread_manager.post_status(thread_id, "undo complete", false).await;
                return UndoOutcome::Reverted { revert_commit: hash };
            }
            // `can_revert_cleanly` said yes but the real revert failed
            // (e.g. a race against a concurrent write) — fall through to
            // the escalation path rather than silently doing nothing.
            warn!(%thread_id, "can_revert_cleanly reported clean but revert failed; escalating");
        }

        self.escalate_undo(thread_id, &thread, &git_commit).await
    }

    async fn escalate_undo(&self, thread_id: ThreadId, thread: &Thread, git_commit: &str) -> UndoOutcome {
        let history = self.version_store.history(HISTORY_SCAN_LIMIT).await;
        let known_ids: std::collections::HashSet<ThreadId> = self
            .thread_manager
            .all_threads()
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();

        let mut peers = Vec::new();
        for commit in &history {
            if commit.hash == git_commit {
                break;
            }
            if let Some(peer_id) = commit.thread_id {
                if peer_id != thread_id && known_ids.contains(&peer_id) && !peers.contains(&peer_id) {
                    peers.push(peer_id);
                }
            }
        }

        let narration = narrate_undo_conflict(thread, &peers);
        let resolution_id = self.thread_manager.spawn_resolution_thread(narration, peers.clone()).await;
        self.thread_manager
            .mutate_thread(resolution_id, |t| {
                t.metadata.insert(
                    "undo_target".to_owned(),
                    crate::model::MetadataValue::Text(thread_id.to_string()),
                );
            })
            .await;

        warn!(%thread_id, %resolution_id, ?peers, "undo would conflict; spawned resolution thread");
        UndoOutcome::Escalated {
            resolution_thread: resolution_id,
            peers,
        }
    }

    /// Redo `thread_id`'s most recent undo (revert-the-revert). If
    /// `thread_id` is `None`, targets whichever tracked thread was most
    /// recently reverted (highest `updated_at` among reverted threads).
    ///
    /// Eligibility: the target thread must be `reverted` with a recorded
    /// `revert_commit`.
    #[instrument(skip(self))]
    pub async fn redo(&self, thread_id: Option<ThreadId>) -> RedoOutcome {
        let target = match thread_id {
            Some(id) => self.thread_manager.get(id).await,
            None => self.most_recently_reverted().await,
        };

        let Some(thread) = target else {
            let reason = thread_id.map_or_else(
                || "no reverted thread to redo".to_owned(),
                |id| format!("no such thread: {id}"),
            );
            if let Some(id) = thread_id {
                self.thread_manager.post_status(id, &reason, true).await;
            }
            return RedoOutcome::Ineligible { reason };
        };

        if !thread.is_reverted() {
            let reason = "thread has not been undone".to_owned();
            self.thread_manager.post_status(thread.id, &reason, true).await;
            return RedoOutcome::Ineligible { reason };
        }
        let Some(revert_commit) = thread.revert_commit().map(str::to_owned) else {
            let reason = "thread has no recorded revert to redo".to_owned();
            self.thread_manager.post_status(thread.id, &reason, true).await;
            return RedoOutcome::Ineligible { reason };
        };

        match self.version_store.revert(&revert_commit).await {
            RevertOutcome::Hash(hash) => {
                let now = Self::now();
                self.thread_manager
                    .mutate_thread(thread.id, |t| t.record_redo(hash.clone(), now))
                    .await;
                info!(thread_id = %thread.id, redo_commit = %hash, "redo applied");
                self.thread_manager.post_status(thread.id, "redo complete", false).await;
                RedoOutcome::Redone { redo_commit: hash }
            }
            RevertOutcome::Conflict => {
                let reason = "redo would conflict with a later change; resolve manually".to_owned();
                self.thread_manager.post_status(thread.id, &reason, true).await;
                RedoOutcome::Ineligible { reason }
            }
            RevertOutcome::Error | RevertOutcome::NotAvailable => {
                let reason = "redo failed; version control is unavailable or the operation errored".to_owned();
                self.thread_manager.post_status(thread.id, &reason, true).await;
                RedoOutcome::Ineligible { reason }
            }
        }
    }

    async fn most_recently_reverted(&self) -> Option<Thread> {
        self.thread_manager
            .all_threads()
            .await
            .into_iter()
            .filter(Thread::is_reverted)
            .max_by_key(|t| t.updated_at)
    }
}

fn narrate_undo_conflict(thread: &Thread, peers: &[ThreadId]) -> String {
    let mut text = format!(
        "Undo for thread {} cannot be applied cleanly: later changes intervened.\n",
        thread.id
    );
    if peers.is_empty() {
        text.push_str("No other tracked thread's commit could be identified as the cause.\n");
    } else {
        text.push_str("The following threads changed overlapping content since then:\n");
        for peer in peers {
            text.push_str(&format!("- thread {peer}\n"));
        }
    }
    text.push_str(
        "Choose how to proceed: (1) undo all of the above threads, (2) undo only the original \
         thread and accept the conflict markers, or (3) describe a custom undo strategy.",
    );
    text
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::merge_coordinator::MergeCoordinator;
    use crate::thread_manager::AssistantConfig;

    async fn fresh() -> (TempDir, Arc<VersionStore>, Arc<ThreadManager>, UndoEngine, PathBuf) {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("doc.md");
        std::fs::write(&doc, "line1\nline2\nline3\nline4\nline5\n").unwrap();

        let store = Arc::new(VersionStore::open(&doc).await);
        let coordinator = Arc::new(MergeCoordinator::new(Arc::clone(&store), doc.clone()));
        let workspaces_root = dir.path().join("workspaces");
        std::fs::create_dir_all(&workspaces_root).unwrap();

        let manager = ThreadManager::new(
            coordinator,
            Arc::clone(&store),
            doc.clone(),
            Vec::new(),
            workspaces_root,
            AssistantConfig {
                executable: PathBuf::from("/bin/echo"),
                timeout: Some(std::time::Duration::from_secs(5)),
            },
            None,
            None,
        );
        manager.attach_to_coordinator().await;

        let engine = UndoEngine::new(Arc::clone(&store), Arc::clone(&manager));
        (dir, store, manager, engine, doc)
    }

    async fn commit_edit(
        store: &VersionStore,
        manager: &ThreadManager,
        doc: &std::path::Path,
        initial_request: &str,
        new_content: &str,
    ) -> Thread {
        std::fs::write(doc, new_content).unwrap();
        let mut thread = Thread::new(String::new(), initial_request.to_owned(), (3, 3), 100);
        let hash = store
            .commit_merge(thread.id, initial_request, &[PathBuf::from("doc.md")], Some("3-3"))
            .await;
        assert!(!hash.is_empty());
        thread.record_git_commit(hash, 100);
        manager.register_thread(thread.clone()).await;
        thread
    }

    #[tokio::test]
    async fn undo_unknown_thread_is_ineligible() {
        let (_dir, _store, _manager, engine, _doc) = fresh().await;
        let outcome = engine.undo(ThreadId::random()).await;
        assert!(matches!(outcome, UndoOutcome::Ineligible { .. }));
    }

    #[tokio::test]
    async fn undo_without_commit_is_ineligible() {
        let (_dir, _store, manager, engine, _doc) = fresh().await;
        let thread = Thread::new(String::new(), "req".to_owned(), (0, 0), 100);
        let id = thread.id;
        manager.register_thread(thread).await;

        let outcome = engine.undo(id).await;
        assert!(matches!(outcome, UndoOutcome::Ineligible { .. }));
    }

    #[tokio::test]
    async fn clean_undo_restores_document_and_marks_reverted() {
        // A single committed edit with nothing else in history reverts cleanly.
        let (_dir, store, manager, engine, doc) = fresh().await;
        let t1 = commit_edit(&store, &manager, &doc, "change line 3", "line1\nline2\nTHREE\nline4\nline5\n").await;

        let outcome = engine.undo(t1.id).await;
        assert!(matches!(outcome, UndoOutcome::Reverted { .. }));

        let content = std::fs::read_to_string(&doc).unwrap();
        assert_eq!(content, "line1\nline2\nline3\nline4\nline5\n");

        let reloaded = manager.get(t1.id).await.unwrap();
        assert!(reloaded.is_reverted());
        assert!(reloaded.revert_commit().is_some());
    }

    #[tokio::test]
    async fn undo_twice_is_ineligible_second_time() {
        let (_dir, store, manager, engine, doc) = fresh().await;
        let t1 = commit_edit(&store, &manager, &doc, "change line 3", "line1\nline2\nTHREE\nline4\nline5\n").await;

        assert!(matches!(engine.undo(t1.id).await, UndoOutcome::Reverted { .. }));
        assert!(matches!(engine.undo(t1.id).await, UndoOutcome::Ineligible { .. }));
    }

    #[tokio::test]
    async fn clean_undo_then_redo_restores_post_merge_state() {
        // undo(T) followed by redo(T) restores the document byte-for-byte.
        let (_dir, store, manager, engine, doc) = fresh().await;
        let t1 = commit_edit(&store, &manager, &doc, "change line 3", "line1\nline2\nTHREE\nline4\nline5\n").await;
        let after_merge = std::fs::read_to_string(&doc).unwrap();

        assert!(matches!(engine.undo(t1.id).await, UndoOutcome::Reverted { .. }));
        let outcome = engine.redo(Some(t1.id)).await;
        assert!(matches!(outcome, RedoOutcome::Redone { .. }));

        let restored = std::fs::read_to_string(&doc).unwrap();
        assert_eq!(restored, after_merge);

        let reloaded = manager.get(t1.id).await.unwrap();
        assert!(!reloaded.is_reverted());
    }

    #[tokio::test]
    async fn redo_without_prior_undo_is_ineligible() {
        let (_dir, store, manager, engine, doc) = fresh().await;
        let t1 = commit_edit(&store, &manager, &doc, "change line 3", "line1\nline2\nTHREE\nline4\nline5\n").await;
        assert!(matches!(engine.redo(Some(t1.id)).await, RedoOutcome::Ineligible { .. }));
    }

    #[tokio::test]
    async fn undo_with_intervening_overlapping_edit_escalates() {
        // T1 commits a change to line 3; T2 commits a further change to the
        // same line. Undoing T1 must not be clean and must not touch the
        // document; it should name T2 as a conflicting peer.
        let (_dir, store, manager, engine, doc) = fresh().await;
        let t1 = commit_edit(&store, &manager, &doc, "t1 edits line 3", "line1\nline2\nTHREE\nline4\nline5\n").await;
        let t2 = commit_edit(&store, &manager, &doc, "t2 edits line 3 again", "line1\nline2\nthree-v2\nline4\nline5\n").await;

        let before = std::fs::read_to_string(&doc).unwrap();
        let outcome = engine.undo(t1.id).await;

        match outcome {
            UndoOutcome::Escalated { resolution_thread, peers } => {
                assert!(peers.contains(&t2.id));
                let resolution = manager.get(resolution_thread).await.unwrap();
                assert!(resolution.is_system_thread());
                assert_eq!(
                    resolution.metadata.get("undo_target").and_then(crate::model::MetadataValue::as_str),
                    Some(t1.id.to_string().as_str())
                );
            }
            other => panic!("expected Escalated, got {other:?}"),
        }

        // The document must be untouched by a failed/escalated undo attempt.
        let after = std::fs::read_to_string(&doc).unwrap();
        assert_eq!(before, after);

        let reloaded = manager.get(t1.id).await.unwrap();
        assert!(!reloaded.is_reverted());
    }

    #[tokio::test]
    async fn redo_defaults_to_most_recently_reverted() {
        let (_dir, store, manager, engine, doc) = fresh().await;
        let t1 = commit_edit(&store, &manager, &doc, "t1", "line1\nline2\nTHREE\nline4\nline5\n").await;
        engine.undo(t1.id).await;

        let outcome = engine.redo(None).await;
        assert!(matches!(outcome, RedoOutcome::Redone { .. }));
    }
}
