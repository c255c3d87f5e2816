//! Workspace: deterministic, per-invocation filesystem isolation so that
//! assistant edits can be diffed against a frozen baseline without racing
//! the live document.
//!
//! Generalized from a named, user-managed workspace directory convention
//! into a scoped-acquisition RAII guard released automatically on drop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::error::HarloweError;
use crate::model::{FileDiff, MessageId, ThreadId, WorkspaceDiff};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// In-memory snapshot of one copied file, taken at acquisition time.
struct Snapshot {
    relative: PathBuf,
    content: String,
}

/// A scoped, per-invocation filesystem sandbox.
///
/// Created by [`acquire`]. Dropping the guard deletes the sandbox directory
/// recursively unless [`Workspace::preserve_for_debugging`] was called —
/// this happens on every exit path (success, early return, or panic
/// unwinding), guaranteeing release even when a caller forgets to.
pub struct Workspace {
    /// The sandbox directory itself.
    pub workspace_dir: PathBuf,
    /// Path to the copied document inside `workspace_dir`.
    pub workspace_file: PathBuf,
    /// Paths to copied reference files inside `workspace_dir`.
    pub reference_files: Vec<PathBuf>,
    snapshots: Vec<Snapshot>,
    preserve: bool,
}

impl Workspace {
    /// Acquire a fresh workspace under `workspaces_root` for one invocation
    /// of `thread_id`/`message_id`.
    ///
    /// Copies `document` and each of `reference_files` into the new
    /// directory, snapshotting their content in memory for later diffing.
    ///
    /// # Errors
    /// Returns [`HarloweError::WorkspaceIo`] if the directory or any copy
    /// cannot be created.
    pub async fn acquire(
        workspaces_root: &Path,
        thread_id: ThreadId,
        message_id: MessageId,
        document: &Path,
        reference_files: &[PathBuf],
    ) -> Result<Self, HarloweError> {
        let to_io_err = |e: std::io::Error| HarloweError::WorkspaceIo { thread_id, source: e };

        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let dir_name = format!("harlowe_ws_{thread_id}_{message_id}_{timestamp_ms}_{sequence}");
        let workspace_dir = workspaces_root.join(dir_name);

        tokio::fs::create_dir_all(&workspace_dir).await.map_err(to_io_err)?;

        let mut snapshots = Vec::with_capacity(1 + reference_files.len());
        let workspace_file = copy_into(document, &workspace_dir, &mut snapshots)
            .await
            .map_err(to_io_err)?;

        let mut copied_refs = Vec::with_capacity(reference_files.len());
        for reference in reference_files {
            let copied = copy_into(reference, &workspace_dir, &mut snapshots)
                .await
                .map_err(to_io_err)?;
            copied_refs.push(copied);
        }

        Ok(Self {
            workspace_dir,
            workspace_file,
            reference_files: copied_refs,
            snapshots,
            preserve: false,
        })
    }

    /// Build the [`WorkspaceDiff`] between the acquisition-time snapshots and
    /// whatever is now on disk in this workspace. Files absent from the
    /// workspace (removed by the worker, or never written) are skipped — no
    /// change is recorded, rather than treating the absence as a deletion.
    ///
    /// Callable at most meaningfully once per acquisition; calling it again
    /// simply re-reads the current workspace contents.
    pub async fn diff(&self, thread_id: ThreadId, message_id: MessageId, now: i64) -> WorkspaceDiff {
        let mut files = BTreeMap::new();
        for snapshot in &self.snapshots {
            let path = self.workspace_dir.join(&snapshot.relative);
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let Ok(current) = String::from_utf8(bytes) else {
                continue;
            };
            if let Some(file_diff) = FileDiff::compute(snapshot.relative.clone(), &snapshot.content, &current) {
                files.insert(snapshot.relative.clone(), file_diff);
            }
        }
        WorkspaceDiff {
            thread_id,
            message_id,
            timestamp: now,
            files,
        }
    }

    /// One-shot: prevent cleanup on drop, for post-mortem inspection of a
    /// failed worker's sandbox.
    pub fn preserve_for_debugging(&mut self) {
        self.preserve = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.preserve {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.workspace_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.workspace_dir.display(), error = %e, "failed to clean up workspace");
            }
        }
    }
}

async fn copy_into(
    source: &Path,
    workspace_dir: &Path,
    snapshots: &mut Vec<Snapshot>,
) -> std::io::Result<PathBuf> {
    let basename = source.file_name().map_or_else(|| PathBuf::from("file"), PathBuf::from);
    let dest = workspace_dir.join(&basename);
    let content = tokio::fs::read_to_string(source).await?;
    tokio::fs::write(&dest, &content).await?;
    snapshots.push(Snapshot {
        relative: basename,
        content,
    });
    Ok(dest)
}

/// Enumerate and remove orphaned workspace directories under
/// `workspaces_root` left behind by a prior process that was killed before
/// its [`Workspace`] guards could run their drop glue.
///
/// Matches any entry named `harlowe_ws_*`; a directory is considered
/// orphaned purely by the naming convention (no lock file is used), so this
/// must only be called when no other process holds live workspaces under
/// the same root — e.g. at startup.
///
/// Returns the paths removed. Errors removing any individual directory are
/// logged and skipped rather than aborting the sweep.
pub async fn sweep_orphans(workspaces_root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(workspaces_root).await else {
        return removed;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_workspace_dir = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("harlowe_ws_"));
        if !is_workspace_dir {
            continue;
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed.push(path),
            Err(e) => warn!(dir = %path.display(), error = %e, "failed to sweep orphaned workspace"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn acquire_copies_document_and_references() {
        let root = TempDir::new().unwrap();
        let doc_dir = TempDir::new().unwrap();
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "hello\n").unwrap();
        let reference = doc_dir.path().join("style.md");
        std::fs::write(&reference, "guide\n").unwrap();

        let ws = Workspace::acquire(
            root.path(),
            ThreadId::new(1),
            MessageId::new(1),
            &doc,
            std::slice::from_ref(&reference),
        )
        .await
        .unwrap();

        assert!(ws.workspace_file.exists());
        assert_eq!(ws.reference_files.len(), 1);
        assert!(ws.reference_files[0].exists());
    }

    #[tokio::test]
    async fn two_acquisitions_same_millisecond_get_distinct_dirs() {
        let root = TempDir::new().unwrap();
        let doc_dir = TempDir::new().unwrap();
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "hello\n").unwrap();

        let a = Workspace::acquire(root.path(), ThreadId::new(1), MessageId::new(1), &doc, &[])
            .await
            .unwrap();
        let b = Workspace::acquire(root.path(), ThreadId::new(1), MessageId::new(1), &doc, &[])
            .await
            .unwrap();

        assert_ne!(a.workspace_dir, b.workspace_dir);
    }

    #[tokio::test]
    async fn diff_detects_worker_edit() {
        let root = TempDir::new().unwrap();
        let doc_dir = TempDir::new().unwrap();
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "a\nb\nc\n").unwrap();

        let ws = Workspace::acquire(root.path(), ThreadId::new(1), MessageId::new(1), &doc, &[])
            .await
            .unwrap();
        tokio::fs::write(&ws.workspace_file, "A\nb\nc\n").await.unwrap();

        let diff = ws.diff(ThreadId::new(1), MessageId::new(1), 100).await;
        assert!(diff.has_changes());
    }

    #[tokio::test]
    async fn diff_skips_files_absent_from_workspace() {
        let root = TempDir::new().unwrap();
        let doc_dir = TempDir::new().unwrap();
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "a\nb\nc\n").unwrap();

        let ws = Workspace::acquire(root.path(), ThreadId::new(1), MessageId::new(1), &doc, &[])
            .await
            .unwrap();
        tokio::fs::remove_file(&ws.workspace_file).await.unwrap();

        let diff = ws.diff(ThreadId::new(1), MessageId::new(1), 100).await;
        assert!(!diff.has_changes());
    }

    #[tokio::test]
    async fn drop_removes_directory_by_default() {
        let root = TempDir::new().unwrap();
        let doc_dir = TempDir::new().unwrap();
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "a\n").unwrap();

        let ws = Workspace::acquire(root.path(), ThreadId::new(1), MessageId::new(1), &doc, &[])
            .await
            .unwrap();
        let dir = ws.workspace_dir.clone();
        assert!(dir.exists());
        drop(ws);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn preserve_for_debugging_keeps_directory() {
        let root = TempDir::new().unwrap();
        let doc_dir = TempDir::new().unwrap();
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "a\n").unwrap();

        let mut ws = Workspace::acquire(root.path(), ThreadId::new(1), MessageId::new(1), &doc, &[])
            .await
            .unwrap();
        ws.preserve_for_debugging();
        let dir = ws.workspace_dir.clone();
        drop(ws);
        assert!(dir.exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn sweep_orphans_removes_harlowe_dirs_only() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("harlowe_ws_orphaned")).unwrap();
        std::fs::create_dir_all(root.path().join("unrelated")).unwrap();

        let removed = sweep_orphans(root.path()).await;
        assert_eq!(removed.len(), 1);
        assert!(!root.path().join("harlowe_ws_orphaned").exists());
        assert!(root.path().join("unrelated").exists());
    }
}
