//! VersionStore: durable, append-only history of document states
//! attributable to threads, backed by a local `git` repository.
//!
//! Every git invocation runs as a subprocess and is awaited as an async
//! suspension point; staging then committing treats "nothing to commit"
//! as a non-error outcome rather than a failure.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::VersionStoreError;
use crate::model::{CommitInfo, ThreadId};

/// Outcome of [`VersionStore::revert`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevertOutcome {
    /// Revert succeeded; carries the new commit hash.
    Hash(String),
    /// The revert produced a conflict; it was aborted before returning.
    Conflict,
    /// The revert failed for a reason other than a content conflict.
    Error,
    /// The version-control tool is unavailable.
    NotAvailable,
}

/// Parsed metadata of one commit message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMetadata {
    /// Full commit message.
    pub message: String,
    /// Thread id parsed from the first line, if the message matches the
    /// `"harlowe: Thread <id> - ..."` form.
    pub thread_id: Option<ThreadId>,
    /// The `Lines: <range>` trailer value, if present.
    pub lines_affected: Option<String>,
}

/// Durable, append-only history of document states attributable to threads.
///
/// Wraps a local git repository: either the host repository the document
/// already lives in, or a fresh one initialized under
/// `<document-dir>/.harlowe/` the first time a document outside any repo is
/// opened. The choice is made once at construction and does not change for
/// the session.
pub struct VersionStore {
    /// Directory git commands run in (`-C <repo_root>`).
    repo_root: PathBuf,
    /// Where the live document is mirrored inside `repo_root`. Equal to
    /// `document_path` itself when the host repository is reused.
    mirrored_path: PathBuf,
    /// The live document's path, outside of any workspace.
    document_path: PathBuf,
    /// Whether `git` was found to be invocable at construction time.
    available: bool,
}

impl VersionStore {
    /// Open (or initialize) the version store for `document_path`.
    ///
    /// Never fails: if `git` is unavailable or setup fails, the store is
    /// still constructed with `available() == false` and every operation
    /// degrades to its documented sentinel value instead of erroring.
    pub async fn open(document_path: &Path) -> Self {
        let Some(doc_dir) = document_path.parent().map(Path::to_path_buf) else {
            return Self::unavailable(document_path);
        };

        if !Self::git_on_path().await {
            return Self::unavailable(document_path);
        }

        let (repo_root, mirrored_path) = match Self::find_host_repo(&doc_dir).await {
            Some(toplevel) => (toplevel, document_path.to_path_buf()),
            None => {
                let harlowe_dir = doc_dir.join(".harlowe");
                if let Err(e) = tokio::fs::create_dir_all(&harlowe_dir).await {
                    warn!(error = %e, "failed to create .harlowe directory");
                    return Self::unavailable(document_path);
                }
                let basename = document_path
                    .file_name()
                    .map_or_else(|| PathBuf::from("document"), PathBuf::from);
                (harlowe_dir.clone(), harlowe_dir.join(basename))
            }
        };

        let store = Self {
            repo_root,
            mirrored_path,
            document_path: document_path.to_path_buf(),
            available: true,
        };
        store.ensure_initialized().await;
        store
    }

    fn unavailable(document_path: &Path) -> Self {
        Self {
            repo_root: document_path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            mirrored_path: document_path.to_path_buf(),
            document_path: document_path.to_path_buf(),
            available: false,
        }
    }

    async fn git_on_path() -> bool {
        Command::new("git").arg("--version").output().await.is_ok_and(|o| o.status.success())
    }

    async fn find_host_repo(doc_dir: &Path) -> Option<PathBuf> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(doc_dir)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if text.is_empty() {
            None
        } else {
            Some(PathBuf::from(text))
        }
    }

    async fn ensure_initialized(&self) {
        let already_repo = self.run(&["rev-parse", "--git-dir"]).await.is_ok();
        if !already_repo {
            let _ = self.run(&["init"]).await;
        }
        let _ = self.run(&["config", "user.name", "Harlowe"]).await;
        let _ = self.run(&["config", "user.email", "harlowe@local"]).await;
    }

    /// Whether the version-control tool is available for this store.
    #[must_use]
    pub const fn available(&self) -> bool {
        self.available
    }

    async fn run(&self, args: &[&str]) -> Result<String, VersionStoreError> {
        debug!(?args, root = %self.repo_root.display(), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| VersionStoreError::ToolUnavailable { detail: e.to_string() })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(VersionStoreError::GitFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    /// Mirror the live document into the repository, if a separate mirror
    /// is in use (no-op when the host repository already tracks the file
    /// in place).
    async fn sync_mirror(&self) -> std::io::Result<()> {
        if self.mirrored_path == self.document_path {
            return Ok(());
        }
        let content = tokio::fs::read(&self.document_path).await?;
        tokio::fs::write(&self.mirrored_path, content).await
    }

    /// Best-effort checkpoint: stages and commits the current document
    /// state (empty commits allowed), tags it `harlowe/session/<ts>`.
    #[instrument(skip(self))]
    pub async fn checkpoint(&self) -> Option<String> {
        if !self.available {
            return None;
        }
        if self.sync_mirror().await.is_err() {
            return None;
        }
        let rel = self.mirrored_relpath();
        let _ = self.run(&["add", "--", rel.as_str()]).await;

        let now = chrono_like_timestamp();
        let message = format!("harlowe: session checkpoint - {now}");
        self.run(&["commit", "--allow-empty", "-m", &message]).await.ok()?;
        let hash = self.head_hash().await?;

        let tag = format!("harlowe/session/{now}");
        let _ = self.run(&["tag", &tag]).await;
        Some(hash)
    }

    async fn head_hash(&self) -> Option<String> {
        self.run(&["rev-parse", "HEAD"]).await.ok().map(|s| s.trim().to_owned())
    }

    fn mirrored_relpath(&self) -> String {
        self.mirrored_path
            .strip_prefix(&self.repo_root)
            .unwrap_or(&self.mirrored_path)
            .display()
            .to_string()
    }

    /// Commit a clean merge, encoding `thread_id` and an optional `Lines:`
    /// trailer in the commit message.
    ///
    /// `files` are paths relative to the document's directory that changed;
    /// `lines` is a human-readable summary rendered into the `Lines:`
    /// trailer (omitted if `None`).
    ///
    /// Returns an empty string if the commit could not be produced (the
    /// apply is considered to have "succeeded" but the commit failed; the
    /// caller treats this as an apply failure).
    #[instrument(skip(self, files))]
    pub async fn commit_merge(
        &self,
        thread_id: ThreadId,
        message: &str,
        files: &[PathBuf],
        lines: Option<&str>,
    ) -> String {
        if !self.available || self.sync_mirror().await.is_err() {
            return String::new();
        }

        let rel = self.mirrored_relpath();
        if self.run(&["add", "--", rel.as_str()]).await.is_err() {
            return String::new();
        }

        let mut full_message = format!("harlowe: Thread {thread_id} - {message}");
        if let Some(lines) = lines {
            full_message.push_str(&format!("\nLines: {lines}"));
        }
        if !files.is_empty() {
            let names = files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ");
            full_message.push_str(&format!("\nFiles: {names}"));
        }

        match self.run(&["commit", "--allow-empty", "-m", &full_message]).await {
            Ok(_) => self.head_hash().await.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "commit_merge failed");
                String::new()
            }
        }
    }

    /// Test whether `hash` can be reverted without producing a conflict.
    /// Never leaves the working tree modified, on either outcome.
    #[instrument(skip(self))]
    pub async fn can_revert_cleanly(&self, hash: &str) -> bool {
        if !self.available {
            return false;
        }
        let result = self.run(&["revert", "--no-commit", "--no-edit", hash]).await;
        let clean = result.is_ok();
        // Undo any staged-but-uncommitted revert attempt, and clean up any
        // sequencer state a conflicting attempt left behind.
        let _ = self.run(&["revert", "--abort"]).await;
        let _ = self.run(&["reset", "--hard", "HEAD"]).await;
        clean
    }

    /// Revert `hash`. On conflict, the revert is aborted before returning.
    #[instrument(skip(self))]
    pub async fn revert(&self, hash: &str) -> RevertOutcome {
        if !self.available {
            return RevertOutcome::NotAvailable;
        }
        match self.run(&["revert", "--no-edit", hash]).await {
            Ok(_) => self.head_hash().await.map_or(RevertOutcome::Error, RevertOutcome::Hash),
            Err(VersionStoreError::GitFailed { stderr, .. }) => {
                let _ = self.run(&["revert", "--abort"]).await;
                if stderr.to_lowercase().contains("conflict") {
                    RevertOutcome::Conflict
                } else {
                    RevertOutcome::Error
                }
            }
            Err(_) => {
                let _ = self.run(&["revert", "--abort"]).await;
                RevertOutcome::Error
            }
        }
    }

    /// Parse a commit message into [`CommitMetadata`].
    #[instrument(skip(self))]
    pub async fn metadata(&self, hash: &str) -> Option<CommitMetadata> {
        if !self.available {
            return None;
        }
        let message = self.run(&["log", "-1", "--format=%B", hash]).await.ok()?;
        Some(parse_commit_message(message.trim_end_matches('\n')))
    }

    /// List the most recent `limit` commits, newest first.
    #[instrument(skip(self))]
    pub async fn history(&self, limit: usize) -> Vec<CommitInfo> {
        if !self.available || limit == 0 {
            return Vec::new();
        }
        // Unit separator (0x1f) delimits fields, record separator (0x1e)
        // delimits commits; malformed records (wrong field count) are
        // skipped rather than failing the whole parse.
        let format = "--format=%H%x1f%at%x1f%P%x1f%B%x1e";
        let Ok(raw) = self.run(&["log", &format!("-n{limit}"), format]).await else {
            return Vec::new();
        };
        raw.split('\x1e')
            .map(str::trim)
            .filter(|rec| !rec.is_empty())
            .filter_map(parse_history_record)
            .collect()
    }
}

fn parse_history_record(record: &str) -> Option<CommitInfo> {
    let mut fields = record.splitn(4, '\x1f');
    let hash = fields.next()?.trim().to_owned();
    let timestamp: i64 = fields.next()?.trim().parse().ok()?;
    let parents = fields.next()?.trim();
    let message = fields.next()?.trim_end().to_owned();
    if hash.is_empty() {
        return None;
    }
    let is_merge = parents.split_whitespace().count() > 1;
    let parsed = parse_commit_message(&message);
    Some(CommitInfo {
        hash,
        timestamp,
        is_revert: message.starts_with("Revert "),
        message,
        thread_id: parsed.thread_id,
        lines_affected: parsed.lines_affected,
        is_merge,
    })
}

fn parse_commit_message(message: &str) -> CommitMetadata {
    let mut lines = message.lines();
    let first = lines.next().unwrap_or_default();
    let thread_id = first
        .strip_prefix("harlowe: Thread ")
        .and_then(|rest| rest.split_once(" - "))
        .and_then(|(id, _)| crate::model::ThreadId::from_hex(id).ok());

    let lines_affected = message
        .lines()
        .find_map(|line| line.strip_prefix("Lines: ").map(str::to_owned));

    CommitMetadata {
        message: message.to_owned(),
        thread_id,
        lines_affected,
    }
}

/// `YYYYMMDD-HHMMSS`, a filesystem- and commit-trailer-safe session tag
/// rather than a literal (colon-bearing) ISO-8601 string.
fn chrono_like_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_unix_compact(now)
}

/// Minimal civil-calendar conversion so this crate does not need a chrono
/// dependency just to render one timestamp format. Correct for the Gregorian
/// calendar from 1970 onward, which is the only range this store ever sees.
fn format_unix_compact(unix_secs: u64) -> String {
    let days = unix_secs / 86400;
    let secs_of_day = unix_secs % 86400;
    let (hour, minute, second) = (secs_of_day / 3600, (secs_of_day % 3600) / 60, secs_of_day % 60);
    let (year, month, day) = civil_from_days(days as i64);
    format!("{year:04}{month:02}{day:02}-{hour:02}{minute:02}{second:02}")
}

/// Howard Hinnant's `civil_from_days` algorithm (days since epoch -> y/m/d).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
