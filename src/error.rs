//! Crate-wide error types for harlowe-core.
//!
//! [`HarloweError`] is the unified error type surfaced by the public API.
//! Error messages are written to be actionable on their own: each variant's
//! `Display` impl states what happened and what to do about it. Most
//! [`VersionStoreError`]s never reach a caller as `HarloweError` —
//! `VersionStore` catches them internally and degrades to
//! `None`/`NOT_AVAILABLE` results instead.

use std::fmt;
use std::path::PathBuf;

use crate::model::ThreadId;

/// Error type returned by [`crate::version_store::VersionStore`] operations
/// that cannot simply degrade to a sentinel value (construction-time only;
/// per-operation failures are swallowed into `None`/`NOT_AVAILABLE` instead).
#[derive(Debug)]
pub enum VersionStoreError {
    /// The `git` executable could not be located or invoked at all.
    ToolUnavailable {
        /// The underlying OS error, if any.
        detail: String,
    },
    /// A git subprocess exited non-zero in a context where the caller needs
    /// to know (construction only — steady-state ops degrade instead).
    GitFailed {
        /// The git subcommand that was run, e.g. `"git init"`.
        command: String,
        /// Captured stderr.
        stderr: String,
    },
    /// An I/O error occurred while preparing the repository layout.
    Io(std::io::Error),
}

impl fmt::Display for VersionStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolUnavailable { detail } => write!(
                f,
                "git is not available ({detail}).\n  To fix: install git and ensure it is on PATH, \
                 or proceed without version control — undo/history will be unavailable."
            ),
            Self::GitFailed { command, stderr } => {
                write!(f, "`{command}` failed")?;
                if stderr.is_empty() {
                    Ok(())
                } else {
                    write!(f, ":\n  {stderr}")
                }
            }
            Self::Io(e) => write!(f, "I/O error setting up the version store: {e}"),
        }
    }
}

impl std::error::Error for VersionStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VersionStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Unified error type for harlowe-core operations.
///
/// Each variant is self-contained: a caller (or an agent reading a log line)
/// should be able to tell what happened and what to do next without
/// additional context.
#[derive(Debug)]
pub enum HarloweError {
    /// Workspace acquisition or teardown failed at the filesystem level.
    WorkspaceIo {
        /// Which thread's workspace failed.
        thread_id: ThreadId,
        /// The filesystem error.
        source: std::io::Error,
    },

    /// The assistant executable could not be spawned.
    SpawnFailed {
        /// The configured executable path.
        executable: PathBuf,
        /// The underlying OS error text.
        detail: String,
    },

    /// The assistant subprocess ran past the 300-second ceiling.
    SubprocessTimeout {
        /// How long the ceiling was, in seconds.
        seconds: u64,
    },

    /// A `FileDiff`'s unified-diff text could not be parsed into hunks.
    DiffParse {
        /// Path of the file whose diff failed to parse.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// Applying a parsed diff to the live file failed (text drift).
    PatchApply {
        /// Path of the file that failed to patch.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// `VersionStore::commit_merge` returned an empty hash or an error.
    CommitFailed {
        /// Which thread's merge failed to commit.
        thread_id: ThreadId,
    },

    /// A configuration file could not be loaded or parsed.
    Config {
        /// Path to the configuration file, if one was found.
        path: Option<PathBuf>,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// Generic I/O failure not otherwise categorized above.
    Io(std::io::Error),
}

impl fmt::Display for HarloweError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkspaceIo { thread_id, source } => write!(
                f,
                "workspace I/O failed for thread {thread_id}: {source}.\n  \
                 To fix: check filesystem permissions on the workspace root; the \
                 workspace has been preserved for inspection."
            ),
            Self::SpawnFailed { executable, detail } => write!(
                f,
                "failed to spawn assistant executable '{}': {detail}.\n  \
                 To fix: verify the path is correct and executable.",
                executable.display()
            ),
            Self::SubprocessTimeout { seconds } => write!(
                f,
                "assistant subprocess exceeded the {seconds}-second ceiling and was killed.\n  \
                 The thread remains active; send a follow-up message to retry."
            ),
            Self::DiffParse { path, reason } => write!(
                f,
                "could not parse diff for '{}': {reason}.\n  \
                 The merge has been marked failed and retained for inspection.",
                path.display()
            ),
            Self::PatchApply { path, reason } => write!(
                f,
                "could not apply patch to '{}': {reason}.\n  \
                 The live document was not modified.",
                path.display()
            ),
            Self::CommitFailed { thread_id } => write!(
                f,
                "commit for thread {thread_id} failed after the patch applied cleanly.\n  \
                 The merge has been retained as failed; the working tree may contain \
                 uncommitted changes — inspect with `git status`."
            ),
            Self::Config { path, detail } => {
                write!(f, "configuration error")?;
                if let Some(path) = path {
                    write!(f, " in {}", path.display())?;
                }
                write!(
                    f,
                    ": {detail}.\n  To fix: edit the config file or delete it to use defaults."
                )
            }
            Self::Io(e) => write!(f, "I/O error: {e}.\n  To fix: check file permissions."),
        }
    }
}

impl std::error::Error for HarloweError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkspaceIo { source, .. } | Self::Io(source) => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HarloweError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_subprocess_timeout() {
        let err = HarloweError::SubprocessTimeout { seconds: 300 };
        let msg = format!("{err}");
        assert!(msg.contains("300"));
        assert!(msg.contains("remains active"));
    }

    #[test]
    fn display_git_failed_empty_stderr() {
        let err = VersionStoreError::GitFailed {
            command: "git init".to_owned(),
            stderr: String::new(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("git init"));
        assert!(!msg.contains(':'));
    }

    #[test]
    fn display_git_failed_with_stderr() {
        let err = VersionStoreError::GitFailed {
            command: "git revert".to_owned(),
            stderr: "error: could not revert".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("could not revert"));
    }

    #[test]
    fn error_source_io() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = HarloweError::Io(inner);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_io_is_none() {
        let err = HarloweError::CommitFailed {
            thread_id: ThreadId::new(1),
        };
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: HarloweError = io_err.into();
        assert!(matches!(err, HarloweError::Io(_)));
    }
}
