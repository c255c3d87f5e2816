//! [`CommitInfo`]: the shape `VersionStore::history` and `VersionStore::metadata`
//! return for a single version-control commit.

use serde::{Deserialize, Serialize};

use super::ids::ThreadId;

/// A single entry in the version-control history, or the parsed metadata of
/// one commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit hash.
    pub hash: String,
    /// Commit timestamp (Unix seconds, author or committer date).
    pub timestamp: i64,
    /// Full commit message, as stored.
    pub message: String,
    /// Thread id parsed out of the commit message's first line, if any.
    pub thread_id: Option<ThreadId>,
    /// The `Lines: <range>` trailer value, if present.
    pub lines_affected: Option<String>,
    /// Whether this commit has more than one parent.
    pub is_merge: bool,
    /// Whether this commit's message begins with `"Revert "`.
    pub is_revert: bool,
}
