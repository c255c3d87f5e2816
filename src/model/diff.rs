//! File and workspace diffs: computing unified diffs between two snapshots,
//! parsing hunk headers for conflict-range extraction, and applying a parsed
//! diff back onto a current file body.
//!
//! Change detection is content-hash based; files are keyed in a
//! `BTreeMap<PathBuf, _>` for deterministic ordering.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ids::{MessageId, ThreadId};
use super::line_range::LineRange;

/// Content hash of a file snapshot (sha256, lowercase hex).
#[must_use]
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// FileDiff
// ---------------------------------------------------------------------------

/// Result of comparing two snapshots of one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path relative to the workspace/document root.
    pub path: PathBuf,
    /// Content hash of the original snapshot.
    pub original_checksum: String,
    /// Content hash of the new snapshot.
    pub new_checksum: String,
    /// Standard unified-diff text (`---`/`+++` headers, `@@` hunks).
    pub unified_diff: String,
    /// Count of `+` lines across all hunks.
    pub lines_added: u32,
    /// Count of `-` lines across all hunks.
    pub lines_removed: u32,
}

impl FileDiff {
    /// Compare `original` against `modified`. Returns `None` if the content
    /// hashes are identical: no `FileDiff` is ever produced for an
    /// unchanged file.
    #[must_use]
    pub fn compute(path: PathBuf, original: &str, modified: &str) -> Option<Self> {
        let original_checksum = checksum(original);
        let new_checksum = checksum(modified);
        if original_checksum == new_checksum {
            return None;
        }

        let text_diff = similar::TextDiff::from_lines(original, modified);
        let display_path = path.display().to_string();
        let unified_diff = text_diff
            .unified_diff()
            .context_radius(3)
            .header(&display_path, &display_path)
            .to_string();

        let (mut lines_added, mut lines_removed) = (0u32, 0u32);
        for line in unified_diff.lines() {
            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            }
            if let Some(first) = line.as_bytes().first() {
                match first {
                    b'+' => lines_added += 1,
                    b'-' => lines_removed += 1,
                    _ => {}
                }
            }
        }

        Some(Self {
            path,
            original_checksum,
            new_checksum,
            unified_diff,
            lines_added,
            lines_removed,
        })
    }

    /// Extract the line ranges touched by this diff's hunks, keyed on the
    /// *new*-file side (`[c, c+d)` of each `@@ -a,b +c,d @@` header).
    ///
    /// A hunk with `d == 0` (pure deletion) still registers a zero-width
    /// range at line `c`.
    ///
    /// # Errors
    /// Returns an error if no hunk header can be parsed out of
    /// `unified_diff`, which indicates the diff text is malformed.
    pub fn line_ranges(&self) -> Result<Vec<LineRange>, DiffParseError> {
        let hunks = parse_hunk_headers(&self.unified_diff);
        if hunks.is_empty() {
            return Err(DiffParseError {
                path: self.path.clone(),
                reason: "no `@@ -a,b +c,d @@` hunk header found".to_owned(),
            });
        }
        Ok(hunks
            .into_iter()
            .map(|hunk| {
                if hunk.new_len == 0 {
                    LineRange::zero_width(self.path.clone(), hunk.new_start)
                } else {
                    LineRange::new(
                        self.path.clone(),
                        hunk.new_start,
                        hunk.new_start + hunk.new_len - 1,
                    )
                }
            })
            .collect())
    }

    /// Apply this diff's hunks to `current`, the live file's present
    /// content: copy original context up to each hunk's old-start, discard
    /// `-` lines, emit `+` lines, copy ` ` context lines, then append any
    /// trailing original lines after the last hunk.
    ///
    /// This re-reads `current` rather than assuming it still matches
    /// `self.original_checksum` — the live document may have moved since
    /// this diff was produced; the hunks are applied positionally against
    /// whatever `current` now contains, and drift surfaces as a
    /// [`PatchApplyError`] only when a hunk's start point no longer exists.
    pub fn apply(&self, current: &str) -> Result<String, PatchApplyError> {
        let hunks = parse_hunks(&self.unified_diff).map_err(|reason| PatchApplyError {
            path: self.path.clone(),
            reason,
        })?;
        if hunks.is_empty() {
            return Err(PatchApplyError {
                path: self.path.clone(),
                reason: "diff contains no hunks".to_owned(),
            });
        }

        let original_lines: Vec<&str> = split_lines(current);
        let mut out: Vec<String> = Vec::new();
        let mut cursor = 0usize; // 0-indexed position into original_lines

        for hunk in &hunks {
            let old_start_idx = hunk.header.old_start.saturating_sub(1) as usize;
            if old_start_idx > original_lines.len() {
                return Err(PatchApplyError {
                    path: self.path.clone(),
                    reason: format!(
                        "hunk expects content to start at line {} but file has only {} lines",
                        hunk.header.old_start,
                        original_lines.len()
                    ),
                });
            }
            // Copy untouched context up to the hunk's start.
            while cursor < old_start_idx {
                out.push(original_lines[cursor].to_owned());
                cursor += 1;
            }
            for body_line in &hunk.lines {
                match body_line {
                    HunkLine::Context(text) => {
                        if cursor < original_lines.len() {
                            out.push(original_lines[cursor].to_owned());
                            cursor += 1;
                        } else {
                            // Permissive on context mismatch: the live
                            // document is re-read per apply, so fall back to
                            // the hunk's own text rather than fail outright.
                            out.push((*text).to_owned());
                        }
                    }
                    HunkLine::Removed(_text) => {
                        if cursor < original_lines.len() {
                            cursor += 1;
                        }
                    }
                    HunkLine::Added(text) => out.push((*text).to_owned()),
                }
            }
        }
        // Trailing original lines after the last hunk.
        while cursor < original_lines.len() {
            out.push(original_lines[cursor].to_owned());
            cursor += 1;
        }

        let mut result = out.join("\n");
        if current.ends_with('\n') {
            result.push('\n');
        }
        Ok(result)
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

/// Error parsing hunk headers or structure out of a unified diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffParseError {
    /// Path of the diff that failed to parse.
    pub path: PathBuf,
    /// Human-readable reason.
    pub reason: String,
}

impl fmt::Display for DiffParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

impl std::error::Error for DiffParseError {}

/// Error applying a parsed diff to the live document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchApplyError {
    /// Path of the file that failed to patch.
    pub path: PathBuf,
    /// Human-readable reason.
    pub reason: String,
}

impl fmt::Display for PatchApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

impl std::error::Error for PatchApplyError {}

// ---------------------------------------------------------------------------
// Hunk parsing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HunkHeader {
    old_start: u32,
    new_start: u32,
    new_len: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum HunkLine<'a> {
    Context(&'a str),
    Added(&'a str),
    Removed(&'a str),
}

struct Hunk<'a> {
    header: HunkHeader,
    lines: Vec<HunkLine<'a>>,
}

/// Parse every `@@ -a,b +c,d @@` header in a unified diff.
fn parse_hunk_headers(diff: &str) -> Vec<HunkHeader> {
    diff.lines().filter_map(parse_hunk_header_line).collect()
}

fn parse_hunk_header_line(line: &str) -> Option<HunkHeader> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_part, rest) = rest.split_once(" +")?;
    let (new_part, _) = rest.split_once(" @@")?;
    Some(HunkHeader {
        old_start: parse_range_start(old_part)?,
        new_start: parse_range_start(new_part)?,
        new_len: parse_range_len(new_part),
    })
}

fn parse_range_start(part: &str) -> Option<u32> {
    part.split_once(',').map_or(part, |(start, _)| start).parse().ok()
}

fn parse_range_len(part: &str) -> u32 {
    part.split_once(',').map_or(1, |(_, len)| len.parse().unwrap_or(1))
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk<'_>>, String> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk<'_>> = None;

    for line in diff.lines() {
        if line.starts_with("---") || line.starts_with("+++") {
            continue;
        }
        if let Some(header) = parse_hunk_header_line(line) {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            current = Some(Hunk { header, lines: Vec::new() });
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };
        if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Added(text));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Removed(text));
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text));
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(""));
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() {
        return Err("no hunks found in diff".to_owned());
    }
    Ok(hunks)
}

// ---------------------------------------------------------------------------
// WorkspaceDiff
// ---------------------------------------------------------------------------

/// Envelope for the diffs produced by one invocation of a thread's worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDiff {
    /// The thread this invocation belonged to.
    pub thread_id: ThreadId,
    /// The message (follow-up turn) that produced this invocation.
    pub message_id: MessageId,
    /// Unix timestamp (seconds) at which the diff was computed.
    pub timestamp: i64,
    /// Per-file diffs, keyed by path relative to the workspace root.
    pub files: BTreeMap<PathBuf, FileDiff>,
}

impl WorkspaceDiff {
    /// Whether any file actually changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.files.is_empty()
    }

    /// Sum of added and removed lines across every file.
    #[must_use]
    pub fn total_changed_lines(&self) -> u32 {
        self.files
            .values()
            .map(|d| d.lines_added + d.lines_removed)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_produces_no_diff() {
        assert!(FileDiff::compute(PathBuf::from("doc.md"), "a\nb\n", "a\nb\n").is_none());
    }

    #[test]
    fn single_line_change_round_trips() {
        let original = "a\nb\nc\nd\ne\n";
        let modified = "A\nb\nc\nd\ne\n";
        let diff = FileDiff::compute(PathBuf::from("doc.md"), original, modified).unwrap();
        assert_eq!(diff.apply(original).unwrap(), modified);
    }

    #[test]
    fn multi_hunk_change_round_trips() {
        let original = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\n";
        let modified = "A\nb\nc\nd\ne\nf\ng\nh\ni\nJ\n";
        let diff = FileDiff::compute(PathBuf::from("doc.md"), original, modified).unwrap();
        assert_eq!(diff.apply(original).unwrap(), modified);
    }

    #[test]
    fn line_ranges_extracted_from_hunk() {
        let original = "a\nb\nc\nd\ne\n";
        let modified = "a\nb\nC\nd\ne\n";
        let diff = FileDiff::compute(PathBuf::from("doc.md"), original, modified).unwrap();
        let ranges = diff.line_ranges().unwrap();
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].contains_line(3));
    }

    #[test]
    fn pure_deletion_registers_zero_width_range() {
        let original = "a\nb\nc\nd\ne\n";
        let modified = "a\nb\nd\ne\n";
        let diff = FileDiff::compute(PathBuf::from("doc.md"), original, modified).unwrap();
        let ranges = diff.line_ranges().unwrap();
        assert!(ranges.iter().any(LineRange::is_zero_width));
    }

    #[test]
    fn apply_tolerates_drifted_context() {
        let original = "a\nb\nc\n";
        let modified = "A\nb\nc\n";
        let diff = FileDiff::compute(PathBuf::from("doc.md"), original, modified).unwrap();
        // Drifted document: someone else already changed an unrelated line.
        let drifted = "x\nb\nc\n";
        assert!(diff.apply(drifted).is_ok());
    }

    #[test]
    fn checksum_is_stable() {
        assert_eq!(checksum("hello"), checksum("hello"));
        assert_ne!(checksum("hello"), checksum("world"));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        /// `FileDiff::compute` + `FileDiff::apply` must round-trip: applying
        /// a computed diff to the original content always reproduces the
        /// modified content exactly, for any pair of line-oriented bodies.
        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn diff_apply_round_trips(
                original in proptest::collection::vec("[a-zA-Z0-9 ]{0,12}", 0..20),
                modified in proptest::collection::vec("[a-zA-Z0-9 ]{0,12}", 0..20),
            ) {
                let original = original.join("\n") + "\n";
                let modified = modified.join("\n") + "\n";
                match FileDiff::compute(PathBuf::from("doc.md"), &original, &modified) {
                    None => prop_assert_eq!(checksum(&original), checksum(&modified)),
                    Some(diff) => prop_assert_eq!(diff.apply(&original).unwrap(), modified),
                }
            }
        }
    }

    #[test]
    fn workspace_diff_totals() {
        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("doc.md"),
            FileDiff {
                path: PathBuf::from("doc.md"),
                original_checksum: "a".to_owned(),
                new_checksum: "b".to_owned(),
                unified_diff: String::new(),
                lines_added: 2,
                lines_removed: 1,
            },
        );
        let wd = WorkspaceDiff {
            thread_id: ThreadId::new(1),
            message_id: MessageId::new(1),
            timestamp: 0,
            files,
        };
        assert!(wd.has_changes());
        assert_eq!(wd.total_changed_lines(), 3);
    }
}
