//! Pending merges and the conflicts detected between them. Severity is a
//! small closed enum attached to the overlapping pair rather than a loose
//! string or numeric score.

use serde::{Deserialize, Serialize};

use super::diff::WorkspaceDiff;
use super::ids::{MessageId, ThreadId};
use super::line_range::LineRange;

/// Identifies one queued invocation's diff within the coordinator's pending
/// list — a thread can have at most one pending merge in flight at a time,
/// but the pair is kept explicit since a thread may later retry with a new
/// `message_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeRef {
    /// The thread whose worker produced this merge.
    pub thread_id: ThreadId,
    /// The message (follow-up turn) that produced it.
    pub message_id: MessageId,
}

/// Lifecycle state of a [`PendingMerge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Queued, not yet scanned against in-flight merges.
    Pending,
    /// Applied and committed.
    Merged,
    /// Overlaps an in-flight pending merge; awaiting user resolution.
    Conflicted,
    /// A resolution thread has been spawned and is being worked.
    Resolving,
    /// Apply or commit failed; retained for inspection.
    Failed,
}

/// A worker-produced diff queued for serialization into the live document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingMerge {
    /// The thread whose worker produced this merge.
    pub thread_id: ThreadId,
    /// The message (follow-up turn) that produced it.
    pub message_id: MessageId,
    /// Unix timestamp (seconds) the merge was queued.
    pub timestamp: i64,
    /// The diffs this merge would apply.
    pub diff: WorkspaceDiff,
    /// Line ranges extracted from `diff`'s hunks, used for overlap scans.
    pub ranges: Vec<LineRange>,
    /// Current lifecycle state.
    pub status: MergeStatus,
}

impl PendingMerge {
    /// This merge's identity within the coordinator's pending list.
    #[must_use]
    pub const fn merge_ref(&self) -> MergeRef {
        MergeRef {
            thread_id: self.thread_id,
            message_id: self.message_id,
        }
    }

    /// Total changed lines across this merge's diff — used to narrate
    /// conflicts to the user.
    #[must_use]
    pub fn total_changed_lines(&self) -> u32 {
        self.diff.total_changed_lines()
    }
}

/// Severity of a detected conflict, ordered `Minor < Major < Blocking` so
/// that "max over pairs" is a plain `Ord::max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Smaller overlap, or adjacency.
    Minor,
    /// Overlap size (`min(ends) - max(starts)`) exceeds 5 lines.
    Major,
    /// Identical `(start, end)` on both sides.
    Blocking,
}

impl Severity {
    /// Classify a single overlapping pair.
    #[must_use]
    pub fn classify_pair(a: &LineRange, b: &LineRange) -> Self {
        if a.is_identical(b) {
            Self::Blocking
        } else if a.overlap_size(b) > 5 {
            Self::Major
        } else {
            Self::Minor
        }
    }
}

/// A detected overlap between two pending merges.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conflict {
    /// The merge already in the pending list.
    pub merge_a: MergeRef,
    /// The newly-queued merge that overlaps it.
    pub merge_b: MergeRef,
    /// Every overlapping `(range_a, range_b)` pair found between the two
    /// merges' ranges.
    pub overlapping_pairs: Vec<(LineRange, LineRange)>,
    /// Max severity over `overlapping_pairs`.
    pub severity: Severity,
}

impl Conflict {
    /// Build a conflict record from the overlapping pairs found between two
    /// merges, computing overall severity as the max over all pairs.
    ///
    /// Returns `None` if `pairs` is empty (no conflict to report).
    #[must_use]
    pub fn from_pairs(merge_a: MergeRef, merge_b: MergeRef, pairs: Vec<(LineRange, LineRange)>) -> Option<Self> {
        let severity = pairs
            .iter()
            .map(|(a, b)| Severity::classify_pair(a, b))
            .max()?;
        Some(Self {
            merge_a,
            merge_b,
            overlapping_pairs: pairs,
            severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn range(start: u32, end: u32) -> LineRange {
        LineRange::new(PathBuf::from("doc.md"), start, end)
    }

    #[test]
    fn identical_ranges_are_blocking() {
        assert_eq!(Severity::classify_pair(&range(3, 3), &range(3, 3)), Severity::Blocking);
    }

    #[test]
    fn large_overlap_is_major() {
        assert_eq!(Severity::classify_pair(&range(1, 20), &range(5, 25)), Severity::Major);
    }

    #[test]
    fn small_overlap_is_minor() {
        assert_eq!(Severity::classify_pair(&range(10, 14), &range(12, 16)), Severity::Minor);
    }

    #[test]
    fn conflict_severity_is_max_over_pairs() {
        let mr_a = MergeRef {
            thread_id: ThreadId::new(1),
            message_id: MessageId::new(1),
        };
        let mr_b = MergeRef {
            thread_id: ThreadId::new(2),
            message_id: MessageId::new(1),
        };
        let pairs = vec![
            (range(10, 14), range(12, 16)), // minor
            (range(1, 20), range(5, 25)),   // major
        ];
        let conflict = Conflict::from_pairs(mr_a, mr_b, pairs).unwrap();
        assert_eq!(conflict.severity, Severity::Major);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_range() -> impl Strategy<Value = LineRange> {
            (1u32..100, 0u32..10).prop_map(|(start, width)| range(start, start + width))
        }

        /// Severity classification must be order-independent: shuffling the
        /// pair list never changes the overall `Conflict::from_pairs`
        /// severity, since it is always the max over the set.
        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn severity_is_independent_of_pair_order(
                pairs in proptest::collection::vec((arb_range(), arb_range()), 1..8),
            ) {
                let mr_a = MergeRef { thread_id: ThreadId::new(1), message_id: MessageId::new(1) };
                let mr_b = MergeRef { thread_id: ThreadId::new(2), message_id: MessageId::new(1) };

                let forward = Conflict::from_pairs(mr_a, mr_b, pairs.clone()).unwrap();

                let mut reversed = pairs;
                reversed.reverse();
                let backward = Conflict::from_pairs(mr_a, mr_b, reversed).unwrap();

                prop_assert_eq!(forward.severity, backward.severity);
            }
        }
    }

    #[test]
    fn empty_pairs_yields_no_conflict() {
        let mr_a = MergeRef {
            thread_id: ThreadId::new(1),
            message_id: MessageId::new(1),
        };
        let mr_b = MergeRef {
            thread_id: ThreadId::new(2),
            message_id: MessageId::new(1),
        };
        assert!(Conflict::from_pairs(mr_a, mr_b, Vec::new()).is_none());
    }
}
