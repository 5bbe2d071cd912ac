//! Scan targets, expanded target sets, and batch partitioning.
//!
//! Raw operator input is one target per line (address, hostname or CIDR).
//! The backend expands CIDR notation into an [`ExpandedTargetSet`], which
//! [`chunk`] splits into contiguous [`Batch`]es for display and submission.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default number of targets per batch.
pub const DEFAULT_CHUNK_SIZE: i64 = 256;

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// A single scan target: an IPv4/IPv6 literal, hostname, or (before
/// expansion) a CIDR block.
///
/// Always non-empty and trimmed. Duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Build a target from raw text, trimming whitespace.
    ///
    /// Returns `None` when nothing is left after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Target {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Target::parse(&value)
            .ok_or_else(|| CoreError::Validation("target must not be blank".to_string()))
    }
}

/// Trim every line and drop the blank ones, preserving order.
pub fn normalize_target_lines<I, S>(lines: I) -> Vec<Target>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| Target::parse(line.as_ref()))
        .collect()
}

/// Split a free-text block (one target per line, `\n` or `\r\n`) into
/// normalised targets.
pub fn parse_target_text(text: &str) -> Vec<Target> {
    normalize_target_lines(text.lines())
}

// ---------------------------------------------------------------------------
// ExpandedTargetSet
// ---------------------------------------------------------------------------

/// The ordered, fully expanded list of addresses returned by the backend.
///
/// Immutable once built. A new expansion replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedTargetSet {
    targets: Vec<Target>,
}

impl ExpandedTargetSet {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Build a set from the backend's address strings, keeping their order.
    /// Blank entries are skipped.
    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(normalize_target_lines(addresses))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn as_slice(&self) -> &[Target] {
        &self.targets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A contiguous slice of an [`ExpandedTargetSet`].
///
/// Identified by its 1-based position until the backend assigns a
/// persistent batch id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position within the partition.
    pub index: usize,
    pub targets: Vec<Target>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Clamp a user-supplied chunk size to at least 1.
pub fn clamp_chunk_size(chunk_size: i64) -> usize {
    usize::try_from(chunk_size.max(1)).unwrap_or(usize::MAX)
}

/// Partition `set` into contiguous batches of at most `chunk_size`
/// targets. Non-positive sizes behave as 1.
///
/// Pure: the same inputs always produce the same batches.
pub fn chunk(set: &ExpandedTargetSet, chunk_size: i64) -> Vec<Batch> {
    let size = clamp_chunk_size(chunk_size);
    set.as_slice()
        .chunks(size)
        .enumerate()
        .map(|(i, slice)| Batch {
            index: i + 1,
            targets: slice.to_vec(),
        })
        .collect()
}

/// Concatenate batches back into the flat address list sent to the
/// backend on submission.
pub fn flatten_batches(batches: &[Batch]) -> Vec<String> {
    batches
        .iter()
        .flat_map(|batch| batch.targets.iter().map(|t| t.as_str().to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(n: usize) -> ExpandedTargetSet {
        ExpandedTargetSet::from_addresses((0..n).map(|i| format!("10.0.{}.{}", i / 256, i % 256)))
    }

    #[test]
    fn target_parse_trims_whitespace() {
        assert_eq!(Target::parse("  192.0.2.1 \t").unwrap().as_str(), "192.0.2.1");
    }

    #[test]
    fn target_parse_rejects_blank() {
        assert!(Target::parse("   ").is_none());
        assert!(Target::parse("").is_none());
    }

    #[test]
    fn target_try_from_blank_is_validation_error() {
        let err = Target::try_from("  ".to_string()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn normalize_drops_empty_lines_and_keeps_duplicates() {
        let targets = normalize_target_lines(["a", "", "  b ", "a", "\t"]);
        let names: Vec<&str> = targets.iter().map(Target::as_str).collect();
        assert_eq!(names, vec!["a", "b", "a"]);
    }

    #[test]
    fn parse_target_text_handles_crlf() {
        let targets = parse_target_text("192.0.2.10\r\n198.51.100.0/24\r\n\r\n");
        let names: Vec<&str> = targets.iter().map(Target::as_str).collect();
        assert_eq!(names, vec!["192.0.2.10", "198.51.100.0/24"]);
    }

    #[test]
    fn chunk_sizes_follow_ceiling_division() {
        for m in [0usize, 1, 5, 255, 256, 257, 600] {
            for n in [1i64, 2, 7, 256] {
                let set = set_of(m);
                let batches = chunk(&set, n);
                let n_usize = n as usize;
                assert_eq!(batches.len(), m.div_ceil(n_usize), "m={m} n={n}");
                if let Some((last, rest)) = batches.split_last() {
                    assert!(rest.iter().all(|b| b.len() == n_usize));
                    assert!(!last.is_empty() && last.len() <= n_usize);
                }
            }
        }
    }

    #[test]
    fn chunk_concatenation_reproduces_set() {
        let set = set_of(300);
        let batches = chunk(&set, 64);
        let flat = flatten_batches(&batches);
        let original: Vec<String> = set.iter().map(|t| t.as_str().to_string()).collect();
        assert_eq!(flat, original);
    }

    #[test]
    fn chunk_indices_are_one_based_and_sequential() {
        let batches = chunk(&set_of(10), 3);
        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[test]
    fn chunk_non_positive_size_behaves_as_one() {
        let set = set_of(4);
        for size in [0, -1, i64::MIN] {
            let batches = chunk(&set, size);
            assert_eq!(batches.len(), 4);
            assert!(batches.iter().all(|b| b.len() == 1));
        }
    }

    #[test]
    fn chunk_is_idempotent() {
        let set = set_of(50);
        assert_eq!(chunk(&set, 16), chunk(&set, 16));
    }

    #[test]
    fn chunk_empty_set_yields_no_batches() {
        assert!(chunk(&ExpandedTargetSet::default(), 256).is_empty());
    }

    #[test]
    fn chunk_of_266_with_256_gives_two_batches() {
        let batches = chunk(&set_of(266), DEFAULT_CHUNK_SIZE);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![256, 10]);
    }

    #[test]
    fn clamp_chunk_size_handles_extremes() {
        assert_eq!(clamp_chunk_size(0), 1);
        assert_eq!(clamp_chunk_size(-5), 1);
        assert_eq!(clamp_chunk_size(256), 256);
    }
}
