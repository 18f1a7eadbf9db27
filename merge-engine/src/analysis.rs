//! Whole-document statistics.
//!
//! Line-level diffing uses the `similar` crate (Myers diff). The same diff
//! drives both the similarity percentage used for strategy selection and
//! the added/deleted/changed line counts reported to callers.

use similar::{DiffTag, TextDiff};

use crate::types::{Analysis, ChangeStats, SectionMap};

/// Line-level similarity between two texts, as a percentage in `0..=100`.
pub fn similarity_percentage(old: &str, new: &str) -> f64 {
    if old.is_empty() && new.is_empty() {
        return 100.0;
    }
    let diff = TextDiff::from_lines(old, new);
    f64::from(diff.ratio()) * 100.0
}

/// Count added, deleted and changed lines between two texts.
///
/// A replaced run pairs old and new lines one-to-one; the paired lines count
/// as changed and the remainder as added or deleted.
pub fn line_changes(old: &str, new: &str) -> ChangeStats {
    let diff = TextDiff::from_lines(old, new);
    let mut stats = ChangeStats::default();

    for op in diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {}
            DiffTag::Insert => stats.lines_added += new_range.len(),
            DiffTag::Delete => stats.lines_deleted += old_range.len(),
            DiffTag::Replace => {
                let paired = old_range.len().min(new_range.len());
                stats.lines_changed += paired;
                stats.lines_added += new_range.len() - paired;
                stats.lines_deleted += old_range.len() - paired;
            }
        }
    }
    stats
}

/// Build the aggregate analysis for one merge.
pub fn analyze(
    existing_text: &str,
    candidate_text: &str,
    existing: &SectionMap,
    candidate: &SectionMap,
    conflict_count: usize,
) -> Analysis {
    let mut additions = 0;
    let mut modifications = 0;
    for section in candidate.iter() {
        match existing.get(&section.key) {
            None => additions += 1,
            Some(prev) if prev.raw.trim_end() != section.raw.trim_end() => modifications += 1,
            Some(_) => {}
        }
    }

    Analysis {
        similarity_percentage: similarity_percentage(existing_text, candidate_text),
        conflict_count,
        structural_changes: structural_changes(existing, candidate),
        additions,
        modifications,
    }
}

/// Reordered shared sections plus shared sections whose heading level changed.
///
/// Reordering is measured as the number of shared keys outside the longest
/// common subsequence of the two key orders.
pub fn structural_changes(existing: &SectionMap, candidate: &SectionMap) -> usize {
    let existing_order: Vec<&str> = existing
        .keys()
        .filter(|k| candidate.contains(k))
        .collect();
    let candidate_order: Vec<&str> = candidate
        .keys()
        .filter(|k| existing.contains(k))
        .collect();

    let reordered = existing_order.len() - lcs_length(&existing_order, &candidate_order);

    let level_changes = candidate
        .iter()
        .filter(|s| {
            existing
                .get(&s.key)
                .is_some_and(|prev| prev.level != s.level)
        })
        .count();

    reordered + level_changes
}

fn lcs_length<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::parse_sections;

    #[test]
    fn test_similarity_identical() {
        assert_eq!(similarity_percentage("a\nb\n", "a\nb\n"), 100.0);
        assert_eq!(similarity_percentage("", ""), 100.0);
    }

    #[test]
    fn test_similarity_disjoint() {
        assert_eq!(similarity_percentage("a\nb\n", "c\nd\n"), 0.0);
    }

    #[test]
    fn test_line_changes() {
        let stats = line_changes("a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(stats.lines_changed, 1);
        assert_eq!(stats.lines_added, 1);
        assert_eq!(stats.lines_deleted, 0);

        let stats = line_changes("a\nb\n", "a\n");
        assert_eq!(stats.lines_deleted, 1);
        assert!(line_changes("same\n", "same\n").is_empty());
    }

    #[test]
    fn test_structural_changes_counts_reorder_and_levels() {
        let existing = parse_sections("# A\n# B\n# C\n");
        let candidate = parse_sections("# B\n# A\n## C\n");
        // One of A/B is out of order, and C changed level.
        assert_eq!(structural_changes(&existing, &candidate), 2);
    }

    #[test]
    fn test_analyze_additions_and_modifications() {
        let old = "# A\none\n# B\ntwo\n";
        let new = "# A\none\n# B\nchanged\n# C\nnew\n";
        let analysis = analyze(old, new, &parse_sections(old), &parse_sections(new), 0);
        assert_eq!(analysis.additions, 1);
        assert_eq!(analysis.modifications, 1);
        assert_eq!(analysis.structural_changes, 0);
        assert!(analysis.similarity_percentage > 0.0 && analysis.similarity_percentage < 100.0);
    }
}
