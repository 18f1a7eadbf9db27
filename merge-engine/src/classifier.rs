//! Conflict classification between an existing section and its candidate
//! replacement.
//!
//! A manual-edit marker in the existing section always wins and stops
//! classification. Otherwise the heuristic checks all run in order; the
//! first one that fires decides the conflict type, the highest severity
//! fired becomes the conflict severity, and every fired check adds evidence.

use serde::{Deserialize, Serialize};

use crate::markers;
use crate::sections;
use crate::types::{Conflict, ConflictKind, FormattingConstruct, Section, Severity};

/// Word-delta ratios above which a change counts as significant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    #[serde(default = "default_medium_ratio")]
    pub medium_ratio: f64,
    #[serde(default = "default_high_ratio")]
    pub high_ratio: f64,
}

fn default_medium_ratio() -> f64 {
    0.3
}
fn default_high_ratio() -> f64 {
    0.6
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            medium_ratio: default_medium_ratio(),
            high_ratio: default_high_ratio(),
        }
    }
}

/// Evidence produced by one check.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub reason: String,
}

/// A heuristic that may find a disagreement between two section versions.
pub trait ConflictCheck: Send + Sync {
    /// Human-readable name for the check.
    fn name(&self) -> &str;

    fn check(&self, existing: &Section, candidate: &Section) -> Option<Finding>;
}

/// Runs the manual-edit rule followed by the registered heuristic checks.
pub struct ConflictClassifier {
    checks: Vec<Box<dyn ConflictCheck>>,
}

impl ConflictClassifier {
    /// Create a classifier with the built-in checks.
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self {
            checks: vec![
                Box::new(WordDeltaCheck { thresholds }),
                Box::new(CustomFormattingCheck),
                Box::new(CodeBlockCheck),
            ],
        }
    }

    /// Classify a section pair. `None` means no conflict: the candidate may
    /// replace the existing text freely.
    pub fn classify(&self, existing: &Section, candidate: &Section) -> Option<Conflict> {
        if markers::has_manual_edit(&existing.raw) {
            return Some(Conflict {
                section: existing.key.clone(),
                kind: ConflictKind::ManualEdits,
                severity: Severity::High,
                reasons: vec!["existing section contains a manual-edit marker".to_string()],
            });
        }

        if existing.normalized() == candidate.normalized() {
            return None;
        }
        let existing = &existing.without_preserved();
        let candidate = &candidate.without_preserved();

        let mut verdict: Option<Conflict> = None;
        for check in &self.checks {
            let Some(finding) = check.check(existing, candidate) else {
                continue;
            };
            tracing::trace!(check = check.name(), section = %existing.key, "conflict check fired");
            match verdict.as_mut() {
                Some(conflict) => {
                    conflict.severity = conflict.severity.max(finding.severity);
                    conflict.reasons.push(finding.reason);
                }
                None => {
                    verdict = Some(Conflict {
                        section: existing.key.clone(),
                        kind: finding.kind,
                        severity: finding.severity,
                        reasons: vec![finding.reason],
                    });
                }
            }
        }
        verdict
    }
}

impl Default for ConflictClassifier {
    fn default() -> Self {
        Self::new(ClassifierThresholds::default())
    }
}

// ──────────────────────────────────────────────────────────────
// Check 1: word-count delta
// ──────────────────────────────────────────────────────────────

struct WordDeltaCheck {
    thresholds: ClassifierThresholds,
}

impl ConflictCheck for WordDeltaCheck {
    fn name(&self) -> &str {
        "word-delta"
    }

    fn check(&self, existing: &Section, candidate: &Section) -> Option<Finding> {
        let before = existing.word_count();
        let after = candidate.word_count();
        let ratio = word_delta_ratio(before, after);

        let severity = if ratio > self.thresholds.high_ratio {
            Severity::High
        } else if ratio > self.thresholds.medium_ratio {
            Severity::Medium
        } else {
            return None;
        };

        Some(Finding {
            kind: ConflictKind::SignificantChanges {
                change_ratio: ratio,
            },
            severity,
            reason: format!(
                "word count changed by {:.0}% ({} -> {})",
                ratio * 100.0,
                before,
                after
            ),
        })
    }
}

/// `|before - after| / before`, or 0 when there was nothing before.
pub fn word_delta_ratio(before: usize, after: usize) -> f64 {
    if before == 0 {
        return 0.0;
    }
    before.abs_diff(after) as f64 / before as f64
}

// ──────────────────────────────────────────────────────────────
// Check 2: custom formatting in the existing section
// ──────────────────────────────────────────────────────────────

struct CustomFormattingCheck;

impl ConflictCheck for CustomFormattingCheck {
    fn name(&self) -> &str {
        "custom-formatting"
    }

    fn check(&self, existing: &Section, _candidate: &Section) -> Option<Finding> {
        let constructs = formatting_constructs(existing.body());
        if constructs.is_empty() {
            return None;
        }
        let names: Vec<String> = constructs.iter().map(|c| c.to_string()).collect();
        Some(Finding {
            reason: format!("existing section uses custom formatting: {}", names.join(", ")),
            kind: ConflictKind::CustomFormatting { constructs },
            severity: Severity::Medium,
        })
    }
}

/// Formatting constructs found outside fenced code, in first-seen order.
pub fn formatting_constructs(text: &str) -> Vec<FormattingConstruct> {
    let mut found = Vec::new();
    for line in prose_lines(text) {
        if let Some(construct) = construct_of(line) {
            if !found.contains(&construct) {
                found.push(construct);
            }
        }
    }
    found
}

/// Classify one prose line as a formatting construct.
pub fn construct_of(line: &str) -> Option<FormattingConstruct> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('|') && trimmed[1..].contains('|') {
        Some(FormattingConstruct::Table)
    } else if trimmed.starts_with('>') {
        Some(FormattingConstruct::BlockQuote)
    } else if is_nested_list_item(line) {
        Some(FormattingConstruct::NestedList)
    } else if has_inline_markup(trimmed) {
        Some(FormattingConstruct::InlineMarkup)
    } else {
        None
    }
}

fn is_nested_list_item(line: &str) -> bool {
    let indent: usize = line
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum();
    if indent < 4 {
        return false;
    }
    let item = line.trim_start();
    if item.starts_with("- ") || item.starts_with("* ") || item.starts_with("+ ") {
        return true;
    }
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && item[digits..].starts_with(". ")
}

fn has_inline_markup(line: &str) -> bool {
    if line.starts_with("<!--") {
        return false;
    }
    let bytes = line.as_bytes();
    bytes.windows(2).any(|w| {
        w[0] == b'<' && (w[1].is_ascii_alphabetic() || w[1] == b'/')
    })
}

/// Lines that are not inside fenced code blocks.
fn prose_lines(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push(line);
        }
    }
    out
}

// ──────────────────────────────────────────────────────────────
// Check 3: fenced code block count
// ──────────────────────────────────────────────────────────────

struct CodeBlockCheck;

impl ConflictCheck for CodeBlockCheck {
    fn name(&self) -> &str {
        "code-blocks"
    }

    fn check(&self, existing: &Section, candidate: &Section) -> Option<Finding> {
        let existing_blocks = sections::count_code_blocks(&existing.raw);
        let candidate_blocks = sections::count_code_blocks(&candidate.raw);
        if existing_blocks == candidate_blocks {
            return None;
        }
        Some(Finding {
            kind: ConflictKind::CodeChanges {
                existing_blocks,
                candidate_blocks,
            },
            severity: Severity::Medium,
            reason: format!(
                "code block count changed ({} -> {})",
                existing_blocks, candidate_blocks
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(key: &str, body: &str) -> Section {
        Section {
            key: key.to_string(),
            level: 2,
            raw: format!("## {key}\n{body}"),
        }
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn test_manual_edit_short_circuits() {
        let existing = section(
            "Usage",
            "<!-- MANUAL-EDIT-START -->\nmine\n<!-- MANUAL-EDIT-END -->\n```\ncode\n```",
        );
        let candidate = section("Usage", &words(40));
        let conflict = ConflictClassifier::default()
            .classify(&existing, &candidate)
            .unwrap();
        assert_eq!(conflict.kind, ConflictKind::ManualEdits);
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.reasons.len(), 1);
    }

    #[test]
    fn test_identical_sections_do_not_conflict() {
        let existing = section("A", "| a | b |\n|---|---|");
        assert!(ConflictClassifier::default()
            .classify(&existing, &existing.clone())
            .is_none());
    }

    #[test]
    fn test_small_change_is_not_a_conflict() {
        let existing = section("A", &words(10));
        let candidate = section("A", &format!("{} extra", words(10)));
        assert!(ConflictClassifier::default()
            .classify(&existing, &candidate)
            .is_none());
    }

    #[test]
    fn test_word_delta_severity() {
        let classifier = ConflictClassifier::default();
        let existing = section("A", &words(10));

        let medium = classifier
            .classify(&existing, &section("A", &words(15)))
            .unwrap();
        assert_eq!(medium.severity, Severity::Medium);

        let high = classifier
            .classify(&existing, &section("A", &words(50)))
            .unwrap();
        assert_eq!(high.severity, Severity::High);
        assert!(matches!(
            high.kind,
            ConflictKind::SignificantChanges { change_ratio } if change_ratio > 0.6
        ));
    }

    #[test]
    fn test_first_firing_check_decides_type() {
        let existing = section("A", &format!("> quoted\n{}", words(10)));
        let candidate = section("A", &format!("{}\n```\nx\n```", words(40)));
        let conflict = ConflictClassifier::default()
            .classify(&existing, &candidate)
            .unwrap();
        assert!(matches!(conflict.kind, ConflictKind::SignificantChanges { .. }));
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.reasons.len(), 3);
    }

    #[test]
    fn test_custom_formatting_detected() {
        let existing = section("A", "text\n| a | b |\n|---|---|\n| 1 | 2 |");
        let candidate = section(
            "A",
            "text with a fresh paragraph of prose replacing the old table",
        );
        let conflict = ConflictClassifier::default()
            .classify(&existing, &candidate)
            .unwrap();
        assert_eq!(
            conflict.kind,
            ConflictKind::CustomFormatting {
                constructs: vec![FormattingConstruct::Table]
            }
        );
        assert!(conflict.severity >= Severity::Medium);
    }

    #[test]
    fn test_code_block_count_change() {
        let existing = section("A", "run\n```sh\nmake\n```");
        let candidate = section("A", "run it now please");
        let conflict = ConflictClassifier::default()
            .classify(&existing, &candidate)
            .unwrap();
        assert_eq!(
            conflict.kind,
            ConflictKind::CodeChanges {
                existing_blocks: 1,
                candidate_blocks: 0
            }
        );
    }

    #[test]
    fn test_preserved_code_block_is_not_a_change() {
        let existing = section(
            "A",
            "run it now\n<!-- PRESERVE-START -->\n```sh\nmake\n```\n<!-- PRESERVE-END -->",
        );
        let candidate = section("A", "run it now");
        assert!(ConflictClassifier::default()
            .classify(&existing, &candidate)
            .is_none());
    }

    #[test]
    fn test_formatting_ignores_code_fences() {
        assert!(formatting_constructs("```\nls | grep x |\n```").is_empty());
        assert_eq!(
            formatting_constructs("- a\n    - deep"),
            vec![FormattingConstruct::NestedList]
        );
        assert_eq!(
            formatting_constructs("see <kbd>Ctrl</kbd>"),
            vec![FormattingConstruct::InlineMarkup]
        );
        assert!(formatting_constructs("<!-- note -->\nx < y").is_empty());
    }

    #[test]
    fn test_word_delta_ratio_empty_existing() {
        assert_eq!(word_delta_ratio(0, 100), 0.0);
        assert_eq!(word_delta_ratio(10, 5), 0.5);
    }
}
