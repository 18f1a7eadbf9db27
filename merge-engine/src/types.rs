//! Core types for the merge engine.
//!
//! A document is modelled as an ordered sequence of [`Section`]s keyed by
//! heading text. Merging compares an existing document against a freshly
//! generated candidate section by section, producing typed [`Conflict`]s and
//! per-section [`Resolution`]s under a whole-document [`Strategy`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Key of the synthetic section holding everything before the first heading.
pub const PREAMBLE_KEY: &str = "(preamble)";

/// A heading plus its body text, the atomic unit of merge comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text (or [`PREAMBLE_KEY`]).
    pub key: String,
    /// Heading level 1–6, or 0 for the preamble.
    pub level: u8,
    /// Raw text including the heading line, lines joined with `\n`.
    pub raw: String,
}

impl Section {
    pub fn is_preamble(&self) -> bool {
        self.level == 0
    }

    /// The heading line, or `None` for the preamble.
    pub fn heading_line(&self) -> Option<&str> {
        if self.is_preamble() {
            None
        } else {
            self.raw.lines().next()
        }
    }

    /// Section text without the heading line.
    pub fn body(&self) -> &str {
        if self.is_preamble() {
            return &self.raw;
        }
        match self.raw.find('\n') {
            Some(idx) => &self.raw[idx + 1..],
            None => "",
        }
    }

    /// Words in the body, ignoring whole-line HTML comments.
    pub fn word_count(&self) -> usize {
        self.body()
            .lines()
            .filter(|line| !is_comment_line(line))
            .map(|line| line.split_whitespace().count())
            .sum()
    }

    /// The section with its closed preserve blocks removed. Those blocks are
    /// carried over on every merge, so they take no part in comparisons.
    pub fn without_preserved(&self) -> Section {
        Section {
            key: self.key.clone(),
            level: self.level,
            raw: crate::markers::strip_blocks(&self.raw, crate::markers::MarkerKind::Preserve),
        }
    }

    /// Raw text without preserve blocks and annotation comment lines (other
    /// marker tokens kept), trimmed.
    pub fn normalized(&self) -> String {
        crate::markers::strip_blocks(&self.raw, crate::markers::MarkerKind::Preserve)
            .lines()
            .filter(|line| !is_comment_line(line) || crate::markers::token_of(line).is_some())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

/// True for a line that is entirely one HTML comment.
pub fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("<!--") && trimmed.ends_with("-->")
}

/// Ordered map of section key to [`Section`].
///
/// A later section with an already-seen key replaces the earlier one in place;
/// the replaced keys are recorded in `duplicates` and the replaced sections,
/// in document order, in `shadowed`.
#[derive(Debug, Clone, Default)]
pub struct SectionMap {
    sections: Vec<Section>,
    index: HashMap<String, usize>,
    duplicates: Vec<String>,
    shadowed: Vec<Section>,
}

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, section: Section) {
        match self.index.get(&section.key) {
            Some(&pos) => {
                self.duplicates.push(section.key.clone());
                let earlier = std::mem::replace(&mut self.sections[pos], section);
                self.shadowed.push(earlier);
            }
            None => {
                self.index.insert(section.key.clone(), self.sections.len());
                self.sections.push(section);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Section> {
        self.index.get(key).map(|&pos| &self.sections[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Keys that appeared more than once during parsing.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// Earlier occurrences of duplicated keys, in document order.
    pub fn shadowed(&self) -> &[Section] {
        &self.shadowed
    }
}

/// Severity of a conflict.
/// Ordered Low < Medium < High so that derived Ord works correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Hand-applied formatting recognised in an existing section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormattingConstruct {
    Table,
    BlockQuote,
    InlineMarkup,
    NestedList,
}

impl fmt::Display for FormattingConstruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormattingConstruct::Table => write!(f, "table"),
            FormattingConstruct::BlockQuote => write!(f, "block quote"),
            FormattingConstruct::InlineMarkup => write!(f, "inline markup"),
            FormattingConstruct::NestedList => write!(f, "nested list"),
        }
    }
}

/// What kind of disagreement was found between two versions of a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictKind {
    /// The existing section carries a manual-edit marker.
    ManualEdits,
    /// The word count changed by more than the configured ratio.
    SignificantChanges { change_ratio: f64 },
    /// The existing section uses formatting the candidate may not reproduce.
    CustomFormatting { constructs: Vec<FormattingConstruct> },
    /// The number of fenced code blocks differs.
    CodeChanges {
        existing_blocks: usize,
        candidate_blocks: usize,
    },
}

impl ConflictKind {
    pub fn tag(&self) -> ConflictTag {
        match self {
            ConflictKind::ManualEdits => ConflictTag::ManualEdits,
            ConflictKind::SignificantChanges { .. } => ConflictTag::SignificantChanges,
            ConflictKind::CustomFormatting { .. } => ConflictTag::CustomFormatting,
            ConflictKind::CodeChanges { .. } => ConflictTag::CodeChanges,
        }
    }
}

/// Field-less discriminant of [`ConflictKind`], used to key resolver tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictTag {
    ManualEdits,
    SignificantChanges,
    CustomFormatting,
    CodeChanges,
}

impl fmt::Display for ConflictTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictTag::ManualEdits => write!(f, "manual_edits"),
            ConflictTag::SignificantChanges => write!(f, "significant_changes"),
            ConflictTag::CustomFormatting => write!(f, "custom_formatting"),
            ConflictTag::CodeChanges => write!(f, "code_changes"),
        }
    }
}

/// A detected disagreement between an existing and a candidate section
/// sharing the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub section: String,
    #[serde(flatten)]
    pub kind: ConflictKind,
    pub severity: Severity,
    pub reasons: Vec<String>,
}

/// Whole-document reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Append,
    Merge,
    Replace,
    Version,
    Smart,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Append => "append",
            Strategy::Merge => "merge",
            Strategy::Replace => "replace",
            Strategy::Version => "version",
            Strategy::Smart => "smart",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown strategy '{0}' (expected auto, append, merge, replace, version or smart)")]
pub struct UnknownStrategy(pub String);

/// Strategy requested by the caller; `Auto` defers to the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyChoice {
    #[default]
    Auto,
    Append,
    Merge,
    Replace,
    Version,
    Smart,
}

impl StrategyChoice {
    pub fn fixed(&self) -> Option<Strategy> {
        match self {
            StrategyChoice::Auto => None,
            StrategyChoice::Append => Some(Strategy::Append),
            StrategyChoice::Merge => Some(Strategy::Merge),
            StrategyChoice::Replace => Some(Strategy::Replace),
            StrategyChoice::Version => Some(Strategy::Version),
            StrategyChoice::Smart => Some(Strategy::Smart),
        }
    }
}

impl FromStr for StrategyChoice {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StrategyChoice::Auto),
            "append" => Ok(StrategyChoice::Append),
            "merge" => Ok(StrategyChoice::Merge),
            "replace" => Ok(StrategyChoice::Replace),
            "version" => Ok(StrategyChoice::Version),
            "smart" => Ok(StrategyChoice::Smart),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// How conflicting sections are settled under the `merge` strategy.
/// Manual-edit conflicts always keep the existing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictHandling {
    /// Dispatch each conflict to its type-specific resolver.
    #[default]
    Smart,
    KeepExisting,
    TakeCandidate,
    /// Always embed both versions between conflict markers.
    Mark,
}

impl FromStr for ConflictHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smart" => Ok(ConflictHandling::Smart),
            "keep-existing" | "keep_existing" => Ok(ConflictHandling::KeepExisting),
            "take-candidate" | "take_candidate" => Ok(ConflictHandling::TakeCandidate),
            "mark" => Ok(ConflictHandling::Mark),
            other => Err(format!(
                "unknown conflict handling '{other}' (expected smart, keep-existing, take-candidate or mark)"
            )),
        }
    }
}

/// Whole-document statistics that drive strategy selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub similarity_percentage: f64,
    pub conflict_count: usize,
    pub structural_changes: usize,
    pub additions: usize,
    pub modifications: usize,
}

/// Line-level change counts between two texts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStats {
    pub lines_added: usize,
    pub lines_deleted: usize,
    pub lines_changed: usize,
}

impl ChangeStats {
    pub fn is_empty(&self) -> bool {
        self.lines_added == 0 && self.lines_deleted == 0 && self.lines_changed == 0
    }
}

/// The applied outcome for one conflicting section pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub section: String,
    #[serde(skip)]
    pub content: String,
    pub strategy: Strategy,
    pub log: String,
    /// Both versions were embedded between conflict markers for a human.
    pub unresolved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_serializes_with_type_tag() {
        let conflict = Conflict {
            section: "Usage".to_string(),
            kind: ConflictKind::CodeChanges {
                existing_blocks: 2,
                candidate_blocks: 1,
            },
            severity: Severity::Medium,
            reasons: vec!["code block count changed".to_string()],
        };
        let value = serde_json::to_value(&conflict).unwrap();
        assert_eq!(value["type"], "code_changes");
        assert_eq!(value["severity"], "medium");
        assert_eq!(value["existing_blocks"], 2);

        let back: Conflict = serde_json::from_value(value).unwrap();
        assert_eq!(back, conflict);
    }

    #[test]
    fn test_strategy_choice_parsing() {
        assert_eq!("auto".parse::<StrategyChoice>().unwrap(), StrategyChoice::Auto);
        assert_eq!(" Version ".parse::<StrategyChoice>().unwrap().fixed(), Some(Strategy::Version));
        assert!("rebase".parse::<StrategyChoice>().is_err());
        assert_eq!(
            "keep-existing".parse::<ConflictHandling>().unwrap(),
            ConflictHandling::KeepExisting
        );
    }

    #[test]
    fn test_duplicate_keys_replace_in_place() {
        let mut map = SectionMap::new();
        for (key, raw) in [("A", "# A\none"), ("B", "# B"), ("A", "# A\ntwo")] {
            map.insert(Section {
                key: key.to_string(),
                level: 1,
                raw: raw.to_string(),
            });
        }
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(map.get("A").unwrap().body(), "two");
        assert_eq!(map.duplicates(), ["A".to_string()]);
        assert_eq!(map.shadowed().len(), 1);
        assert_eq!(map.shadowed()[0].body(), "one");
    }

    #[test]
    fn test_word_count_skips_comment_lines() {
        let section = Section {
            key: "A".to_string(),
            level: 2,
            raw: "## A\n<!-- updated: now -->\none two three".to_string(),
        };
        assert_eq!(section.word_count(), 3);
        assert_eq!(section.normalized(), "## A\none two three");
    }

    #[test]
    fn test_preserve_blocks_do_not_take_part_in_comparison() {
        let section = Section {
            key: "A".to_string(),
            level: 2,
            raw: "## A\none two\n<!-- PRESERVE-START -->\nthree four\n<!-- PRESERVE-END -->".to_string(),
        };
        assert_eq!(section.normalized(), "## A\none two");
        assert_eq!(section.without_preserved().word_count(), 2);
    }
}
