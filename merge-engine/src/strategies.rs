//! Whole-document strategy selection and the strategy resolvers that
//! realise each strategy over a parsed document pair.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::markers::{self, MarkerKind};
use crate::resolutions::{self, ConflictResolverTable, ResolveContext};
use crate::sections::{self, render_sections};
use crate::types::{
    Analysis, Conflict, ConflictHandling, PREAMBLE_KEY, Resolution, Section, SectionMap,
    Strategy,
};

/// Thresholds for [`select_strategy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionThresholds {
    /// Similarity percentage at or above which documents are merged.
    #[serde(default = "default_merge_similarity")]
    pub merge_similarity: f64,
    /// Conflict count above which a new version block is written.
    #[serde(default = "default_max_conflicts")]
    pub max_conflicts: usize,
    /// Structural change count above which the document is replaced.
    #[serde(default = "default_max_structural_changes")]
    pub max_structural_changes: usize,
}

fn default_merge_similarity() -> f64 {
    85.0
}
fn default_max_conflicts() -> usize {
    5
}
fn default_max_structural_changes() -> usize {
    3
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self {
            merge_similarity: default_merge_similarity(),
            max_conflicts: default_max_conflicts(),
            max_structural_changes: default_max_structural_changes(),
        }
    }
}

/// Pick a strategy from aggregate statistics. Never returns `Smart`.
pub fn select_strategy(analysis: &Analysis, thresholds: &SelectionThresholds) -> Strategy {
    if analysis.similarity_percentage >= thresholds.merge_similarity {
        Strategy::Merge
    } else if analysis.conflict_count > thresholds.max_conflicts {
        Strategy::Version
    } else if analysis.structural_changes > thresholds.max_structural_changes {
        Strategy::Replace
    } else if analysis.additions > analysis.modifications {
        Strategy::Append
    } else {
        Strategy::Merge
    }
}

/// Everything a strategy resolver may look at.
pub struct MergeInput<'a> {
    pub existing_text: &'a str,
    pub candidate_text: &'a str,
    pub existing: &'a SectionMap,
    pub candidate: &'a SectionMap,
    pub conflicts: &'a [Conflict],
    pub analysis: &'a Analysis,
}

impl MergeInput<'_> {
    fn conflict_for(&self, key: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.section == key)
    }
}

/// Per-call options for strategy resolvers.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub timestamp: DateTime<Utc>,
    pub conflict_handling: ConflictHandling,
    pub preserve_metadata: bool,
    /// Lower-case heading fragments that mark a section as human-authored.
    pub human_heading_patterns: Vec<String>,
}

/// Result of applying one strategy to a document pair.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub content: String,
    pub resolutions: Vec<Resolution>,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub preserved: Vec<String>,
    pub removed: Vec<String>,
    pub warnings: Vec<String>,
}

impl StrategyOutput {
    fn mark_preserved(&mut self, key: &str) {
        if !self.preserved.iter().any(|k| k == key) {
            self.preserved.push(key.to_string());
        }
    }
}

/// Realises one whole-document strategy.
pub trait StrategyResolver: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn apply(&self, input: &MergeInput<'_>, ctx: &MergeContext) -> StrategyOutput;
}

/// Resolver lookup keyed by strategy.
pub struct StrategyTable {
    resolvers: HashMap<Strategy, Box<dyn StrategyResolver>>,
}

impl StrategyTable {
    /// Create a table with all built-in strategies.
    pub fn new() -> Self {
        let builtin: Vec<Box<dyn StrategyResolver>> = vec![
            Box::new(AppendStrategy),
            Box::new(MergeStrategy),
            Box::new(ReplaceStrategy),
            Box::new(VersionStrategy),
            Box::new(SmartStrategy),
        ];
        Self {
            resolvers: builtin.into_iter().map(|r| (r.strategy(), r)).collect(),
        }
    }

    pub fn get(&self, strategy: Strategy) -> Option<&dyn StrategyResolver> {
        self.resolvers.get(&strategy).map(|r| r.as_ref())
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────────────────────────────────────
// append: only new sections, under a timestamped separator
// ──────────────────────────────────────────────────────────────

struct AppendStrategy;

impl StrategyResolver for AppendStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Append
    }

    fn apply(&self, input: &MergeInput<'_>, ctx: &MergeContext) -> StrategyOutput {
        let mut out = StrategyOutput::default();
        let new_sections: Vec<&Section> = input
            .candidate
            .iter()
            .filter(|s| !input.existing.contains(&s.key))
            .collect();

        if new_sections.is_empty() {
            out.content = input.existing_text.to_string();
            return out;
        }

        let mut content = input.existing_text.trim_end_matches('\n').to_string();
        content.push_str(&format!(
            "\n\n---\n<!-- appended: {} -->\n\n",
            ctx.timestamp.to_rfc3339()
        ));
        content.push_str(&render_sections(new_sections.iter().copied()));
        out.content = content;
        out.added = new_sections.iter().map(|s| s.key.clone()).collect();
        out
    }
}

// ──────────────────────────────────────────────────────────────
// merge: candidate order, conflicts resolved, human sections kept
// ──────────────────────────────────────────────────────────────

struct MergeStrategy;

impl StrategyResolver for MergeStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Merge
    }

    fn apply(&self, input: &MergeInput<'_>, ctx: &MergeContext) -> StrategyOutput {
        let table = ConflictResolverTable::new(ctx.conflict_handling);
        let rctx = ResolveContext {
            timestamp: ctx.timestamp,
            strategy: Strategy::Merge,
        };
        let mut out = StrategyOutput::default();
        let mut merged: Vec<Section> = Vec::new();

        for candidate in input.candidate.iter() {
            let Some(existing) = input.existing.get(&candidate.key) else {
                merged.push(candidate.clone());
                out.added.push(candidate.key.clone());
                continue;
            };
            let section = resolve_shared(input, existing, candidate, &table, &rctx, &mut out);
            merged.push(section);
        }

        // Existing-only sections: keep what a human wrote, drop the rest.
        let existing_keys: Vec<&str> = input.existing.keys().collect();
        for (idx, existing) in input.existing.iter().enumerate() {
            if input.candidate.contains(&existing.key) {
                continue;
            }
            if is_human_authored(existing, &ctx.human_heading_patterns) {
                let anchor = existing_keys[..idx]
                    .iter()
                    .rev()
                    .find_map(|k| merged.iter().position(|s| s.key == *k));
                let at = match anchor {
                    Some(pos) => pos + 1,
                    None if merged.first().is_some_and(|s| s.is_preamble()) => 1,
                    None => 0,
                };
                merged.insert(at, existing.clone());
                out.mark_preserved(&existing.key);
            } else {
                tracing::warn!(section = %existing.key, "dropping section absent from generated content");
                out.warnings.push(format!(
                    "dropped section '{}' (absent from generated content)",
                    existing.key
                ));
                out.removed.push(existing.key.clone());
            }
        }

        restore_shadowed(input.existing, &mut merged, &mut out);
        out.content = render_sections(&merged);
        out
    }
}

/// Resolve a section present in both documents, recording the outcome.
fn resolve_shared(
    input: &MergeInput<'_>,
    existing: &Section,
    candidate: &Section,
    table: &ConflictResolverTable,
    rctx: &ResolveContext,
    out: &mut StrategyOutput,
) -> Section {
    let mut raw = match input.conflict_for(&candidate.key) {
        Some(conflict) => {
            let resolution = table.resolve(conflict, existing, candidate, rctx);
            if resolution.content == existing.raw {
                out.mark_preserved(&existing.key);
            } else {
                out.updated.push(existing.key.clone());
            }
            let raw = resolution.content.clone();
            out.resolutions.push(resolution);
            raw
        }
        None if existing.normalized() == candidate.normalized() => existing.raw.clone(),
        None => {
            out.updated.push(existing.key.clone());
            candidate.raw.clone()
        }
    };

    if resolutions::carry_preserved(&existing.raw, &mut raw) > 0 {
        out.mark_preserved(&existing.key);
    }

    let level = if raw == existing.raw {
        existing.level
    } else {
        candidate.level
    };
    Section {
        key: existing.key.clone(),
        level,
        raw,
    }
}

/// Put back earlier duplicates of a heading that hold manual-edit or preserve
/// blocks, verbatim and just before the section that shadowed them.
fn restore_shadowed(existing: &SectionMap, sections: &mut Vec<Section>, out: &mut StrategyOutput) {
    for shadowed in existing.shadowed().iter().rev() {
        let protected = markers::has_manual_edit(&shadowed.raw)
            || !markers::blocks_of(&shadowed.raw, MarkerKind::Preserve).is_empty();
        if !protected {
            continue;
        }
        let at = sections
            .iter()
            .position(|s| s.key == shadowed.key)
            .unwrap_or(sections.len());
        sections.insert(at, shadowed.clone());
        out.mark_preserved(&shadowed.key);
        tracing::warn!(section = %shadowed.key, "kept protected content of a duplicate heading");
        out.warnings.push(format!(
            "kept the protected content of an earlier '{}' section",
            shadowed.key
        ));
    }
}

/// A section is human-authored if it carries any marker or its heading
/// matches one of the configured patterns.
pub fn is_human_authored(section: &Section, patterns: &[String]) -> bool {
    if markers::has_any_marker(&section.raw) {
        return true;
    }
    let key = section.key.to_lowercase();
    !section.is_preamble() && patterns.iter().any(|p| key.contains(&p.to_lowercase()))
}

// ──────────────────────────────────────────────────────────────
// replace: candidate wins, metadata and protected content survive
// ──────────────────────────────────────────────────────────────

struct ReplaceStrategy;

impl StrategyResolver for ReplaceStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Replace
    }

    fn apply(&self, input: &MergeInput<'_>, ctx: &MergeContext) -> StrategyOutput {
        let mut out = StrategyOutput::default();
        let mut sections: Vec<Section> = input.candidate.iter().cloned().collect();

        // Manual-edit sections are restored in place or appended.
        for existing in input.existing.iter() {
            if !markers::has_manual_edit(&existing.raw) {
                continue;
            }
            match sections.iter_mut().find(|s| s.key == existing.key) {
                Some(slot) => *slot = existing.clone(),
                None => sections.push(existing.clone()),
            }
            out.mark_preserved(&existing.key);
        }
        for section in sections.iter_mut() {
            if let Some(existing) = input.existing.get(&section.key) {
                if resolutions::carry_preserved(&existing.raw, &mut section.raw) > 0 {
                    out.mark_preserved(&section.key);
                }
            }
        }
        restore_shadowed(input.existing, &mut sections, &mut out);

        let mut content = if out.preserved.is_empty() {
            input.candidate_text.to_string()
        } else {
            render_sections(&sections)
        };

        if ctx.preserve_metadata {
            if let Some(metadata) = missing_metadata(input.existing_text, &content) {
                content = format!("{}\n\n{}", metadata, content.trim_start_matches('\n'));
                out.mark_preserved(PREAMBLE_KEY);
            }
        }

        out.added = input
            .candidate
            .keys()
            .filter(|k| !input.existing.contains(k))
            .map(str::to_string)
            .collect();
        out.updated = input
            .candidate
            .keys()
            .filter(|k| input.existing.contains(k) && !out.preserved.iter().any(|p| p.as_str() == *k))
            .map(str::to_string)
            .collect();
        out.removed = input
            .existing
            .keys()
            .filter(|k| !input.candidate.contains(k) && !out.preserved.iter().any(|p| p.as_str() == *k))
            .map(str::to_string)
            .collect();
        out.content = content;
        out
    }
}

/// Metadata lines of the old document that the new content lacks.
fn missing_metadata(old: &str, new: &str) -> Option<String> {
    let metadata = extract_metadata(old)?;
    if new.trim_start().starts_with("---\n") {
        return None;
    }
    let missing: Vec<&str> = metadata
        .lines()
        .filter(|line| line.trim() == "---" || !new.contains(line.trim()))
        .collect();
    let meaningful = missing.iter().any(|l| l.trim() != "---");
    meaningful.then(|| missing.join("\n"))
}

/// Leading front matter block, or leading `key: value` lines before the
/// first heading.
pub fn extract_metadata(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.first().map(|l| l.trim()) == Some("---") {
        let end = lines.iter().skip(1).position(|l| l.trim() == "---")?;
        return Some(lines[..=end + 1].join("\n"));
    }

    let mut collected = Vec::new();
    for line in lines.iter().skip_while(|l| l.trim().is_empty()) {
        if is_metadata_line(line) {
            collected.push(*line);
        } else {
            break;
        }
    }
    (!collected.is_empty()).then(|| collected.join("\n"))
}

fn is_metadata_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.starts_with('#') || sections::heading_of(trimmed).is_some() {
        return false;
    }
    if let Some(rest) = trimmed.strip_prefix("**") {
        return rest.contains(":**");
    }
    match trimmed.split_once(": ") {
        Some((key, value)) => {
            !key.is_empty()
                && key.len() <= 40
                && !value.trim().is_empty()
                && key
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ' ')
        }
        None => false,
    }
}

// ──────────────────────────────────────────────────────────────
// version: candidate on top, previous content kept verbatim below
// ──────────────────────────────────────────────────────────────

struct VersionStrategy;

impl StrategyResolver for VersionStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Version
    }

    fn apply(&self, input: &MergeInput<'_>, ctx: &MergeContext) -> StrategyOutput {
        let ts = ctx.timestamp.to_rfc3339();
        let mut content = String::new();
        content.push_str(&format!("<!-- version-block: {ts} -->\n"));
        content.push_str(&format!(
            "**New version generated {}:** {} conflicts with the previous content ({:.1}% similar). The previous content is retained below.\n\n",
            ts, input.analysis.conflict_count, input.analysis.similarity_percentage
        ));
        content.push_str(input.candidate_text.trim_end_matches('\n'));
        content.push_str(&format!(
            "\n\n---\n\n<!-- previous-version: retained {ts} -->\n"
        ));
        content.push_str(input.existing_text.trim_end_matches('\n'));
        content.push('\n');

        StrategyOutput {
            content,
            added: input.candidate.keys().map(str::to_string).collect(),
            preserved: input.existing.keys().map(str::to_string).collect(),
            ..Default::default()
        }
    }
}

// ──────────────────────────────────────────────────────────────
// smart: existing order, new sections appended, per-conflict resolution
// ──────────────────────────────────────────────────────────────

struct SmartStrategy;

impl StrategyResolver for SmartStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::Smart
    }

    fn apply(&self, input: &MergeInput<'_>, ctx: &MergeContext) -> StrategyOutput {
        let table = ConflictResolverTable::new(ConflictHandling::Smart);
        let rctx = ResolveContext {
            timestamp: ctx.timestamp,
            strategy: Strategy::Smart,
        };
        let mut out = StrategyOutput::default();
        let mut merged: Vec<Section> = input.existing.iter().cloned().collect();

        for candidate in input.candidate.iter() {
            if !input.existing.contains(&candidate.key) {
                merged.push(candidate.clone());
                out.added.push(candidate.key.clone());
            }
        }

        for slot in merged.iter_mut() {
            let (Some(existing), Some(candidate)) =
                (input.existing.get(&slot.key), input.candidate.get(&slot.key))
            else {
                continue;
            };
            *slot = resolve_shared(input, existing, candidate, &table, &rctx, &mut out);
        }

        for existing in input.existing.iter() {
            if !input.candidate.contains(&existing.key) {
                out.mark_preserved(&existing.key);
            }
        }

        restore_shadowed(input.existing, &mut merged, &mut out);
        out.content = render_sections(&merged);
        out
    }
}
