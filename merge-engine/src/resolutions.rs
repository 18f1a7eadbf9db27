//! Per-conflict resolvers.
//!
//! Each conflict type maps to a resolver through a [`ConflictResolverTable`].
//! The table is built from a [`ConflictHandling`] mode; in every mode a
//! manual-edit conflict keeps the existing section verbatim.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::classifier;
use crate::markers::{self, MarkerKind, MarkerMeta};
use crate::sections;
use crate::types::{
    Conflict, ConflictHandling, ConflictKind, ConflictTag, FormattingConstruct, Resolution,
    Section, Severity, Strategy,
};

/// Opening line of an in-text conflict block.
pub const CONFLICT_OPEN: &str = "<<<<<<< existing";
pub const CONFLICT_SEPARATOR: &str = "=======";
pub const CONFLICT_CLOSE: &str = ">>>>>>> generated";

/// Per-call inputs shared by all resolvers.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext {
    pub timestamp: DateTime<Utc>,
    pub strategy: Strategy,
}

/// Settles one conflicting section pair.
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(
        &self,
        conflict: &Conflict,
        existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution;
}

/// Resolver lookup keyed by conflict type.
pub struct ConflictResolverTable {
    table: HashMap<ConflictTag, Box<dyn ConflictResolver>>,
}

impl ConflictResolverTable {
    pub fn new(handling: ConflictHandling) -> Self {
        let mut table: HashMap<ConflictTag, Box<dyn ConflictResolver>> = HashMap::new();
        table.insert(ConflictTag::ManualEdits, Box::new(KeepExisting));

        let others = [
            ConflictTag::SignificantChanges,
            ConflictTag::CustomFormatting,
            ConflictTag::CodeChanges,
        ];
        match handling {
            ConflictHandling::Smart => {
                table.insert(ConflictTag::SignificantChanges, Box::new(SignificantChange));
                table.insert(ConflictTag::CustomFormatting, Box::new(RetainFormatting));
                table.insert(ConflictTag::CodeChanges, Box::new(RetainCodeBlocks));
            }
            ConflictHandling::KeepExisting => {
                for tag in others {
                    table.insert(tag, Box::new(KeepExisting));
                }
            }
            ConflictHandling::TakeCandidate => {
                for tag in others {
                    table.insert(tag, Box::new(TakeCandidate));
                }
            }
            ConflictHandling::Mark => {
                for tag in others {
                    table.insert(tag, Box::new(MarkConflict));
                }
            }
        }
        Self { table }
    }

    pub fn resolve(
        &self,
        conflict: &Conflict,
        existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        match self.table.get(&conflict.kind.tag()) {
            Some(resolver) => resolver.resolve(conflict, existing, candidate, ctx),
            // Every tag is registered by `new`; fall back to the safest choice.
            None => KeepExisting.resolve(conflict, existing, candidate, ctx),
        }
    }
}

// ──────────────────────────────────────────────────────────────
// Keep existing verbatim
// ──────────────────────────────────────────────────────────────

struct KeepExisting;

impl ConflictResolver for KeepExisting {
    fn name(&self) -> &str {
        "keep-existing"
    }

    fn resolve(
        &self,
        conflict: &Conflict,
        existing: &Section,
        _candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        Resolution {
            section: existing.key.clone(),
            content: existing.raw.clone(),
            strategy: ctx.strategy,
            log: format!(
                "kept existing '{}' ({})",
                existing.key,
                conflict.kind.tag()
            ),
            unresolved: false,
        }
    }
}

// ──────────────────────────────────────────────────────────────
// Take candidate as-is
// ──────────────────────────────────────────────────────────────

struct TakeCandidate;

impl ConflictResolver for TakeCandidate {
    fn name(&self) -> &str {
        "take-candidate"
    }

    fn resolve(
        &self,
        conflict: &Conflict,
        _existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        Resolution {
            section: candidate.key.clone(),
            content: candidate.raw.clone(),
            strategy: ctx.strategy,
            log: format!(
                "replaced '{}' with generated content ({})",
                candidate.key,
                conflict.kind.tag()
            ),
            unresolved: false,
        }
    }
}

// ──────────────────────────────────────────────────────────────
// Embed both versions for a human
// ──────────────────────────────────────────────────────────────

struct MarkConflict;

impl ConflictResolver for MarkConflict {
    fn name(&self) -> &str {
        "mark-conflict"
    }

    fn resolve(
        &self,
        conflict: &Conflict,
        existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        Resolution {
            section: existing.key.clone(),
            content: conflict_block(conflict, existing, candidate),
            strategy: ctx.strategy,
            log: format!(
                "'{}' needs manual review: {} ({})",
                existing.key,
                conflict.kind.tag(),
                conflict.severity
            ),
            unresolved: true,
        }
    }
}

/// Both bodies between conflict markers under the existing heading.
pub fn conflict_block(conflict: &Conflict, existing: &Section, candidate: &Section) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(heading) = existing.heading_line() {
        lines.push(heading.to_string());
    }
    lines.push(format!(
        "<!-- unresolved conflict: {} ({}); keep one version and remove the markers -->",
        conflict.kind.tag(),
        conflict.severity
    ));
    lines.push(CONFLICT_OPEN.to_string());
    push_trimmed(&mut lines, existing.body());
    lines.push(CONFLICT_SEPARATOR.to_string());
    push_trimmed(&mut lines, candidate.body());
    lines.push(CONFLICT_CLOSE.to_string());
    with_trailing(lines.join("\n"), &candidate.raw)
}

/// True when text still holds an unresolved conflict block.
pub fn has_conflict_block(text: &str) -> bool {
    text.lines().any(|l| l.trim_end() == CONFLICT_OPEN)
}

// ──────────────────────────────────────────────────────────────
// Significant changes: high → mark, otherwise candidate + note
// ──────────────────────────────────────────────────────────────

struct SignificantChange;

impl ConflictResolver for SignificantChange {
    fn name(&self) -> &str {
        "significant-change"
    }

    fn resolve(
        &self,
        conflict: &Conflict,
        existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        if conflict.severity == Severity::High {
            return MarkConflict.resolve(conflict, existing, candidate, ctx);
        }

        let note = format!(
            "<!-- updated: {} (word count {} -> {}) -->",
            ctx.timestamp.to_rfc3339(),
            existing.word_count(),
            candidate.word_count()
        );
        Resolution {
            section: candidate.key.clone(),
            content: insert_after_heading(candidate, &note),
            strategy: ctx.strategy,
            log: format!(
                "updated '{}' with generated content ({} change)",
                candidate.key, conflict.severity
            ),
            unresolved: false,
        }
    }
}

// ──────────────────────────────────────────────────────────────
// Custom formatting: candidate prose, existing tables/quotes/markup kept
// ──────────────────────────────────────────────────────────────

struct RetainFormatting;

impl ConflictResolver for RetainFormatting {
    fn name(&self) -> &str {
        "retain-formatting"
    }

    fn resolve(
        &self,
        conflict: &Conflict,
        existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        let constructs = match &conflict.kind {
            ConflictKind::CustomFormatting { constructs } => constructs.clone(),
            _ => classifier::formatting_constructs(existing.body()),
        };
        let candidate_has = classifier::formatting_constructs(candidate.body());
        // Blocks already under a preserve marker are carried separately.
        let unprotected = existing.without_preserved();

        let retained: Vec<String> = formatting_blocks(unprotected.body())
            .into_iter()
            .filter(|(construct, _)| {
                constructs.contains(construct)
                    && *construct != FormattingConstruct::NestedList
                    && !candidate_has.contains(construct)
            })
            .map(|(_, block)| block)
            .filter(|block| !candidate.raw.contains(block.as_str()))
            .collect();

        let content = append_blocks(
            candidate,
            "<!-- retained formatting from previous version -->",
            &retained,
        );
        Resolution {
            section: candidate.key.clone(),
            content,
            strategy: ctx.strategy,
            log: format!(
                "updated '{}' and retained {} formatted block(s)",
                candidate.key,
                retained.len()
            ),
            unresolved: false,
        }
    }
}

/// Contiguous runs of lines sharing one formatting construct.
fn formatting_blocks(text: &str) -> Vec<(FormattingConstruct, String)> {
    let mut blocks: Vec<(FormattingConstruct, Vec<&str>)> = Vec::new();
    let mut in_fence = false;
    let mut previous: Option<FormattingConstruct> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            previous = None;
            continue;
        }
        if in_fence {
            continue;
        }
        match classifier::construct_of(line) {
            Some(construct) if previous == Some(construct) => {
                if let Some((_, lines)) = blocks.last_mut() {
                    lines.push(line);
                }
            }
            Some(construct) => blocks.push((construct, vec![line])),
            None => {}
        }
        previous = classifier::construct_of(line);
    }

    blocks
        .into_iter()
        .map(|(construct, lines)| (construct, lines.join("\n")))
        .collect()
}

// ──────────────────────────────────────────────────────────────
// Code changes: candidate + existing fenced blocks it dropped
// ──────────────────────────────────────────────────────────────

struct RetainCodeBlocks;

impl ConflictResolver for RetainCodeBlocks {
    fn name(&self) -> &str {
        "retain-code-blocks"
    }

    fn resolve(
        &self,
        _conflict: &Conflict,
        existing: &Section,
        candidate: &Section,
        ctx: &ResolveContext,
    ) -> Resolution {
        let unprotected = existing.without_preserved();
        let kept: Vec<String> = sections::code_blocks(unprotected.body())
            .into_iter()
            .filter(|block| !candidate.raw.contains(block.as_str()))
            .collect();

        let content = append_blocks(
            candidate,
            "<!-- preserved code block from previous version -->",
            &kept,
        );
        Resolution {
            section: candidate.key.clone(),
            content,
            strategy: ctx.strategy,
            log: format!(
                "updated '{}' and preserved {} code block(s)",
                candidate.key,
                kept.len()
            ),
            unresolved: false,
        }
    }
}

// ──────────────────────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────────────────────

/// Re-append preserve blocks of `existing` missing from `resolved`.
/// Returns the number of blocks carried over.
pub fn carry_preserved(existing: &str, resolved: &mut String) -> usize {
    let missing: Vec<String> = markers::blocks_of(existing, MarkerKind::Preserve)
        .into_iter()
        .filter(|block| !resolved.contains(block.as_str()))
        .collect();
    if missing.is_empty() {
        return 0;
    }
    let trailing = trailing_newlines(resolved).to_string();
    let mut out = resolved.trim_end_matches('\n').to_string();
    for block in &missing {
        out.push('\n');
        out.push_str(block);
    }
    out.push_str(&trailing);
    *resolved = out;
    missing.len()
}

fn insert_after_heading(section: &Section, line: &str) -> String {
    match section.heading_line() {
        Some(heading) => format!("{heading}\n{line}\n{}", section.body()),
        None => format!("{line}\n{}", section.raw),
    }
}

/// Append each block, under `note`, inside its own preserve marker pair so
/// later merges carry it instead of comparing it.
fn append_blocks(candidate: &Section, note: &str, blocks: &[String]) -> String {
    if blocks.is_empty() {
        return candidate.raw.clone();
    }
    let mut out = candidate.raw.trim_end_matches('\n').to_string();
    for block in blocks {
        out.push_str("\n\n");
        out.push_str(&markers::wrap(
            MarkerKind::Preserve,
            &format!("{note}\n{block}"),
            &MarkerMeta::default(),
        ));
    }
    with_trailing(out, &candidate.raw)
}

fn push_trimmed(lines: &mut Vec<String>, body: &str) {
    let body = body.trim_matches('\n');
    if !body.is_empty() {
        lines.push(body.to_string());
    }
}

fn trailing_newlines(text: &str) -> &str {
    let trimmed = text.trim_end_matches('\n');
    &text[trimmed.len()..]
}

/// Give `content` the same trailing newline run as `like`.
fn with_trailing(content: String, like: &str) -> String {
    let mut content = content.trim_end_matches('\n').to_string();
    content.push_str(trailing_newlines(like));
    content
}
