//! Main document merge pipeline.
//!
//! Orchestrates the merge of a candidate document into an existing one:
//!
//! 1. **Parse** both texts into heading-keyed sections
//! 2. **Classify** every section present in both into a conflict verdict
//! 3. **Analyze** whole-document similarity and structure
//! 4. **Select** a strategy (or honour the caller's explicit choice)
//! 5. **Apply** the strategy resolver, section by section
//! 6. **Validate** markers in the merged output
//!
//! Sections are resolved sequentially; the pipeline is a pure function of
//! its inputs and performs no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis;
use crate::classifier::{ClassifierThresholds, ConflictClassifier};
use crate::markers::{self, MarkerIssue};
use crate::sections::parse_sections;
use crate::strategies::{
    MergeContext, MergeInput, SelectionThresholds, StrategyTable, select_strategy,
};
use crate::types::*;

/// Configuration for the resolver pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub classifier: ClassifierThresholds,
    #[serde(default)]
    pub selection: SelectionThresholds,
    /// Heading fragments (case-insensitive) marking a section as human-authored.
    #[serde(default = "default_human_heading_patterns")]
    pub human_heading_patterns: Vec<String>,
}

fn default_human_heading_patterns() -> Vec<String> {
    ["notes", "custom", "manual", "internal", "faq"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierThresholds::default(),
            selection: SelectionThresholds::default(),
            human_heading_patterns: default_human_heading_patterns(),
        }
    }
}

/// Per-merge options.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub strategy: StrategyChoice,
    pub conflict_handling: ConflictHandling,
    pub preserve_metadata: bool,
    /// Timestamp written into separators and annotations.
    pub timestamp: DateTime<Utc>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            conflict_handling: ConflictHandling::Smart,
            preserve_metadata: true,
            timestamp: Utc::now(),
        }
    }
}

/// The document merger that combines classification, selection and resolution.
pub struct Resolver {
    config: ResolverConfig,
    classifier: ConflictClassifier,
    strategies: StrategyTable,
}

/// Result of merging one document.
#[derive(Debug, Clone)]
pub struct DocumentMergeOutput {
    pub merged_content: String,
    pub strategy: Strategy,
    pub analysis: Analysis,
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
    pub added_sections: Vec<String>,
    pub updated_sections: Vec<String>,
    pub preserved_sections: Vec<String>,
    pub removed_sections: Vec<String>,
    pub changes: ChangeStats,
    pub marker_issues: Vec<MarkerIssue>,
    pub warnings: Vec<String>,
}

impl DocumentMergeOutput {
    /// Resolutions that left both versions in the text for a human.
    pub fn unresolved(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.iter().filter(|r| r.unresolved)
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            classifier: ConflictClassifier::new(config.classifier),
            strategies: StrategyTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Classify every section the two documents share, in candidate order.
    pub fn detect_conflicts(&self, existing: &SectionMap, candidate: &SectionMap) -> Vec<Conflict> {
        candidate
            .iter()
            .filter_map(|c| {
                existing
                    .get(&c.key)
                    .and_then(|e| self.classifier.classify(e, c))
            })
            .collect()
    }

    /// Merge a candidate document into an existing one.
    ///
    /// This is the main entry point.
    pub fn resolve_document(
        &self,
        existing_text: &str,
        candidate_text: &str,
        options: &MergeOptions,
    ) -> DocumentMergeOutput {
        let existing = parse_sections(existing_text);
        let candidate = parse_sections(candidate_text);

        let mut warnings = Vec::new();
        for (label, map) in [("existing", &existing), ("generated", &candidate)] {
            for key in map.duplicates() {
                tracing::warn!(section = %key, document = label, "duplicate heading, later section wins");
                warnings.push(format!(
                    "duplicate heading '{key}' in {label} content; the later section was used"
                ));
            }
        }

        let conflicts = self.detect_conflicts(&existing, &candidate);
        let analysis = analysis::analyze(
            existing_text,
            candidate_text,
            &existing,
            &candidate,
            conflicts.len(),
        );

        let strategy = options
            .strategy
            .fixed()
            .unwrap_or_else(|| select_strategy(&analysis, &self.config.selection));
        tracing::debug!(
            %strategy,
            similarity = analysis.similarity_percentage,
            conflicts = analysis.conflict_count,
            structural = analysis.structural_changes,
            additions = analysis.additions,
            modifications = analysis.modifications,
            "strategy selected"
        );

        let input = MergeInput {
            existing_text,
            candidate_text,
            existing: &existing,
            candidate: &candidate,
            conflicts: &conflicts,
            analysis: &analysis,
        };
        let ctx = MergeContext {
            timestamp: options.timestamp,
            conflict_handling: options.conflict_handling,
            preserve_metadata: options.preserve_metadata,
            human_heading_patterns: self.config.human_heading_patterns.clone(),
        };

        let output = match self.strategies.get(strategy) {
            Some(resolver) => resolver.apply(&input, &ctx),
            None => {
                // Every strategy is registered by `StrategyTable::new`.
                tracing::error!(%strategy, "no resolver registered; keeping existing content");
                crate::strategies::StrategyOutput {
                    content: existing_text.to_string(),
                    ..Default::default()
                }
            }
        };
        warnings.extend(output.warnings);

        let validation = markers::validate_markers(&output.content);
        for issue in &validation.issues {
            tracing::warn!(%issue, "marker imbalance in merged document");
            warnings.push(issue.to_string());
        }

        let changes = analysis::line_changes(existing_text, &output.content);

        DocumentMergeOutput {
            merged_content: output.content,
            strategy,
            analysis,
            conflicts,
            resolutions: output.resolutions,
            added_sections: output.added,
            updated_sections: output.updated,
            preserved_sections: output.preserved,
            removed_sections: output.removed,
            changes,
            marker_issues: validation.issues,
            warnings,
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}
