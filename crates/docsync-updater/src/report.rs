use merge_engine::{ChangeStats, Conflict, Strategy};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
        }
    }
}

/// Change report for one document update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub action: Action,
    /// `None` when the document was created.
    pub strategy: Option<Strategy>,
    pub file_path: String,
    pub backup_path: Option<String>,
    pub version: u64,
    pub changes: ChangeStats,
    pub conflicts: Vec<Conflict>,
    pub preserved_sections: Vec<String>,
    pub added_sections: Vec<String>,
    pub updated_sections: Vec<String>,
    pub removed_sections: Vec<String>,
    /// Log lines of conflicts left in the text for manual review.
    pub unresolved_conflicts: Vec<String>,
    pub similarity_percentage: f64,
    pub warnings: Vec<String>,
    pub dry_run: bool,
}

impl UpdateReport {
    pub fn needs_review(&self) -> bool {
        !self.unresolved_conflicts.is_empty()
    }

    /// Human-readable change report.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## {}", self.file_path);
        let _ = writeln!(out);
        match self.strategy {
            Some(strategy) => {
                let _ = writeln!(
                    out,
                    "- Action: {} with `{}` (version {})",
                    self.action.as_str(),
                    strategy,
                    self.version
                );
            }
            None => {
                let _ = writeln!(out, "- Action: {} (version {})", self.action.as_str(), self.version);
            }
        }
        if self.dry_run {
            let _ = writeln!(out, "- Dry run: nothing was written");
        }
        if let Some(backup) = &self.backup_path {
            let _ = writeln!(out, "- Backup: `{backup}`");
        }
        if self.action == Action::Updated {
            let _ = writeln!(out, "- Similarity: {:.1}%", self.similarity_percentage);
        }
        let _ = writeln!(
            out,
            "- Lines: +{} -{} ~{}",
            self.changes.lines_added, self.changes.lines_deleted, self.changes.lines_changed
        );

        section_list(&mut out, "Preserved sections", &self.preserved_sections);
        section_list(&mut out, "Updated sections", &self.updated_sections);
        section_list(&mut out, "Added sections", &self.added_sections);
        section_list(&mut out, "Removed sections", &self.removed_sections);

        if !self.conflicts.is_empty() {
            let _ = writeln!(out, "\n### Conflicts\n");
            for conflict in &self.conflicts {
                let _ = writeln!(
                    out,
                    "- {}: {} ({}){}",
                    conflict.section,
                    conflict.kind.tag(),
                    conflict.severity,
                    if conflict.reasons.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", conflict.reasons.join("; "))
                    }
                );
            }
        }

        if self.needs_review() {
            let _ = writeln!(out, "\n### Needs manual review\n");
            for line in &self.unresolved_conflicts {
                let _ = writeln!(out, "- {line}");
            }
        }

        section_list(&mut out, "Warnings", &self.warnings);
        out
    }
}

fn section_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n### {title}\n");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

/// Outcome of one job in a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<UpdateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn needs_review(&self) -> usize {
        self.items
            .iter()
            .filter_map(|i| i.report.as_ref())
            .filter(|r| r.needs_review())
            .count()
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Documentation update report");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} updated, {} failed, {} need manual review",
            self.succeeded(),
            self.failed(),
            self.needs_review()
        );
        for item in &self.items {
            let _ = writeln!(out);
            match (&item.report, &item.error) {
                (Some(report), _) => out.push_str(&report.render_markdown()),
                (None, Some(error)) => {
                    let _ = writeln!(out, "## {}\n\n- Failed: {}", item.path, error);
                }
                (None, None) => {}
            }
        }
        out
    }
}
