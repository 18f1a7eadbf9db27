//! In-band marker protocol.
//!
//! Documents carry three families of HTML-comment annotations, each a
//! start/end pair on its own line:
//!
//! ```text
//! <!-- MANUAL-EDIT-START -->
//! <!-- author: dana -->
//! hand-written text
//! <!-- MANUAL-EDIT-END -->
//! ```
//!
//! A start token pairs with the next end token of the same family; nesting
//! is not supported. Optional `timestamp`, `version` and `author` sub-marker
//! lines may follow the start token directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Generated,
    ManualEdit,
    Preserve,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 3] = [
        MarkerKind::Generated,
        MarkerKind::ManualEdit,
        MarkerKind::Preserve,
    ];

    pub fn start_token(&self) -> &'static str {
        match self {
            MarkerKind::Generated => "<!-- AI-GENERATED-START -->",
            MarkerKind::ManualEdit => "<!-- MANUAL-EDIT-START -->",
            MarkerKind::Preserve => "<!-- PRESERVE-START -->",
        }
    }

    pub fn end_token(&self) -> &'static str {
        match self {
            MarkerKind::Generated => "<!-- AI-GENERATED-END -->",
            MarkerKind::ManualEdit => "<!-- MANUAL-EDIT-END -->",
            MarkerKind::Preserve => "<!-- PRESERVE-END -->",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MarkerKind::Generated => "generated-content",
            MarkerKind::ManualEdit => "manual-edit",
            MarkerKind::Preserve => "preserve",
        }
    }
}

/// Which token, if any, a single line holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerToken {
    Start(MarkerKind),
    End(MarkerKind),
}

/// Classify one line as a marker token.
pub fn token_of(line: &str) -> Option<MarkerToken> {
    let trimmed = line.trim();
    MarkerKind::ALL.iter().find_map(|kind| {
        if trimmed == kind.start_token() {
            Some(MarkerToken::Start(*kind))
        } else if trimmed == kind.end_token() {
            Some(MarkerToken::End(*kind))
        } else {
            None
        }
    })
}

/// Optional sub-fields carried right after a start token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerMeta {
    pub timestamp: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
}

impl MarkerMeta {
    pub fn stamped(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(now.to_rfc3339()),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A recognised marker block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub kind: MarkerKind,
    /// Zero-based line index of the start token.
    pub start_line: usize,
    /// Zero-based line index of the end token; `None` if never closed.
    pub end_line: Option<usize>,
    pub meta: MarkerMeta,
    /// Lines between the sub-marker lines and the end token.
    pub content: String,
}

impl Marker {
    pub fn is_closed(&self) -> bool {
        self.end_line.is_some()
    }
}

/// One marker validation problem. Surfaced to callers, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum MarkerIssue {
    CountMismatch {
        kind: MarkerKind,
        starts: usize,
        ends: usize,
    },
    OrphanEnd { kind: MarkerKind, line: usize },
}

impl std::fmt::Display for MarkerIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerIssue::CountMismatch { kind, starts, ends } => write!(
                f,
                "{} markers unbalanced: {} start, {} end",
                kind.name(),
                starts,
                ends
            ),
            MarkerIssue::OrphanEnd { kind, line } => write!(
                f,
                "{} end marker on line {} has no matching start",
                kind.name(),
                line + 1
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkerValidation {
    pub valid: bool,
    pub issues: Vec<MarkerIssue>,
}

/// True when the text contains a manual-edit start token.
pub fn has_manual_edit(text: &str) -> bool {
    text.lines()
        .any(|line| token_of(line) == Some(MarkerToken::Start(MarkerKind::ManualEdit)))
}

/// True when the text contains any marker token of any family.
pub fn has_any_marker(text: &str) -> bool {
    text.lines().any(|line| token_of(line).is_some())
}

/// Extract every marker block in document order (by start line).
pub fn extract_markers(text: &str) -> Vec<Marker> {
    let lines: Vec<&str> = text.lines().collect();
    let mut markers = Vec::new();
    let mut open: Vec<(MarkerKind, usize)> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        match token_of(line) {
            Some(MarkerToken::Start(kind)) => {
                // A second start of the same family before an end is left
                // unclosed; the new start takes over.
                if let Some(pos) = open.iter().position(|(k, _)| *k == kind) {
                    let (_, start) = open.remove(pos);
                    markers.push(build_marker(kind, &lines, start, None));
                }
                open.push((kind, idx));
            }
            Some(MarkerToken::End(kind)) => {
                if let Some(pos) = open.iter().position(|(k, _)| *k == kind) {
                    let (_, start) = open.remove(pos);
                    markers.push(build_marker(kind, &lines, start, Some(idx)));
                }
            }
            None => {}
        }
    }
    for (kind, start) in open {
        markers.push(build_marker(kind, &lines, start, None));
    }

    markers.sort_by_key(|m| m.start_line);
    markers
}

fn build_marker(kind: MarkerKind, lines: &[&str], start: usize, end: Option<usize>) -> Marker {
    let stop = end.unwrap_or(lines.len());
    let mut meta = MarkerMeta::default();
    let mut body_start = start + 1;
    while body_start < stop {
        match parse_sub_marker(lines[body_start]) {
            Some(("timestamp", v)) if meta.timestamp.is_none() => meta.timestamp = Some(v),
            Some(("version", v)) if meta.version.is_none() => meta.version = Some(v),
            Some(("author", v)) if meta.author.is_none() => meta.author = Some(v),
            _ => break,
        }
        body_start += 1;
    }
    let content = lines[body_start.min(stop)..stop].join("\n");
    Marker {
        kind,
        start_line: start,
        end_line: end,
        meta,
        content,
    }
}

/// Parse `<!-- name: value -->` for the three known sub-marker names.
fn parse_sub_marker(line: &str) -> Option<(&'static str, String)> {
    let inner = line
        .trim()
        .strip_prefix("<!--")?
        .strip_suffix("-->")?
        .trim();
    let (name, value) = inner.split_once(':')?;
    let name = match name.trim() {
        "timestamp" => "timestamp",
        "version" => "version",
        "author" => "author",
        _ => return None,
    };
    Some((name, value.trim().to_string()))
}

/// Count start and end tokens per family and report every imbalance.
pub fn validate_markers(text: &str) -> MarkerValidation {
    let mut issues = Vec::new();

    for kind in MarkerKind::ALL {
        let mut starts = 0usize;
        let mut ends = 0usize;
        let mut open = 0usize;
        for (idx, line) in text.lines().enumerate() {
            match token_of(line) {
                Some(MarkerToken::Start(k)) if k == kind => {
                    starts += 1;
                    open += 1;
                }
                Some(MarkerToken::End(k)) if k == kind => {
                    ends += 1;
                    if open == 0 {
                        issues.push(MarkerIssue::OrphanEnd { kind, line: idx });
                    } else {
                        open -= 1;
                    }
                }
                _ => {}
            }
        }
        if starts != ends {
            issues.push(MarkerIssue::CountMismatch { kind, starts, ends });
        }
    }

    MarkerValidation {
        valid: issues.is_empty(),
        issues,
    }
}

/// Wrap content in a balanced marker block.
pub fn wrap(kind: MarkerKind, content: &str, meta: &MarkerMeta) -> String {
    let mut out = String::new();
    out.push_str(kind.start_token());
    out.push('\n');
    if let Some(ts) = &meta.timestamp {
        out.push_str(&format!("<!-- timestamp: {ts} -->\n"));
    }
    if let Some(version) = &meta.version {
        out.push_str(&format!("<!-- version: {version} -->\n"));
    }
    if let Some(author) = &meta.author {
        out.push_str(&format!("<!-- author: {author} -->\n"));
    }
    let content = content.trim_end_matches('\n');
    if !content.is_empty() {
        out.push_str(content);
        out.push('\n');
    }
    out.push_str(kind.end_token());
    out
}

/// Return the full text (tokens included) of every closed block of one family.
pub fn blocks_of(text: &str, kind: MarkerKind) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    extract_markers(text)
        .into_iter()
        .filter(|m| m.kind == kind)
        .filter_map(|m| m.end_line.map(|end| lines[m.start_line..=end].join("\n")))
        .collect()
}

/// Text with every closed block of one family removed, tokens included.
pub fn strip_blocks(text: &str, kind: MarkerKind) -> String {
    let blocks: Vec<(usize, usize)> = extract_markers(text)
        .into_iter()
        .filter(|m| m.kind == kind)
        .filter_map(|m| m.end_line.map(|end| (m.start_line, end)))
        .collect();
    if blocks.is_empty() {
        return text.to_string();
    }
    text.lines()
        .enumerate()
        .filter(|(idx, _)| !blocks.iter().any(|(start, end)| (*start..=*end).contains(idx)))
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_manual_edit() {
        let text = "intro\n<!-- MANUAL-EDIT-START -->\nmine\n<!-- MANUAL-EDIT-END -->";
        assert!(has_manual_edit(text));
        assert!(!has_manual_edit("<!-- PRESERVE-START -->\nx\n<!-- PRESERVE-END -->"));
    }

    #[test]
    fn test_extract_with_sub_markers() {
        let text = "<!-- MANUAL-EDIT-START -->\n<!-- timestamp: 2026-01-01T00:00:00Z -->\n<!-- author: dana -->\nhand written\n<!-- MANUAL-EDIT-END -->";
        let markers = extract_markers(text);
        assert_eq!(markers.len(), 1);
        let m = &markers[0];
        assert_eq!(m.kind, MarkerKind::ManualEdit);
        assert_eq!(m.meta.author.as_deref(), Some("dana"));
        assert_eq!(m.meta.timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(m.content, "hand written");
        assert_eq!(m.end_line, Some(4));
    }

    #[test]
    fn test_start_pairs_with_next_end() {
        let text = "<!-- PRESERVE-START -->\na\n<!-- PRESERVE-END -->\n<!-- PRESERVE-START -->\nb\n<!-- PRESERVE-END -->";
        let markers = extract_markers(text);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].content, "a");
        assert_eq!(markers[1].content, "b");
    }

    #[test]
    fn test_validate_balanced() {
        let text = wrap(MarkerKind::Generated, "body", &MarkerMeta::default());
        let v = validate_markers(&text);
        assert!(v.valid);
        assert!(v.issues.is_empty());
    }

    #[test]
    fn test_validate_unclosed_start() {
        let v = validate_markers("<!-- MANUAL-EDIT-START -->\ntext");
        assert!(!v.valid);
        assert_eq!(
            v.issues,
            vec![MarkerIssue::CountMismatch {
                kind: MarkerKind::ManualEdit,
                starts: 1,
                ends: 0
            }]
        );
    }

    #[test]
    fn test_validate_orphan_end_with_equal_counts() {
        let v = validate_markers("<!-- PRESERVE-END -->\n<!-- PRESERVE-START -->");
        assert!(!v.valid);
        assert!(matches!(
            v.issues[0],
            MarkerIssue::OrphanEnd {
                kind: MarkerKind::Preserve,
                line: 0
            }
        ));
    }

    #[test]
    fn test_wrap_round_trips_meta() {
        let meta = MarkerMeta::default()
            .with_author("lee")
            .with_version("3");
        let text = wrap(MarkerKind::Preserve, "keep me\n", &meta);
        let markers = extract_markers(&text);
        assert_eq!(markers[0].meta, meta);
        assert_eq!(markers[0].content, "keep me");
    }

    #[test]
    fn test_strip_blocks() {
        let text = "x\n<!-- PRESERVE-START -->\nkeep\n<!-- PRESERVE-END -->\ny\n<!-- PRESERVE-START -->\nopen";
        assert_eq!(
            strip_blocks(text, MarkerKind::Preserve),
            "x\ny\n<!-- PRESERVE-START -->\nopen"
        );
        assert_eq!(strip_blocks("plain", MarkerKind::Preserve), "plain");
    }

    #[test]
    fn test_blocks_of() {
        let text = "x\n<!-- PRESERVE-START -->\nkeep\n<!-- PRESERVE-END -->\ny";
        assert_eq!(
            blocks_of(text, MarkerKind::Preserve),
            vec!["<!-- PRESERVE-START -->\nkeep\n<!-- PRESERVE-END -->".to_string()]
        );
    }
}
