//! Section model: a line-scanning tokenizer that splits a Markdown document
//! into heading-keyed sections.
//!
//! Every ATX heading (`#` to `######`) starts a new section regardless of
//! level; the level is kept as metadata only. Two kinds of regions suspend
//! heading recognition:
//!
//! - fenced code blocks (```` ``` ```` or `~~~`), so a `# comment` in a shell
//!   snippet does not split the section;
//! - open marker blocks, so a protected block is never torn across sections.

use crate::markers::{self, MarkerKind, MarkerToken};
use crate::types::{PREAMBLE_KEY, Section, SectionMap};

/// A classified source line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line<'a> {
    Heading { level: u8, title: &'a str },
    Text,
}

/// Parse document text into an ordered map of sections.
pub fn parse_sections(text: &str) -> SectionMap {
    let mut map = SectionMap::new();
    let mut current: Option<(String, u8)> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;
    let mut open_markers: Vec<MarkerKind> = Vec::new();

    for line in text.lines() {
        let classified = if fence.is_some() || !open_markers.is_empty() {
            Line::Text
        } else {
            classify(line)
        };

        if let Line::Heading { level, title } = classified {
            flush(&mut map, current.take(), &mut buffer);
            current = Some((title.to_string(), level));
            buffer.push(line);
            continue;
        }

        buffer.push(line);

        if let Some(marker) = fence_marker(line) {
            match fence {
                Some(open) if marker.starts_with(open) => fence = None,
                Some(_) => {}
                None => fence = Some(marker),
            }
            continue;
        }
        if fence.is_none() {
            match markers::token_of(line) {
                Some(MarkerToken::Start(kind)) => {
                    if !open_markers.contains(&kind) {
                        open_markers.push(kind);
                    }
                }
                Some(MarkerToken::End(kind)) => open_markers.retain(|k| *k != kind),
                None => {}
            }
        }
    }
    flush(&mut map, current, &mut buffer);

    map
}

fn flush<'a>(map: &mut SectionMap, current: Option<(String, u8)>, buffer: &mut Vec<&'a str>) {
    let lines = std::mem::take(buffer);
    match current {
        Some((key, level)) => map.insert(Section {
            key,
            level,
            raw: lines.join("\n"),
        }),
        None if !lines.is_empty() => map.insert(Section {
            key: PREAMBLE_KEY.to_string(),
            level: 0,
            raw: lines.join("\n"),
        }),
        None => {}
    }
}

fn classify(line: &str) -> Line<'_> {
    match heading_of(line) {
        Some((level, title)) => Line::Heading { level, title },
        None => Line::Text,
    }
}

/// Recognise an ATX heading, returning its level and trimmed text.
pub fn heading_of(line: &str) -> Option<(u8, &str)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim_end();
    if text.is_empty() {
        return None;
    }
    Some((hashes as u8, text))
}

/// The fence run (```` ``` ```` or `~~~` prefix) if this line opens or closes a fence.
fn fence_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for ch in ['`', '~'] {
        let run = trimmed.chars().take_while(|c| *c == ch).count();
        if run >= 3 {
            return Some(&trimmed[..run]);
        }
    }
    None
}

/// Count fenced code blocks (opening fences) in a piece of text.
pub fn count_code_blocks(text: &str) -> usize {
    code_blocks(text).len()
}

/// Return every fenced code block, fences included.
pub fn code_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in text.lines() {
        match (fence, fence_marker(line)) {
            (None, Some(marker)) => {
                fence = Some(marker);
                current.push(line);
            }
            (Some(open), Some(marker)) if marker.starts_with(open) => {
                current.push(line);
                blocks.push(current.join("\n"));
                current.clear();
                fence = None;
            }
            (Some(_), _) => current.push(line),
            (None, None) => {}
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Reassemble sections into document text ending with one newline.
pub fn render_sections<'a>(sections: impl IntoIterator<Item = &'a Section>) -> String {
    let mut out = sections
        .into_iter()
        .map(|s| s.raw.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}
