//! Heading and block structure of a note body.
//!
//! Line numbers in returned values are 1-based and relative to the body,
//! not the file (the frontmatter header is not counted).

use std::ops::Range;

use serde::Serialize;

use crate::parse::is_fence;

const WORDS_PER_MINUTE: usize = 250;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    pub anchor: String,
    pub block_id: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub text: String,
    pub anchor: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub heading: Heading,
    /// Lines under the heading, up to the next heading of the same or higher level.
    pub content: String,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    List,
    Quote,
    Table,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub id: Option<String>,
    pub kind: BlockKind,
    pub content: String,
    pub line: usize,
    #[serde(skip)]
    span: Range<usize>,
}

pub fn headings(body: &str) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut in_fenced = false;
    for (ix, line) in body.lines().enumerate() {
        if is_fence(line) {
            in_fenced = !in_fenced;
            continue;
        }
        if in_fenced {
            continue;
        }
        if let Some((level, text, block_id)) = parse_heading(line) {
            out.push(Heading {
                level,
                anchor: slugify(&text),
                text,
                block_id,
                line: ix + 1,
            });
        }
    }
    out
}

/// Headings nested by level.
pub fn toc(body: &str) -> Vec<TocEntry> {
    let mut roots = Vec::new();
    for h in headings(body) {
        insert_toc(
            &mut roots,
            TocEntry {
                level: h.level,
                text: h.text,
                anchor: h.anchor,
                line: h.line,
                children: Vec::new(),
            },
        );
    }
    roots
}

fn insert_toc(nodes: &mut Vec<TocEntry>, entry: TocEntry) {
    match nodes.last_mut() {
        Some(last) if last.level < entry.level => insert_toc(&mut last.children, entry),
        _ => nodes.push(entry),
    }
}

/// Finds a section by heading text (formatting and trailing punctuation
/// ignored, case-insensitive) or by anchor.
pub fn find_section(body: &str, reference: &str) -> Option<Section> {
    let lines: Vec<&str> = body.split_inclusive('\n').collect();
    let all = headings(body);
    let ix = find_heading_index(&all, reference)?;
    let heading = all[ix].clone();
    let end = section_end(&all, ix, lines.len());

    let content = lines[heading.line..end].concat();
    Some(Section {
        heading,
        content,
        end_line: end,
    })
}

/// Replaces the content under a heading, keeping the heading line itself.
pub fn replace_section(body: &str, reference: &str, content: &str) -> Option<String> {
    let lines: Vec<&str> = body.split_inclusive('\n').collect();
    let all = headings(body);
    let ix = find_heading_index(&all, reference)?;
    let start = all[ix].line;
    let end = section_end(&all, ix, lines.len());

    let mut out = lines[..start].concat();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    let content = content.trim_end_matches('\n');
    if !content.is_empty() {
        out.push_str(content);
        out.push('\n');
    }
    if end < lines.len() {
        out.push('\n');
        out.push_str(&lines[end..].concat());
    }
    Some(out)
}

fn find_heading_index(all: &[Heading], reference: &str) -> Option<usize> {
    let reference = reference.trim().trim_start_matches('#').trim();
    if reference.is_empty() {
        return None;
    }
    let wanted = normalize_heading(reference);
    let wanted_anchor = slugify(reference);
    all.iter()
        .position(|h| normalize_heading(&h.text) == wanted)
        .or_else(|| all.iter().position(|h| h.anchor == wanted_anchor))
}

fn section_end(all: &[Heading], ix: usize, total_lines: usize) -> usize {
    let level = all[ix].level;
    all[ix + 1..]
        .iter()
        .find(|h| h.level <= level)
        .map(|h| h.line - 1)
        .unwrap_or(total_lines)
}

pub fn blocks(body: &str) -> Vec<Block> {
    let lines: Vec<&str> = body.split_inclusive('\n').collect();
    let mut out: Vec<Block> = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i].trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();

        if trimmed.is_empty() || parse_heading(line).is_some() {
            i += 1;
            continue;
        }

        // A lone "^id" line names the block right above it.
        if let Some(id) = standalone_block_id(trimmed) {
            if let Some(prev) = out.last_mut() {
                if prev.span.end == i && prev.id.is_none() {
                    prev.id = Some(id);
                    prev.span.end = i + 1;
                    i += 1;
                    continue;
                }
            }
        }

        let start = i;
        let kind = if is_fence(line) {
            i += 1;
            while i < lines.len() && !is_fence(lines[i]) {
                i += 1;
            }
            i = (i + 1).min(lines.len());
            BlockKind::Code
        } else {
            let kind = line_kind(line);
            i += 1;
            while i < lines.len() {
                let next = lines[i].trim_end_matches(['\r', '\n']);
                if next.trim().is_empty()
                    || parse_heading(next).is_some()
                    || is_fence(next)
                    || standalone_block_id(next.trim()).is_some()
                {
                    break;
                }
                let continues = line_kind(next) == kind
                    || (kind == BlockKind::List && next.starts_with([' ', '\t']));
                if !continues {
                    break;
                }
                i += 1;
            }
            kind
        };

        let content: String = lines[start..i].concat();
        let id = match kind {
            BlockKind::Code => None,
            _ => content
                .lines()
                .last()
                .and_then(|l| trailing_block_id(l.trim_end())),
        };
        out.push(Block {
            id,
            kind,
            content: content.trim_end_matches(['\r', '\n']).to_string(),
            line: start + 1,
            span: start..i,
        });
    }

    out
}

pub fn find_block(body: &str, id: &str) -> Option<Block> {
    let id = id.trim().trim_start_matches('^');
    blocks(body)
        .into_iter()
        .find(|b| b.id.as_deref() == Some(id))
}

/// Replaces a block's lines, re-attaching its `^id` marker.
pub fn replace_block(body: &str, id: &str, content: &str) -> Option<String> {
    let id = id.trim().trim_start_matches('^');
    let block = find_block(body, id)?;
    let lines: Vec<&str> = body.split_inclusive('\n').collect();

    let mut replacement = content.trim_end_matches(['\r', '\n']).to_string();
    let last_line = replacement.lines().last().unwrap_or("").trim_end();
    let already_marked = trailing_block_id(last_line).as_deref() == Some(id)
        || standalone_block_id(last_line.trim()).as_deref() == Some(id);
    if !already_marked {
        let own_line = matches!(block.kind, BlockKind::Code | BlockKind::Table)
            || is_fence(last_line);
        if own_line {
            replacement.push_str(&format!("\n^{id}"));
        } else {
            replacement.push_str(&format!(" ^{id}"));
        }
    }

    let mut out = lines[..block.span.start].concat();
    out.push_str(&replacement);
    out.push('\n');
    out.push_str(&lines[block.span.end..].concat());
    Some(out)
}

pub fn word_count(body: &str) -> usize {
    body.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

pub fn reading_time_minutes(words: usize) -> usize {
    words.div_ceil(WORDS_PER_MINUTE)
}

fn parse_heading(line: &str) -> Option<(u8, String, Option<String>)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }
    let (text, id) = match trailing_block_id(text) {
        Some(id) => {
            let cut = text.len() - id.len() - 1;
            (text[..cut].trim_end(), Some(id))
        }
        None => (text, None),
    };
    Some((hashes as u8, text.to_string(), id))
}

/// `^id` at the end of a line, separated from preceding text by whitespace.
fn trailing_block_id(line: &str) -> Option<String> {
    let pos = line.rfind('^')?;
    let id = &line[pos + 1..];
    let before = &line[..pos];
    if !is_block_id(id) || !before.ends_with(char::is_whitespace) {
        return None;
    }
    Some(id.to_string())
}

fn standalone_block_id(trimmed: &str) -> Option<String> {
    let id = trimmed.strip_prefix('^')?;
    is_block_id(id).then(|| id.to_string())
}

fn is_block_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn line_kind(line: &str) -> BlockKind {
    let t = line.trim_start();
    if t.starts_with('>') {
        return BlockKind::Quote;
    }
    if t.starts_with('|') {
        return BlockKind::Table;
    }
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return BlockKind::List;
    }
    let digits = t.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") ")) {
        return BlockKind::List;
    }
    BlockKind::Paragraph
}

fn normalize_heading(text: &str) -> String {
    let stripped = text.replace("**", "").replace("~~", "").replace('*', "");
    let stripped = stripped.trim_end_matches(['.', ':', '!', '?', ',', ';']);
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }
    out
}
