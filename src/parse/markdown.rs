use std::collections::BTreeSet;

use serde::Serialize;

use crate::{Frontmatter, ParseWarning, Result, VaultPath};

#[derive(Debug, Clone)]
pub struct ParsedNote {
    pub frontmatter: Frontmatter,
    pub body: String,
    pub warnings: Vec<ParseWarning>,
}

/// A `[[target#section|alias]]` occurrence in a note body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiLink {
    pub target: String,
    pub alias: Option<String>,
    pub section: Option<String>,
    pub source_path: VaultPath,
    pub embed: bool,
    /// 1-based line within the body.
    pub line: u32,
}

#[derive(Debug, Clone)]
pub(crate) enum FrontmatterParse {
    None,
    Valid(serde_yaml::Value),
    Broken { error: String },
}

/// Splits the frontmatter header from the body.
///
/// Never fails: a header that is not valid YAML, or not a mapping, yields an
/// empty frontmatter, the whole input as body, and a warning.
pub fn parse_note(content: &str) -> ParsedNote {
    let malformed = |error: String| ParsedNote {
        frontmatter: Frontmatter::new(),
        body: content.to_string(),
        warnings: vec![ParseWarning::MalformedFrontmatter { error }],
    };

    match split_frontmatter(content) {
        (FrontmatterParse::None, body) => ParsedNote {
            frontmatter: Frontmatter::new(),
            body: body.to_string(),
            warnings: Vec::new(),
        },
        (FrontmatterParse::Valid(value), body) => match Frontmatter::from_yaml(value) {
            Some(frontmatter) => ParsedNote {
                frontmatter,
                body: body.to_string(),
                warnings: Vec::new(),
            },
            None => malformed("frontmatter is not a key/value mapping".into()),
        },
        (FrontmatterParse::Broken { error }, _) => malformed(error),
    }
}

/// Lossy variant for raw file bytes.
pub fn parse_note_bytes(raw: &[u8]) -> ParsedNote {
    parse_note(&String::from_utf8_lossy(raw))
}

pub(crate) fn split_frontmatter(content: &str) -> (FrontmatterParse, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (FrontmatterParse::None, content);
    };

    let mut idx = 0usize;
    while idx < rest.len() {
        let line_end = match rest[idx..].find('\n') {
            Some(off) => idx + off + 1,
            None => rest.len(),
        };
        let line = rest[idx..line_end].trim_end_matches(['\r', '\n']);
        if line == "---" {
            let fm_text = &rest[..idx];
            let body = &rest[line_end..];
            return match serde_yaml::from_str::<serde_yaml::Value>(fm_text) {
                Ok(v) => (FrontmatterParse::Valid(v), body),
                Err(err) => (
                    FrontmatterParse::Broken {
                        error: err.to_string(),
                    },
                    body,
                ),
            };
        }
        idx = line_end;
    }

    (
        FrontmatterParse::Broken {
            error: "frontmatter fence not closed".to_string(),
        },
        content,
    )
}

/// Inverse of [`parse_note`]: `parse_note(&render_note(fm, body)?).body == body`.
pub fn render_note(frontmatter: &Frontmatter, body: &str) -> Result<String> {
    if frontmatter.is_empty() {
        // A body that itself opens with a fence would be read back as a header.
        if body.starts_with("---") {
            return Ok(format!("---\n---\n{body}"));
        }
        return Ok(body.to_string());
    }
    let yaml = frontmatter.to_yaml()?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Title shown for a note: frontmatter `title`, else the file stem.
pub fn note_title(path: &VaultPath, frontmatter: &Frontmatter) -> String {
    frontmatter
        .title()
        .map(str::to_string)
        .unwrap_or_else(|| path.file_stem().to_string())
}

/// Union of frontmatter tags and inline `#tags`, without the leading `#`.
pub fn extract_tags(frontmatter: &Frontmatter, body: &str) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = frontmatter
        .tags()
        .iter()
        .filter_map(|t| normalize_tag(t))
        .collect();

    let mut in_fenced = false;
    for line in body.lines() {
        if is_fence(line) {
            in_fenced = !in_fenced;
            continue;
        }
        if in_fenced {
            continue;
        }
        out.extend(extract_inline_tags_from_line(line));
    }
    out
}

pub fn extract_wiki_links(body: &str, source: &VaultPath) -> Vec<WikiLink> {
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
        extract_wikilinks_from_line(line, (ix + 1) as u32, source, &mut out);
    }
    out
}

pub(crate) fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn extract_wikilinks_from_line(line: &str, line_no: u32, source: &VaultPath, out: &mut Vec<WikiLink>) {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] != b'[' || bytes[i + 1] != b'[' {
            i += 1;
            continue;
        }
        let embed = i > 0 && bytes[i - 1] == b'!';

        let Some(close) = line[i + 2..].find("]]") else {
            break;
        };
        let inner = &line[i + 2..i + 2 + close];
        if let Some(link) = split_wikilink(inner, line_no, source, embed) {
            out.push(link);
        }
        i += 2 + close + 2;
    }
}

fn split_wikilink(inner: &str, line: u32, source: &VaultPath, embed: bool) -> Option<WikiLink> {
    // The target ends at whichever of '#' or '|' comes first.
    let cut = inner.find(['#', '|']).unwrap_or(inner.len());
    let target = inner[..cut].trim();
    if target.is_empty() {
        return None;
    }
    let rest = &inner[cut..];

    let (section, alias) = if let Some(after_hash) = rest.strip_prefix('#') {
        match after_hash.split_once('|') {
            Some((s, a)) => (Some(s), Some(a)),
            None => (Some(after_hash), None),
        }
    } else if let Some(a) = rest.strip_prefix('|') {
        (None, Some(a))
    } else {
        (None, None)
    };

    let non_empty = |s: Option<&str>| {
        s.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(WikiLink {
        target: target.to_string(),
        alias: non_empty(alias),
        section: non_empty(section),
        source_path: source.clone(),
        embed,
        line,
    })
}

fn extract_inline_tags_from_line(line: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let chars: Vec<(usize, char)> = line.char_indices().collect();

    let mut i = 0usize;
    while i < chars.len() {
        let (start, c) = chars[i];
        if c != '#' {
            i += 1;
            continue;
        }

        // Require a boundary before '#'; this also skips heading markers.
        if i > 0 {
            let prev = chars[i - 1].1;
            if prev.is_alphanumeric() || matches!(prev, '/' | '#' | '[' | '&' | '_') {
                i += 1;
                continue;
            }
        }

        let mut j = i + 1;
        while j < chars.len() && is_tag_char(chars[j].1) {
            j += 1;
        }

        if j > i + 1 {
            let end = chars.get(j).map(|(ix, _)| *ix).unwrap_or(line.len());
            if let Some(tag) = normalize_tag(&line[start + 1..end]) {
                out.insert(tag);
            }
        }

        i = j.max(i + 1);
    }

    out
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/')
}

pub(crate) fn normalize_tag(raw: &str) -> Option<String> {
    let s = raw.trim().trim_start_matches('#').trim();
    if s.is_empty() {
        return None;
    }
    Some(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> VaultPath {
        VaultPath::try_from(std::path::Path::new("notes/a.md")).unwrap()
    }

    #[test]
    fn frontmatter_and_body_are_split() {
        let note = parse_note("---\ntitle: Hello\ntags: [a]\n---\n# Heading\nBody\n");
        assert_eq!(note.frontmatter.title(), Some("Hello"));
        assert_eq!(note.body, "# Heading\nBody\n");
        assert!(note.warnings.is_empty());
    }

    #[test]
    fn malformed_frontmatter_degrades_to_full_body() {
        let raw = "---\ntitle: [unclosed\n---\nstill readable\n";
        let note = parse_note(raw);
        assert!(note.frontmatter.is_empty());
        assert_eq!(note.body, raw);
        assert!(matches!(
            note.warnings.as_slice(),
            [ParseWarning::MalformedFrontmatter { .. }]
        ));
    }

    #[test]
    fn non_mapping_frontmatter_is_malformed() {
        let raw = "---\n- a\n- b\n---\nbody\n";
        let note = parse_note(raw);
        assert!(note.frontmatter.is_empty());
        assert_eq!(note.body, raw);
        assert_eq!(note.warnings.len(), 1);
    }

    #[test]
    fn render_then_parse_keeps_body() {
        let mut fm = Frontmatter::new();
        fm.insert("title", serde_yaml::Value::String("T".into()));
        for body in ["plain\n", "\nleading blank\n", "", "---\nlooks like a fence\n"] {
            let raw = render_note(&fm, body).unwrap();
            let parsed = parse_note(&raw);
            assert_eq!(parsed.body, body);
            assert_eq!(parsed.frontmatter, fm);

            let bare = render_note(&Frontmatter::new(), body).unwrap();
            assert_eq!(parse_note(&bare).body, body);
        }
    }

    #[test]
    fn tags_merge_frontmatter_and_inline() {
        let note = parse_note("---\ntags: ['#Foo', bar]\n---\n# Heading\nBody #quux and #naïve-tag\n");
        let tags = extract_tags(&note.frontmatter, &note.body);
        let tags: Vec<_> = tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["Foo", "bar", "naïve-tag", "quux"]);
    }

    #[test]
    fn fenced_code_hides_tags_and_links() {
        let body = "```\n#notatag [[notalink]]\n```\nBut #tag and [[link]].\n";
        let tags = extract_tags(&Frontmatter::new(), body);
        assert!(tags.contains("tag"));
        assert!(!tags.contains("notatag"));
        let links = extract_wiki_links(body, &src());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "link");
        assert_eq!(links[0].line, 4);
    }

    #[test]
    fn wikilink_forms_are_split() {
        let body = "[[A]] [[B|Bee]] [[C#Intro]] [[D#Part 2|Dee]] ![[E]] [[F|x#y]] [[#local]]";
        let links = extract_wiki_links(body, &src());
        let got: Vec<_> = links
            .iter()
            .map(|l| {
                (
                    l.target.as_str(),
                    l.section.as_deref(),
                    l.alias.as_deref(),
                    l.embed,
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                ("A", None, None, false),
                ("B", None, Some("Bee"), false),
                ("C", Some("Intro"), None, false),
                ("D", Some("Part 2"), Some("Dee"), false),
                ("E", None, None, true),
                ("F", None, Some("x#y"), false),
            ]
        );
        assert!(links.iter().all(|l| l.source_path == src()));
    }

    #[test]
    fn headings_and_fragments_are_not_tags() {
        let tags = extract_tags(&Frontmatter::new(), "# Title\n## Sub\nsee page#frag and [[N#sec]]\n#real\n");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["real"]);
    }
}
