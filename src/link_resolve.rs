use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::VaultPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Path or file name, case-insensitive, with or without `.md`.
    Exact,
    /// Frontmatter `title`.
    Title,
    /// Best normalized similarity at or above the threshold.
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub path: VaultPath,
    pub score: f64,
    pub match_type: MatchType,
}

/// Similarity ratio in `[0, 1]`: twice the matched characters over the total length.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    f64::from(similar::TextDiff::from_chars(a, b).ratio())
}

/// Lowercase, `-`/`_` as spaces, whitespace collapsed.
pub fn normalize_title(s: &str) -> String {
    s.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub(crate) struct Resolver {
    by_rel_lower: HashMap<String, VaultPath>,
    by_rel_noext_lower: HashMap<String, VaultPath>,
    by_stem_lower: HashMap<String, Vec<VaultPath>>,
    by_title_lower: HashMap<String, Vec<VaultPath>>,
    fuzzy: Vec<(String, VaultPath)>,
    threshold: f64,
}

impl Resolver {
    pub(crate) fn new(threshold: f64) -> Self {
        Self {
            by_rel_lower: HashMap::new(),
            by_rel_noext_lower: HashMap::new(),
            by_stem_lower: HashMap::new(),
            by_title_lower: HashMap::new(),
            fuzzy: Vec::new(),
            threshold,
        }
    }

    pub(crate) fn add(&mut self, path: &VaultPath, title: Option<&str>) {
        let rel_lower = path.as_str_lossy().to_lowercase();
        let noext = strip_md(&rel_lower).to_string();
        let stem_lower = path.file_stem().to_lowercase();

        self.by_rel_lower.insert(rel_lower, path.clone());
        self.by_rel_noext_lower.insert(noext.clone(), path.clone());
        self.by_stem_lower
            .entry(stem_lower.clone())
            .or_default()
            .push(path.clone());

        let mut keys = vec![normalize_title(&stem_lower)];
        if noext.contains('/') {
            keys.push(normalize_title(&noext));
        }
        if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
            self.by_title_lower
                .entry(title.to_lowercase())
                .or_default()
                .push(path.clone());
            keys.push(normalize_title(title));
        }
        keys.sort();
        keys.dedup();
        for key in keys.into_iter().filter(|k| !k.is_empty()) {
            self.fuzzy.push((key, path.clone()));
        }
    }

    pub(crate) fn resolve(&self, target: &str) -> Option<Resolution> {
        let t = target.trim().replace('\\', "/");
        if t.is_empty() {
            return None;
        }
        let lower = t.to_lowercase();
        let noext = strip_md(&lower);

        let exact = self
            .by_rel_lower
            .get(&lower)
            .or_else(|| self.by_rel_noext_lower.get(noext))
            .cloned()
            .or_else(|| {
                if noext.contains('/') {
                    return None;
                }
                self.by_stem_lower.get(noext).and_then(|v| pick_preferred(v))
            });
        if let Some(path) = exact {
            return Some(Resolution {
                path,
                score: 1.0,
                match_type: MatchType::Exact,
            });
        }

        if let Some(path) = self.by_title_lower.get(&lower).and_then(|v| pick_preferred(v)) {
            return Some(Resolution {
                path,
                score: 1.0,
                match_type: MatchType::Title,
            });
        }

        self.resolve_fuzzy(noext)
    }

    fn resolve_fuzzy(&self, raw: &str) -> Option<Resolution> {
        let query = normalize_title(raw);
        if query.is_empty() {
            return None;
        }

        let mut best: Option<(f64, &VaultPath)> = None;
        for (candidate, path) in &self.fuzzy {
            let score = similarity(&query, candidate);
            let better = match best {
                None => true,
                Some((best_score, best_path)) => {
                    match score.total_cmp(&best_score) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => prefer(path, best_path) == Ordering::Less,
                    }
                }
            };
            if better {
                best = Some((score, path));
            }
        }

        let (score, path) = best?;
        if score < self.threshold {
            tracing::debug!(target = raw, best = score, "no fuzzy match above threshold");
            return None;
        }
        Some(Resolution {
            path: path.clone(),
            score,
            match_type: MatchType::Fuzzy,
        })
    }
}

/// Fewest path segments first, then lexicographic.
fn prefer(a: &VaultPath, b: &VaultPath) -> Ordering {
    a.depth().cmp(&b.depth()).then_with(|| a.cmp(b))
}

fn pick_preferred(candidates: &[VaultPath]) -> Option<VaultPath> {
    candidates.iter().min_by(|a, b| prefer(a, b)).cloned()
}

fn strip_md(s: &str) -> &str {
    let cut = s.len().saturating_sub(3);
    match s.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".md") => &s[..cut],
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(s: &str) -> VaultPath {
        VaultPath::try_from(std::path::Path::new(s)).unwrap()
    }

    fn resolver(notes: &[(&str, Option<&str>)]) -> Resolver {
        let mut r = Resolver::new(0.6);
        for (p, title) in notes {
            r.add(&vp(p), *title);
        }
        r
    }

    #[test]
    fn similarity_is_a_ratio() {
        assert_eq!(similarity("abcd", "abcd"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
        let s = similarity("projects", "project");
        assert!((s - 14.0 / 15.0).abs() < 1e-6, "{s}");
    }

    #[test]
    fn normalize_title_collapses_separators() {
        assert_eq!(normalize_title("  Machine-Learning__Notes "), "machine learning notes");
    }

    #[test]
    fn exact_path_and_stem_match_case_insensitively() {
        let r = resolver(&[("Projects.md", None), ("archive/2025/Final.md", None)]);
        let hit = r.resolve("projects").unwrap();
        assert_eq!(hit.path, vp("Projects.md"));
        assert_eq!(hit.match_type, MatchType::Exact);
        assert_eq!(r.resolve("Archive/2025/final.md").unwrap().path, vp("archive/2025/Final.md"));
        assert_eq!(r.resolve("final").unwrap().match_type, MatchType::Exact);
    }

    #[test]
    fn frontmatter_title_beats_fuzzy() {
        let r = resolver(&[("notes/abc123.md", Some("Weekly Review")), ("Weekly Reviews.md", None)]);
        let hit = r.resolve("weekly review").unwrap();
        assert_eq!(hit.match_type, MatchType::Title);
        assert_eq!(hit.path, vp("notes/abc123.md"));
    }

    #[test]
    fn fuzzy_prefers_shallow_then_lexicographic() {
        let r = resolver(&[("deep/dir/Machine Learning.md", None), ("Machine-Learning.md", None)]);
        let hit = r.resolve("machine learnin").unwrap();
        assert_eq!(hit.match_type, MatchType::Fuzzy);
        assert_eq!(hit.path, vp("Machine-Learning.md"));

        let r = resolver(&[("b/Topic.md", None), ("a/Topic.md", None)]);
        assert_eq!(r.resolve("topic").unwrap().path, vp("a/Topic.md"));
    }

    #[test]
    fn non_ascii_targets_resolve() {
        let r = resolver(&[("Naïve Bayes.md", None), ("crème.md", None)]);
        assert_eq!(strip_md("naïve"), "naïve");
        assert_eq!(strip_md("crème.MD"), "crème");
        assert_eq!(r.resolve("crème").unwrap().path, vp("crème.md"));
        assert_eq!(r.resolve("naïve bayes").unwrap().match_type, MatchType::Exact);
        assert!(r.resolve("ï").is_none());
    }

    #[test]
    fn below_threshold_is_not_found() {
        let r = resolver(&[("Gardening.md", None)]);
        assert!(r.resolve("quantum physics").is_none());
        assert!(r.resolve("   ").is_none());
    }
}
