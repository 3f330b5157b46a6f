use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Instant, SystemTime};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use nucleo::{
    Matcher, Utf32Str,
    pattern::{CaseMatching, Normalization, Pattern},
};
use serde::Serialize;

use crate::link_resolve::Resolver;
use crate::parse::{extract_tags, extract_wiki_links, note_title, parse_note_bytes};
use crate::{Error, Frontmatter, Resolution, Result, Vault, VaultPath, WikiLink};

#[derive(Debug, Clone, Serialize)]
pub struct IndexedNote {
    pub path: VaultPath,
    pub title: String,
    pub tags: BTreeSet<String>,
    #[serde(skip)]
    pub links: Vec<WikiLink>,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub path: VaultPath,
    pub score: u32,
}

/// Title map, resolver and backlink map built together from one scan.
#[derive(Debug)]
pub struct LinkIndex {
    generation: u64,
    built_at: DateTime<Utc>,
    notes: BTreeMap<VaultPath, IndexedNote>,
    resolver: Resolver,
    backlinks: BTreeMap<VaultPath, BTreeSet<VaultPath>>,
    outgoing: BTreeMap<VaultPath, BTreeSet<VaultPath>>,
    unresolved: usize,
}

impl LinkIndex {
    pub fn build(vault: &Vault) -> Result<Self> {
        Self::build_generation(vault, 0)
    }

    fn build_generation(vault: &Vault, generation: u64) -> Result<Self> {
        let cfg = vault.config();
        let mut notes = BTreeMap::new();

        for path in vault.note_paths()? {
            let abs = vault.to_abs(&path);
            let meta = match std::fs::metadata(&abs) {
                Ok(m) => m,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(Error::io(&abs, err)),
            };
            if meta.len() > cfg.max_file_size {
                tracing::warn!(path = %path, size = meta.len(), "skipping oversized note");
                continue;
            }
            let raw = match std::fs::read(&abs) {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(Error::io(&abs, err)),
            };

            let parsed = parse_note_bytes(&raw);
            let (created, modified) = note_times(&meta, &parsed.frontmatter);
            notes.insert(
                path.clone(),
                IndexedNote {
                    title: note_title(&path, &parsed.frontmatter),
                    tags: extract_tags(&parsed.frontmatter, &parsed.body),
                    links: extract_wiki_links(&parsed.body, &path),
                    size: meta.len(),
                    created,
                    modified,
                    path,
                },
            );
        }

        let mut resolver = Resolver::new(cfg.fuzzy_threshold);
        for note in notes.values() {
            let title = (note.title != note.path.file_stem()).then_some(note.title.as_str());
            resolver.add(&note.path, title);
        }

        let mut backlinks: BTreeMap<VaultPath, BTreeSet<VaultPath>> = BTreeMap::new();
        let mut outgoing: BTreeMap<VaultPath, BTreeSet<VaultPath>> = BTreeMap::new();
        let mut memo: HashMap<String, Option<VaultPath>> = HashMap::new();
        let mut unresolved = 0usize;

        for note in notes.values() {
            for link in &note.links {
                let resolved = memo
                    .entry(link.target.to_lowercase())
                    .or_insert_with(|| resolver.resolve(&link.target).map(|r| r.path))
                    .clone();
                let Some(target) = resolved else {
                    unresolved += 1;
                    continue;
                };
                backlinks
                    .entry(target.clone())
                    .or_default()
                    .insert(note.path.clone());
                outgoing.entry(note.path.clone()).or_default().insert(target);
            }
        }

        Ok(Self {
            generation,
            built_at: Utc::now(),
            notes,
            resolver,
            backlinks,
            outgoing,
            unresolved,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn contains(&self, path: &VaultPath) -> bool {
        self.notes.contains_key(path)
    }

    pub fn note(&self, path: &VaultPath) -> Option<&IndexedNote> {
        self.notes.get(path)
    }

    /// Notes in path order.
    pub fn notes(&self) -> impl Iterator<Item = &IndexedNote> {
        self.notes.values()
    }

    pub fn resolve(&self, target: &str) -> Option<Resolution> {
        self.resolver.resolve(target)
    }

    /// Notes linking to `path`; empty when there are none.
    pub fn backlinks_of(&self, path: &VaultPath) -> BTreeSet<VaultPath> {
        self.backlinks.get(path).cloned().unwrap_or_default()
    }

    pub fn outgoing_of(&self, path: &VaultPath) -> BTreeSet<VaultPath> {
        self.outgoing.get(path).cloned().unwrap_or_default()
    }

    /// Notes that neither link to another note nor are linked from one.
    pub fn orphans(&self) -> BTreeSet<VaultPath> {
        self.notes
            .keys()
            .filter(|p| !self.backlinks.contains_key(*p) && !self.outgoing.contains_key(*p))
            .cloned()
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    pub fn unresolved_links(&self) -> usize {
        self.unresolved
    }

    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for note in self.notes.values() {
            for tag in &note.tags {
                *out.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        out
    }

    /// Fuzzy file-path ranking, for "did you mean" hints.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        let q = query.trim();
        if q.is_empty() || limit == 0 {
            return Vec::new();
        }

        let pattern = Pattern::parse(q, CaseMatching::Smart, Normalization::Smart);
        let mut matcher = Matcher::new(nucleo::Config::DEFAULT);
        let mut utf32_buf = Vec::new();
        let mut hits = Vec::new();

        for path in self.notes.keys() {
            let s = path.as_str_lossy();
            if let Some(score) = pattern.score(Utf32Str::new(&s, &mut utf32_buf), &mut matcher) {
                hits.push(Suggestion {
                    path: path.clone(),
                    score,
                });
            }
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        hits.truncate(limit);
        hits
    }
}

/// Holds the current [`LinkIndex`] snapshot.
///
/// Readers get an `Arc` and keep using it while a newer snapshot replaces it.
/// `invalidate` bumps a generation counter; a rebuild that started before the
/// bump is handed to its caller but never installed.
#[derive(Debug, Default)]
pub struct IndexCache {
    current: RwLock<Option<Arc<LinkIndex>>>,
    generation: AtomicU64,
    rebuild_lock: Mutex<()>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_built(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        tracing::debug!(generation, "index invalidated");
    }

    /// Current snapshot, rebuilding first if it was invalidated.
    pub fn snapshot(&self, vault: &Vault) -> Result<Arc<LinkIndex>> {
        if let Some(index) = self.cached() {
            return Ok(index);
        }
        let _building = self.rebuild_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = self.cached() {
            return Ok(index);
        }
        self.rebuild_locked(vault)
    }

    pub fn rebuild(&self, vault: &Vault) -> Result<Arc<LinkIndex>> {
        let _building = self.rebuild_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.rebuild_locked(vault)
    }

    fn cached(&self) -> Option<Arc<LinkIndex>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn rebuild_locked(&self, vault: &Vault) -> Result<Arc<LinkIndex>> {
        let generation = self.generation();
        let started = Instant::now();
        let built = Arc::new(LinkIndex::build_generation(vault, generation)?);

        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if self.generation() == generation {
            *guard = Some(Arc::clone(&built));
        } else {
            tracing::debug!(generation, "index invalidated during rebuild, not installed");
        }
        tracing::info!(
            notes = built.len(),
            links = built.link_count(),
            generation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuilt"
        );
        Ok(built)
    }
}

/// Creation and modification times: frontmatter `created`/`modified` win over
/// filesystem metadata. Filesystems without birth time fall back to mtime.
pub(crate) fn note_times(
    meta: &std::fs::Metadata,
    frontmatter: &Frontmatter,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let fs_modified = meta.modified().ok().map(to_utc);
    let fs_created = meta.created().ok().map(to_utc).or(fs_modified);

    let from_fm = |key: &str| frontmatter.get_str(key).and_then(parse_timestamp);
    (
        from_fm("created").or(fs_created),
        from_fm("modified").or(fs_modified),
    )
}

fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_accept_common_forms() {
        assert!(parse_timestamp("2025-01-02T03:04:05Z").is_some());
        assert!(parse_timestamp("2025-01-02T03:04:05.123").is_some());
        assert_eq!(
            parse_timestamp("2025-01-02").map(|d| d.to_rfc3339()),
            Some("2025-01-02T00:00:00+00:00".to_string())
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn invalidation_during_rebuild_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.md"), "[[B]]").unwrap();
        std::fs::write(dir.path().join("B.md"), "b").unwrap();
        let vault = Vault::open(dir.path()).unwrap();

        let cache = IndexCache::new();
        assert!(!cache.is_built());
        let first = cache.snapshot(&vault).unwrap();
        assert!(cache.is_built());
        assert!(Arc::ptr_eq(&first, &cache.snapshot(&vault).unwrap()));

        cache.invalidate();
        assert!(!cache.is_built());
        let second = cache.snapshot(&vault).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.generation(), 1);
    }
}
