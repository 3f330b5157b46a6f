use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::cache::{CacheStats, ResultCache};
use crate::graph::GraphView;
use crate::index::{IndexCache, IndexedNote, LinkIndex, Suggestion, note_times};
use crate::parse::{
    extract_tags, extract_wiki_links, note_title, parse_note, parse_note_bytes, render_note,
};
use crate::service::ChangeEvent;
use crate::structure::{self, Block, Section, TocEntry};
use crate::templates::{RenderedTemplate, TemplateInfo, TemplateStore, format_checked};
use crate::{
    Error, Frontmatter, ParseWarning, Resolution, Result, Vault, VaultPath, WikiLink,
    normalize_path,
};

const SEARCH_PREFIX: &str = "search:";
const LIST_PREFIX: &str = "list:";
const MAX_MATCH_LINES: usize = 3;

/// A note as read from disk.
#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub path: VaultPath,
    pub title: String,
    pub frontmatter: Frontmatter,
    pub tags: Vec<String>,
    pub body: String,
    pub wiki_links: Vec<WikiLink>,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteSummary {
    pub path: VaultPath,
    pub title: String,
    pub tags: Vec<String>,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl From<&IndexedNote> for NoteSummary {
    fn from(note: &IndexedNote) -> Self {
        Self {
            path: note.path.clone(),
            title: note.title.clone(),
            tags: note.tags.iter().cloned().collect(),
            size: note.size,
            created: note.created,
            modified: note.modified,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteMetadata {
    #[serde(flatten)]
    pub summary: NoteSummary,
    pub frontmatter: Frontmatter,
    pub headings: usize,
    pub word_count: usize,
    pub reading_time_minutes: usize,
    pub outgoing_links: usize,
    pub backlinks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: VaultPath,
    pub title: String,
    pub tags: Vec<String>,
    /// Up to three matching body lines, trimmed.
    pub matches: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub limit: usize,
    pub use_regex: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Modified,
    Created,
    Title,
    Size,
}

impl SortKey {
    fn default_order(self) -> SortOrder {
        match self {
            SortKey::Title => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modified" => Ok(Self::Modified),
            "created" => Ok(Self::Created),
            "title" | "name" => Ok(Self::Title),
            "size" => Ok(Self::Size),
            other => Err(Error::Validation(format!(
                "unknown sort_by '{other}' (expected modified, created, title or size)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::Validation(format!(
                "unknown order '{other}' (expected asc or desc)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub tags: Vec<String>,
    pub directory: Option<String>,
    pub sort: SortKey,
    /// Defaults per key: newest first for times and sizes, A to Z for titles.
    pub order: Option<SortOrder>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub content: Option<String>,
    pub frontmatter: Option<Frontmatter>,
    /// Append `content` after a blank line instead of replacing the body.
    pub append: bool,
    /// Replace the frontmatter wholesale instead of merging keys.
    pub replace_frontmatter: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Backlinks {
    pub target: VaultPath,
    pub count: usize,
    pub backlinks: Vec<NoteSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkLookup {
    pub query: String,
    pub resolution: Option<Resolution>,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteToc {
    pub path: VaultPath,
    pub headings: Vec<TocEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub total_notes: usize,
    pub total_size_bytes: u64,
    pub total_tags: usize,
    pub total_links: usize,
    pub unresolved_links: usize,
    pub orphans: usize,
    pub templates: usize,
    pub index_generation: u64,
    pub index_built_at: DateTime<Utc>,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub vault_root: String,
    pub notes: Option<usize>,
    pub index_built: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearedCache {
    pub entries_cleared: usize,
    pub index_generation: u64,
}

#[derive(Debug, Clone)]
enum CachedResult {
    Search(Arc<Vec<SearchHit>>),
    List(Arc<Vec<NoteSummary>>),
}

enum TextMatcher {
    Substring(String),
    Pattern(Regex),
}

impl TextMatcher {
    fn is_match(&self, text: &str) -> bool {
        match self {
            TextMatcher::Substring(needle) => text.to_lowercase().contains(needle),
            TextMatcher::Pattern(re) => re.is_match(text),
        }
    }
}

/// Note CRUD and queries over a vault, backed by a lazily rebuilt
/// [`LinkIndex`] and a TTL cache for search and list results.
///
/// Mutations are serialized; reads run concurrently against index snapshots.
#[derive(Debug)]
pub struct VaultManager {
    vault: Vault,
    index: IndexCache,
    cache: ResultCache<CachedResult>,
    templates: TemplateStore,
    write_lock: Mutex<()>,
}

impl VaultManager {
    pub fn new(vault: Vault) -> Result<Self> {
        let cfg = vault.config();
        let templates = TemplateStore::new(
            vault.root().join(&cfg.templates_dir),
            cfg.template_depth_max,
        )?;
        let cache = ResultCache::new(cfg.cache_capacity, cfg.cache_ttl);
        Ok(Self {
            vault,
            index: IndexCache::new(),
            cache,
            templates,
            write_lock: Mutex::new(()),
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn index(&self) -> Result<Arc<LinkIndex>> {
        self.index.snapshot(&self.vault)
    }

    pub fn rebuild_index(&self) -> Result<Arc<LinkIndex>> {
        self.index.rebuild(&self.vault)
    }

    pub fn index_generation(&self) -> u64 {
        self.index.generation()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // --- reads ---

    pub fn read(&self, path: &str) -> Result<Note> {
        let rel = self.locate(path)?;
        self.load(&rel)
    }

    /// Reads a note by path, falling back to link resolution for titles.
    pub fn read_by_reference(&self, reference: &str) -> Result<Note> {
        let rel = self.find_note(reference)?;
        self.load(&rel)
    }

    pub fn get_metadata(&self, reference: &str) -> Result<NoteMetadata> {
        let note = self.read_by_reference(reference)?;
        let index = self.index()?;
        let words = structure::word_count(&note.body);
        Ok(NoteMetadata {
            headings: structure::headings(&note.body).len(),
            word_count: words,
            reading_time_minutes: structure::reading_time_minutes(words),
            outgoing_links: index.outgoing_of(&note.path).len(),
            backlinks: index.backlinks_of(&note.path).len(),
            summary: NoteSummary {
                path: note.path,
                title: note.title,
                tags: note.tags,
                size: note.size,
                created: note.created,
                modified: note.modified,
            },
            frontmatter: note.frontmatter,
        })
    }

    // --- writes ---

    pub fn create(
        &self,
        path: &str,
        content: &str,
        frontmatter: Option<Frontmatter>,
    ) -> Result<Note> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let rel = self.vault.normalize(path)?;
        let abs = self.vault.to_abs(&rel);
        if std::fs::symlink_metadata(&abs).is_ok() {
            return Err(Error::AlreadyExists(rel.to_string()));
        }

        let mut frontmatter = frontmatter.unwrap_or_default();
        let warnings = frontmatter.normalize_tags();
        let raw = render_note(&frontmatter, content)?;

        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        write_new(&abs, &raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(rel.to_string()),
            _ => Error::io(&abs, e),
        })?;

        self.after_write();
        tracing::info!(path = %rel, bytes = raw.len(), "note created");
        self.load_with(&rel, warnings)
    }

    pub fn update(&self, path: &str, update: NoteUpdate) -> Result<Note> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let rel = self.locate(path)?;
        let current = self.load(&rel)?;

        let mut frontmatter = match update.frontmatter {
            Some(fm) if update.replace_frontmatter => fm,
            Some(patch) => {
                let mut fm = current.frontmatter;
                fm.merge(patch);
                fm
            }
            None => current.frontmatter,
        };
        let warnings = frontmatter.normalize_tags();

        let body = match update.content {
            Some(addition) if update.append => join_append(&current.body, &addition),
            Some(content) => content,
            None => current.body,
        };

        let raw = render_note(&frontmatter, &body)?;
        self.vault.write_atomic(&rel, raw.as_bytes())?;

        self.after_write();
        tracing::info!(path = %rel, bytes = raw.len(), append = update.append, "note updated");
        self.load_with(&rel, warnings)
    }

    pub fn append(&self, path: &str, content: &str) -> Result<Note> {
        self.update(
            path,
            NoteUpdate {
                content: Some(content.to_string()),
                append: true,
                ..NoteUpdate::default()
            },
        )
    }

    pub fn delete(&self, path: &str) -> Result<VaultPath> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let rel = self.locate(path)?;
        let abs = self.vault.to_abs(&rel);
        std::fs::remove_file(&abs).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("note", rel.to_string()),
            _ => Error::io(&abs, e),
        })?;

        self.after_write();
        tracing::info!(path = %rel, "note deleted");
        Ok(rel)
    }

    /// Renames a note, creating destination directories. Content and
    /// filesystem timestamps are preserved.
    pub fn move_note(&self, from: &str, to: &str) -> Result<Note> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let src = self.locate(from)?;
        let dst = self.vault.normalize(to)?;
        let src_abs = self.vault.to_abs(&src);
        let dst_abs = self.vault.to_abs(&dst);
        if std::fs::symlink_metadata(&dst_abs).is_ok() {
            return Err(Error::AlreadyExists(dst.to_string()));
        }

        if let Some(parent) = dst_abs.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::rename(&src_abs, &dst_abs).map_err(|e| Error::io(&src_abs, e))?;

        self.after_write();
        tracing::info!(from = %src, to = %dst, "note moved");
        self.load(&dst)
    }

    // --- queries ---

    /// Substring (case-insensitive) or regex search over titles and bodies,
    /// optionally filtered to notes carrying every tag in `tags`.
    pub fn search(&self, q: &SearchQuery) -> Result<Vec<SearchHit>> {
        let cfg = self.vault.config();
        let limit = q.limit.min(cfg.search_limit_max);
        let text = q.query.as_deref().map(str::trim).unwrap_or("");
        let wanted = wanted_tags(&q.tags);

        let params = format!(
            "{text}|{}|{limit}|{}",
            wanted.iter().cloned().collect::<Vec<_>>().join(","),
            q.use_regex
        );
        let key = cache_key(SEARCH_PREFIX, self.index_generation(), &params);
        if let Some(CachedResult::Search(hits)) = self.cache.get(&key) {
            tracing::debug!(query = text, "search served from cache");
            return Ok(hits.as_ref().clone());
        }

        let matcher = match (text.is_empty(), q.use_regex) {
            (true, _) => None,
            (false, true) => Some(TextMatcher::Pattern(
                RegexBuilder::new(text)
                    .case_insensitive(true)
                    .size_limit(cfg.regex_size_limit)
                    .build()
                    .map_err(|e| Error::Validation(format!("invalid regex: {e}")))?,
            )),
            (false, false) => Some(TextMatcher::Substring(text.to_lowercase())),
        };

        let index = self.index()?;
        let started = Instant::now();
        let mut hits = Vec::new();
        for note in index.notes() {
            if hits.len() >= limit {
                break;
            }
            if !has_all_tags(note, &wanted) {
                continue;
            }
            let Some(matcher) = &matcher else {
                hits.push(search_hit(note, Vec::new()));
                continue;
            };
            if q.use_regex && started.elapsed() > cfg.regex_search_budget {
                tracing::warn!(query = text, scanned = hits.len(), "regex search over budget");
                return Err(Error::SearchTimeout(cfg.regex_search_budget));
            }

            let body = match self.read_body(&note.path) {
                Ok(body) => body,
                Err(err) if err.is_not_found() => continue,
                Err(Error::FileTooLarge { path, size, max }) => {
                    tracing::warn!(path = %path, size, max, "note too large, skipped by search");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let title_hit = matcher.is_match(&note.title);
            if !title_hit && !matcher.is_match(&body) {
                continue;
            }
            let lines = body
                .lines()
                .filter(|line| matcher.is_match(line))
                .take(MAX_MATCH_LINES)
                .map(|line| line.trim().to_string())
                .collect();
            hits.push(search_hit(note, lines));
        }

        tracing::debug!(
            query = text,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        self.remember(
            SEARCH_PREFIX,
            index.generation(),
            &params,
            CachedResult::Search(Arc::new(hits.clone())),
            cfg.search_cache_ttl,
        );
        Ok(hits)
    }

    pub fn list(&self, q: &ListQuery) -> Result<Vec<NoteSummary>> {
        let cfg = self.vault.config();
        let limit = q.limit.min(cfg.list_limit_max);
        let wanted = wanted_tags(&q.tags);
        let directory = q
            .directory
            .as_deref()
            .map(|d| directory_prefix(d, cfg.lowercase_directories))
            .filter(|d| !d.is_empty());
        let order = q.order.unwrap_or_else(|| q.sort.default_order());

        let params = format!(
            "{}|{}|{:?}|{:?}|{limit}|{}",
            wanted.iter().cloned().collect::<Vec<_>>().join(","),
            directory.as_deref().unwrap_or(""),
            q.sort,
            order,
            q.offset
        );
        let key = cache_key(LIST_PREFIX, self.index_generation(), &params);
        if let Some(CachedResult::List(notes)) = self.cache.get(&key) {
            return Ok(notes.as_ref().clone());
        }

        let index = self.index()?;
        let mut notes: Vec<&IndexedNote> = index
            .notes()
            .filter(|n| has_all_tags(n, &wanted))
            .filter(|n| match &directory {
                Some(prefix) => n.path.as_str_lossy().starts_with(prefix.as_str()),
                None => true,
            })
            .collect();

        notes.sort_by(|a, b| {
            let primary = match q.sort {
                SortKey::Modified => a.modified.cmp(&b.modified),
                SortKey::Created => a.created.cmp(&b.created),
                SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
                SortKey::Size => a.size.cmp(&b.size),
            };
            let primary = match order {
                SortOrder::Asc => primary,
                SortOrder::Desc => primary.reverse(),
            };
            primary.then_with(|| a.path.cmp(&b.path))
        });

        let out: Vec<NoteSummary> = notes
            .into_iter()
            .skip(q.offset)
            .take(limit)
            .map(NoteSummary::from)
            .collect();
        self.remember(
            LIST_PREFIX,
            index.generation(),
            &params,
            CachedResult::List(Arc::new(out.clone())),
            cfg.cache_ttl,
        );
        Ok(out)
    }

    pub fn resolve(&self, target: &str) -> Result<LinkLookup> {
        let index = self.index()?;
        let resolution = index.resolve(target);
        let suggestions = match resolution {
            Some(_) => Vec::new(),
            None => index.suggest(target, 5),
        };
        Ok(LinkLookup {
            query: target.to_string(),
            resolution,
            suggestions,
        })
    }

    pub fn backlinks(&self, reference: &str) -> Result<Backlinks> {
        let target = self.find_note(reference)?;
        let index = self.index()?;
        let backlinks: Vec<NoteSummary> = index
            .backlinks_of(&target)
            .iter()
            .filter_map(|p| index.note(p))
            .map(NoteSummary::from)
            .collect();
        Ok(Backlinks {
            target,
            count: backlinks.len(),
            backlinks,
        })
    }

    pub fn orphans(&self, limit: usize) -> Result<Vec<NoteSummary>> {
        let index = self.index()?;
        Ok(index
            .orphans()
            .iter()
            .filter_map(|p| index.note(p))
            .take(limit.min(self.vault.config().list_limit_max))
            .map(NoteSummary::from)
            .collect())
    }

    pub fn graph(&self, center: Option<&str>, depth: usize, max_nodes: usize) -> Result<GraphView> {
        let center = center.map(|c| self.find_note(c)).transpose()?;
        let index = self.index()?;
        Ok(index.graph(center.as_ref(), depth, max_nodes))
    }

    /// Tags by descending use count, ties alphabetical.
    pub fn list_tags(&self) -> Result<Vec<TagCount>> {
        let index = self.index()?;
        let mut tags: Vec<TagCount> = index
            .tag_counts()
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        Ok(tags)
    }

    // --- structure ---

    pub fn toc(&self, path: &str) -> Result<NoteToc> {
        let note = self.read_by_reference(path)?;
        Ok(NoteToc {
            headings: structure::toc(&note.body),
            path: note.path,
        })
    }

    pub fn read_section(&self, path: &str, section: &str) -> Result<Section> {
        let note = self.read_by_reference(path)?;
        structure::find_section(&note.body, section)
            .ok_or_else(|| Error::not_found("section", section))
    }

    pub fn update_section(&self, path: &str, section: &str, content: &str) -> Result<Note> {
        self.rewrite_body(path, |body| {
            structure::replace_section(body, section, content)
                .ok_or_else(|| Error::not_found("section", section))
        })
    }

    pub fn read_block(&self, path: &str, block_id: &str) -> Result<Block> {
        let note = self.read_by_reference(path)?;
        let id = block_id.trim_start_matches('^');
        structure::find_block(&note.body, id).ok_or_else(|| Error::not_found("block", id))
    }

    pub fn update_block(&self, path: &str, block_id: &str, content: &str) -> Result<Note> {
        let id = block_id.trim_start_matches('^');
        self.rewrite_body(path, |body| {
            structure::replace_block(body, id, content).ok_or_else(|| Error::not_found("block", id))
        })
    }

    // --- templates ---

    pub fn list_templates(&self) -> Result<Vec<TemplateInfo>> {
        self.templates.list()
    }

    pub fn save_template(&self, name: &str, content: &str) -> Result<TemplateInfo> {
        self.templates.save(name, content)
    }

    pub fn delete_template(&self, name: &str) -> Result<()> {
        self.templates.delete(name)
    }

    /// Renders `template` with `title` plus caller variables and creates the
    /// note `<folder>/<title>.md`.
    pub fn create_from_template(
        &self,
        template: &str,
        title: &str,
        folder: Option<&str>,
        variables: &BTreeMap<String, String>,
    ) -> Result<(Note, RenderedTemplate)> {
        let mut vars = variables.clone();
        vars.entry("title".to_string())
            .or_insert_with(|| title.to_string());
        let rendered = self.templates.render(template, &vars)?;
        let parsed = parse_note(&rendered.content);
        let frontmatter = (!parsed.frontmatter.is_empty()).then_some(parsed.frontmatter);
        let note = self.create(&join_folder(folder, title), &parsed.body, frontmatter)?;
        Ok((note, rendered))
    }

    /// Today's (or `date`'s) daily note, created from the `daily` template
    /// when one exists.
    pub fn daily_note(&self, date: Option<NaiveDate>, create: bool) -> Result<(Note, bool)> {
        let cfg = self.vault.config();
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        let midnight = date.and_time(NaiveTime::default());
        let name = format_checked(midnight, &cfg.daily_note_format).ok_or_else(|| {
            Error::Config(format!("invalid daily_note_format '{}'", cfg.daily_note_format))
        })?;
        let raw = format!("{}/{name}", cfg.daily_notes_dir.display());

        match self.read(&raw) {
            Ok(note) => return Ok((note, false)),
            Err(err) if err.is_not_found() && create => {}
            Err(err) => return Err(err),
        }

        let vars = BTreeMap::from([("title".to_string(), name.clone())]);
        let content = match self.templates.render("daily", &vars) {
            Ok(rendered) => rendered.content,
            Err(err) if err.is_not_found() => format!("# {name}\n"),
            Err(err) => return Err(err),
        };
        let parsed = parse_note(&content);
        let frontmatter = (!parsed.frontmatter.is_empty()).then_some(parsed.frontmatter);
        let note = self.create(&raw, &parsed.body, frontmatter)?;
        Ok((note, true))
    }

    // --- admin ---

    pub fn stats(&self) -> Result<VaultStats> {
        let index = self.index()?;
        Ok(VaultStats {
            total_notes: index.len(),
            total_size_bytes: index.notes().map(|n| n.size).sum(),
            total_tags: index.tag_counts().len(),
            total_links: index.link_count(),
            unresolved_links: index.unresolved_links(),
            orphans: index.orphans().len(),
            templates: self.templates.list()?.len(),
            index_generation: index.generation(),
            index_built_at: index.built_at(),
            cache: self.cache.stats(),
        })
    }

    pub fn health(&self) -> Health {
        let (notes, error) = match self.index() {
            Ok(index) => (Some(index.len()), None),
            Err(err) => {
                tracing::warn!(error = %err, "health check could not build index");
                (None, Some(err.to_string()))
            }
        };
        Health {
            status: if error.is_none() { "healthy" } else { "degraded" },
            vault_root: self.vault.root().display().to_string(),
            notes,
            index_built: self.index.is_built(),
            error,
            cache: self.cache.stats(),
        }
    }

    pub fn clear_cache(&self) -> ClearedCache {
        let entries_cleared = self.cache.clear();
        self.index.invalidate();
        tracing::info!(entries_cleared, "caches cleared");
        ClearedCache {
            entries_cleared,
            index_generation: self.index.generation(),
        }
    }

    /// Applies a batch of external changes with a single invalidation.
    pub fn apply_changes(&self, changes: &[ChangeEvent]) {
        if changes.is_empty() {
            return;
        }
        self.invalidate_all();
        tracing::debug!(changes = changes.len(), "external changes applied");
    }

    pub fn invalidate_all(&self) {
        self.index.invalidate();
        self.cache.invalidate_prefix(SEARCH_PREFIX);
        self.cache.invalidate_prefix(LIST_PREFIX);
    }

    // --- internals ---

    fn after_write(&self) {
        self.invalidate_all();
    }

    /// Caches a query result under the generation of the snapshot it was
    /// computed from. Results from an invalidated snapshot are dropped.
    fn remember(
        &self,
        prefix: &str,
        generation: u64,
        params: &str,
        value: CachedResult,
        ttl: std::time::Duration,
    ) {
        if generation != self.index_generation() {
            tracing::debug!(prefix, generation, "index changed during query, result not cached");
            return;
        }
        self.cache
            .insert_with_ttl(cache_key(prefix, generation, params), value, ttl);
    }

    /// Normalizes `raw` and checks the note exists, retrying with the
    /// directory case preserved when lowercasing found nothing.
    fn locate(&self, raw: &str) -> Result<VaultPath> {
        let rel = self.vault.normalize(raw)?;
        if self.vault.to_abs(&rel).is_file() {
            return Ok(rel);
        }
        if self.vault.config().lowercase_directories {
            let exact = normalize_path(raw, false)?;
            if exact != rel {
                self.vault.ensure_no_symlinks(&exact)?;
                if self.vault.to_abs(&exact).is_file() {
                    return Ok(exact);
                }
            }
        }
        Err(Error::not_found("note", rel.to_string()))
    }

    fn find_note(&self, reference: &str) -> Result<VaultPath> {
        match self.locate(reference) {
            Ok(rel) => Ok(rel),
            Err(err) if err.is_not_found() => self
                .index()?
                .resolve(reference)
                .map(|r| r.path)
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    fn load(&self, rel: &VaultPath) -> Result<Note> {
        self.load_with(rel, Vec::new())
    }

    fn load_with(&self, rel: &VaultPath, mut extra: Vec<ParseWarning>) -> Result<Note> {
        let abs = self.vault.to_abs(rel);
        let meta = std::fs::metadata(&abs).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("note", rel.to_string()),
            _ => Error::io(&abs, e),
        })?;
        let max = self.vault.config().max_file_size;
        if meta.len() > max {
            return Err(Error::FileTooLarge {
                path: rel.to_string(),
                size: meta.len(),
                max,
            });
        }
        let raw = std::fs::read(&abs).map_err(|e| Error::io(&abs, e))?;
        let parsed = parse_note_bytes(&raw);
        let (created, modified) = note_times(&meta, &parsed.frontmatter);

        let mut warnings = parsed.warnings;
        warnings.append(&mut extra);
        for warning in &warnings {
            tracing::warn!(path = %rel, %warning, "note parsed with warnings");
        }

        Ok(Note {
            title: note_title(rel, &parsed.frontmatter),
            tags: extract_tags(&parsed.frontmatter, &parsed.body)
                .into_iter()
                .collect(),
            wiki_links: extract_wiki_links(&parsed.body, rel),
            path: rel.clone(),
            size: meta.len(),
            created,
            modified,
            frontmatter: parsed.frontmatter,
            body: parsed.body,
            warnings,
        })
    }

    fn read_body(&self, rel: &VaultPath) -> Result<String> {
        let abs = self.vault.to_abs(rel);
        let not_found = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("note", rel.to_string()),
            _ => Error::io(&abs, e),
        };
        let size = std::fs::metadata(&abs).map_err(not_found)?.len();
        let max = self.vault.config().max_file_size;
        if size > max {
            return Err(Error::FileTooLarge {
                path: rel.to_string(),
                size,
                max,
            });
        }
        let raw = std::fs::read(&abs).map_err(not_found)?;
        Ok(parse_note_bytes(&raw).body)
    }

    fn rewrite_body(
        &self,
        reference: &str,
        edit: impl FnOnce(&str) -> Result<String>,
    ) -> Result<Note> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let rel = self.find_note(reference)?;
        let current = self.load(&rel)?;
        let body = edit(&current.body)?;
        let raw = render_note(&current.frontmatter, &body)?;
        self.vault.write_atomic(&rel, raw.as_bytes())?;

        self.after_write();
        tracing::info!(path = %rel, "note structure updated");
        self.load(&rel)
    }
}

fn write_new(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

fn cache_key(prefix: &str, generation: u64, params: &str) -> String {
    format!("{prefix}{generation}|{params}")
}

fn join_append(existing: &str, addition: &str) -> String {
    let existing = existing.trim_end_matches(['\r', '\n']);
    if existing.trim().is_empty() {
        return addition.to_string();
    }
    format!("{existing}\n\n{addition}")
}

pub(crate) fn join_folder(folder: Option<&str>, title: &str) -> String {
    match folder.map(|f| f.trim().trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{folder}/{title}"),
        None => title.to_string(),
    }
}

fn wanted_tags(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim().trim_start_matches('#').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn has_all_tags(note: &IndexedNote, wanted: &BTreeSet<String>) -> bool {
    if wanted.is_empty() {
        return true;
    }
    let have: BTreeSet<String> = note.tags.iter().map(|t| t.to_lowercase()).collect();
    wanted.is_subset(&have)
}

fn search_hit(note: &IndexedNote, matches: Vec<String>) -> SearchHit {
    SearchHit {
        path: note.path.clone(),
        title: note.title.clone(),
        tags: note.tags.iter().cloned().collect(),
        matches,
    }
}

/// `"Projects/Active/"` -> `"projects/active/"` (trailing slash kept so
/// `projects` does not match `projects-old`).
fn directory_prefix(raw: &str, lowercase: bool) -> String {
    let parts: Vec<&str> = raw
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    let joined = parts.join("/");
    let joined = if lowercase { joined.to_lowercase() } else { joined };
    format!("{joined}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, VaultManager) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Welcome.md"), "# Welcome\n").unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        (dir, VaultManager::new(vault).unwrap())
    }

    #[test]
    fn append_joins_with_blank_line() {
        assert_eq!(join_append("a\n", "b"), "a\n\nb");
        assert_eq!(join_append("", "b"), "b");
        assert_eq!(join_append("\n\n", "b"), "b");
    }

    #[test]
    fn folder_is_joined_without_duplicate_slashes() {
        assert_eq!(join_folder(Some("/projects/"), "Plan"), "projects/Plan");
        assert_eq!(join_folder(Some("  "), "Plan"), "Plan");
        assert_eq!(join_folder(None, "Plan"), "Plan");
    }

    #[test]
    fn directory_prefix_normalizes() {
        assert_eq!(directory_prefix("Projects/Active/", true), "projects/active/");
        assert_eq!(directory_prefix("./Notes", false), "Notes/");
        assert_eq!(directory_prefix("/", true), "");
    }

    #[test]
    fn sort_keys_parse() {
        assert_eq!("Title".parse::<SortKey>().unwrap(), SortKey::Title);
        assert!("random".parse::<SortKey>().is_err());
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
    }

    #[test]
    fn locate_falls_back_to_preserved_directory_case() {
        let (dir, mgr) = manager();
        std::fs::create_dir_all(dir.path().join("Projects")).unwrap();
        std::fs::write(dir.path().join("Projects/Plan.md"), "plan").unwrap();
        let note = mgr.read("Projects/Plan").unwrap();
        assert_eq!(note.path.to_string(), "Projects/Plan.md");
    }

    #[test]
    fn search_results_are_cached_until_a_write() {
        let (_dir, mgr) = manager();
        let q = SearchQuery {
            query: Some("welcome".into()),
            limit: 10,
            ..SearchQuery::default()
        };
        assert_eq!(mgr.search(&q).unwrap().len(), 1);
        assert_eq!(mgr.search(&q).unwrap().len(), 1);
        assert!(mgr.cache_stats().hits >= 1);

        mgr.create("Second", "welcome again", None).unwrap();
        assert_eq!(mgr.search(&q).unwrap().len(), 2);
    }

    #[test]
    fn results_from_an_invalidated_snapshot_are_not_cached() {
        let (_dir, mgr) = manager();
        let q = SearchQuery {
            query: Some("welcome".into()),
            limit: 10,
            ..SearchQuery::default()
        };
        let stale = mgr.index().unwrap();
        mgr.create("Second", "welcome again", None).unwrap();

        mgr.remember(
            SEARCH_PREFIX,
            stale.generation(),
            "welcome||10|false",
            CachedResult::Search(Arc::new(Vec::new())),
            std::time::Duration::from_secs(60),
        );
        assert_eq!(mgr.search(&q).unwrap().len(), 2);
    }

    #[test]
    fn search_skips_notes_that_grew_past_the_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Big.md"), "needle\n").unwrap();
        std::fs::write(dir.path().join("Small.md"), "needle\n").unwrap();
        let cfg = crate::VaultConfig {
            max_file_size: 64,
            ..crate::VaultConfig::default()
        };
        let mgr = VaultManager::new(Vault::with_config(dir.path(), cfg).unwrap()).unwrap();
        assert_eq!(mgr.index().unwrap().len(), 2);

        std::fs::write(dir.path().join("Big.md"), "needle ".repeat(50)).unwrap();
        let hits = mgr
            .search(&SearchQuery {
                query: Some("needle".into()),
                limit: 10,
                ..SearchQuery::default()
            })
            .unwrap();
        let paths: Vec<String> = hits.iter().map(|h| h.path.to_string()).collect();
        assert_eq!(paths, vec!["Small.md"]);
    }

    #[test]
    fn structure_edits_keep_frontmatter() {
        let (_dir, mgr) = manager();
        let mut fm = Frontmatter::new();
        fm.insert("status", serde_yaml::Value::from("draft"));
        mgr.create("Doc", "# Intro\nold\n# End\nbye\n", Some(fm)).unwrap();

        let note = mgr.update_section("Doc", "Intro", "new").unwrap();
        assert_eq!(note.frontmatter.get_str("status"), Some("draft"));
        assert!(note.body.contains("new"));
        assert!(!note.body.contains("old"));
        assert!(note.body.contains("# End"));

        let err = mgr.read_section("Doc", "Missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn daily_note_uses_template_when_present() {
        let (_dir, mgr) = manager();
        mgr.save_template("daily", "# Log {{title}}\n").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();

        let (note, created) = mgr.daily_note(Some(date), true).unwrap();
        assert!(created);
        assert_eq!(note.path.to_string(), "daily/2025-01-03.md");
        assert_eq!(note.body, "# Log 2025-01-03\n");

        let (_, created) = mgr.daily_note(Some(date), true).unwrap();
        assert!(!created);

        let other = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        assert!(mgr.daily_note(Some(other), false).unwrap_err().is_not_found());
    }
}
