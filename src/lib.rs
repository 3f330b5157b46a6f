mod actions;
mod cache;
mod config;
mod error;
mod frontmatter;
mod graph;
mod help;
mod index;
mod link_resolve;
mod manager;
mod parse;
mod proxy;
mod registry;
mod router;
mod service;
pub mod structure;
mod templates;
mod vault;

pub use crate::cache::CacheStats;
pub use crate::config::VaultConfig;
pub use crate::error::{Error, Result};
pub use crate::frontmatter::{Frontmatter, ParseWarning};
pub use crate::graph::{GraphEdge, GraphNode, GraphView};
pub use crate::help::{TOPICS as HELP_TOPICS, Verbosity, help};
pub use crate::index::{IndexCache, IndexedNote, LinkIndex, Suggestion};
pub use crate::link_resolve::{MatchType, Resolution, normalize_title, similarity};
pub use crate::manager::{
    Backlinks, ClearedCache, Health, LinkLookup, ListQuery, Note, NoteMetadata, NoteSummary,
    NoteToc, NoteUpdate, SearchHit, SearchQuery, SortKey, SortOrder, TagCount, VaultManager,
    VaultStats,
};
pub use crate::parse::{
    ParsedNote, WikiLink, extract_tags, extract_wiki_links, note_title, parse_note,
    parse_note_bytes, render_note,
};
pub use crate::proxy::{Proxy, ProxyRequest};
pub use crate::registry::{
    ActionDef, ActionRegistry, Bundle, DefaultValue, Envelope, FieldKind, FieldSpec, Limit,
    ValidatedArgs,
};
pub use crate::router::{ActionExplanation, Alternative, FieldHelp, IntentRouter, RoutingResult};
pub use crate::service::{ChangeEvent, ChangeKind, VaultEvent, VaultService};
pub use crate::templates::{RenderedTemplate, TemplateInfo, TemplateStore};
pub use crate::vault::{Vault, VaultPath, normalize_path};
