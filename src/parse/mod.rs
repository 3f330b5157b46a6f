mod markdown;

pub use markdown::{
    ParsedNote, WikiLink, extract_tags, extract_wiki_links, note_title, parse_note,
    parse_note_bytes, render_note,
};
pub(crate) use markdown::{is_fence, normalize_tag};
