//! Handlers behind the action table. Each takes validated arguments, calls
//! into [`VaultManager`] and shapes the JSON result.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};

use crate::manager::{ListQuery, NoteUpdate, SearchQuery, SortKey, SortOrder, join_folder};
use crate::registry::ValidatedArgs;
use crate::{Error, Frontmatter, Result, VaultManager};

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

// --- core ---

pub(crate) fn search_notes(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let query = a.str("query")?;
    let hits = m.search(&SearchQuery {
        query: Some(query.to_string()),
        tags: a.string_list("tags"),
        limit: a.usize("limit")?,
        use_regex: a.flag("use_regex"),
    })?;
    Ok(json!({ "query": query, "count": hits.len(), "results": to_json(&hits)? }))
}

pub(crate) fn list_notes(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let sort = a.opt_str("sort_by").unwrap_or("modified").parse::<SortKey>()?;
    let order = a.opt_str("order").map(str::parse::<SortOrder>).transpose()?;
    let offset = a.usize("offset")?;
    let notes = m.list(&ListQuery {
        tags: a.string_list("tags"),
        directory: a.opt_str("directory").map(str::to_string),
        sort,
        order,
        limit: a.usize("limit")?,
        offset,
    })?;
    Ok(json!({ "count": notes.len(), "offset": offset, "notes": to_json(&notes)? }))
}

pub(crate) fn get_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.get_metadata(a.str("title")?)?)
}

pub(crate) fn read_note_content(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.read_by_reference(a.str("title")?)?)
}

pub(crate) fn create_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let mut frontmatter = match a.object("frontmatter") {
        Some(raw) => Frontmatter::from_json(raw)?,
        None => Frontmatter::new(),
    };
    let tags = a.string_list("tags");
    if !tags.is_empty() {
        let mut all = frontmatter.tags();
        all.extend(tags);
        frontmatter.set_tags(all);
    }
    let path = join_folder(a.opt_str("folder"), a.str("title")?);
    to_json(&m.create(&path, a.str("content")?, Some(frontmatter))?)
}

pub(crate) fn update_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let frontmatter = a.object("frontmatter").map(Frontmatter::from_json).transpose()?;
    let content = a.opt_str("content").map(str::to_string);
    if content.is_none() && frontmatter.is_none() {
        return Err(Error::Validation(
            "update_note needs 'content' or 'frontmatter'".into(),
        ));
    }
    let note = m.update(
        a.str("file_path")?,
        NoteUpdate {
            content,
            frontmatter,
            append: a.flag("append"),
            replace_frontmatter: false,
        },
    )?;
    to_json(&note)
}

pub(crate) fn append_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.append(a.str("file_path")?, a.str("content")?)?)
}

pub(crate) fn delete_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let path = m.delete(a.str("file_path")?)?;
    Ok(json!({ "deleted": path }))
}

pub(crate) fn move_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let note = m.move_note(a.str("old_path")?, a.str("new_path")?)?;
    Ok(json!({ "old_path": a.str("old_path")?, "new_path": &note.path, "note": to_json(&note)? }))
}

pub(crate) fn resolve_link(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let lookup = m.resolve(a.str("link_name")?)?;
    let mut out = to_json(&lookup)?;
    if let Value::Object(map) = &mut out {
        map.insert("found".into(), Value::Bool(lookup.resolution.is_some()));
    }
    Ok(out)
}

pub(crate) fn get_toc(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.toc(a.str("path")?)?)
}

pub(crate) fn read_section(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.read_section(a.str("path")?, a.str("section")?)?)
}

pub(crate) fn update_section(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.update_section(a.str("path")?, a.str("section")?, a.str("content")?)?)
}

pub(crate) fn read_block(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.read_block(a.str("path")?, a.str("block_id")?)?)
}

pub(crate) fn update_block(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.update_block(a.str("path")?, a.str("block_id")?, a.str("content")?)?)
}

// --- knowledge ---

pub(crate) fn get_backlinks(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.backlinks(a.str("title")?)?)
}

pub(crate) fn get_orphans(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let orphans = m.orphans(a.usize("limit")?)?;
    Ok(json!({ "count": orphans.len(), "orphans": to_json(&orphans)? }))
}

pub(crate) fn get_graph(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.graph(a.opt_str("center"), a.usize("depth")?, a.usize("max_nodes")?)?)
}

pub(crate) fn list_tags(m: &VaultManager, _a: &ValidatedArgs) -> Result<Value> {
    let tags = m.list_tags()?;
    Ok(json!({ "count": tags.len(), "tags": to_json(&tags)? }))
}

// --- templates ---

pub(crate) fn list_templates(m: &VaultManager, _a: &ValidatedArgs) -> Result<Value> {
    let templates = m.list_templates()?;
    Ok(json!({ "count": templates.len(), "templates": to_json(&templates)? }))
}

pub(crate) fn create_from_template(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let (note, rendered) = m.create_from_template(
        a.str("template")?,
        a.str("title")?,
        a.opt_str("folder"),
        &a.string_map("variables"),
    )?;
    Ok(json!({
        "note": to_json(&note)?,
        "variables_used": rendered.variables_used,
        "variables_missing": rendered.variables_missing,
    }))
}

pub(crate) fn save_template(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.save_template(a.str("name")?, a.str("content")?)?)
}

pub(crate) fn delete_template(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let name = a.str("name")?;
    m.delete_template(name)?;
    Ok(json!({ "deleted": name }))
}

// --- admin ---

pub(crate) fn health_check(m: &VaultManager, _a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.health())
}

pub(crate) fn get_stats(m: &VaultManager, _a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.stats()?)
}

pub(crate) fn clear_cache(m: &VaultManager, _a: &ValidatedArgs) -> Result<Value> {
    to_json(&m.clear_cache())
}

pub(crate) fn get_daily_note(m: &VaultManager, a: &ValidatedArgs) -> Result<Value> {
    let date = a
        .opt_str("date")
        .map(|raw| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|e| Error::Validation(format!("date '{raw}' is not YYYY-MM-DD: {e}")))
        })
        .transpose()?;
    let (note, created) = m.daily_note(date, a.flag("create"))?;
    Ok(json!({ "created": created, "note": to_json(&note)? }))
}
