use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDateTime};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    pub name: String,
    pub extends: Option<String>,
    pub includes: Vec<String>,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedTemplate {
    pub content: String,
    pub variables_used: Vec<String>,
    pub variables_missing: Vec<String>,
}

const MACROS: [&str; 3] = ["date", "time", "datetime"];

/// Templates stored as `<dir>/<name>.md`.
///
/// `{{name}}` substitutes a caller variable, `{{date}}`, `{{time}}` and
/// `{{datetime}}` (optionally `{{date:%d.%m.%Y}}`) expand to the current time.
/// `{% extends "base" %}` renders the parent first and appends the child after a
/// blank line; `{% include "part" %}` is replaced by the rendered part.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    max_depth: usize,
    variable_re: Regex,
    extends_re: Regex,
    include_re: Regex,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>, max_depth: usize) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("template pattern: {e}")))
        };
        Ok(Self {
            dir: dir.into(),
            max_depth,
            variable_re: compile(r"\{\{([a-zA-Z0-9_]+)(?::([^}]+))?\}\}")?,
            extends_re: compile(r#"\{%\s*extends\s+"([^"]+)"\s*%\}"#)?,
            include_re: compile(r#"\{%\s*include\s+"([^"]+)"\s*%\}"#)?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Result<Vec<TemplateInfo>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io(&self.dir, err)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.dir, e))?;
            let path = entry.path();
            let is_md = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
            if !is_md || !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(template = name, error = %err, "skipping unreadable template");
                    continue;
                }
            };
            out.push(self.describe(name, &content));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn describe(&self, name: &str, content: &str) -> TemplateInfo {
        let variables: BTreeSet<String> = self
            .variable_re
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .filter(|v| !MACROS.contains(&v.as_str()))
            .collect();
        TemplateInfo {
            name: name.to_string(),
            extends: self.extends_re.captures(content).map(|c| c[1].to_string()),
            includes: self
                .include_re
                .captures_iter(content)
                .map(|c| c[1].to_string())
                .collect(),
            variables: variables.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<String> {
        let path = self.path_for(name)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("template", name))
            }
            Err(err) => Err(Error::io(&path, err)),
        }
    }

    pub fn save(&self, name: &str, content: &str) -> Result<TemplateInfo> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        std::fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
        tracing::info!(template = name, "template saved");
        Ok(self.describe(clean_name(name)?, content))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(template = name, "template deleted");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("template", name))
            }
            Err(err) => Err(Error::io(&path, err)),
        }
    }

    pub fn render(&self, name: &str, vars: &BTreeMap<String, String>) -> Result<RenderedTemplate> {
        self.render_at(name, vars, Local::now().naive_local(), 0)
    }

    fn render_at(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
        now: NaiveDateTime,
        depth: usize,
    ) -> Result<RenderedTemplate> {
        if depth > self.max_depth {
            return Err(Error::Validation(format!(
                "template nesting exceeds maximum depth of {}",
                self.max_depth
            )));
        }

        let mut content = self.get(name)?;

        let parent = self.extends_re.captures(&content).map(|c| c[1].to_string());
        if let Some(parent) = parent {
            let rendered_parent = self.render_at(&parent, vars, now, depth + 1)?;
            let child = self.extends_re.replace(&content, "");
            content = format!(
                "{}\n\n{}",
                rendered_parent.content,
                child.trim_start_matches(['\r', '\n'])
            );
        }

        let content = self
            .include_re
            .replace_all(&content, |caps: &Captures| {
                match self.render_at(&caps[1], vars, now, depth + 1) {
                    Ok(part) => part.content,
                    Err(err) => {
                        tracing::warn!(template = name, include = &caps[1], error = %err, "include failed");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        let mut used = BTreeSet::new();
        let mut missing = BTreeSet::new();
        let content = self
            .variable_re
            .replace_all(&content, |caps: &Captures| {
                let var = &caps[1];
                let spec = caps.get(2).map(|m| m.as_str());
                if MACROS.contains(&var) {
                    used.insert(var.to_string());
                    return render_macro(var, spec, now).unwrap_or_else(|| caps[0].to_string());
                }
                match vars.get(var) {
                    Some(value) => {
                        used.insert(var.to_string());
                        value.clone()
                    }
                    None => {
                        missing.insert(var.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        if !missing.is_empty() {
            tracing::debug!(template = name, missing = ?missing, "template variables left unsubstituted");
        }

        Ok(RenderedTemplate {
            content,
            variables_used: used.into_iter().collect(),
            variables_missing: missing.into_iter().collect(),
        })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.md", clean_name(name)?)))
    }
}

fn clean_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_suffix(".md").unwrap_or(trimmed);
    if trimmed.is_empty()
        || trimmed.contains(['/', '\\'])
        || trimmed.contains("..")
        || trimmed.starts_with('.')
    {
        return Err(Error::InvalidPath(format!("invalid template name: {name:?}")));
    }
    Ok(trimmed)
}

/// `None` when the format string is not valid strftime.
fn render_macro(name: &str, spec: Option<&str>, now: NaiveDateTime) -> Option<String> {
    let fmt = match (name, spec) {
        (_, Some(spec)) => spec,
        ("date", None) => "%Y-%m-%d",
        ("time", None) => "%H:%M:%S",
        _ => "%Y-%m-%d %H:%M:%S",
    };
    format_checked(now, fmt)
}

/// Formats `at` with a caller-supplied strftime string, `None` if it is not
/// valid or asks for fields a naive timestamp lacks (such as `%z`).
pub(crate) fn format_checked(at: NaiveDateTime, fmt: &str) -> Option<String> {
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return None;
    }
    let mut out = String::new();
    write!(out, "{}", at.format(fmt)).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path().join(".templates"), 5).unwrap();
        (dir, store)
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap()
    }

    #[test]
    fn variables_and_macros_are_substituted() {
        let (_tmp, store) = store();
        store
            .save("meeting", "# {{topic}}\n{{date}} {{time}} {{date:%d.%m}} {{who}}\n")
            .unwrap();
        let vars = BTreeMap::from([("topic".to_string(), "Sync".to_string())]);
        let out = store.render_at("meeting", &vars, now(), 0).unwrap();
        assert_eq!(out.content, "# Sync\n2025-03-09 14:05:00 09.03 {{who}}\n");
        assert_eq!(out.variables_missing, vec!["who"]);
        assert!(out.variables_used.contains(&"topic".to_string()));
    }

    #[test]
    fn extends_and_include_compose() {
        let (_tmp, store) = store();
        store.save("header", "HEADER").unwrap();
        store.save("base", "{% include \"header\" %}\nbase body").unwrap();
        store.save("child", "{% extends \"base\" %}\nchild body {{x}}").unwrap();
        let vars = BTreeMap::from([("x".to_string(), "1".to_string())]);
        let out = store.render_at("child", &vars, now(), 0).unwrap();
        assert_eq!(out.content, "HEADER\nbase body\n\nchild body 1");
    }

    #[test]
    fn self_extension_hits_depth_limit() {
        let (_tmp, store) = store();
        store.save("loop", "{% extends \"loop\" %}x").unwrap();
        let err = store.render_at("loop", &BTreeMap::new(), now(), 0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let (_tmp, store) = store();
        for bad in ["../x", "a/b", "a\\b", "", ".hidden"] {
            assert!(matches!(store.save(bad, "x"), Err(Error::InvalidPath(_))), "{bad}");
        }
    }

    #[test]
    fn list_describes_templates_and_delete_removes() {
        let (_tmp, store) = store();
        assert!(store.list().unwrap().is_empty());
        store.save("b", "{{title}} {{date}}").unwrap();
        store.save("a", "{% extends \"b\" %}").unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].extends.as_deref(), Some("b"));
        assert_eq!(list[1].variables, vec!["title"]);

        store.delete("a").unwrap();
        assert!(store.delete("a").unwrap_err().is_not_found());
    }

    #[test]
    fn invalid_strftime_is_left_alone() {
        assert_eq!(render_macro("date", Some("%Q"), now()), None);
        assert_eq!(render_macro("date", Some("%z"), now()), None);
        assert_eq!(render_macro("datetime", None, now()).as_deref(), Some("2025-03-09 14:05:00"));
    }
}
