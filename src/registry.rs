use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::actions;
use crate::{Error, Result, VaultConfig, VaultManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bundle {
    Core,
    Knowledge,
    Templates,
    Admin,
}

impl Bundle {
    pub const ALL: [Bundle; 4] = [Bundle::Core, Bundle::Knowledge, Bundle::Templates, Bundle::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Bundle::Core => "core",
            Bundle::Knowledge => "knowledge",
            Bundle::Templates => "templates",
            Bundle::Admin => "admin",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Bundle::Core => "note CRUD, search, listing, link resolution and note structure",
            Bundle::Knowledge => "backlinks, orphans, link graph and tags",
            Bundle::Templates => "note templates with variables, extends and includes",
            Bundle::Admin => "health, statistics, caches and daily notes",
        }
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    Object,
    /// Array of strings, or one comma-separated string.
    StringList,
    /// Object whose values are strings, numbers or booleans.
    StringMap,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "non-negative integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::StringList => "list of strings",
            FieldKind::StringMap => "object of strings",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.as_u64().is_some(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::StringList => match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            },
            FieldKind::StringMap => value.as_object().is_some_and(|map| {
                map.values()
                    .all(|v| v.is_string() || v.is_number() || v.is_boolean())
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Int(u64),
    Bool(bool),
    Str(&'static str),
}

impl DefaultValue {
    pub fn to_json(self) -> Value {
        match self {
            DefaultValue::Int(n) => Value::from(n),
            DefaultValue::Bool(b) => Value::from(b),
            DefaultValue::Str(s) => Value::from(s),
        }
    }
}

/// Upper bound on an integer field, fixed or taken from [`VaultConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Fixed(u64),
    SearchMax,
    ListMax,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub default: Option<DefaultValue>,
    pub max: Option<Limit>,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            default: None,
            max: None,
        }
    }

    const fn default(self, value: DefaultValue) -> Self {
        Self {
            default: Some(value),
            ..self
        }
    }

    const fn max(self, limit: Limit) -> Self {
        Self {
            max: Some(limit),
            ..self
        }
    }
}

pub type Handler = fn(&VaultManager, &ValidatedArgs) -> Result<Value>;

/// One entry of the closed action set.
pub struct ActionDef {
    pub name: &'static str,
    pub bundle: Bundle,
    pub description: &'static str,
    pub required: &'static [FieldSpec],
    pub optional: &'static [FieldSpec],
    pub handler: Handler,
}

impl ActionDef {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .find(|f| f.name == name)
    }

    pub fn required_names(&self) -> Vec<&'static str> {
        self.required.iter().map(|f| f.name).collect()
    }

    pub fn optional_names(&self) -> Vec<&'static str> {
        self.optional.iter().map(|f| f.name).collect()
    }

    pub fn defaults(&self) -> Map<String, Value> {
        self.optional
            .iter()
            .filter_map(|f| Some((f.name.to_string(), f.default?.to_json())))
            .collect()
    }
}

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("bundle", &self.bundle)
            .finish_non_exhaustive()
    }
}

use DefaultValue::{Bool, Int, Str};
use FieldKind::{Boolean, Integer, Object, StringList, StringMap};

const TITLE: FieldSpec = FieldSpec::new("title", FieldKind::String, "note title or path");
const FILE_PATH: FieldSpec = FieldSpec::new("file_path", FieldKind::String, "note path");
const PATH: FieldSpec = FieldSpec::new("path", FieldKind::String, "note path or title");
const CONTENT: FieldSpec = FieldSpec::new("content", FieldKind::String, "markdown body");
const SECTION: FieldSpec = FieldSpec::new("section", FieldKind::String, "heading text or anchor");
const BLOCK_ID: FieldSpec = FieldSpec::new("block_id", FieldKind::String, "block id, with or without ^");
const TAGS: FieldSpec = FieldSpec::new("tags", StringList, "tags the note must carry (all of them)");
const FOLDER: FieldSpec = FieldSpec::new("folder", FieldKind::String, "destination folder");
const TEMPLATE_NAME: FieldSpec = FieldSpec::new("name", FieldKind::String, "template name");

static ACTIONS: &[ActionDef] = &[
    // core
    ActionDef {
        name: "search_notes",
        bundle: Bundle::Core,
        description: "Search note titles and bodies by substring or regex, optionally filtered by tags.",
        required: &[FieldSpec::new("query", FieldKind::String, "text or pattern to look for")],
        optional: &[
            TAGS,
            FieldSpec::new("limit", Integer, "maximum results").default(Int(50)).max(Limit::SearchMax),
            FieldSpec::new("use_regex", Boolean, "treat query as a regular expression").default(Bool(false)),
        ],
        handler: actions::search_notes,
    },
    ActionDef {
        name: "list_notes",
        bundle: Bundle::Core,
        description: "List notes with optional tag and directory filters, sorting and paging.",
        required: &[],
        optional: &[
            TAGS,
            FieldSpec::new("directory", FieldKind::String, "only notes under this folder"),
            FieldSpec::new("sort_by", FieldKind::String, "modified, created, title or size").default(Str("modified")),
            FieldSpec::new("order", FieldKind::String, "asc or desc (default depends on sort_by)"),
            FieldSpec::new("limit", Integer, "maximum results").default(Int(100)).max(Limit::ListMax),
            FieldSpec::new("offset", Integer, "results to skip").default(Int(0)),
        ],
        handler: actions::list_notes,
    },
    ActionDef {
        name: "get_note",
        bundle: Bundle::Core,
        description: "Note metadata without the body: frontmatter, tags, sizes, link counts.",
        required: &[TITLE],
        optional: &[],
        handler: actions::get_note,
    },
    ActionDef {
        name: "read_note_content",
        bundle: Bundle::Core,
        description: "Full note including body, frontmatter and wiki-links.",
        required: &[TITLE],
        optional: &[],
        handler: actions::read_note_content,
    },
    ActionDef {
        name: "create_note",
        bundle: Bundle::Core,
        description: "Create a note; fails if it already exists. Leading # on tags is stripped with a warning.",
        required: &[TITLE, CONTENT],
        optional: &[
            FieldSpec::new("tags", StringList, "frontmatter tags"),
            FieldSpec::new("frontmatter", Object, "frontmatter fields"),
            FOLDER,
        ],
        handler: actions::create_note,
    },
    ActionDef {
        name: "update_note",
        bundle: Bundle::Core,
        description: "Replace or append body content and merge frontmatter fields (null clears a field).",
        required: &[FILE_PATH],
        optional: &[
            CONTENT,
            FieldSpec::new("frontmatter", Object, "fields to merge"),
            FieldSpec::new("append", Boolean, "append content instead of replacing").default(Bool(false)),
        ],
        handler: actions::update_note,
    },
    ActionDef {
        name: "append_note",
        bundle: Bundle::Core,
        description: "Append content to a note after a blank line.",
        required: &[FILE_PATH, CONTENT],
        optional: &[],
        handler: actions::append_note,
    },
    ActionDef {
        name: "delete_note",
        bundle: Bundle::Core,
        description: "Delete a note.",
        required: &[FILE_PATH],
        optional: &[],
        handler: actions::delete_note,
    },
    ActionDef {
        name: "move_note",
        bundle: Bundle::Core,
        description: "Move or rename a note, creating destination folders.",
        required: &[
            FieldSpec::new("old_path", FieldKind::String, "current note path"),
            FieldSpec::new("new_path", FieldKind::String, "destination path"),
        ],
        optional: &[],
        handler: actions::move_note,
    },
    ActionDef {
        name: "resolve_link",
        bundle: Bundle::Core,
        description: "Resolve wiki-link text to a note path (exact, title, then fuzzy).",
        required: &[FieldSpec::new("link_name", FieldKind::String, "text inside [[...]]")],
        optional: &[],
        handler: actions::resolve_link,
    },
    ActionDef {
        name: "get_toc",
        bundle: Bundle::Core,
        description: "Heading outline of a note.",
        required: &[PATH],
        optional: &[],
        handler: actions::get_toc,
    },
    ActionDef {
        name: "read_section",
        bundle: Bundle::Core,
        description: "Content under one heading, up to the next heading of the same or higher level.",
        required: &[PATH, SECTION],
        optional: &[],
        handler: actions::read_section,
    },
    ActionDef {
        name: "update_section",
        bundle: Bundle::Core,
        description: "Replace the content under one heading, keeping the heading.",
        required: &[PATH, SECTION, CONTENT],
        optional: &[],
        handler: actions::update_section,
    },
    ActionDef {
        name: "read_block",
        bundle: Bundle::Core,
        description: "A paragraph, list, quote, table or code block marked with ^id.",
        required: &[PATH, BLOCK_ID],
        optional: &[],
        handler: actions::read_block,
    },
    ActionDef {
        name: "update_block",
        bundle: Bundle::Core,
        description: "Replace a ^id block, keeping its id.",
        required: &[PATH, BLOCK_ID, CONTENT],
        optional: &[],
        handler: actions::update_block,
    },
    // knowledge
    ActionDef {
        name: "get_backlinks",
        bundle: Bundle::Knowledge,
        description: "Notes linking to the given note.",
        required: &[TITLE],
        optional: &[],
        handler: actions::get_backlinks,
    },
    ActionDef {
        name: "get_orphans",
        bundle: Bundle::Knowledge,
        description: "Notes with no incoming and no outgoing links.",
        required: &[],
        optional: &[FieldSpec::new("limit", Integer, "maximum results").default(Int(100)).max(Limit::ListMax)],
        handler: actions::get_orphans,
    },
    ActionDef {
        name: "get_graph",
        bundle: Bundle::Knowledge,
        description: "Link graph around a note, or of the whole vault.",
        required: &[],
        optional: &[
            FieldSpec::new("center", FieldKind::String, "note to start from"),
            FieldSpec::new("depth", Integer, "hops from the center").default(Int(1)).max(Limit::Fixed(3)),
            FieldSpec::new("max_nodes", Integer, "node budget").default(Int(50)).max(Limit::Fixed(200)),
        ],
        handler: actions::get_graph,
    },
    ActionDef {
        name: "list_tags",
        bundle: Bundle::Knowledge,
        description: "All tags with usage counts.",
        required: &[],
        optional: &[],
        handler: actions::list_tags,
    },
    // templates
    ActionDef {
        name: "list_templates",
        bundle: Bundle::Templates,
        description: "Stored templates with their variables, parent and includes.",
        required: &[],
        optional: &[],
        handler: actions::list_templates,
    },
    ActionDef {
        name: "create_from_template",
        bundle: Bundle::Templates,
        description: "Render a template and create a note from it.",
        required: &[
            FieldSpec::new("template", FieldKind::String, "template name"),
            TITLE,
        ],
        optional: &[
            FieldSpec::new("variables", StringMap, "values for {{name}} placeholders"),
            FOLDER,
        ],
        handler: actions::create_from_template,
    },
    ActionDef {
        name: "save_template",
        bundle: Bundle::Templates,
        description: "Create or overwrite a template.",
        required: &[TEMPLATE_NAME, CONTENT],
        optional: &[],
        handler: actions::save_template,
    },
    ActionDef {
        name: "delete_template",
        bundle: Bundle::Templates,
        description: "Delete a template.",
        required: &[TEMPLATE_NAME],
        optional: &[],
        handler: actions::delete_template,
    },
    // admin
    ActionDef {
        name: "health_check",
        bundle: Bundle::Admin,
        description: "Vault and index status.",
        required: &[],
        optional: &[],
        handler: actions::health_check,
    },
    ActionDef {
        name: "get_stats",
        bundle: Bundle::Admin,
        description: "Note, tag and link totals plus cache statistics.",
        required: &[],
        optional: &[],
        handler: actions::get_stats,
    },
    ActionDef {
        name: "clear_cache",
        bundle: Bundle::Admin,
        description: "Drop cached results and invalidate the link index.",
        required: &[],
        optional: &[],
        handler: actions::clear_cache,
    },
    ActionDef {
        name: "get_daily_note",
        bundle: Bundle::Admin,
        description: "Today's (or a given date's) daily note, created from the 'daily' template if missing.",
        required: &[],
        optional: &[
            FieldSpec::new("date", FieldKind::String, "YYYY-MM-DD, defaults to today"),
            FieldSpec::new("create", Boolean, "create the note when missing").default(Bool(true)),
        ],
        handler: actions::get_daily_note,
    },
];

/// Arguments that passed [`ActionRegistry::validate`]: known fields only,
/// defaults filled in, types checked.
#[derive(Debug, Clone)]
pub struct ValidatedArgs {
    action: &'static ActionDef,
    values: Map<String, Value>,
}

impl ValidatedArgs {
    pub fn action(&self) -> &'static ActionDef {
        self.action
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.opt_str(name)
            .ok_or_else(|| Error::Validation(format!("missing required field '{name}'")))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn usize(&self, name: &str) -> Result<usize> {
        let n = self
            .values
            .get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Validation(format!("missing integer field '{name}'")))?;
        usize::try_from(n).map_err(|_| Error::Validation(format!("{name} is out of range")))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn string_list(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn object(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| v.is_object())
    }

    pub fn string_map(&self, name: &str) -> BTreeMap<String, String> {
        let Some(map) = self.values.get(name).and_then(Value::as_object) else {
            return BTreeMap::new();
        };
        map.iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()
    }
}

/// Uniform result of executing an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub action: String,
    pub bundle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(action: &str, bundle: &str, result: Value) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            bundle: bundle.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(action: &str, bundle: &str, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            bundle: bundle.to_string(),
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "action": self.action, "bundle": self.bundle, "error": e.to_string() })
        })
    }
}

/// The closed action set plus the configured limits it validates against.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    search_limit_max: u64,
    list_limit_max: u64,
}

impl ActionRegistry {
    pub fn new(cfg: &VaultConfig) -> Self {
        Self {
            search_limit_max: cfg.search_limit_max as u64,
            list_limit_max: cfg.list_limit_max as u64,
        }
    }

    pub fn actions(&self) -> &'static [ActionDef] {
        ACTIONS
    }

    pub fn get(&self, name: &str) -> Option<&'static ActionDef> {
        ACTIONS.iter().find(|a| a.name == name)
    }

    pub fn in_bundle(&self, bundle: Bundle) -> impl Iterator<Item = &'static ActionDef> {
        ACTIONS.iter().filter(move |a| a.bundle == bundle)
    }

    /// Resolved maximum for an integer field, with the config key it came from.
    pub fn limit_of(&self, field: &FieldSpec) -> Option<(u64, Option<&'static str>)> {
        match field.max? {
            Limit::Fixed(n) => Some((n, None)),
            Limit::SearchMax => Some((self.search_limit_max, Some("search_limit_max"))),
            Limit::ListMax => Some((self.list_limit_max, Some("list_limit_max"))),
        }
    }

    pub fn limits(&self, action: &ActionDef) -> BTreeMap<&'static str, u64> {
        action
            .required
            .iter()
            .chain(action.optional.iter())
            .filter_map(|f| Some((f.name, self.limit_of(f)?.0)))
            .collect()
    }

    /// Checks, in order: the action exists, required fields are present,
    /// field types match, integer fields stay within their limits. Unknown
    /// fields are dropped with a warning; missing optional fields get defaults.
    pub fn validate(&self, action: &str, args: &Map<String, Value>) -> Result<ValidatedArgs> {
        let def = self
            .get(action)
            .ok_or_else(|| Error::not_found("action", action))?;

        let missing: Vec<&str> = def
            .required
            .iter()
            .filter(|f| args.get(f.name).is_none_or(Value::is_null))
            .map(|f| f.name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "missing required field(s) for '{}': {}",
                def.name,
                missing.join(", ")
            )));
        }

        let mut values = Map::new();
        for (key, value) in args {
            let Some(field) = def.field(key) else {
                tracing::warn!(action = def.name, field = %key, "ignoring unknown argument");
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !field.kind.accepts(value) {
                return Err(Error::Validation(format!(
                    "field '{}' must be a {}, got {}",
                    key,
                    field.kind.name(),
                    json_type(value)
                )));
            }
            values.insert(key.clone(), value.clone());
        }

        for field in def.required.iter().chain(def.optional.iter()) {
            let Some((max, source)) = self.limit_of(field) else {
                continue;
            };
            let Some(n) = values.get(field.name).and_then(Value::as_u64) else {
                continue;
            };
            if n > max {
                let source = source.map(|s| format!(" ({s})")).unwrap_or_default();
                return Err(Error::Validation(format!(
                    "{} {n} exceeds maximum {max}{source}",
                    field.name
                )));
            }
        }

        for field in def.optional {
            if let Some(default) = field.default {
                values
                    .entry(field.name.to_string())
                    .or_insert_with(|| default.to_json());
            }
        }

        Ok(ValidatedArgs {
            action: def,
            values,
        })
    }

    pub fn execute(&self, manager: &VaultManager, args: &ValidatedArgs) -> Result<Value> {
        let def = args.action();
        tracing::debug!(action = def.name, bundle = %def.bundle, "executing action");
        (def.handler)(manager, args)
    }

    /// Validates and executes, folding any failure into the envelope.
    pub fn dispatch(&self, manager: &VaultManager, action: &str, args: &Map<String, Value>) -> Envelope {
        let bundle = self
            .get(action)
            .map(|a| a.bundle.as_str())
            .unwrap_or("unknown");
        let outcome = self
            .validate(action, args)
            .and_then(|validated| self.execute(manager, &validated));
        match outcome {
            Ok(result) => Envelope::ok(action, bundle, result),
            Err(err) => {
                tracing::debug!(action, error = %err, "action failed");
                Envelope::err(action, bundle, err)
            }
        }
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ActionRegistry {
        ActionRegistry::new(&VaultConfig::default())
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn action_names_are_unique() {
        let mut names: Vec<&str> = ACTIONS.iter().map(|a| a.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ACTIONS.len());
    }

    #[test]
    fn unknown_action_is_not_found() {
        let err = registry().validate("summon_dragon", &Map::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_required_fields_are_listed() {
        let err = registry()
            .validate("move_note", &args(json!({"old_path": "a"})))
            .unwrap_err();
        assert!(err.to_string().contains("new_path"), "{err}");
    }

    #[test]
    fn types_are_checked_before_limits() {
        let err = registry()
            .validate("search_notes", &args(json!({"query": "x", "limit": "ten"})))
            .unwrap_err();
        assert!(err.to_string().contains("must be a non-negative integer"), "{err}");

        let err = registry()
            .validate("search_notes", &args(json!({"query": "x", "limit": -1})))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn over_limit_is_rejected_with_the_limit() {
        let err = registry()
            .validate("search_notes", &args(json!({"query": "x", "limit": 500})))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments: limit 500 exceeds maximum 200 (search_limit_max)"
        );

        let err = registry()
            .validate("get_graph", &args(json!({"depth": 4})))
            .unwrap_err();
        assert!(err.to_string().contains("depth 4 exceeds maximum 3"), "{err}");
    }

    #[test]
    fn defaults_fill_and_unknown_fields_drop() {
        let v = registry()
            .validate("search_notes", &args(json!({"query": "x", "colour": "blue", "tags": null})))
            .unwrap();
        assert_eq!(v.usize("limit").unwrap(), 50);
        assert!(!v.flag("use_regex"));
        assert!(v.get("colour").is_none());
        assert!(v.string_list("tags").is_empty());
    }

    #[test]
    fn tags_accept_list_or_comma_string() {
        let v = registry()
            .validate("list_notes", &args(json!({"tags": "a, b"})))
            .unwrap();
        assert_eq!(v.string_list("tags"), vec!["a", "b"]);
        let err = registry()
            .validate("list_notes", &args(json!({"tags": [1, 2]})))
            .unwrap_err();
        assert!(err.to_string().contains("list of strings"));
    }

    #[test]
    fn string_map_coerces_scalars() {
        let v = registry()
            .validate(
                "create_from_template",
                &args(json!({"template": "t", "title": "x", "variables": {"n": 3, "ok": true}})),
            )
            .unwrap();
        let vars = v.string_map("variables");
        assert_eq!(vars["n"], "3");
        assert_eq!(vars["ok"], "true");
    }

    #[test]
    fn envelope_omits_the_unused_side() {
        let ok = Envelope::ok("list_tags", "knowledge", json!([])).to_json();
        assert_eq!(ok, json!({"success": true, "action": "list_tags", "bundle": "knowledge", "result": []}));
        let err = Envelope::err("x", "unknown", "boom").to_json();
        assert_eq!(err, json!({"success": false, "action": "x", "bundle": "unknown", "error": "boom"}));
    }
}
