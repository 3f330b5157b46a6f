use std::fmt::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::registry::{ActionDef, ActionRegistry, Bundle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Short,
    Normal,
}

impl FromStr for Verbosity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "normal" | "full" => Ok(Self::Normal),
            other => Err(Error::Validation(format!(
                "unknown verbosity '{other}' (expected short or normal)"
            ))),
        }
    }
}

pub const TOPICS: [&str; 9] = [
    "overview",
    "core",
    "knowledge",
    "search",
    "read",
    "write",
    "templates",
    "graph",
    "admin",
];

enum Topic {
    Overview,
    Bundle(Bundle),
    Actions {
        title: &'static str,
        intro: &'static str,
        actions: &'static [&'static str],
    },
}

fn topic(name: &str) -> Option<Topic> {
    Some(match name {
        "overview" => Topic::Overview,
        "core" => Topic::Bundle(Bundle::Core),
        "knowledge" => Topic::Bundle(Bundle::Knowledge),
        "templates" => Topic::Bundle(Bundle::Templates),
        "admin" => Topic::Bundle(Bundle::Admin),
        "search" => Topic::Actions {
            title: "Searching",
            intro: "Substring search is case-insensitive. With use_regex the query is a regular \
                    expression with a size cap and a time budget. Tags narrow results to notes \
                    carrying all of them.",
            actions: &["search_notes", "list_notes", "list_tags", "resolve_link"],
        },
        "read" => Topic::Actions {
            title: "Reading",
            intro: "Notes can be named by path or by title; titles resolve exactly, by frontmatter \
                    title, then fuzzily.",
            actions: &["get_note", "read_note_content", "get_toc", "read_section", "read_block"],
        },
        "write" => Topic::Actions {
            title: "Writing",
            intro: "Directory names are stored lowercase, file names keep their case and gain .md. \
                    Frontmatter tags lose a leading # and the correction is reported as a warning.",
            actions: &[
                "create_note",
                "update_note",
                "append_note",
                "update_section",
                "update_block",
                "move_note",
                "delete_note",
            ],
        },
        "graph" => Topic::Actions {
            title: "Links and graph",
            intro: "Wiki-links [[target#section|alias]] are resolved to notes. Orphans have no \
                    links in either direction.",
            actions: &["get_backlinks", "get_orphans", "get_graph", "resolve_link"],
        },
        _ => return None,
    })
}

/// Help text for `topic` (overview when `None`). Unknown topics produce a
/// message listing the available ones rather than an error.
pub fn help(registry: &ActionRegistry, topic_name: Option<&str>, verbosity: Verbosity) -> String {
    let name = topic_name
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "overview".to_string());

    let Some(topic) = topic(&name) else {
        return format!(
            "Unknown topic: {name}\nAvailable topics: {}",
            TOPICS.join(", ")
        );
    };

    let mut out = String::new();
    match topic {
        Topic::Overview => overview(&mut out, registry, verbosity),
        Topic::Bundle(bundle) => {
            let _ = writeln!(out, "{} bundle: {}", bundle, bundle.description());
            let actions: Vec<&ActionDef> = registry.in_bundle(bundle).collect();
            describe_actions(&mut out, registry, &actions, verbosity);
        }
        Topic::Actions {
            title,
            intro,
            actions,
        } => {
            let _ = writeln!(out, "{title}");
            if verbosity == Verbosity::Normal {
                let _ = writeln!(out, "{intro}");
            }
            let defs: Vec<&ActionDef> = actions.iter().filter_map(|a| registry.get(a)).collect();
            describe_actions(&mut out, registry, &defs, verbosity);
        }
    }
    out
}

fn overview(out: &mut String, registry: &ActionRegistry, verbosity: Verbosity) {
    let _ = writeln!(out, "Obsidian vault proxy: lookup, execute, help.");
    let _ = writeln!(
        out,
        "1. lookup(intent, note_hint?) finds the action for a plain-language request."
    );
    let _ = writeln!(
        out,
        "2. execute(action, args) validates args and runs it, returning {{success, action, bundle, result|error}}."
    );
    let _ = writeln!(out, "3. help(topic?, verbosity?) shows this text.");
    let _ = writeln!(out);
    for bundle in Bundle::ALL {
        let names: Vec<&str> = registry.in_bundle(bundle).map(|a| a.name).collect();
        match verbosity {
            Verbosity::Short => {
                let _ = writeln!(out, "{bundle}: {}", names.join(", "));
            }
            Verbosity::Normal => {
                let _ = writeln!(out, "{bundle}: {}", bundle.description());
                let _ = writeln!(out, "  {}", names.join(", "));
            }
        }
    }
    let _ = writeln!(out);
    let _ = write!(out, "Topics: {}", TOPICS.join(", "));
}

fn describe_actions(
    out: &mut String,
    registry: &ActionRegistry,
    actions: &[&ActionDef],
    verbosity: Verbosity,
) {
    for def in actions {
        let required = def.required_names().join(", ");
        let optional = def.optional_names().join(", ");
        let signature = match (required.is_empty(), optional.is_empty()) {
            (true, true) => String::new(),
            (false, true) => required,
            (true, false) => format!("[{optional}]"),
            (false, false) => format!("{required}; [{optional}]"),
        };
        let _ = writeln!(out, "- {}({signature})", def.name);
        if verbosity == Verbosity::Short {
            continue;
        }

        let _ = writeln!(out, "    {}", def.description);
        for field in def.required.iter().chain(def.optional.iter()) {
            let mut line = format!("    {}: {}, {}", field.name, field.kind.name(), field.description);
            if let Some(default) = field.default {
                let _ = write!(line, " (default {})", default.to_json());
            }
            if let Some((max, _)) = registry.limit_of(field) {
                let _ = write!(line, " (max {max})");
            }
            let _ = writeln!(out, "{line}");
        }
    }
}
