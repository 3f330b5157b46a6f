use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::registry::{ActionDef, ActionRegistry, Bundle};
use crate::{Error, Result};

/// Trigger table: `(action, [(pattern, weight)])`. Weights are points out of
/// 100; a row scores the sum of its matching patterns. Row order breaks ties.
const TRIGGERS: &[(&str, &[(&str, u32)])] = &[
    ("search_notes", &[
        (r"\b(search|find|look\s+for|query)\b.*\b(notes?|documents?)\b", 30),
        (r"\bsearch\b", 20),
        (r"\bfind\b.*\babout\b", 20),
    ]),
    ("list_notes", &[
        (r"\b(list|show|display)\b.*\b(all\s+)?notes?\b", 30),
        (r"\blist\b", 10),
    ]),
    ("read_note_content", &[
        (r"\b(get|read|show|open)\b.*\b(note|content|full)\b", 30),
        (r"\bread\b", 20),
    ]),
    ("get_note", &[
        (r"\b(get|fetch)\b.*\b(metadata|info|information)\b", 30),
        (r"\bget\b", 10),
    ]),
    ("create_note", &[
        (r"\b(create|new|add|make)\b.*\bnote\b", 30),
        (r"\bcreate\b", 10),
    ]),
    ("update_note", &[
        (r"\b(update|modify|change|edit)\b.*\bnote\b", 30),
        (r"\bupdate\b", 20),
        (r"\bedit\b", 20),
    ]),
    ("append_note", &[(r"\b(append|add\s+to)\b", 30)]),
    ("delete_note", &[
        (r"\b(delete|remove|trash)\b.*\bnote\b", 30),
        (r"\bdelete\b", 20),
    ]),
    ("move_note", &[
        (r"\b(move|rename|relocate)\b.*\bnote\b", 30),
        (r"\bmove\b", 20),
        (r"\brename\b", 20),
    ]),
    ("resolve_link", &[
        (r"\bresolve\b.*\b(link|wiki)", 40),
        (r"\bwiki.?link\b", 30),
    ]),
    ("get_toc", &[
        (r"\b(toc|table\s+of\s+contents|outline|structure)\b", 40),
        (r"\bheadings?\b", 20),
    ]),
    ("read_section", &[
        (r"\bread\b.*\bsection\b", 40),
        (r"\bsection\b", 20),
    ]),
    ("update_section", &[(r"\bupdate\b.*\bsection\b", 40)]),
    ("read_block", &[
        (r"\bread\b.*\bblock\b", 40),
        (r"\bblock\b.*\^", 30),
    ]),
    ("update_block", &[(r"\bupdate\b.*\bblock\b", 40)]),
    ("get_backlinks", &[
        (r"\b(backlinks?|references?|links?\s+to|what\s+links)\b", 40),
        (r"\bbacklinks?\b", 50),
    ]),
    ("get_orphans", &[
        (r"\b(orphans?|orphaned|isolated|unlinked)\b.*\bnotes?\b", 50),
        (r"\borphans?\b", 40),
    ]),
    ("get_graph", &[
        (r"\b(graph|network|connections?|map)\b.*\b(notes?|knowledge)\b", 40),
        (r"\bgraph\b", 30),
        (r"\bknowledge\s+graph\b", 50),
    ]),
    ("list_tags", &[
        (r"\b(list|show|all)\b.*\btags?\b", 40),
        (r"\btags?\b.*\b(list|all)\b", 40),
    ]),
    ("list_templates", &[
        (r"\b(list|show)\b.*\btemplates?\b", 40),
        (r"\btemplate\b", 10),
    ]),
    ("create_from_template", &[(r"\b(create|new)\b.*\b(from\s+)?template\b", 50)]),
    ("save_template", &[(r"\bsave\b.*\btemplate\b", 40)]),
    ("delete_template", &[(r"\bdelete\b.*\btemplate\b", 40)]),
    ("health_check", &[(r"\b(health|status|check)\b", 40)]),
    ("get_stats", &[(r"\b(stats|statistics|summary)\b", 30)]),
    ("clear_cache", &[(r"\b(clear|flush|invalidate)\b.*\bcache\b", 50)]),
    ("get_daily_note", &[(r"\b(daily\s+note|today|journal)\b", 40)]),
];

/// Fields a note hint can fill, in preference order.
const HINT_FIELDS: [&str; 5] = ["title", "path", "file_path", "link_name", "old_path"];

#[derive(Debug, Clone, Serialize)]
pub struct Alternative {
    pub action: &'static str,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    pub intent: String,
    /// `None` when nothing scored at or above the confidence floor.
    pub action: Option<&'static str>,
    pub bundle: Option<Bundle>,
    pub confidence: f64,
    pub reasoning: String,
    pub required_fields: Vec<&'static str>,
    pub optional_fields: Vec<&'static str>,
    pub defaults: Map<String, Value>,
    pub limits: BTreeMap<&'static str, u64>,
    /// Arguments pre-filled from the note hint.
    pub suggested_args: Map<String, Value>,
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldHelp {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub required: bool,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionExplanation {
    pub action: &'static str,
    pub bundle: Bundle,
    pub description: &'static str,
    pub fields: Vec<FieldHelp>,
    pub example_intents: Vec<&'static str>,
}

#[derive(Debug)]
struct Route {
    action: &'static ActionDef,
    triggers: Vec<(Regex, u32)>,
}

/// Maps free-text intents onto actions with a static weighted pattern table.
#[derive(Debug)]
pub struct IntentRouter {
    routes: Vec<Route>,
    registry: ActionRegistry,
    floor: f64,
}

impl IntentRouter {
    pub fn new(registry: ActionRegistry, floor: f64) -> Result<Self> {
        let mut routes = Vec::with_capacity(TRIGGERS.len());
        for (name, patterns) in TRIGGERS {
            let action = registry
                .get(name)
                .ok_or_else(|| Error::Config(format!("trigger row for unknown action '{name}'")))?;
            let mut triggers = Vec::with_capacity(patterns.len());
            for (pattern, weight) in patterns.iter() {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::Config(format!("trigger pattern for {name}: {e}")))?;
                triggers.push((re, *weight));
            }
            routes.push(Route { action, triggers });
        }
        Ok(Self {
            routes,
            registry,
            floor,
        })
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    pub fn route(&self, intent: &str, note_hint: Option<&str>) -> RoutingResult {
        let text = intent.trim();
        let mut scored: Vec<(&Route, u32, usize)> = self
            .routes
            .iter()
            .map(|route| {
                let (matched, score) = route
                    .triggers
                    .iter()
                    .filter(|(re, _)| re.is_match(text))
                    .fold((0usize, 0u32), |(n, sum), (_, w)| (n + 1, sum + w));
                (route, score.min(100), matched)
            })
            .collect();

        // Stable sort keeps table order among equal scores.
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let alternatives: Vec<Alternative> = scored
            .iter()
            .skip(1)
            .filter(|(_, score, _)| *score > 0)
            .take(3)
            .map(|(route, score, _)| Alternative {
                action: route.action.name,
                confidence: to_confidence(*score),
            })
            .collect();

        let Some((best, score, matched)) = scored.into_iter().next() else {
            return self.unmatched(text, 0.0, None, alternatives);
        };
        let confidence = to_confidence(score);
        if score == 0 || confidence < self.floor {
            tracing::debug!(intent = text, best = best.action.name, confidence, "no confident route");
            return self.unmatched(text, confidence, Some(best.action.name), alternatives);
        }

        tracing::debug!(intent = text, action = best.action.name, confidence, "intent routed");
        let reasoning = format!(
            "matched {} of {} trigger pattern(s) for '{}'",
            matched,
            best.triggers.len(),
            best.action.name
        );
        self.result_for(best.action, text, confidence, reasoning, note_hint, alternatives)
    }

    /// Skips matching: the caller already knows the action.
    pub fn route_with_action(&self, action: &str, note_hint: Option<&str>) -> Result<RoutingResult> {
        let def = self
            .registry
            .get(action)
            .ok_or_else(|| Error::not_found("action", action))?;
        Ok(self.result_for(
            def,
            action,
            1.0,
            format!("action '{action}' requested explicitly"),
            note_hint,
            Vec::new(),
        ))
    }

    /// Bundle with the highest summed trigger score for `intent`.
    pub fn suggest_bundle(&self, intent: &str) -> Option<Bundle> {
        let mut totals: BTreeMap<Bundle, u32> = BTreeMap::new();
        for route in &self.routes {
            let score: u32 = route
                .triggers
                .iter()
                .filter(|(re, _)| re.is_match(intent))
                .map(|(_, w)| *w)
                .sum();
            *totals.entry(route.action.bundle).or_default() += score;
        }
        Bundle::ALL
            .into_iter()
            .map(|b| (b, totals.get(&b).copied().unwrap_or(0)))
            .filter(|(_, score)| *score > 0)
            .fold(None, |best: Option<(Bundle, u32)>, (b, s)| match best {
                Some((_, top)) if top >= s => best,
                _ => Some((b, s)),
            })
            .map(|(b, _)| b)
    }

    pub fn explain_action(&self, action: &str) -> Result<ActionExplanation> {
        let def = self
            .registry
            .get(action)
            .ok_or_else(|| Error::not_found("action", action))?;
        let fields = def
            .required
            .iter()
            .map(|f| (f, true))
            .chain(def.optional.iter().map(|f| (f, false)))
            .map(|(f, required)| FieldHelp {
                name: f.name,
                kind: f.kind.name(),
                required,
                description: f.description,
                default: f.default.map(|d| d.to_json()),
                max: self.registry.limit_of(f).map(|(max, _)| max),
            })
            .collect();
        Ok(ActionExplanation {
            action: def.name,
            bundle: def.bundle,
            description: def.description,
            fields,
            example_intents: example_intents(def.name),
        })
    }

    fn result_for(
        &self,
        def: &'static ActionDef,
        intent: &str,
        confidence: f64,
        reasoning: String,
        note_hint: Option<&str>,
        alternatives: Vec<Alternative>,
    ) -> RoutingResult {
        let mut suggested_args = Map::new();
        if let Some(hint) = note_hint.map(str::trim).filter(|h| !h.is_empty()) {
            let target = HINT_FIELDS
                .iter()
                .find(|name| def.required.iter().any(|f| f.name == **name))
                .or_else(|| HINT_FIELDS.iter().find(|name| def.field(name).is_some()))
                .copied()
                .or_else(|| def.field("center").map(|f| f.name));
            if let Some(field) = target {
                suggested_args.insert(field.to_string(), Value::from(hint));
            }
        }

        RoutingResult {
            intent: intent.to_string(),
            action: Some(def.name),
            bundle: Some(def.bundle),
            confidence,
            reasoning,
            required_fields: def.required_names(),
            optional_fields: def.optional_names(),
            defaults: def.defaults(),
            limits: self.registry.limits(def),
            suggested_args,
            alternatives,
        }
    }

    fn unmatched(
        &self,
        intent: &str,
        confidence: f64,
        best: Option<&str>,
        alternatives: Vec<Alternative>,
    ) -> RoutingResult {
        let reasoning = match best {
            Some(name) if confidence > 0.0 => format!(
                "no confident match: best candidate '{name}' scored {confidence:.2}, below the {:.2} floor; \
                 rephrase the intent or see help",
                self.floor
            ),
            _ => "no confident match: no trigger pattern matched; rephrase the intent or see help"
                .to_string(),
        };
        RoutingResult {
            intent: intent.to_string(),
            action: None,
            bundle: None,
            confidence,
            reasoning,
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            defaults: Map::new(),
            limits: BTreeMap::new(),
            suggested_args: Map::new(),
            alternatives,
        }
    }
}

fn to_confidence(score: u32) -> f64 {
    f64::from(score.min(100)) / 100.0
}

fn example_intents(action: &str) -> Vec<&'static str> {
    match action {
        "search_notes" => vec!["search for notes about rust", "find notes about travel"],
        "list_notes" => vec!["list all notes"],
        "read_note_content" => vec!["read the note Projects"],
        "get_note" => vec!["get info about Projects"],
        "create_note" => vec!["create a new note called ideas"],
        "update_note" => vec!["update the meeting note"],
        "append_note" => vec!["append this to Inbox"],
        "delete_note" => vec!["delete the old draft note"],
        "move_note" => vec!["move the note to archive"],
        "resolve_link" => vec!["resolve the wiki-link to project"],
        "get_toc" => vec!["show the outline of Projects"],
        "read_section" => vec!["read the introduction section"],
        "update_section" => vec!["update the conclusion section"],
        "read_block" => vec!["read block ^summary"],
        "update_block" => vec!["update block ^summary"],
        "get_backlinks" => vec!["get backlinks for Projects", "what links to Projects"],
        "get_orphans" => vec!["find orphan notes"],
        "get_graph" => vec!["show me the knowledge graph"],
        "list_tags" => vec!["list all tags"],
        "list_templates" => vec!["list all templates"],
        "create_from_template" => vec!["create a note from template meeting"],
        "save_template" => vec!["save this as a template"],
        "delete_template" => vec!["delete the meeting template"],
        "health_check" => vec!["health check"],
        "get_stats" => vec!["show me stats"],
        "clear_cache" => vec!["clear the cache"],
        "get_daily_note" => vec!["get today's daily note"],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VaultConfig;

    fn router() -> IntentRouter {
        IntentRouter::new(ActionRegistry::new(&VaultConfig::default()), 0.3).unwrap()
    }

    #[test]
    fn trigger_table_covers_every_action() {
        let r = router();
        for def in r.registry().actions() {
            assert!(
                TRIGGERS.iter().any(|(name, _)| *name == def.name),
                "{} has no trigger row",
                def.name
            );
        }
    }

    #[test]
    fn intents_route_to_expected_actions() {
        let cases: &[(&str, &str, f64)] = &[
            ("search for notes about machine learning", "search_notes", 0.5),
            ("list all notes", "list_notes", 0.4),
            ("create a new note called ideas", "create_note", 0.4),
            ("get backlinks for my note", "get_backlinks", 0.9),
            ("find orphan notes", "get_orphans", 0.9),
            ("show me the knowledge graph", "get_graph", 0.8),
            ("list all tags", "list_tags", 0.4),
            ("list all templates", "list_templates", 0.4),
            ("create a note from template", "create_from_template", 0.5),
            ("clear the cache", "clear_cache", 0.5),
            ("health check", "health_check", 0.4),
            ("get today's daily note", "get_daily_note", 0.4),
            ("move the note to archive", "move_note", 0.5),
            ("delete the old draft note", "delete_note", 0.5),
            ("read the introduction section", "read_section", 0.6),
            ("update the conclusion section", "update_section", 0.4),
            ("resolve the wiki-link to project", "resolve_link", 0.7),
            ("what links to this page", "get_backlinks", 0.4),
            ("show me stats", "get_stats", 0.3),
            ("save this as a template", "save_template", 0.4),
        ];
        let r = router();
        for (intent, action, confidence) in cases {
            let out = r.route(intent, None);
            assert_eq!(out.action, Some(*action), "{intent}: {}", out.reasoning);
            assert!((out.confidence - confidence).abs() < 1e-9, "{intent}: {}", out.confidence);
        }
    }

    #[test]
    fn search_route_carries_contract() {
        let out = router().route("search for notes about machine learning", None);
        assert!(out.confidence > 0.3);
        assert!(out.required_fields.contains(&"query"));
        assert_eq!(out.defaults["limit"], 50);
        assert_eq!(out.limits["limit"], 200);
        assert_eq!(out.bundle, Some(Bundle::Core));
    }

    #[test]
    fn weak_or_empty_matches_are_unmatched() {
        let r = router();
        let out = r.route("get", None);
        assert_eq!(out.action, None);
        assert!((out.confidence - 0.1).abs() < 1e-9);
        assert!(out.reasoning.contains("get_note"));

        let out = r.route("completely unknown gibberish", None);
        assert_eq!(out.action, None);
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn routing_is_case_insensitive_and_deterministic() {
        let r = router();
        let a = r.route("LIST ALL NOTES", None);
        let b = r.route("list all notes", None);
        assert_eq!(a.action, b.action);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn note_hint_fills_the_first_note_field() {
        let r = router();
        let out = r.route("get backlinks", Some("Projects"));
        assert_eq!(out.suggested_args["title"], "Projects");

        let out = r.route_with_action("move_note", Some("Draft")).unwrap();
        assert_eq!(out.suggested_args["old_path"], "Draft");
        assert_eq!(out.confidence, 1.0);

        let out = r.route_with_action("get_graph", Some("Hub")).unwrap();
        assert_eq!(out.suggested_args["center"], "Hub");
    }

    #[test]
    fn explain_and_bundle_suggestions() {
        let r = router();
        let ex = r.explain_action("get_graph").unwrap();
        let depth = ex.fields.iter().find(|f| f.name == "depth").unwrap();
        assert_eq!(depth.max, Some(3));
        assert!(r.explain_action("nope").unwrap_err().is_not_found());

        assert_eq!(r.suggest_bundle("show me the knowledge graph"), Some(Bundle::Knowledge));
        assert_eq!(r.suggest_bundle("save this as a template"), Some(Bundle::Templates));
        assert_eq!(r.suggest_bundle("xyzzy"), None);
    }
}
