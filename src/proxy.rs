//! The three-operation surface exposed to callers: `lookup` turns an intent
//! into an action contract, `execute` validates and runs an action, `help`
//! returns static documentation.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::help::{self, Verbosity};
use crate::registry::{ActionRegistry, Envelope, json_type};
use crate::router::{IntentRouter, RoutingResult};
use crate::{Error, Result, VaultManager};

/// A single request on the JSON transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ProxyRequest {
    Lookup {
        intent: String,
        #[serde(default)]
        note_hint: Option<String>,
    },
    Execute {
        action: String,
        #[serde(default)]
        args: Value,
    },
    Help {
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        verbosity: Verbosity,
    },
}

#[derive(Debug)]
pub struct Proxy {
    manager: Arc<VaultManager>,
    router: IntentRouter,
}

impl Proxy {
    pub fn new(manager: Arc<VaultManager>) -> Result<Self> {
        let cfg = manager.vault().config();
        let router = IntentRouter::new(ActionRegistry::new(cfg), cfg.route_confidence_floor)?;
        Ok(Self { manager, router })
    }

    pub fn manager(&self) -> &Arc<VaultManager> {
        &self.manager
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.router.registry()
    }

    pub fn lookup(&self, intent: &str, note_hint: Option<&str>) -> Result<RoutingResult> {
        if intent.trim().is_empty() {
            return Err(Error::Validation("intent must not be empty".into()));
        }
        let note_hint = note_hint.map(str::trim).filter(|h| !h.is_empty());
        let routed = self.router.route(intent, note_hint);
        tracing::debug!(
            intent,
            action = routed.action.unwrap_or("-"),
            confidence = routed.confidence,
            "lookup"
        );
        Ok(routed)
    }

    /// Never fails: every error, including a malformed `args` value, comes
    /// back as an unsuccessful envelope.
    pub fn execute(&self, action: &str, args: Value) -> Envelope {
        let args = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                let bundle = self
                    .registry()
                    .get(action)
                    .map(|a| a.bundle.as_str())
                    .unwrap_or("unknown");
                return Envelope::err(
                    action,
                    bundle,
                    format!("Invalid 'args': expected a JSON object, got {}", json_type(&other)),
                );
            }
        };
        self.registry().dispatch(&self.manager, action, &args)
    }

    pub fn help(&self, topic: Option<&str>, verbosity: Verbosity) -> String {
        help::help(self.registry(), topic, verbosity)
    }

    pub fn handle(&self, request: ProxyRequest) -> Value {
        match request {
            ProxyRequest::Lookup { intent, note_hint } => {
                match self.lookup(&intent, note_hint.as_deref()) {
                    Ok(routed) => serde_json::to_value(&routed)
                        .unwrap_or_else(|e| failure(e.to_string())),
                    Err(e) => failure(e.to_string()),
                }
            }
            ProxyRequest::Execute { action, args } => self.execute(&action, args).to_json(),
            ProxyRequest::Help { topic, verbosity } => {
                let text = self.help(topic.as_deref(), verbosity);
                json!({ "topic": topic.unwrap_or_else(|| "overview".into()), "text": text })
            }
        }
    }

    /// Parses one line of the newline-delimited transport and handles it.
    pub fn handle_json(&self, line: &str) -> Value {
        match serde_json::from_str::<ProxyRequest>(line) {
            Ok(request) => self.handle(request),
            Err(e) => failure(format!("invalid request: {e}")),
        }
    }
}

fn failure(error: String) -> Value {
    json!({ "success": false, "error": error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vault;

    fn proxy() -> (tempfile::TempDir, Proxy) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Welcome.md"), "# Welcome\nSee [[Projects]].\n").unwrap();
        std::fs::write(dir.path().join("Projects.md"), "# Projects\n").unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let manager = Arc::new(VaultManager::new(vault).unwrap());
        (dir, Proxy::new(manager).unwrap())
    }

    #[test]
    fn execute_rejects_non_object_args() {
        let (_dir, p) = proxy();
        let env = p.execute("list_tags", json!([1, 2]));
        assert!(!env.success);
        assert_eq!(env.bundle, "knowledge");
        assert_eq!(
            env.error.as_deref(),
            Some("Invalid 'args': expected a JSON object, got array")
        );
    }

    #[test]
    fn execute_null_args_means_empty() {
        let (_dir, p) = proxy();
        let env = p.execute("list_tags", Value::Null);
        assert!(env.success, "{env:?}");
    }

    #[test]
    fn empty_intent_is_rejected() {
        let (_dir, p) = proxy();
        assert!(p.lookup("   ", None).is_err());
    }

    #[test]
    fn handle_json_dispatches_by_op() {
        let (_dir, p) = proxy();
        let out = p.handle_json(r#"{"op":"execute","action":"get_backlinks","args":{"title":"Projects"}}"#);
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["result"]["count"], json!(1));

        let out = p.handle_json(r#"{"op":"help","topic":"nope"}"#);
        assert!(out["text"].as_str().unwrap().starts_with("Unknown topic: nope"));

        let out = p.handle_json("not json");
        assert_eq!(out["success"], json!(false));
    }
}
