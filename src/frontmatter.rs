use std::fmt;

use serde::{Serialize, Serializer};
use serde_yaml::{Mapping, Value};

use crate::{Error, Result};

/// Non-fatal findings reported next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    MalformedFrontmatter { error: String },
    TagCorrected { original: String, corrected: String },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrontmatter { error } => {
                write!(f, "malformed frontmatter ignored: {error}")
            }
            Self::TagCorrected {
                original,
                corrected,
            } => write!(f, "corrected tag '{original}' to '{corrected}'"),
        }
    }
}

impl Serialize for ParseWarning {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ordered note metadata. Keys are YAML values but in practice always strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter(Mapping);

impl Frontmatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_yaml(value: Value) -> Option<Self> {
        match value {
            Value::Mapping(m) => Some(Self(m)),
            Value::Null => Some(Self::default()),
            _ => None,
        }
    }

    /// Accepts a JSON object; anything else is a validation error.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Validation("frontmatter must be an object".into()));
        }
        let yaml = serde_yaml::to_value(value)?;
        Self::from_yaml(yaml)
            .ok_or_else(|| Error::Validation("frontmatter must be an object".into()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (k, v) in &self.0 {
            let key = match k {
                Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
            };
            let value = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
            out.insert(key, value);
        }
        serde_json::Value::Object(out)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(Value::String(key.into()), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().filter_map(Value::as_str)
    }

    /// Shallow merge. A null value in `other` clears that key.
    pub fn merge(&mut self, other: Frontmatter) {
        for (k, v) in other.0 {
            if v.is_null() {
                self.0.remove(&k);
            } else {
                self.0.insert(k, v);
            }
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("title").map(str::trim).filter(|s| !s.is_empty())
    }

    /// Raw `tags` entries; a scalar string is split on commas and whitespace.
    pub fn tags(&self) -> Vec<String> {
        match self.get("tags") {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(scalar_to_string).collect(),
            Some(Value::String(s)) => s
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            Some(other) => scalar_to_string(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn set_tags(&mut self, tags: impl IntoIterator<Item = String>) {
        let seq = tags.into_iter().map(Value::String).collect();
        self.insert("tags", Value::Sequence(seq));
    }

    /// Strips leading `#` from frontmatter tags, reporting each correction.
    pub fn normalize_tags(&mut self) -> Vec<ParseWarning> {
        if self.get("tags").is_none() {
            return Vec::new();
        }
        let mut warnings = Vec::new();
        let mut cleaned: Vec<String> = Vec::new();
        for raw in self.tags() {
            let trimmed = raw.trim();
            let corrected = trimmed.trim_start_matches('#').trim();
            if corrected.is_empty() {
                continue;
            }
            if corrected != trimmed {
                tracing::debug!(original = %trimmed, corrected = %corrected, "normalized tag");
                warnings.push(ParseWarning::TagCorrected {
                    original: trimmed.to_string(),
                    corrected: corrected.to_string(),
                });
            }
            if !cleaned.iter().any(|t| t == corrected) {
                cleaned.push(corrected.to_string());
            }
        }
        self.set_tags(cleaned);
        warnings
    }
}

impl Serialize for Frontmatter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
