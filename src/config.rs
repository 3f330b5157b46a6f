use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory names to ignore anywhere in the path.
    pub ignore_dirs: Vec<String>,
    /// Lowercase directory segments when normalizing note paths.
    pub lowercase_directories: bool,
    /// Notes larger than this are refused on read.
    pub max_file_size: u64,
    /// Debounce window for filesystem events.
    pub watch_debounce: Duration,
    /// Longest a batch of events may keep growing before it is flushed.
    pub watch_max_batch_age: Duration,
    /// Maximum number of entries in the result cache.
    pub cache_capacity: usize,
    /// Default time-to-live for cached results.
    pub cache_ttl: Duration,
    /// Time-to-live for cached search results.
    pub search_cache_ttl: Duration,
    /// Minimum similarity ratio accepted by fuzzy link resolution.
    pub fuzzy_threshold: f64,
    /// Intents scoring below this are reported as unmatched.
    pub route_confidence_floor: f64,
    /// Upper bound applied to any search limit.
    pub search_limit_max: usize,
    /// Upper bound applied to any list limit.
    pub list_limit_max: usize,
    /// Compiled size limit for caller-supplied search patterns.
    pub regex_size_limit: usize,
    /// Wall-clock budget for a single regex search across the vault.
    pub regex_search_budget: Duration,
    /// Template directory, relative to the vault root.
    pub templates_dir: PathBuf,
    /// Maximum nesting of `extends`/`include` in templates.
    pub template_depth_max: usize,
    /// Daily notes directory, relative to the vault root.
    pub daily_notes_dir: PathBuf,
    /// chrono format used for daily note filenames.
    pub daily_note_format: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: vec![
                ".obsidian".into(),
                ".git".into(),
                ".trash".into(),
                "node_modules".into(),
            ],
            lowercase_directories: true,
            max_file_size: 10 * 1024 * 1024,
            watch_debounce: Duration::from_millis(400),
            watch_max_batch_age: Duration::from_secs(2),
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(300),
            search_cache_ttl: Duration::from_secs(60),
            fuzzy_threshold: 0.6,
            route_confidence_floor: 0.3,
            search_limit_max: 200,
            list_limit_max: 500,
            regex_size_limit: 1 << 20,
            regex_search_budget: Duration::from_secs(2),
            templates_dir: PathBuf::from(".templates"),
            template_depth_max: 5,
            daily_notes_dir: PathBuf::from("daily"),
            daily_note_format: "%Y-%m-%d".into(),
        }
    }
}

/// On-disk form of [`VaultConfig`]. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    ignore_dirs: Option<Vec<String>>,
    lowercase_directories: Option<bool>,
    max_file_size: Option<u64>,
    watch_debounce_ms: Option<u64>,
    watch_max_batch_age_ms: Option<u64>,
    cache_capacity: Option<usize>,
    cache_ttl_secs: Option<u64>,
    search_cache_ttl_secs: Option<u64>,
    fuzzy_threshold: Option<f64>,
    route_confidence_floor: Option<f64>,
    search_limit_max: Option<usize>,
    list_limit_max: Option<usize>,
    regex_size_limit: Option<usize>,
    regex_search_budget_ms: Option<u64>,
    templates_dir: Option<PathBuf>,
    template_depth_max: Option<usize>,
    daily_notes_dir: Option<PathBuf>,
    daily_note_format: Option<String>,
}

impl VaultConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        let mut cfg = Self::default();

        if let Some(v) = file.ignore_dirs {
            cfg.ignore_dirs = v;
        }
        if let Some(v) = file.lowercase_directories {
            cfg.lowercase_directories = v;
        }
        if let Some(v) = file.max_file_size {
            cfg.max_file_size = v;
        }
        if let Some(v) = file.watch_debounce_ms {
            cfg.watch_debounce = Duration::from_millis(v);
        }
        if let Some(v) = file.watch_max_batch_age_ms {
            cfg.watch_max_batch_age = Duration::from_millis(v);
        }
        if let Some(v) = file.cache_capacity {
            cfg.cache_capacity = v;
        }
        if let Some(v) = file.cache_ttl_secs {
            cfg.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.search_cache_ttl_secs {
            cfg.search_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.fuzzy_threshold {
            cfg.fuzzy_threshold = v;
        }
        if let Some(v) = file.route_confidence_floor {
            cfg.route_confidence_floor = v;
        }
        if let Some(v) = file.search_limit_max {
            cfg.search_limit_max = v;
        }
        if let Some(v) = file.list_limit_max {
            cfg.list_limit_max = v;
        }
        if let Some(v) = file.regex_size_limit {
            cfg.regex_size_limit = v;
        }
        if let Some(v) = file.regex_search_budget_ms {
            cfg.regex_search_budget = Duration::from_millis(v);
        }
        if let Some(v) = file.templates_dir {
            cfg.templates_dir = v;
        }
        if let Some(v) = file.template_depth_max {
            cfg.template_depth_max = v;
        }
        if let Some(v) = file.daily_notes_dir {
            cfg.daily_notes_dir = v;
        }
        if let Some(v) = file.daily_note_format {
            cfg.daily_note_format = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(Error::Config(format!(
                "fuzzy_threshold must be within 0..=1, got {}",
                self.fuzzy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.route_confidence_floor) {
            return Err(Error::Config(format!(
                "route_confidence_floor must be within 0..=1, got {}",
                self.route_confidence_floor
            )));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let cfg = VaultConfig::from_toml_str(
            "fuzzy_threshold = 0.75\nwatch_debounce_ms = 50\ntemplates_dir = \"tpl\"\n",
        )
        .unwrap();
        assert_eq!(cfg.fuzzy_threshold, 0.75);
        assert_eq!(cfg.watch_debounce, Duration::from_millis(50));
        assert_eq!(cfg.templates_dir, PathBuf::from("tpl"));
        assert_eq!(cfg.cache_capacity, 1000);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = VaultConfig::from_toml_str("fuzzy_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(VaultConfig::from_toml_str("bogus = 1\n").is_err());
    }
}
