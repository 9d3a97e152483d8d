//! Pipeline configuration documents.
//!
//! A document is plain YAML. Before it is deserialized into typed structs every
//! string leaf of the form `...ENVIRON(NAME)...` is swapped for the value of the
//! environment variable `NAME` (or null when it is unset).

use indexmap::IndexMap;
use log::{debug, info};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

const ENVIRON_MARKER: &str = "ENVIRON";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Unable to parse config document: {0}")]
    Parse(
        #[source]
        #[from]
        serde_yaml::Error,
    ),
    #[error("Unknown {kind} component: {cls}")]
    UnknownComponent { kind: &'static str, cls: String },
    #[error("Invalid params for {cls}: {source}")]
    InvalidParams {
        cls: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Unable to load font {0}: {1}")]
    Font(PathBuf, String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub scraper: ComponentConfig,
    #[serde(default)]
    pub storer: Option<ComponentConfig>,
    #[serde(default)]
    pub targets: IndexMap<String, ComponentConfig>,
}

/// One pluggable component: which implementation to use and its constructor params.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    pub cls: String,
    #[serde(default)]
    pub params: Value,
}

impl ComponentConfig {
    /// Registry key, the last segment of a dotted path such as `twit2imgs.scraper.UserScraper`.
    pub fn key(&self) -> &str {
        self.cls.rsplit('.').next().unwrap_or(&self.cls)
    }

    pub fn params<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let params = match &self.params {
            Value::Null => Value::Mapping(Mapping::new()),
            other => other.clone(),
        };
        serde_yaml::from_value(params).map_err(|source| ConfigError::InvalidParams {
            cls: self.cls.clone(),
            source,
        })
    }
}

/// Reads `<conf_dir>/<name>.yaml`, expands placeholders and deserializes it.
pub fn load(conf_dir: &Path, name: &str) -> Result<PipelineConfig, ConfigError> {
    let path = conf_dir.join(format!("{name}.yaml"));
    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
    let config = parse(&text)?;
    info!("Parsed config {}", path.display());
    Ok(config)
}

pub fn parse(text: &str) -> Result<PipelineConfig, ConfigError> {
    let raw: Value = serde_yaml::from_str(text)?;
    Ok(serde_yaml::from_value(expand_env(raw))?)
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((.*)\)").unwrap())
}

/// Name of the environment variable a placeholder string refers to, if it is one.
pub fn placeholder_name(value: &str) -> Option<&str> {
    if !value.contains(ENVIRON_MARKER) {
        return None;
    }
    placeholder_regex()
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Resolves a single string leaf. `None` means the placeholder's variable is unset.
pub fn resolve_env(value: &str) -> Option<String> {
    match placeholder_name(value) {
        Some(name) => {
            debug!("Resolving config placeholder {}", name);
            std::env::var(name).ok()
        }
        None => Some(value.to_string()),
    }
}

/// Walks a YAML tree replacing placeholder strings; all other leaves are untouched.
pub fn expand_env(value: Value) -> Value {
    match value {
        Value::String(s) => match resolve_env(&s) {
            Some(resolved) => Value::String(resolved),
            None => Value::Null,
        },
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, expand_env(v)))
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(expand_env).collect()),
        other => other,
    }
}
