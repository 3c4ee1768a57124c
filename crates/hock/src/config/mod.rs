//! Configuration types for the hock binary and [`crate::Hock::with_config`].

mod expectations;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::expectation::QueryMatching;
use crate::queue::UnmatchedPolicy;

pub use expectations::{ExpectationConfig, ReplyConfig, TimesConfig, TimesPreset};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HockConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// 0 picks an ephemeral port
    #[serde(default)]
    pub port: u16,

    /// What to do with requests no expectation accepts
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,

    #[serde(default)]
    pub query_matching: QueryMatching,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_reply_headers: BTreeMap<String, String>,

    /// Regex rewrite applied to request paths before matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_filter: Option<RegexFilterConfig>,

    /// Regex rewrite applied to request bodies before matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_filter: Option<RegexFilterConfig>,

    #[serde(default)]
    pub expectations: Vec<ExpectationConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegexFilterConfig {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for HockConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            unmatched: UnmatchedPolicy::default(),
            query_matching: QueryMatching::default(),
            default_reply_headers: BTreeMap::new(),
            path_filter: None,
            body_filter: None,
            expectations: Vec::new(),
        }
    }
}

impl HockConfig {
    /// Load a YAML or JSON (by `.json` extension) config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: HockConfig = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, filter) in [("path_filter", &self.path_filter), ("body_filter", &self.body_filter)] {
            if let Some(filter) = filter {
                regex::Regex::new(&filter.pattern)
                    .with_context(|| format!("Invalid {name} pattern '{}'", filter.pattern))?;
            }
        }

        for (name, value) in &self.default_reply_headers {
            check_header(name, value).context("Invalid default_reply_headers")?;
        }

        for (index, expectation) in self.expectations.iter().enumerate() {
            expectation.validate().with_context(|| {
                format!(
                    "Invalid expectation #{} ({} {})",
                    index + 1,
                    expectation.method,
                    expectation.url
                )
            })?;
        }

        Ok(())
    }
}

pub(crate) fn check_header(name: &str, value: &str) -> Result<(), anyhow::Error> {
    hyper::header::HeaderName::from_bytes(name.as_bytes())
        .with_context(|| format!("Invalid header name '{name}'"))?;
    hyper::header::HeaderValue::from_str(value)
        .with_context(|| format!("Invalid value for header '{name}'"))?;
    Ok(())
}
