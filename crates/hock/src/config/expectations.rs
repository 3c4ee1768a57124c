//! Declarative expectations loaded from a config file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::expectation::{CallPolicy, Delay, Expectation, Method, Reply, ReplyBody};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationConfig {
    pub method: Method,
    pub url: String,

    /// Expected request body. Non-string values are compared as compact JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// How many calls are allowed; defaults to exactly once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<TimesConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,

    #[serde(default)]
    pub reply: ReplyConfig,
}

/// Call-count policy as written in config:
/// `times: 3`, `times: many` or `times: {min: 1, max: 5}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimesConfig {
    Exactly(usize),
    Preset(TimesPreset),
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
        #[serde(default)]
        unbounded: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimesPreset {
    Once,
    Twice,
    Many,
    Any,
}

impl TimesConfig {
    pub fn to_policy(&self) -> CallPolicy {
        match *self {
            TimesConfig::Exactly(n) => CallPolicy::exactly(n),
            TimesConfig::Preset(TimesPreset::Once) => CallPolicy::once(),
            TimesConfig::Preset(TimesPreset::Twice) => CallPolicy::twice(),
            TimesConfig::Preset(TimesPreset::Many) => CallPolicy::many(),
            TimesConfig::Preset(TimesPreset::Any) => CallPolicy::any(),
            TimesConfig::Range {
                min,
                max,
                unbounded,
            } => {
                let mut policy = CallPolicy::default();
                if let Some(min) = min {
                    policy.set_min(min);
                }
                if unbounded {
                    policy.set_max(None);
                } else if let Some(max) = max {
                    policy.set_max(Some(max));
                }
                policy
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReplyConfig {
    #[serde(default = "default_status")]
    pub status: u16,

    /// Inline body: strings are sent raw, other values as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Stream this file as the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_status() -> u16 {
    200
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: None,
            file: None,
            headers: BTreeMap::new(),
        }
    }
}

impl ReplyConfig {
    pub fn to_reply(&self) -> Reply {
        let body = match (&self.file, &self.body) {
            (Some(path), _) => ReplyBody::file(path.clone()),
            (None, Some(value)) => ReplyBody::from(value.clone()),
            (None, None) => ReplyBody::Empty,
        };
        let reply = Reply::new().status(self.status).body(body);
        if self.headers.is_empty() {
            reply
        } else {
            reply.headers(self.headers.clone())
        }
    }
}

impl ExpectationConfig {
    /// The request pattern with its call policy and delay; the reply is attached separately.
    pub fn to_expectation(&self) -> Expectation {
        let mut expectation = Expectation::new(self.method, self.url.clone())
            .with_headers(self.headers.iter().map(|(k, v)| (k, v.clone())));
        if let Some(ref body) = self.body {
            expectation = expectation.with_body(body);
        }
        if let Some(ref times) = self.times {
            *expectation.policy_mut() = times.to_policy();
        }
        expectation.set_delay(self.delay);
        expectation
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.reply.file.is_some() && self.reply.body.is_some() {
            anyhow::bail!("reply.body and reply.file are mutually exclusive");
        }
        if hyper::StatusCode::from_u16(self.reply.status).is_err() {
            anyhow::bail!("invalid reply status {}", self.reply.status);
        }
        for (name, value) in &self.reply.headers {
            super::check_header(name, value)?;
        }
        if let Some(ref times) = self.times {
            let policy = times.to_policy();
            if !policy.is_valid() {
                anyhow::bail!("conflicting call policy {}", policy);
            }
        }
        Ok(())
    }
}
