//! Pipeline run label templates.
//!
//! A template is literal text plus `${token}` and `${token[:N]}` placeholders:
//! - `${COUNT}` - the pipeline run counter (case-insensitive)
//! - `${env:NAME}` - environment variable `NAME`, empty when unset
//! - `${name}` - revision label of the material or upstream pipeline `name`
//!
//! `[:N]` keeps the first `N` characters of the resolved value.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

pub const DEFAULT_TEMPLATE: &str = "${COUNT}";

/// Longest label a pipeline run can carry.
pub const MAX_LABEL_LENGTH: usize = 255;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}\[]+)(\[:(\d+)\])?\}").expect("label placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLabel {
    template: String,
}

impl Default for PipelineLabel {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PipelineLabel {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Template as configured; blank templates fall back to `${COUNT}`.
    pub fn from_config(template: Option<&str>) -> Self {
        match template {
            Some(t) if !t.trim().is_empty() => Self::new(t),
            _ => Self::default(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Resolve against the process environment.
    pub fn interpolate(&self, counter: u64, revisions: &HashMap<String, String>) -> String {
        self.interpolate_with_env(counter, revisions, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup.
    ///
    /// Unresolvable placeholders are kept, escaped with a leading backslash.
    /// Running the result through interpolation again adds another backslash.
    pub fn interpolate_with_env<F>(
        &self,
        counter: u64,
        revisions: &HashMap<String, String>,
        env: F,
    ) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolved = PLACEHOLDER.replace_all(&self.template, |caps: &Captures| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let token = caps.get(1).map_or("", |m| m.as_str());
            let limit = caps.get(3).and_then(|m| m.as_str().parse::<usize>().ok());

            match resolve_token(token, counter, revisions, &env) {
                Some(value) => match limit {
                    Some(n) => value.chars().take(n).collect(),
                    None => value,
                },
                None => format!("\\{}", whole),
            }
        });

        resolved.chars().take(MAX_LABEL_LENGTH).collect()
    }
}

fn resolve_token<F>(
    token: &str,
    counter: u64,
    revisions: &HashMap<String, String>,
    env: &F,
) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if token.eq_ignore_ascii_case("COUNT") {
        return Some(counter.to_string());
    }

    if let Some(name) = token.strip_prefix("env:") {
        return Some(env(name).unwrap_or_default());
    }

    revisions.get(token).cloned().or_else(|| {
        revisions
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|(_, value)| value.clone())
    })
}
