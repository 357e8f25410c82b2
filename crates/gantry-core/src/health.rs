//! Operational health states and the scopes they are keyed by.

use crate::material::Material;
use crate::ports::ConfigSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeType {
    Global,
    Material,
    Pipeline,
    Stage,
    Job,
    Plugin,
}

/// Dedup and staleness key for a health state.
///
/// Two scopes are equal when both type and key match, so repeated alerts for
/// the same entity replace each other instead of piling up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HealthStateScope {
    scope_type: ScopeType,
    scope: String,
}

impl HealthStateScope {
    pub fn global() -> Self {
        Self::new(ScopeType::Global, "GLOBAL")
    }

    pub fn for_material(material: &Material) -> Self {
        Self::for_material_fingerprint(material.fingerprint())
    }

    pub fn for_material_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self::new(ScopeType::Material, fingerprint)
    }

    pub fn for_pipeline(pipeline: impl Into<String>) -> Self {
        Self::new(ScopeType::Pipeline, pipeline)
    }

    pub fn for_stage(pipeline: &str, stage: &str) -> Self {
        Self::new(ScopeType::Stage, format!("{}/{}", pipeline, stage))
    }

    pub fn for_job(pipeline: &str, stage: &str, job: &str) -> Self {
        Self::new(ScopeType::Job, format!("{}/{}/{}", pipeline, stage, job))
    }

    pub fn for_plugin(plugin_id: impl Into<String>) -> Self {
        Self::new(ScopeType::Plugin, plugin_id)
    }

    fn new(scope_type: ScopeType, scope: impl Into<String>) -> Self {
        Self {
            scope_type,
            scope: scope.into(),
        }
    }

    pub fn scope_type(&self) -> ScopeType {
        self.scope_type
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether the entity this scope names has disappeared from `config`.
    ///
    /// Evaluated against the snapshot passed in on every call; nothing is
    /// remembered between sweeps.
    pub fn is_removed_from_config(&self, config: &dyn ConfigSnapshot) -> bool {
        match self.scope_type {
            ScopeType::Global | ScopeType::Plugin => false,
            ScopeType::Material => !config.has_material(&self.scope),
            ScopeType::Pipeline => !config.has_pipeline(&self.scope),
            ScopeType::Stage => match self.scope.split_once('/') {
                Some((pipeline, stage)) => !config.has_stage(pipeline, stage),
                None => true,
            },
            ScopeType::Job => {
                let mut parts = self.scope.splitn(3, '/');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(pipeline), Some(stage), Some(job)) => {
                        !config.has_job(pipeline, stage, job)
                    }
                    _ => true,
                }
            }
        }
    }
}

impl fmt::Display for HealthStateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.scope_type, self.scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Warning,
    Error,
}

/// A detected operational fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub level: HealthLevel,
    pub message: String,
    pub description: String,
    pub scope: HealthStateScope,
    pub timestamp: DateTime<Utc>,
}

impl HealthState {
    pub fn error(
        message: impl Into<String>,
        description: impl Into<String>,
        scope: HealthStateScope,
    ) -> Self {
        Self::new(HealthLevel::Error, message, description, scope)
    }

    pub fn warning(
        message: impl Into<String>,
        description: impl Into<String>,
        scope: HealthStateScope,
    ) -> Self {
        Self::new(HealthLevel::Warning, message, description, scope)
    }

    fn new(
        level: HealthLevel,
        message: impl Into<String>,
        description: impl Into<String>,
        scope: HealthStateScope,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            description: description.into(),
            scope,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == HealthLevel::Error
    }
}
