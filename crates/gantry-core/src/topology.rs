//! In-memory pipeline topology used as a config snapshot.

use crate::material::Material;
use crate::ports::ConfigSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTopology {
    #[serde(default)]
    pipelines: BTreeMap<String, PipelineEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEntry {
    #[serde(default)]
    material_fingerprints: BTreeSet<String>,
    /// Stage name to job names.
    #[serde(default)]
    stages: BTreeMap<String, BTreeSet<String>>,
}

impl PipelineTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `name`, created empty if missing.
    pub fn pipeline(&mut self, name: impl Into<String>) -> &mut PipelineEntry {
        self.pipelines.entry(name.into()).or_default()
    }

    pub fn remove_pipeline(&mut self, name: &str) -> Option<PipelineEntry> {
        self.pipelines.remove(name)
    }

    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }
}

impl PipelineEntry {
    pub fn material(&mut self, material: &Material) -> &mut Self {
        self.material_fingerprint(material.fingerprint())
    }

    pub fn material_fingerprint(&mut self, fingerprint: impl Into<String>) -> &mut Self {
        self.material_fingerprints.insert(fingerprint.into());
        self
    }

    pub fn stage<I, S>(&mut self, name: impl Into<String>, jobs: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages
            .entry(name.into())
            .or_default()
            .extend(jobs.into_iter().map(Into::into));
        self
    }

    pub fn remove_stage(&mut self, name: &str) -> &mut Self {
        self.stages.remove(name);
        self
    }
}

impl ConfigSnapshot for PipelineTopology {
    fn has_pipeline(&self, pipeline: &str) -> bool {
        self.pipelines.contains_key(pipeline)
    }

    fn has_stage(&self, pipeline: &str, stage: &str) -> bool {
        self.pipelines
            .get(pipeline)
            .is_some_and(|p| p.stages.contains_key(stage))
    }

    fn has_job(&self, pipeline: &str, stage: &str, job: &str) -> bool {
        self.pipelines
            .get(pipeline)
            .and_then(|p| p.stages.get(stage))
            .is_some_and(|jobs| jobs.contains(job))
    }

    fn has_material(&self, fingerprint: &str) -> bool {
        self.pipelines
            .values()
            .any(|p| p.material_fingerprints.contains(fingerprint))
    }
}
