//! Materials, modifications and material revisions.
//!
//! A material is an input a pipeline consumes: a classic source-control
//! repository, an upstream pipeline stage, a package, or an SCM implemented by
//! a plugin. A [`MaterialRevision`] pairs a material with the modifications
//! that make up the revision a job is built against.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

const FINGERPRINT_DELIMITER: &str = "<|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScmKind {
    Git,
    Mercurial,
    Subversion,
}

impl ScmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScmKind::Git => "git",
            ScmKind::Mercurial => "hg",
            ScmKind::Subversion => "svn",
        }
    }
}

/// Repository checked out by the agent itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmMaterial {
    pub kind: ScmKind,
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Destination folder relative to the job working directory.
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Upstream pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMaterial {
    pub pipeline_name: String,
    pub stage_name: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMaterial {
    pub plugin_id: String,
    pub repository_id: String,
    pub package_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One key/value pair of plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationProperty {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secure: bool,
}

/// SCM whose checkout is delegated to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluggableScmMaterial {
    pub scm_id: String,
    pub plugin_id: String,
    pub name: String,
    #[serde(default)]
    pub configuration: Vec<ConfigurationProperty>,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Material {
    Scm(ScmMaterial),
    Dependency(DependencyMaterial),
    Package(PackageMaterial),
    PluggableScm(PluggableScmMaterial),
}

impl Material {
    /// Human-readable name; also the key used for label interpolation.
    pub fn display_name(&self) -> String {
        match self {
            Material::Scm(m) => m.name.clone().unwrap_or_else(|| m.url.clone()),
            Material::Dependency(m) => m.name.clone().unwrap_or_else(|| m.pipeline_name.clone()),
            Material::Package(m) => m
                .name
                .clone()
                .unwrap_or_else(|| format!("{}:{}", m.repository_id, m.package_id)),
            Material::PluggableScm(m) => m.name.clone(),
        }
    }

    /// Destination folder relative to the job working directory, if any.
    pub fn folder(&self) -> Option<&str> {
        match self {
            Material::Scm(m) => m.folder.as_deref(),
            Material::PluggableScm(m) => m.folder.as_deref(),
            Material::Dependency(_) | Material::Package(_) => None,
        }
    }

    /// Canonical identity of the configured material.
    ///
    /// SHA-256 over the identifying attributes; display names and destination
    /// folders do not participate.
    pub fn fingerprint(&self) -> String {
        let attributes: Vec<String> = match self {
            Material::Scm(m) => vec![
                format!("type={}", m.kind.as_str()),
                format!("url={}", m.url),
                format!("branch={}", m.branch.as_deref().unwrap_or("")),
            ],
            Material::Dependency(m) => vec![
                "type=dependency".to_string(),
                format!("pipelineName={}", m.pipeline_name),
                format!("stageName={}", m.stage_name),
            ],
            Material::Package(m) => vec![
                "type=package".to_string(),
                format!("pluginId={}", m.plugin_id),
                format!("repositoryId={}", m.repository_id),
                format!("packageId={}", m.package_id),
            ],
            Material::PluggableScm(m) => {
                let mut parts = vec![
                    "type=pluggable_scm".to_string(),
                    format!("pluginId={}", m.plugin_id),
                ];
                let sorted: BTreeMap<&str, &str> = m
                    .configuration
                    .iter()
                    .filter(|p| !p.secure)
                    .map(|p| (p.key.as_str(), p.value.as_str()))
                    .collect();
                parts.extend(sorted.into_iter().map(|(k, v)| format!("{}={}", k, v)));
                parts
            }
        };

        let digest = Sha256::digest(attributes.join(FINGERPRINT_DELIMITER).as_bytes());
        format!("{:x}", digest)
    }
}

/// One discrete change on a material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub modified_time: DateTime<Utc>,
    pub revision: String,
    /// Label of the upstream run, for dependency materials.
    #[serde(default)]
    pub pipeline_label: Option<String>,
    #[serde(default)]
    pub additional_data: Option<BTreeMap<String, String>>,
}

impl Modification {
    pub fn new(revision: impl Into<String>, modified_time: DateTime<Utc>) -> Self {
        Self {
            user_name: None,
            comment: None,
            email: None,
            modified_time,
            revision: revision.into(),
            pipeline_label: None,
            additional_data: None,
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_additional_data(mut self, data: BTreeMap<String, String>) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// A material at a specific revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRevision {
    pub material: Material,
    /// Ordered oldest to newest.
    pub modifications: Vec<Modification>,
}

impl MaterialRevision {
    pub fn new(material: Material, modifications: Vec<Modification>) -> Self {
        Self {
            material,
            modifications,
        }
    }

    pub fn latest_modification(&self) -> Option<&Modification> {
        self.modifications.last()
    }

    pub fn oldest_modification(&self) -> Option<&Modification> {
        self.modifications.first()
    }

    pub fn latest_revision(&self) -> Option<&str> {
        self.latest_modification().map(|m| m.revision.as_str())
    }

    /// Upstream run this revision points at, for dependency materials.
    pub fn dependency_revision(&self) -> Result<Option<DependencyMaterialRevision>> {
        if !matches!(self.material, Material::Dependency(_)) {
            return Ok(None);
        }
        let Some(latest) = self.latest_modification() else {
            return Ok(None);
        };
        let label = latest
            .pipeline_label
            .clone()
            .unwrap_or_else(|| latest.revision.clone());
        DependencyMaterialRevision::parse(&latest.revision, label).map(Some)
    }
}

/// All revisions a job is built against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialRevisions(Vec<MaterialRevision>);

impl MaterialRevisions {
    pub fn new(revisions: Vec<MaterialRevision>) -> Self {
        Self(revisions)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MaterialRevision> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Map consumed by label interpolation.
    ///
    /// Dependency revisions contribute `pipeline name -> upstream label`;
    /// every other material contributes `material name -> latest revision`.
    pub fn named_revisions(&self) -> Result<HashMap<String, String>> {
        let mut named = HashMap::new();
        for revision in &self.0 {
            if let Some(dependency) = revision.dependency_revision()? {
                dependency.put_revision(&mut named);
            } else if let Some(latest) = revision.latest_revision() {
                named.insert(revision.material.display_name(), latest.to_string());
            }
        }
        Ok(named)
    }
}

impl<'a> IntoIterator for &'a MaterialRevisions {
    type Item = &'a MaterialRevision;
    type IntoIter = std::slice::Iter<'a, MaterialRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Revision of an upstream pipeline stage run.
///
/// Equality covers the whole tuple, label included: two revisions with the
/// same fingerprint but different labels are different values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyMaterialRevision {
    pipeline_name: String,
    pipeline_counter: u32,
    pipeline_label: String,
    stage_name: String,
    stage_counter: u32,
}

impl DependencyMaterialRevision {
    /// Build a revision. A missing pipeline counter is rejected.
    pub fn create(
        pipeline_name: impl Into<String>,
        pipeline_counter: Option<u32>,
        pipeline_label: impl Into<String>,
        stage_name: impl Into<String>,
        stage_counter: u32,
    ) -> Result<Self> {
        let pipeline_name = pipeline_name.into();
        let pipeline_counter = pipeline_counter.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "dependency revision for pipeline '{}' requires a pipeline counter",
                pipeline_name
            ))
        })?;

        Ok(Self {
            pipeline_name,
            pipeline_counter,
            pipeline_label: pipeline_label.into(),
            stage_name: stage_name.into(),
            stage_counter,
        })
    }

    /// Rebuild from `pipeline/counter/stage/stageCounter` plus the label.
    pub fn parse(revision: &str, pipeline_label: impl Into<String>) -> Result<Self> {
        let tokens: Vec<&str> = revision.split('/').collect();
        let [pipeline_name, pipeline_counter, stage_name, stage_counter] = tokens[..] else {
            return Err(Error::MalformedRevision(format!(
                "expected 'pipeline/counter/stage/stageCounter', got '{}' ({} tokens)",
                revision,
                tokens.len()
            )));
        };

        let pipeline_counter = parse_counter(revision, pipeline_counter)?;
        let stage_counter = parse_counter(revision, stage_counter)?;

        Self::create(
            pipeline_name,
            Some(pipeline_counter),
            pipeline_label,
            stage_name,
            stage_counter,
        )
    }

    /// The fingerprint form: `pipeline/counter/stage/stageCounter`.
    pub fn revision(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.pipeline_name, self.pipeline_counter, self.stage_name, self.stage_counter
        )
    }

    /// Record this run's label under its pipeline name.
    pub fn put_revision(&self, revisions: &mut HashMap<String, String>) {
        revisions.insert(self.pipeline_name.clone(), self.pipeline_label.clone());
    }

    pub fn to_modification(&self, modified_time: DateTime<Utc>) -> Modification {
        let mut modification = Modification::new(self.revision(), modified_time);
        modification.pipeline_label = Some(self.pipeline_label.clone());
        modification
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn pipeline_counter(&self) -> u32 {
        self.pipeline_counter
    }

    pub fn pipeline_label(&self) -> &str {
        &self.pipeline_label
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn stage_counter(&self) -> u32 {
        self.stage_counter
    }
}

fn parse_counter(revision: &str, token: &str) -> Result<u32> {
    token.parse().map_err(|_| {
        Error::MalformedRevision(format!(
            "counter '{}' in revision '{}' is not a number",
            token, revision
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn git(url: &str) -> Material {
        Material::Scm(ScmMaterial {
            kind: ScmKind::Git,
            url: url.to_string(),
            branch: Some("main".to_string()),
            folder: None,
            name: Some("app".to_string()),
        })
    }

    fn upstream(pipeline: &str) -> Material {
        Material::Dependency(DependencyMaterial {
            pipeline_name: pipeline.to_string(),
            stage_name: "dist".to_string(),
            name: None,
        })
    }

    #[test]
    fn test_parse_reconstructs_created_revision() {
        let names = ["up", "a-b_c.d", "UPPER"];
        let counters = [0u32, 1, 42, u32::MAX];
        let labels = ["", "1.2.3", "label with spaces"];

        for name in names {
            for counter in counters {
                for label in labels {
                    let created = DependencyMaterialRevision::create(
                        name,
                        Some(counter),
                        label,
                        "dist",
                        counter,
                    )
                    .unwrap();
                    let parsed =
                        DependencyMaterialRevision::parse(&created.revision(), label).unwrap();
                    assert_eq!(created, parsed);
                }
            }
        }
    }

    #[test]
    fn test_create_without_counter_fails() {
        for (name, label, stage, stage_counter) in
            [("up", "1", "dist", 1), ("", "", "", 0), ("x", "y", "z", 9)]
        {
            let result =
                DependencyMaterialRevision::create(name, None, label, stage, stage_counter);
            assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_parse_rejects_wrong_token_count() {
        for revision in ["up/1/dist", "up/1/dist/1/extra", "", "up"] {
            let result = DependencyMaterialRevision::parse(revision, "label");
            assert!(matches!(result, Err(Error::MalformedRevision(_))), "{revision}");
        }
    }

    #[test]
    fn test_parse_rejects_non_numeric_counter() {
        let result = DependencyMaterialRevision::parse("up/one/dist/1", "label");
        assert!(matches!(result, Err(Error::MalformedRevision(_))));
    }

    #[test]
    fn test_equality_includes_label() {
        let a = DependencyMaterialRevision::create("up", Some(3), "1.0", "dist", 1).unwrap();
        let b = DependencyMaterialRevision::create("up", Some(3), "1.1", "dist", 1).unwrap();
        assert_eq!(a.revision(), b.revision());
        assert_ne!(a, b);
    }

    #[test]
    fn test_put_revision() {
        let revision =
            DependencyMaterialRevision::create("up", Some(3), "1.0.3", "dist", 1).unwrap();
        let mut map = HashMap::new();
        revision.put_revision(&mut map);
        assert_eq!(map.get("up"), Some(&"1.0.3".to_string()));
    }

    #[test]
    fn test_named_revisions() {
        let now = Utc::now();
        let dependency =
            DependencyMaterialRevision::create("up", Some(7), "rc-7", "dist", 2).unwrap();
        let revisions = MaterialRevisions::new(vec![
            MaterialRevision::new(
                git("https://example.com/app.git"),
                vec![Modification::new("aaa111", now), Modification::new("bbb222", now)],
            ),
            MaterialRevision::new(upstream("up"), vec![dependency.to_modification(now)]),
        ]);

        let named = revisions.named_revisions().unwrap();
        assert_eq!(named.get("app"), Some(&"bbb222".to_string()));
        assert_eq!(named.get("up"), Some(&"rc-7".to_string()));
    }

    #[test]
    fn test_named_revisions_fails_on_malformed_dependency() {
        let revisions = MaterialRevisions::new(vec![MaterialRevision::new(
            upstream("up"),
            vec![Modification::new("up/7/dist", Utc::now())],
        )]);
        assert!(matches!(
            revisions.named_revisions(),
            Err(Error::MalformedRevision(_))
        ));
    }

    #[test]
    fn test_fingerprint_ignores_name_and_folder() {
        let a = git("https://example.com/app.git");
        let mut b = a.clone();
        if let Material::Scm(scm) = &mut b {
            scm.name = Some("renamed".to_string());
            scm.folder = Some("src".to_string());
        }
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), git("https://example.com/other.git").fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_pluggable_fingerprint_skips_secure_properties() {
        let make = |secret: &str| {
            Material::PluggableScm(PluggableScmMaterial {
                scm_id: "scm-1".to_string(),
                plugin_id: "github.pr".to_string(),
                name: "pr".to_string(),
                configuration: vec![
                    ConfigurationProperty {
                        key: "url".to_string(),
                        value: "https://example.com/app".to_string(),
                        secure: false,
                    },
                    ConfigurationProperty {
                        key: "token".to_string(),
                        value: secret.to_string(),
                        secure: true,
                    },
                ],
                folder: None,
            })
        };
        assert_eq!(make("one").fingerprint(), make("two").fingerprint());
    }

    #[test]
    fn test_material_serialization_is_tagged() {
        let json = serde_json::to_value(upstream("up")).unwrap();
        assert_eq!(json["type"], "dependency");
        assert_eq!(json["pipeline_name"], "up");
    }
}
