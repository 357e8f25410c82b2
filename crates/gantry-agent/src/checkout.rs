//! Material checkout before a job's build steps run.

use crate::scm::ScmUpdater;
use gantry_core::console::tags;
use gantry_core::material::{Material, MaterialRevision, MaterialRevisions, PluggableScmMaterial};
use gantry_core::ports::{ConsoleSink, PropertyBag, ScmPluginCheckout, ScmRevisionDescriptor};
use gantry_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error};

/// Brings each material's working copy to the revision a job is built against.
///
/// Any failure is reported to the console with the `pe` tag and returned as
/// [`Error::CheckoutFailed`]; callers must not run build steps afterwards.
pub struct MaterialCheckoutOrchestrator {
    scm: Arc<dyn ScmUpdater>,
    plugins: Arc<dyn ScmPluginCheckout>,
}

impl MaterialCheckoutOrchestrator {
    pub fn new(scm: Arc<dyn ScmUpdater>, plugins: Arc<dyn ScmPluginCheckout>) -> Self {
        Self { scm, plugins }
    }

    /// Check out every revision in order, stopping at the first failure.
    pub async fn checkout_all(
        &self,
        revisions: &MaterialRevisions,
        working_dir: &Path,
        console: &dyn ConsoleSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for revision in revisions {
            self.checkout(revision, working_dir, console, cancel).await?;
        }
        Ok(())
    }

    pub async fn checkout(
        &self,
        revision: &MaterialRevision,
        working_dir: &Path,
        console: &dyn ConsoleSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let material = &revision.material;
        let span = gantry_trace::checkout_span(material);

        let result = self
            .dispatch(revision, working_dir, console, cancel)
            .instrument(span)
            .await;

        match &result {
            Err(e) if cancel.is_cancelled() => {
                debug!(material = %material.display_name(), error = %e, "Checkout cancelled");
            }
            Err(e) => {
                error!(material = %material.display_name(), error = %e, "Material checkout failed");
                console.tagged_err_output(tags::PREP_ERR, &e.to_string());
            }
            Ok(()) => {}
        }
        result
    }

    async fn dispatch(
        &self,
        revision: &MaterialRevision,
        working_dir: &Path,
        console: &dyn ConsoleSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let material = &revision.material;
        match material {
            Material::Dependency(_) | Material::Package(_) => {
                debug!(material = %material.display_name(), "Nothing to check out");
                Ok(())
            }
            Material::PluggableScm(scm) => {
                self.checkout_pluggable(scm, revision, working_dir, console)
                    .await
            }
            Material::Scm(scm) => {
                let target = latest_revision(revision)?;
                let destination = destination(working_dir, material.folder());
                self.scm
                    .update_to(scm, target, &destination, console, cancel)
                    .await
            }
        }
    }

    async fn checkout_pluggable(
        &self,
        scm: &PluggableScmMaterial,
        revision: &MaterialRevision,
        working_dir: &Path,
        console: &dyn ConsoleSink,
    ) -> Result<()> {
        let latest = revision
            .latest_modification()
            .ok_or_else(|| no_modifications(&revision.material))?;

        let configuration: PropertyBag = scm
            .configuration
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect();
        let descriptor = ScmRevisionDescriptor {
            revision: latest.revision.clone(),
            timestamp: latest.modified_time,
            data: latest.additional_data.clone().unwrap_or_default(),
        };
        let destination = destination(working_dir, scm.folder.as_deref());

        let failed = |message: String| Error::CheckoutFailed {
            material: scm.name.clone(),
            message,
        };

        let result = self
            .plugins
            .checkout(&scm.plugin_id, &configuration, &destination, &descriptor)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !result.success {
            return Err(failed(result.message));
        }
        if !result.message.trim().is_empty() {
            console.std_output(&result.message);
        }
        Ok(())
    }
}

fn latest_revision(revision: &MaterialRevision) -> Result<&str> {
    revision
        .latest_revision()
        .ok_or_else(|| no_modifications(&revision.material))
}

fn no_modifications(material: &Material) -> Error {
    Error::CheckoutFailed {
        material: material.display_name(),
        message: "no modifications to check out".to_string(),
    }
}

fn destination(working_dir: &Path, folder: Option<&str>) -> PathBuf {
    match folder {
        Some(folder) if !folder.is_empty() => working_dir.join(folder),
        _ => working_dir.to_path_buf(),
    }
}
