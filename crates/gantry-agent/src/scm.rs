//! Update-to-revision for source-control repositories checked out by the agent.

use crate::process::{ProcessExit, StreamTags, run_streaming};
use async_trait::async_trait;
use gantry_core::console::tags;
use gantry_core::material::{ScmKind, ScmMaterial};
use gantry_core::ports::ConsoleSink;
use gantry_core::{Error, Result};
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PREP_TAGS: StreamTags = StreamTags {
    out: tags::PREP,
    err: tags::PREP_ERR,
};

/// Brings a working copy to a given revision.
#[async_trait]
pub trait ScmUpdater: Send + Sync {
    async fn update_to(
        &self,
        material: &ScmMaterial,
        revision: &str,
        destination: &Path,
        console: &dyn ConsoleSink,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Drives the `git`, `hg` and `svn` command-line clients.
#[derive(Debug, Clone)]
pub struct CommandLineScm {
    git: String,
    hg: String,
    svn: String,
}

impl Default for CommandLineScm {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            hg: "hg".to_string(),
            svn: "svn".to_string(),
        }
    }
}

impl CommandLineScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_git(mut self, binary: impl Into<String>) -> Self {
        self.git = binary.into();
        self
    }

    pub fn with_hg(mut self, binary: impl Into<String>) -> Self {
        self.hg = binary.into();
        self
    }

    pub fn with_svn(mut self, binary: impl Into<String>) -> Self {
        self.svn = binary.into();
        self
    }

    fn steps(&self, material: &ScmMaterial, revision: &str, destination: &Path) -> Vec<ScmStep> {
        let dest = destination.to_string_lossy().to_string();
        match material.kind {
            ScmKind::Git => {
                let mut steps = Vec::new();
                if destination.join(".git").is_dir() {
                    steps.push(ScmStep::new(&self.git, &["fetch", "origin"], Some(destination)));
                } else {
                    let mut args = vec!["clone".to_string()];
                    if let Some(branch) = &material.branch {
                        args.extend(["--branch".to_string(), branch.clone()]);
                    }
                    args.extend([material.url.clone(), dest]);
                    steps.push(ScmStep::owned(&self.git, args, None));
                }
                let reset = ["reset", "--hard", revision];
                steps.push(ScmStep::new(&self.git, &reset, Some(destination)));
                steps.push(ScmStep::new(&self.git, &["clean", "-dff"], Some(destination)));
                steps
            }
            ScmKind::Mercurial => {
                let mut steps = Vec::new();
                if destination.join(".hg").is_dir() {
                    steps.push(ScmStep::new(&self.hg, &["pull"], Some(destination)));
                } else {
                    let mut args = vec!["clone".to_string(), "--noupdate".to_string()];
                    if let Some(branch) = &material.branch {
                        args.extend(["-b".to_string(), branch.clone()]);
                    }
                    args.extend([material.url.clone(), dest]);
                    steps.push(ScmStep::owned(&self.hg, args, None));
                }
                steps.push(ScmStep::new(
                    &self.hg,
                    &["update", "--clean", "-r", revision],
                    Some(destination),
                ));
                steps
            }
            ScmKind::Subversion => {
                if destination.join(".svn").is_dir() {
                    vec![ScmStep::new(
                        &self.svn,
                        &["update", "--non-interactive", "-r", revision],
                        Some(destination),
                    )]
                } else {
                    vec![ScmStep::owned(
                        &self.svn,
                        vec![
                            "checkout".to_string(),
                            "--non-interactive".to_string(),
                            "-r".to_string(),
                            revision.to_string(),
                            material.url.clone(),
                            dest,
                        ],
                        None,
                    )]
                }
            }
        }
    }
}

struct ScmStep {
    program: String,
    args: Vec<String>,
    cwd: Option<std::path::PathBuf>,
}

impl ScmStep {
    fn new(program: &str, args: &[&str], cwd: Option<&Path>) -> Self {
        Self::owned(program, args.iter().map(|a| a.to_string()).collect(), cwd)
    }

    fn owned(program: &str, args: Vec<String>, cwd: Option<&Path>) -> Self {
        Self {
            program: program.to_string(),
            args,
            cwd: cwd.map(Path::to_path_buf),
        }
    }

    fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[async_trait]
impl ScmUpdater for CommandLineScm {
    async fn update_to(
        &self,
        material: &ScmMaterial,
        revision: &str,
        destination: &Path,
        console: &dyn ConsoleSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let failed = |message: String| Error::CheckoutFailed {
            material: material.url.clone(),
            message,
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            url = %material.url,
            kind = material.kind.as_str(),
            revision = %revision,
            destination = %destination.display(),
            "Updating working copy"
        );
        console.tagged_output(
            tags::PREP,
            &format!(
                "[{}] Start updating {} at revision {} from {}",
                material.kind.as_str().to_uppercase(),
                destination.display(),
                revision,
                material.url
            ),
        );

        for step in self.steps(material, revision, destination) {
            debug!(command = %step.display(), "Running SCM command");

            let mut command = Command::new(&step.program);
            command.args(&step.args);
            if let Some(cwd) = &step.cwd {
                command.current_dir(cwd);
            }

            match run_streaming(command, console, PREP_TAGS, cancel).await {
                Ok(ProcessExit::Exited(0)) => {}
                Ok(ProcessExit::Exited(code)) => {
                    return Err(failed(format!("'{}' exited with code {}", step.display(), code)));
                }
                Ok(ProcessExit::Cancelled) => {
                    return Err(failed("checkout cancelled".to_string()));
                }
                Err(e) => {
                    return Err(failed(format!("'{}' could not be started: {}", step.display(), e)));
                }
            }
        }

        console.tagged_output(
            tags::PREP,
            &format!("[{}] Done.", material.kind.as_str().to_uppercase()),
        );
        Ok(())
    }
}
