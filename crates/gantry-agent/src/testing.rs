//! Shared test doubles.

use async_trait::async_trait;
use gantry_core::material::ScmMaterial;
use gantry_core::message::{Action, Message};
use gantry_core::ports::{
    CheckoutResult, ConsoleSink, MessagePublisher, PropertyBag, ScmPluginCheckout,
    ScmRevisionDescriptor,
};
use gantry_core::{AgentIdentifier, Result};
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::scm::ScmUpdater;

/// Console sink that keeps `(tag, line)` pairs; untagged lines get two spaces.
#[derive(Default)]
pub(crate) struct RecordingConsole(pub Mutex<Vec<(String, String)>>);

impl RecordingConsole {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn has(&self, tag: &str, fragment: &str) -> bool {
        self.lines()
            .iter()
            .any(|(t, l)| t == tag && l.contains(fragment))
    }
}

impl ConsoleSink for RecordingConsole {
    fn std_output(&self, line: &str) {
        self.0.lock().unwrap().push(("  ".to_string(), line.to_string()));
    }

    fn tagged_output(&self, tag: &str, line: &str) {
        self.0.lock().unwrap().push((tag.to_string(), line.to_string()));
    }

    fn tagged_err_output(&self, tag: &str, line: &str) {
        self.0.lock().unwrap().push((tag.to_string(), line.to_string()));
    }
}

/// SCM updater that succeeds unless the URL contains "broken".
///
/// A URL containing "hang" blocks until cancelled, then fails.
#[derive(Default)]
pub(crate) struct FakeScm;

#[async_trait]
impl ScmUpdater for FakeScm {
    async fn update_to(
        &self,
        material: &ScmMaterial,
        _revision: &str,
        _destination: &Path,
        _console: &dyn ConsoleSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if material.url.contains("hang") {
            cancel.cancelled().await;
            return Err(gantry_core::Error::CheckoutFailed {
                material: material.url.clone(),
                message: "checkout cancelled".to_string(),
            });
        }
        if material.url.contains("broken") {
            return Err(gantry_core::Error::CheckoutFailed {
                material: material.url.clone(),
                message: "repository not found".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) struct NoPlugins;

#[async_trait]
impl ScmPluginCheckout for NoPlugins {
    async fn checkout(
        &self,
        plugin_id: &str,
        _configuration: &PropertyBag,
        _destination: &Path,
        _revision: &ScmRevisionDescriptor,
    ) -> Result<CheckoutResult> {
        Err(gantry_core::Error::PluginNotFound(plugin_id.to_string()))
    }
}

/// Publisher that keeps every frame it was asked to send.
///
/// `fail_next(action)` makes the next publish of that action fail; the
/// attempt is still recorded.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    messages: Mutex<Vec<Message>>,
    failing: Mutex<Vec<Action>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn fail_next(&self, action: Action) {
        self.failing.lock().unwrap().push(action);
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, _agent: &AgentIdentifier, message: Message) -> Result<()> {
        let action = message.action();
        self.messages.lock().unwrap().push(message);

        let mut failing = self.failing.lock().unwrap();
        if let Some(at) = failing.iter().position(|a| *a == action) {
            failing.remove(at);
            return Err(gantry_core::Error::Transport(format!("{:?} dropped", action)));
        }
        Ok(())
    }
}
