//! Store of current health states, keyed by scope.

use dashmap::DashMap;
use gantry_core::health::{HealthLevel, HealthState, HealthStateScope};
use gantry_core::ports::ConfigSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One state per scope; a newer state for the same scope replaces the older one.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    states: DashMap<HealthStateScope, HealthState>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `state`, returning the state it replaced.
    pub fn update(&self, state: HealthState) -> Option<HealthState> {
        debug!(
            scope = %state.scope,
            level = ?state.level,
            message = %state.message,
            "Health state updated"
        );
        self.states.insert(state.scope.clone(), state)
    }

    pub fn remove_by_scope(&self, scope: &HealthStateScope) -> Option<HealthState> {
        self.states.remove(scope).map(|(_, state)| state)
    }

    /// Remove the state for `scope` only if it is the one `owns` recognises.
    pub fn remove_if(
        &self,
        scope: &HealthStateScope,
        owns: impl FnOnce(&HealthState) -> bool,
    ) -> Option<HealthState> {
        self.states
            .remove_if(scope, |_, state| owns(state))
            .map(|(_, state)| state)
    }

    /// Drop every state whose scope no longer exists in `config`.
    pub fn purge_stale(&self, config: &dyn ConfigSnapshot) -> Vec<HealthStateScope> {
        let stale: Vec<_> = self
            .states
            .iter()
            .filter(|e| e.key().is_removed_from_config(config))
            .map(|e| e.key().clone())
            .collect();

        for scope in &stale {
            self.states.remove(scope);
        }
        if !stale.is_empty() {
            info!(purged = stale.len(), "Purged health states for removed config");
        }
        stale
    }

    /// All states, oldest first.
    pub fn states(&self) -> Vec<HealthState> {
        let mut states: Vec<_> = self.states.iter().map(|e| e.value().clone()).collect();
        states.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.scope.cmp(&b.scope))
        });
        states
    }

    pub fn errors(&self) -> Vec<HealthState> {
        self.with_level(HealthLevel::Error)
    }

    pub fn warnings(&self) -> Vec<HealthState> {
        self.with_level(HealthLevel::Warning)
    }

    pub fn get(&self, scope: &HealthStateScope) -> Option<HealthState> {
        self.states.get(scope).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn with_level(&self, level: HealthLevel) -> Vec<HealthState> {
        self.states()
            .into_iter()
            .filter(|s| s.level == level)
            .collect()
    }
}

/// Purge stale states on an interval against the latest published config.
///
/// Also sweeps immediately whenever a new config is published.
pub async fn run_sweeper<C>(
    registry: Arc<HealthRegistry>,
    mut config: watch::Receiver<Arc<C>>,
    every: Duration,
    cancel: CancellationToken,
) where
    C: ConfigSnapshot + 'static,
{
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            changed = config.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let snapshot = Arc::clone(&config.borrow_and_update());
        registry.purge_stale(snapshot.as_ref());
    }

    debug!("Health sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::topology::PipelineTopology;

    fn topology() -> PipelineTopology {
        let mut topology = PipelineTopology::new();
        topology.pipeline("build").stage("compile", ["linux"]);
        topology
    }

    #[test]
    fn test_update_replaces_same_scope() {
        let registry = HealthRegistry::new();
        let scope = HealthStateScope::for_pipeline("build");

        assert!(registry.update(HealthState::error("first", "", scope.clone())).is_none());
        let replaced = registry.update(HealthState::warning("second", "", scope.clone()));

        assert_eq!(replaced.unwrap().message, "first");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&scope).unwrap().message, "second");
        assert_eq!(registry.warnings().len(), 1);
        assert!(registry.errors().is_empty());
    }

    #[test]
    fn test_remove_by_scope() {
        let registry = HealthRegistry::new();
        let scope = HealthStateScope::for_stage("build", "compile");
        registry.update(HealthState::error("broken", "", scope.clone()));

        assert!(registry.remove_by_scope(&scope).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_if_keeps_states_it_does_not_own() {
        let registry = HealthRegistry::new();
        let scope = HealthStateScope::global();
        registry.update(HealthState::error("Disk full", "", scope.clone()));

        assert!(registry.remove_if(&scope, |s| s.message == "Other").is_none());
        assert_eq!(registry.get(&scope).unwrap().message, "Disk full");
        assert!(registry.remove_if(&scope, |s| s.message == "Disk full").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_purge_stale() {
        let registry = HealthRegistry::new();
        registry.update(HealthState::error("a", "", HealthStateScope::for_pipeline("build")));
        registry.update(HealthState::error("b", "", HealthStateScope::for_pipeline("gone")));
        let job = HealthStateScope::for_job("build", "compile", "mac");
        registry.update(HealthState::error("c", "", job));
        registry.update(HealthState::warning("d", "", HealthStateScope::global()));

        let mut purged = registry.purge_stale(&topology());
        purged.sort();

        assert_eq!(
            purged,
            vec![
                HealthStateScope::for_pipeline("gone"),
                HealthStateScope::for_job("build", "compile", "mac"),
            ]
        );
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_sweeper_reacts_to_config_change() {
        let registry = Arc::new(HealthRegistry::new());
        registry.update(HealthState::error("a", "", HealthStateScope::for_pipeline("build")));

        let (tx, rx) = watch::channel(Arc::new(topology()));
        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&registry),
            rx,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        tx.send(Arc::new(PipelineTopology::new())).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("stale state purged");

        cancel.cancel();
        sweeper.await.unwrap();
    }
}
