use std::collections::BTreeMap;
use std::sync::Arc;

use migrator_changes::ApplyMetrics;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, instrument};

use crate::Result;
use crate::apply::Engine;
use crate::diagnostics::Diagnostics;

/// Holds the state of the whole application
#[derive(Clone)]
pub struct State {
    /// Atomic lock for run diagnostics
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Engine applying the registered migrations
    pub engine: Engine,
    leader: watch::Receiver<bool>,
}

impl State {
    /// Creates the state, following leadership through `leader`
    #[must_use]
    pub fn new(engine: Engine, leader: watch::Receiver<bool>) -> Self {
        Self {
            diagnostics: Arc::default(),
            engine,
            leader,
        }
    }

    /// Whether this replica currently holds the lease
    #[must_use]
    pub fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    /// Getter for diagnostics with read lock
    pub async fn diagnostics(&self) -> Diagnostics {
        let mut diag = self.diagnostics.read().await.clone();
        diag.leader = self.is_leader();
        diag
    }

    /// Stores the outcome of a run in the diagnostics
    pub async fn record(
        &self,
        metrics: BTreeMap<String, Option<ApplyMetrics>>,
        result: &Result<()>,
    ) {
        self.diagnostics.write().await.record(metrics, result);
    }
}

/// Applies every unapplied migration each time this replica becomes the
/// leader. Returns once the leadership sender is dropped.
#[instrument(skip(state))]
pub async fn run(state: State) {
    let mut leader = state.leader.clone();

    loop {
        if leader.wait_for(|l| *l).await.is_err() {
            break;
        }

        info!("acquired leadership, applying unapplied migrations");
        let report = state.engine.apply_unapplied().await;
        if let Err(err) = &report.result {
            error!(error = %err, "applying unapplied migrations failed");
        }
        state.record(report.metrics, &report.result).await;

        if leader.wait_for(|l| !*l).await.is_err() {
            break;
        }
        info!("lost leadership");
    }

    info!("runner shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::{BATCHED_MIGRATION_NAME, BatchedMigration};
    use crate::registry::Registry;
    use crate::status::{MemoryStatusClient, StatusGetter};
    use k8s_openapi::api::core::v1::Service;
    use kube::discovery::ApiResource;
    use migrator_changes::fake::FakeResourceClient;
    use migrator_changes::{ApplyOptions, StaticMapper};

    fn engine(status: Arc<MemoryStatusClient>) -> Engine {
        let mut registry = Registry::new();
        registry.register(BatchedMigration::default()).unwrap();
        Engine::new(
            Arc::new(registry),
            status,
            Arc::new(FakeResourceClient::new()),
            Arc::new(StaticMapper::new().with(ApiResource::erase::<Service>(&()))),
            ApplyOptions::default(),
        )
    }

    #[tokio::test]
    async fn applies_once_leader() {
        let status = Arc::new(MemoryStatusClient::new());
        let (tx, rx) = watch::channel(false);
        let state = State::new(engine(status.clone()), rx);

        let handle = tokio::spawn(run(state.clone()));
        assert!(!state.is_leader());

        tx.send_replace(true);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while state.diagnostics().await.last_run.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let diag = state.diagnostics().await;
        assert!(diag.leader);
        assert!(diag.last_error.is_none());
        assert!(diag.metrics.contains_key(BATCHED_MIGRATION_NAME));
        assert!(
            status
                .status_for(BATCHED_MIGRATION_NAME)
                .await
                .unwrap()
                .is_some_and(|s| s.is_applied())
        );

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_without_leadership_sender() {
        let (tx, rx) = watch::channel(false);
        let state = State::new(engine(Arc::new(MemoryStatusClient::new())), rx);
        drop(tx);

        run(state.clone()).await;
        assert!(state.diagnostics().await.last_run.is_none());
    }
}
