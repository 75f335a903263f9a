// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Applying registered migrations and recording their outcome

use std::collections::BTreeMap;
use std::sync::Arc;

use migrator_changes::{ApplyMetrics, ApplyOptions, ResourceClient, RestMapper, apply_changes};
use tracing::{Span, debug, error, field, info, instrument, warn};

use crate::migration::MigrationOptions;
use crate::registry::Registry;
use crate::status::{MigrationInfo, MigrationStatus, StatusClient};
use crate::{Error, Errors, Result};

/// Metrics gathered by an operation together with its overall result.
///
/// The metrics are best effort: they are filled in as far as the operation
/// got, even when `result` is an error.
#[derive(Debug)]
pub struct Report<T> {
    /// What was applied
    pub metrics: T,
    /// Every failure, joined
    pub result: Result<()>,
}

impl<T> Report<T> {
    /// Drops the metrics when anything failed
    ///
    /// # Errors
    ///
    /// Returns the failures of the operation.
    pub fn into_result(self) -> Result<T> {
        self.result.map(|()| self.metrics)
    }
}

/// Applies migrations from a [`Registry`] and records them in a status store
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    status: Arc<dyn StatusClient>,
    client: Arc<dyn ResourceClient>,
    mapper: Arc<dyn RestMapper>,
    options: ApplyOptions,
}

impl Engine {
    /// Creates an engine applying changes through `client`
    pub fn new(
        registry: Arc<Registry>,
        status: Arc<dyn StatusClient>,
        client: Arc<dyn ResourceClient>,
        mapper: Arc<dyn RestMapper>,
        options: ApplyOptions,
    ) -> Self {
        Self {
            registry,
            status,
            client,
            mapper,
            options,
        }
    }

    /// The migrations this engine applies
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Lists every registered migration and whether it was applied.
    ///
    /// # Errors
    ///
    /// Fails with the first status lookup that fails.
    pub async fn list(&self) -> Result<Vec<MigrationInfo>> {
        self.registry.list(self.status.as_ref()).await
    }

    /// Applies the migration `name`, batch by batch, and records it as applied.
    ///
    /// The status is recorded once every batch was applied, even if some
    /// changes failed; the metrics tell how many landed. A failure to
    /// calculate changes, or a continue token that does not advance, returns
    /// immediately without recording anything, along with the failures of
    /// the batches applied before it.
    /// This does not check whether the migration was applied before.
    #[instrument(skip(self), fields(
        batches = field::Empty,
        applied = field::Empty,
        failed = field::Empty,
    ))]
    pub async fn apply(&self, name: &str) -> Report<Option<ApplyMetrics>> {
        let migration = match self.registry.by_name(name) {
            Ok(m) => m,
            Err(err) => {
                return Report {
                    metrics: None,
                    result: Err(err.into()),
                };
            }
        };

        let mut errors = Errors::new();
        let mut metrics: Option<ApplyMetrics> = None;
        let mut opts = MigrationOptions::default();
        let mut batches = 0u32;

        loop {
            let batch = match migration.changes(self.client.as_ref(), &opts).await {
                Ok(batch) => batch,
                Err(source) => {
                    error!(error = %source, batch = batches, "failed to calculate changes");
                    errors.push(Error::Changes {
                        name: name.to_string(),
                        source: Box::new(source),
                    });
                    return Report {
                        metrics,
                        result: errors.into_result(),
                    };
                }
            };
            batches += 1;
            debug!(
                batch = batches,
                changes = batch.changes.len(),
                has_more = batch.has_more(),
                "calculated changes"
            );

            let (batch_metrics, applied) = apply_changes(
                self.client.as_ref(),
                &batch.changes,
                &self.options,
                self.mapper.as_ref(),
            )
            .await;
            metrics.get_or_insert_default().merge(&batch_metrics);
            errors.check(applied);

            if !batch.has_more() {
                break;
            }
            if batch.continue_token == opts.continue_token {
                error!(batch = batches, "continue token did not advance");
                errors.push(Error::Changes {
                    name: name.to_string(),
                    source: Box::new(Error::Message(format!(
                        "returned an unchanged continue token {:?}",
                        batch.continue_token
                    ))),
                });
                return Report {
                    metrics,
                    result: errors.into_result(),
                };
            }
            opts = MigrationOptions::resume(batch.continue_token);
            tokio::task::yield_now().await;
        }

        let total = metrics.unwrap_or_default();
        let span = Span::current();
        span.record("batches", batches);
        span.record("applied", total.total() - total.failed());
        span.record("failed", total.failed());

        let status = MigrationStatus::applied_now(metrics);
        if let Err(source) = self.status.set_status_for(name, &status).await {
            error!(error = %source, "failed to record migration status");
            errors.push(Error::Status {
                name: name.to_string(),
                source: Box::new(source),
            });
        }

        if errors.is_empty() {
            info!("migration applied");
        } else {
            warn!(failures = errors.len(), "migration applied with failures");
        }

        Report {
            metrics,
            result: errors.into_result(),
        }
    }

    /// Applies every registered migration that has not been applied yet, in
    /// registration order.
    ///
    /// A migration whose status cannot be read is skipped, a failing
    /// migration does not stop the following ones. The metrics hold an entry
    /// for every attempted migration.
    #[instrument(skip(self), fields(migrations = self.registry.len()))]
    pub async fn apply_unapplied(&self) -> Report<BTreeMap<String, Option<ApplyMetrics>>> {
        let mut result = BTreeMap::new();
        let mut errors = Errors::new();

        for migration in self.registry.iter() {
            let name = migration.name();

            let status = match self.status.status_for(name).await {
                Ok(status) => status,
                Err(source) => {
                    warn!(
                        migration = name,
                        error = %source,
                        "skipping migration, status unavailable"
                    );
                    errors.push(Error::Status {
                        name: name.to_string(),
                        source: Box::new(source),
                    });
                    continue;
                }
            };

            if status.as_ref().is_some_and(MigrationStatus::is_applied) {
                debug!(migration = name, "skipping applied migration");
                continue;
            }

            let report = self.apply(name).await;
            if let Err(err) = report.result {
                errors.push(err);
            }
            result.insert(name.to_string(), report.metrics);
        }

        info!(
            attempted = result.len(),
            failures = errors.len(),
            "applied unapplied migrations"
        );

        Report {
            metrics: result,
            result: errors.into_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{Migration, MigrationChanges};
    use crate::status::{MemoryStatusClient, StatusGetter};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Service;
    use kube::api::DynamicObject;
    use kube::discovery::ApiResource;
    use migrator_changes::fake::FakeResourceClient;
    use migrator_changes::{ResourceChange, ResourceReference, StaticMapper};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn services() -> ApiResource {
        ApiResource::erase::<Service>(&())
    }

    fn service(name: &str) -> DynamicObject {
        DynamicObject::new(name, &services()).within("default")
    }

    /// Creates the given services, one batch per name, counting its calls
    struct CreateServices {
        name: &'static str,
        services: Vec<&'static str>,
        calls: AtomicU32,
        fail_at: Option<usize>,
    }

    impl CreateServices {
        fn new(name: &'static str, services: &[&'static str]) -> Self {
            Self {
                name,
                services: services.to_vec(),
                calls: AtomicU32::new(0),
                fail_at: None,
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                fail_at: Some(0),
                ..Self::new(name, &[])
            }
        }

        /// Fails to calculate the batch at `index`
        fn failing_at(mut self, index: usize) -> Self {
            self.fail_at = Some(index);
            self
        }
    }

    #[async_trait]
    impl Migration for CreateServices {
        fn name(&self) -> &str {
            self.name
        }

        async fn changes(
            &self,
            _client: &dyn ResourceClient,
            opts: &MigrationOptions,
        ) -> Result<MigrationChanges> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let index: usize = if opts.continue_token.is_empty() {
                0
            } else {
                opts.continue_token
                    .parse()
                    .map_err(|_| Error::Message("bad token".into()))?
            };
            if self.fail_at == Some(index) {
                return Err(Error::Message("cannot calculate".into()));
            }
            let changes = self
                .services
                .get(index)
                .map(|name| vec![ResourceChange::create(service(name))])
                .unwrap_or_default();
            let continue_token = if index + 1 < self.services.len() {
                (index + 1).to_string()
            } else {
                String::new()
            };

            Ok(MigrationChanges {
                continue_token,
                changes,
            })
        }
    }

    /// Keeps handing back the same continue token
    struct Stuck;

    #[async_trait]
    impl Migration for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn changes(
            &self,
            _client: &dyn ResourceClient,
            _opts: &MigrationOptions,
        ) -> Result<MigrationChanges> {
            Ok(MigrationChanges {
                continue_token: "same".into(),
                changes: vec![],
            })
        }
    }

    /// Never finishes calculating its changes
    struct Blocked {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl Migration for Blocked {
        fn name(&self) -> &str {
            "blocked"
        }

        async fn changes(
            &self,
            _client: &dyn ResourceClient,
            _opts: &MigrationOptions,
        ) -> Result<MigrationChanges> {
            self.started.notify_one();
            std::future::pending().await
        }
    }

    struct Setup {
        engine: Engine,
        client: Arc<FakeResourceClient>,
        status: Arc<MemoryStatusClient>,
    }

    fn setup(
        migrations: Vec<Arc<dyn Migration>>,
        client: FakeResourceClient,
        status: MemoryStatusClient,
    ) -> Setup {
        let mut registry = Registry::new();
        for m in migrations {
            registry.register_arc(m).unwrap();
        }
        let client = Arc::new(client);
        let status = Arc::new(status);
        let engine = Engine::new(
            Arc::new(registry),
            status.clone(),
            client.clone(),
            Arc::new(StaticMapper::new().with(services())),
            ApplyOptions::default(),
        );

        Setup {
            engine,
            client,
            status,
        }
    }

    fn service_ref(name: &str) -> ResourceReference {
        ResourceReference::from_api_resource(&services(), Some("default"), name)
    }

    #[tokio::test]
    async fn unknown_migrations_are_rejected() {
        let s = setup(vec![], FakeResourceClient::new(), MemoryStatusClient::new());

        let report = s.engine.apply("missing").await;

        assert!(report.metrics.is_none());
        assert!(matches!(
            report.result,
            Err(Error::UnknownMigration(ref u)) if u.name == "missing"
        ));
        assert_eq!(s.status.status_for("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn applies_every_batch_and_records_status() {
        let migration = Arc::new(CreateServices::new("services", &["a", "b", "c"]));
        let s = setup(
            vec![migration.clone()],
            FakeResourceClient::new(),
            MemoryStatusClient::new(),
        );

        let metrics = s.engine.apply("services").await.into_result().unwrap().unwrap();

        assert_eq!(migration.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.create.succeeded, 3);
        for name in ["a", "b", "c"] {
            assert!(s.client.object(&service_ref(name)).await.is_some());
        }

        let status = s.status.status_for("services").await.unwrap().unwrap();
        assert!(status.is_applied());
        assert_eq!(status.metrics, Some(metrics));
    }

    #[tokio::test]
    async fn status_is_recorded_on_partial_failure() {
        let s = setup(
            vec![Arc::new(CreateServices::new("services", &["bad", "good"]))],
            FakeResourceClient::new().reject("bad"),
            MemoryStatusClient::new(),
        );

        let report = s.engine.apply("services").await;

        let err = report.result.unwrap_err();
        assert!(matches!(err, Error::Apply(ref e) if e.failures().len() == 1));
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.create.failed, 1);
        assert_eq!(metrics.create.succeeded, 1);

        let status = s.status.status_for("services").await.unwrap().unwrap();
        assert!(status.is_applied());
    }

    #[tokio::test]
    async fn apply_and_status_failures_are_both_reported() {
        let s = setup(
            vec![Arc::new(CreateServices::new("services", &["bad"]))],
            FakeResourceClient::new().reject("bad"),
            MemoryStatusClient::new().fail_writes(),
        );

        let err = s.engine.apply("services").await.result.unwrap_err();

        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert!(causes.iter().any(|e| matches!(e, Error::Apply(_))));
        assert!(
            causes
                .iter()
                .any(|e| matches!(e, Error::Status { name, .. } if name == "services"))
        );
    }

    #[tokio::test]
    async fn change_calculation_failures_record_nothing() {
        let s = setup(
            vec![Arc::new(CreateServices::failing("broken"))],
            FakeResourceClient::new(),
            MemoryStatusClient::new(),
        );

        let report = s.engine.apply("broken").await;

        assert!(matches!(report.result, Err(Error::Changes { ref name, .. }) if name == "broken"));
        assert!(report.metrics.is_none());
        assert_eq!(s.status.status_for("broken").await.unwrap(), None);
        assert!(s.client.calls().await.is_empty());
    }

    #[tokio::test]
    async fn apply_reexecutes_applied_migrations() {
        let migration = Arc::new(CreateServices::new("services", &["a"]));
        let s = setup(
            vec![migration.clone()],
            FakeResourceClient::new(),
            MemoryStatusClient::new().with_status("services", MigrationStatus::applied_now(None)),
        );

        let _ = s.engine.apply("services").await;

        assert_eq!(migration.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn applied_migrations_are_skipped() {
        let applied = Arc::new(CreateServices::new("applied", &["a"]));
        let pending = Arc::new(CreateServices::new("pending", &["b"]));
        let s = setup(
            vec![applied.clone(), pending.clone()],
            FakeResourceClient::new(),
            MemoryStatusClient::new().with_status("applied", MigrationStatus::applied_now(None)),
        );

        let metrics = s.engine.apply_unapplied().await.into_result().unwrap();

        assert_eq!(applied.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pending.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.keys().collect::<Vec<_>>(), vec!["pending"]);
        assert!(s.status.status_for("pending").await.unwrap().unwrap().is_applied());
    }

    #[tokio::test]
    async fn recorded_but_unapplied_status_is_applied() {
        let pending = Arc::new(CreateServices::new("pending", &["b"]));
        let s = setup(
            vec![pending.clone()],
            FakeResourceClient::new(),
            MemoryStatusClient::new().with_status("pending", MigrationStatus::default()),
        );

        let report = s.engine.apply_unapplied().await;

        assert!(report.result.is_ok());
        assert_eq!(pending.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_lookup_failures_do_not_block_other_migrations() {
        let first = Arc::new(CreateServices::new("first", &["a"]));
        let second = Arc::new(CreateServices::new("second", &["b"]));
        let s = setup(
            vec![first.clone(), second.clone()],
            FakeResourceClient::new(),
            MemoryStatusClient::new().fail_lookup("first"),
        );

        let report = s.engine.apply_unapplied().await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert!(!report.metrics.contains_key("first"));
        assert_eq!(report.metrics["second"].unwrap().create.succeeded, 1);
        assert!(matches!(
            report.result,
            Err(Error::Status { ref name, .. }) if name == "first"
        ));
    }

    #[tokio::test]
    async fn failing_migrations_do_not_stop_the_rest() {
        let broken = Arc::new(CreateServices::failing("broken"));
        let partial = Arc::new(CreateServices::new("partial", &["bad"]));
        let healthy = Arc::new(CreateServices::new("healthy", &["good"]));
        let s = setup(
            vec![broken.clone(), partial.clone(), healthy.clone()],
            FakeResourceClient::new().reject("bad"),
            MemoryStatusClient::new(),
        );

        let report = s.engine.apply_unapplied().await;

        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.metrics.len(), 3);
        assert!(report.metrics["broken"].is_none());
        assert_eq!(report.metrics["partial"].unwrap().create.failed, 1);
        assert_eq!(report.metrics["healthy"].unwrap().create.succeeded, 1);

        let err = report.result.unwrap_err();
        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert!(matches!(causes[0], Error::Changes { name, .. } if name == "broken"));
        assert!(matches!(causes[1], Error::Apply(_)));
    }

    #[tokio::test]
    async fn later_calculation_failures_keep_earlier_apply_failures() {
        let s = setup(
            vec![Arc::new(
                CreateServices::new("services", &["bad", "good"]).failing_at(1),
            )],
            FakeResourceClient::new().reject("bad"),
            MemoryStatusClient::new(),
        );

        let report = s.engine.apply("services").await;

        assert_eq!(report.metrics.unwrap().create.failed, 1);
        let err = report.result.unwrap_err();
        let causes = err.causes();
        assert_eq!(causes.len(), 2);
        assert!(matches!(causes[0], Error::Apply(e) if e.failures().len() == 1));
        assert!(matches!(causes[1], Error::Changes { name, .. } if name == "services"));
        assert_eq!(s.status.status_for("services").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unchanged_continue_tokens_stop_the_migration() {
        let s = setup(
            vec![Arc::new(Stuck)],
            FakeResourceClient::new(),
            MemoryStatusClient::new(),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), s.engine.apply("stuck"))
            .await
            .unwrap();

        let err = report.result.unwrap_err();
        assert!(matches!(err, Error::Changes { ref name, .. } if name == "stuck"));
        assert!(err.to_string().contains("unchanged continue token"));
        assert_eq!(s.status.status_for("stuck").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancelled_apply_records_no_status() {
        let started = Arc::new(Notify::new());
        let s = setup(
            vec![Arc::new(Blocked {
                started: started.clone(),
            })],
            FakeResourceClient::new(),
            MemoryStatusClient::new(),
        );

        let engine = s.engine.clone();
        let handle = tokio::spawn(async move { engine.apply("blocked").await });
        started.notified().await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert_eq!(s.status.status_for("blocked").await.unwrap(), None);
    }
}
