// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Durable record of which migrations were applied

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Client;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use migrator_changes::ApplyMetrics;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::{Error, Result};

/// Default name of the ConfigMap holding migration statuses
pub const DEFAULT_CONFIGMAP_NAME: &str = "cluster-migrations";

/// Recorded state of a migration
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// When the migration was last applied, `None` if never
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
    /// Outcome of the last apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ApplyMetrics>,
}

impl MigrationStatus {
    /// Status of a migration applied now
    #[must_use]
    pub fn applied_now(metrics: Option<ApplyMetrics>) -> Self {
        Self {
            applied_at: Some(Utc::now()),
            metrics,
        }
    }

    /// Returns true if an apply was recorded
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Information about a registered migration
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationInfo {
    /// Registered name of the migration
    pub name: String,
    /// True if the migration was applied to the connected cluster
    pub applied: bool,
}

impl MigrationInfo {
    /// Projects a (possibly missing) status into an info
    pub fn new(name: impl Into<String>, status: Option<&MigrationStatus>) -> Self {
        Self {
            name: name.into(),
            applied: status.is_some_and(MigrationStatus::is_applied),
        }
    }
}

/// Reads the status of named migrations
#[async_trait]
pub trait StatusGetter: Send + Sync {
    /// Status of `name`, `None` if nothing was ever recorded
    async fn status_for(&self, name: &str) -> Result<Option<MigrationStatus>>;
}

/// Reads and records the status of named migrations
#[async_trait]
pub trait StatusClient: StatusGetter {
    /// Replaces the recorded status of `name`
    async fn set_status_for(&self, name: &str, status: &MigrationStatus) -> Result<()>;
}

/// Keeps statuses in a single ConfigMap, one data key per migration
#[derive(Clone)]
pub struct ConfigMapStatusClient {
    api: Api<ConfigMap>,
    name: String,
    namespace: String,
}

impl ConfigMapStatusClient {
    /// Uses the ConfigMap `name` in `namespace`
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
            namespace: namespace.to_string(),
        }
    }

    async fn create_with(&self, key: &str, raw: String) -> Result<()> {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(key.to_string(), raw)])),
            ..ConfigMap::default()
        };
        self.api.create(&PostParams::default(), &cm).await?;
        debug!(configmap = %self.name, "created migration status configmap");
        Ok(())
    }
}

#[async_trait]
impl StatusGetter for ConfigMapStatusClient {
    #[instrument(skip(self), fields(configmap = %self.name, namespace = %self.namespace))]
    async fn status_for(&self, name: &str) -> Result<Option<MigrationStatus>> {
        let Some(cm) = self.api.get_opt(&self.name).await? else {
            return Ok(None);
        };

        cm.data
            .as_ref()
            .and_then(|data| data.get(name))
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(Error::from)
    }
}

#[async_trait]
impl StatusClient for ConfigMapStatusClient {
    #[instrument(skip(self, status), fields(configmap = %self.name, namespace = %self.namespace))]
    async fn set_status_for(&self, name: &str, status: &MigrationStatus) -> Result<()> {
        let raw = serde_json::to_string(status)?;
        let patch = Patch::Merge(json!({ "data": { name: raw } }));

        match self
            .api
            .patch(&self.name, &PatchParams::default(), &patch)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => self.create_with(name, raw).await,
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps statuses in memory, for dry runs and tests
#[derive(Default)]
pub struct MemoryStatusClient {
    statuses: RwLock<BTreeMap<String, MigrationStatus>>,
    failing: BTreeSet<String>,
    fail_writes: bool,
}

impl MemoryStatusClient {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the status of `name`
    #[must_use]
    pub fn with_status(mut self, name: impl Into<String>, status: MigrationStatus) -> Self {
        self.statuses.get_mut().insert(name.into(), status);
        self
    }

    /// Makes every status lookup of `name` fail
    #[must_use]
    pub fn fail_lookup(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Makes every status write fail
    #[must_use]
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

#[async_trait]
impl StatusGetter for MemoryStatusClient {
    async fn status_for(&self, name: &str) -> Result<Option<MigrationStatus>> {
        if self.failing.contains(name) {
            return Err(Error::Message(format!("status of {name} is unavailable")));
        }
        Ok(self.statuses.read().await.get(name).cloned())
    }
}

#[async_trait]
impl StatusClient for MemoryStatusClient {
    async fn set_status_for(&self, name: &str, status: &MigrationStatus) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Message(format!("cannot record status of {name}")));
        }
        self.statuses
            .write()
            .await
            .insert(name.to_string(), status.clone());
        Ok(())
    }
}
