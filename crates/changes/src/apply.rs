// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Applying batches of [`ResourceChange`]s to a cluster

use std::fmt;

use kube::api::{DeleteParams, PatchParams, PostParams};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::change::{Operation, ResourceChange};
use crate::client::ResourceClient;
use crate::mapper::{RestMapper, gvk_of};
use crate::{Error, Result};

/// Controls how a batch of changes is applied
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplyOptions {
    /// Ask the API server to validate writes without persisting them
    pub dry_run: bool,
    /// Stop at the first failed change instead of attempting the rest
    pub stop_on_error: bool,
    /// Field manager recorded on writes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_manager: Option<String>,
}

impl ApplyOptions {
    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: self.dry_run,
            field_manager: self.field_manager.clone(),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            dry_run: self.dry_run,
            field_manager: self.field_manager.clone(),
            ..PatchParams::default()
        }
    }

    fn delete_params(&self) -> DeleteParams {
        DeleteParams {
            dry_run: self.dry_run,
            ..DeleteParams::default()
        }
    }
}

/// Outcome counters for one kind of operation
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetrics {
    /// Changes that were tried
    pub attempted: u32,
    /// Changes that landed (or were no-ops)
    pub succeeded: u32,
    /// Changes that failed
    pub failed: u32,
}

impl OperationMetrics {
    fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    fn merge(&mut self, other: &OperationMetrics) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Outcome counters of applying one or more batches of changes
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyMetrics {
    /// Create operations
    pub create: OperationMetrics,
    /// Patch operations
    pub patch: OperationMetrics,
    /// Delete operations
    pub delete: OperationMetrics,
}

impl ApplyMetrics {
    /// Counters for `operation`
    #[must_use]
    pub fn for_operation(&self, operation: Operation) -> &OperationMetrics {
        match operation {
            Operation::Create => &self.create,
            Operation::Patch => &self.patch,
            Operation::Delete => &self.delete,
        }
    }

    fn for_operation_mut(&mut self, operation: Operation) -> &mut OperationMetrics {
        match operation {
            Operation::Create => &mut self.create,
            Operation::Patch => &mut self.patch,
            Operation::Delete => &mut self.delete,
        }
    }

    /// Number of changes attempted across all operations
    #[must_use]
    pub fn total(&self) -> u32 {
        self.create.attempted + self.patch.attempted + self.delete.attempted
    }

    /// Number of failed changes across all operations
    #[must_use]
    pub fn failed(&self) -> u32 {
        self.create.failed + self.patch.failed + self.delete.failed
    }

    /// Adds the counters of another batch
    pub fn merge(&mut self, other: &ApplyMetrics) {
        self.create.merge(&other.create);
        self.patch.merge(&other.patch);
        self.delete.merge(&other.delete);
    }
}

/// A single change that could not be applied
#[derive(thiserror::Error, Debug)]
#[error("{operation} {target}: {source}")]
pub struct ChangeFailure {
    /// Operation of the failed change
    pub operation: Operation,
    /// Description of the change target
    pub target: String,
    /// Why the change failed
    #[source]
    pub source: Error,
}

/// Every failed change of a batch
#[derive(Debug, Default)]
pub struct ApplyError {
    failures: Vec<ChangeFailure>,
}

impl ApplyError {
    /// The individual failures, in application order
    #[must_use]
    pub fn failures(&self) -> &[ChangeFailure] {
        &self.failures
    }

    /// Consumes the error into its failures
    #[must_use]
    pub fn into_failures(self) -> Vec<ChangeFailure> {
        self.failures
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} change(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplyError {}

/// Applies `changes` in order through `client`.
///
/// A failed change does not prevent the following ones from being attempted
/// unless [`ApplyOptions::stop_on_error`] is set. The metrics always reflect
/// everything that was attempted, the error lists every failure.
#[instrument(skip_all, fields(changes = changes.len(), dry_run = options.dry_run))]
pub async fn apply_changes(
    client: &dyn ResourceClient,
    changes: &[ResourceChange],
    options: &ApplyOptions,
    mapper: &dyn RestMapper,
) -> (ApplyMetrics, Result<(), ApplyError>) {
    let mut metrics = ApplyMetrics::default();
    let mut error = ApplyError::default();

    for change in changes {
        let outcome = apply_change(client, change, options, mapper).await;
        metrics
            .for_operation_mut(change.operation)
            .record(outcome.is_ok());

        if let Err(source) = outcome {
            let target = change.target();
            warn!(
                operation = %change.operation,
                target_resource = %target,
                error = %source,
                "failed to apply change"
            );
            error.failures.push(ChangeFailure {
                operation: change.operation,
                target,
                source,
            });

            if options.stop_on_error {
                break;
            }
        }
    }

    info!(
        attempted = metrics.total(),
        failed = metrics.failed(),
        "applied changes"
    );

    if error.failures.is_empty() {
        (metrics, Ok(()))
    } else {
        (metrics, Err(error))
    }
}

async fn apply_change(
    client: &dyn ResourceClient,
    change: &ResourceChange,
    options: &ApplyOptions,
    mapper: &dyn RestMapper,
) -> Result<()> {
    change.validate()?;

    match (&change.create, &change.patch, &change.delete) {
        (Some(create), _, _) => {
            let types = create
                .resource
                .types
                .as_ref()
                .ok_or_else(|| Error::Validation("created resource has no type".to_string()))?;
            let ar = mapper.resource_for(&gvk_of(&types.api_version, &types.kind)?)?;
            client
                .create(&ar, &create.resource, &options.post_params())
                .await?;
        }
        (_, Some(patch), _) => {
            if patch.is_empty() {
                debug!(target_resource = %patch.resource_ref, "skipping empty patch");
                return Ok(());
            }
            client
                .patch(
                    &patch.resource_ref,
                    &patch.merge_patch,
                    patch.patch_type,
                    &options.patch_params(),
                )
                .await?;
        }
        (_, _, Some(delete)) => {
            client
                .delete(&delete.resource_ref, &options.delete_params())
                .await?;
        }
        _ => {
            return Err(Error::Validation("change carries no payload".to_string()));
        }
    }

    Ok(())
}
