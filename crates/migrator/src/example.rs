// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! A migration that creates its resources over several batches

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DynamicObject, ObjectMeta};
use migrator_changes::{ResourceChange, ResourceClient};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::migration::{Migration, MigrationChanges, MigrationOptions};

/// Name the example migration registers under
pub const BATCHED_MIGRATION_NAME: &str = "batched-migration";

/// Position of [`BatchedMigration`] between batches
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Index of the next service to create
    pub start: usize,
}

impl Cursor {
    /// Decodes a continue token, the empty token being the first batch.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for a malformed token.
    pub fn decode(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(token)?)
    }

    /// Encodes the cursor as a continue token
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the cursor cannot be encoded.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Creates the Services `test-0` .. `test-{count - 1}` in `default`, one
/// per batch
#[derive(Clone, Debug)]
pub struct BatchedMigration {
    count: usize,
}

impl Default for BatchedMigration {
    fn default() -> Self {
        Self { count: 2 }
    }
}

impl BatchedMigration {
    /// Creates `count` services instead of the default two
    #[must_use]
    pub fn with_count(count: usize) -> Self {
        Self { count }
    }
}

/// The Service created by the batch at `index`
///
/// # Errors
///
/// Returns a serialization error if the Service cannot be converted.
pub fn batched_service(index: usize) -> Result<DynamicObject> {
    let svc = Service {
        metadata: ObjectMeta {
            name: Some(format!("test-{index}")),
            namespace: Some("default".into()),
            ..ObjectMeta::default()
        },
        ..Service::default()
    };
    Ok(serde_json::from_value(serde_json::to_value(svc)?)?)
}

#[async_trait]
impl Migration for BatchedMigration {
    fn name(&self) -> &str {
        BATCHED_MIGRATION_NAME
    }

    async fn changes(
        &self,
        _client: &dyn ResourceClient,
        opts: &MigrationOptions,
    ) -> Result<MigrationChanges> {
        let cursor = Cursor::decode(&opts.continue_token)?;
        if cursor.start >= self.count {
            return Ok(MigrationChanges::default());
        }

        let next = cursor.start + 1;
        let continue_token = if next < self.count {
            Cursor { start: next }.encode()?
        } else {
            String::new()
        };

        Ok(MigrationChanges {
            continue_token,
            changes: vec![ResourceChange::create(batched_service(cursor.start)?)],
        })
    }
}
