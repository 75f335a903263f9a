// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Catalog of the migrations known to the process

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::migration::Migration;
use crate::status::{MigrationInfo, StatusGetter};
use crate::{Error, Result, UnknownMigrationError};

/// Migrations in registration order, built once at startup and then shared
/// read-only.
#[derive(Default, Clone)]
pub struct Registry {
    migrations: Vec<Arc<dyn Migration>>,
}

impl Registry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a migration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMigration`] if a migration with the same
    /// name is already registered.
    pub fn register(&mut self, migration: impl Migration + 'static) -> Result<()> {
        self.register_arc(Arc::new(migration))
    }

    /// Adds an already shared migration, see [`Registry::register`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMigration`] for a name that is taken.
    pub fn register_arc(&mut self, migration: Arc<dyn Migration>) -> Result<()> {
        let name = migration.name();
        if self.migrations.iter().any(|m| m.name() == name) {
            return Err(Error::DuplicateMigration(name.to_string()));
        }

        debug!(migration = name, "registered migration");
        self.migrations.push(migration);
        Ok(())
    }

    /// Looks up a migration by name.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownMigrationError`] if no migration has that name.
    pub fn by_name(&self, name: &str) -> Result<Arc<dyn Migration>, UnknownMigrationError> {
        self.migrations
            .iter()
            .find(|m| m.name() == name)
            .cloned()
            .ok_or_else(|| UnknownMigrationError {
                name: name.to_string(),
            })
    }

    /// Iterates over the migrations in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    /// Names of the registered migrations, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    /// Number of registered migrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns true if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Lists every migration along with whether it was applied.
    ///
    /// # Errors
    ///
    /// Fails with the first status lookup that fails.
    #[instrument(skip_all, fields(migrations = self.migrations.len()))]
    pub async fn list(&self, status: &dyn StatusGetter) -> Result<Vec<MigrationInfo>> {
        let mut result = Vec::with_capacity(self.migrations.len());
        for migration in &self.migrations {
            let name = migration.name();
            let current = status
                .status_for(name)
                .await
                .map_err(|source| Error::Status {
                    name: name.to_string(),
                    source: Box::new(source),
                })?;
            result.push(MigrationInfo::new(name, current.as_ref()));
        }

        Ok(result)
    }
}
