// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Process configuration from environment variables

use std::env;

use migrator_changes::ApplyOptions;

use crate::status::DEFAULT_CONFIGMAP_NAME;
use crate::{Error, Result};

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "migrator";

/// Runtime settings of the migrator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Namespace of the status ConfigMap and the lease, the client's default
    /// namespace when unset
    pub namespace: Option<String>,
    /// Name of the status ConfigMap
    pub configmap: String,
    /// Only validate writes server side
    pub dry_run: bool,
    /// Stop a batch at its first failure
    pub stop_on_error: bool,
    /// Listen address of the HTTP server
    pub bind_address: String,
    /// Name of the leader election lease
    pub lease_name: String,
    /// Identity used when holding the lease
    pub holder_id: String,
    /// Register the example migration
    pub examples: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: None,
            configmap: DEFAULT_CONFIGMAP_NAME.to_string(),
            dry_run: false,
            stop_on_error: false,
            bind_address: "0.0.0.0:8080".to_string(),
            lease_name: "migrator-lease".to_string(),
            holder_id: "unknown".to_string(),
            examples: false,
        }
    }
}

impl Settings {
    /// Reads the settings from the environment
    ///
    /// # Errors
    /// Will return `Err` for boolean variables that are not booleans
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            namespace: env::var("MIGRATIONS_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty()),
            configmap: env::var("MIGRATIONS_CONFIGMAP").unwrap_or(defaults.configmap),
            dry_run: flag("MIGRATOR_DRY_RUN")?,
            stop_on_error: flag("MIGRATOR_STOP_ON_ERROR")?,
            bind_address: env::var("MIGRATOR_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            lease_name: env::var("MIGRATOR_LEASE_NAME").unwrap_or(defaults.lease_name),
            holder_id: env::var("HOSTNAME").unwrap_or(defaults.holder_id),
            examples: flag("MIGRATOR_EXAMPLES")?,
        })
    }

    /// Options every migration is applied with
    #[must_use]
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            dry_run: self.dry_run,
            stop_on_error: self.stop_on_error,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }
}

fn flag(name: &str) -> Result<bool> {
    let Ok(value) = env::var(name) else {
        return Ok(false);
    };

    match value.to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        other => Err(Error::Config(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}
