// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! The contract between the engine and individual migrations

use async_trait::async_trait;
use migrator_changes::{ResourceChange, ResourceClient};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Additional information passed to [`Migration::changes`]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Token returned by the previous batch of the migration, empty for the
    /// first one. Opaque to everything but the migration itself.
    #[serde(rename = "continue", default)]
    pub continue_token: String,
}

impl MigrationOptions {
    /// Options resuming after a batch that returned `token`
    pub fn resume(token: impl Into<String>) -> Self {
        Self {
            continue_token: token.into(),
        }
    }
}

/// A batch of changes calculated by a migration
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct MigrationChanges {
    /// Token to request the next batch with, empty when this is the last one
    #[serde(rename = "continue", default, skip_serializing_if = "String::is_empty")]
    pub continue_token: String,
    /// Changes to apply, in order
    pub changes: Vec<ResourceChange>,
}

impl MigrationChanges {
    /// Returns true if the migration has further batches
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.continue_token.is_empty()
    }
}

/// A named set of changes the cluster should go through once.
///
/// Implementations calculate their changes from the live state, so they
/// should be safe to calculate again after a partial apply.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Stable name, unique within a [`crate::Registry`]
    fn name(&self) -> &str;

    /// Returns the next batch of changes this migration wants to apply.
    ///
    /// `opts.continue_token` is empty on the first call and otherwise the
    /// token of the previous batch.
    async fn changes(
        &self,
        client: &dyn ResourceClient,
        opts: &MigrationOptions,
    ) -> Result<MigrationChanges>;
}

/// Derives a DNS-1035 compatible name from the type name of `M`.
///
/// `my_crate::fixes::RenameLegacyService` becomes `rename-legacy-service`.
#[must_use]
pub fn name_for<M: ?Sized>() -> String {
    let full = std::any::type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);

    let mut name = String::with_capacity(short.len() + 4);
    let mut prev_lower = false;
    for c in short.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                name.push('-');
            }
            name.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            name.push(c);
            prev_lower = true;
        } else if !name.ends_with('-') && !name.is_empty() {
            name.push('-');
            prev_lower = false;
        }
    }

    name.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RenameLegacyService;
    #[allow(non_camel_case_types)]
    struct cleanup_v2;

    #[test]
    fn names_are_derived_from_types() {
        assert_eq!(name_for::<RenameLegacyService>(), "rename-legacy-service");
        assert_eq!(name_for::<cleanup_v2>(), "cleanup-v2");
    }

    #[test]
    fn changes_serialize_with_continue_token() {
        let batch = MigrationChanges {
            continue_token: r#"{"start":1}"#.into(),
            changes: vec![],
        };
        assert!(batch.has_more());
        assert_eq!(
            serde_json::to_string(&batch).unwrap(),
            r#"{"continue":"{\"start\":1}","changes":[]}"#
        );
        assert!(!MigrationChanges::default().has_more());
        assert_eq!(
            MigrationOptions::resume("abc").continue_token,
            "abc".to_string()
        );
    }
}
