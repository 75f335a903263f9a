// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Descriptions of single resource-level changes

use std::fmt;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Name and optional namespace of an object
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedName {
    /// Namespace of the object, `None` for cluster scoped objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the object
    pub name: String,
}

impl NamespacedName {
    /// Creates a new reference from a name and an optional namespace
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Identifies a single cluster resource by its addressable resource type.
///
/// The API server routes writes by plural resource name, not by kind, so
/// this carries `services` rather than `Service`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// The object within the resource type
    pub object_ref: NamespacedName,
    /// API group, empty for the core group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Lowercase plural resource name (e.g. `services`)
    pub resource: String,
    /// API version within the group (e.g. `v1`)
    pub version: String,
}

impl ResourceReference {
    /// Builds a reference to `name` within the resource type described by `ar`
    pub fn from_api_resource(ar: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            object_ref: NamespacedName::new(namespace, name),
            group: ar.group.clone(),
            resource: ar.plural.clone(),
            version: ar.version.clone(),
        }
    }

    /// `group/version`, or just `version` for the core group
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The dynamic API address of the referenced resource type.
    ///
    /// The kind is left empty: dynamic requests are routed by plural only.
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: String::new(),
            plural: self.resource.clone(),
        }
    }

    /// Namespace of the referenced object
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.object_ref.namespace.as_deref()
    }

    /// Name of the referenced object
    #[must_use]
    pub fn name(&self) -> &str {
        &self.object_ref.name
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{} {}", self.resource, self.version, self.object_ref)
        } else {
            write!(
                f,
                "{}.{}/{} {}",
                self.resource, self.group, self.version, self.object_ref
            )
        }
    }
}

/// Kind of change carried by a [`ResourceChange`]
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Create a new resource
    Create,
    /// Patch an existing resource
    Patch,
    /// Delete an existing resource
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
        })
    }
}

/// Patch formats a [`PatchChange`] may carry
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PatchType {
    /// RFC 7386 JSON merge patch
    #[default]
    #[serde(rename = "application/merge-patch+json")]
    MergePatchJson,
    /// Kubernetes strategic merge patch, not supported by the applier yet
    #[serde(rename = "application/strategic-merge-patch+json")]
    StrategicMergePatch,
}

/// Creates the carried resource
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateChange {
    /// Full desired body, including `apiVersion` and `kind`
    pub resource: DynamicObject,
}

/// Patches an existing resource
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchChange {
    /// Target of the patch
    pub resource_ref: ResourceReference,
    /// Only the changed fields, `null` marks a removed key
    pub merge_patch: Map<String, Value>,
    /// Format of `merge_patch`
    #[serde(rename = "type", default)]
    pub patch_type: PatchType,
}

impl PatchChange {
    /// Returns true if applying this patch would not change anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merge_patch.is_empty()
    }
}

/// Deletes an existing resource
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChange {
    /// Target of the deletion
    pub resource_ref: ResourceReference,
}

/// A single change to a cluster resource.
///
/// Exactly one payload is set and it matches `operation`; the constructors
/// uphold this, [`ResourceChange::validate`] checks values built elsewhere.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    /// Which payload is populated
    pub operation: Operation,
    /// Payload for [`Operation::Create`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<CreateChange>,
    /// Payload for [`Operation::Patch`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchChange>,
    /// Payload for [`Operation::Delete`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<DeleteChange>,
}

impl ResourceChange {
    /// A change creating `resource`
    #[must_use]
    pub fn create(resource: DynamicObject) -> Self {
        Self {
            operation: Operation::Create,
            create: Some(CreateChange { resource }),
            patch: None,
            delete: None,
        }
    }

    /// A change applying `patch`
    #[must_use]
    pub fn patch(patch: PatchChange) -> Self {
        Self {
            operation: Operation::Patch,
            create: None,
            patch: Some(patch),
            delete: None,
        }
    }

    /// A change deleting the referenced resource
    #[must_use]
    pub fn delete(resource_ref: ResourceReference) -> Self {
        Self {
            operation: Operation::Delete,
            create: None,
            patch: None,
            delete: Some(DeleteChange { resource_ref }),
        }
    }

    /// Human readable description of the change target, used in logs and errors
    #[must_use]
    pub fn target(&self) -> String {
        match (&self.create, &self.patch, &self.delete) {
            (Some(c), _, _) => {
                let kind = c.resource.types.as_ref().map_or("", |t| t.kind.as_str());
                let name = NamespacedName::new(
                    c.resource.metadata.namespace.as_deref(),
                    c.resource.metadata.name.clone().unwrap_or_default(),
                );
                format!("{kind} {name}")
            }
            (_, Some(p), _) => p.resource_ref.to_string(),
            (_, _, Some(d)) => d.resource_ref.to_string(),
            _ => String::from("<empty change>"),
        }
    }

    /// Checks that exactly the payload matching `operation` is populated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an inconsistent change.
    pub fn validate(&self) -> Result<()> {
        let populated = [
            self.create.is_some(),
            self.patch.is_some(),
            self.delete.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        let matches = match self.operation {
            Operation::Create => self.create.is_some(),
            Operation::Patch => self.patch.is_some(),
            Operation::Delete => self.delete.is_some(),
        };

        if populated != 1 || !matches {
            return Err(Error::Validation(format!(
                "{} change must carry exactly one {} payload",
                self.operation, self.operation
            )));
        }

        Ok(())
    }
}

impl From<PatchChange> for ResourceChange {
    fn from(patch: PatchChange) -> Self {
        ResourceChange::patch(patch)
    }
}
