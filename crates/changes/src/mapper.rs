// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Resolution of kinds to their addressable resources

use std::collections::BTreeMap;

use kube::core::gvk::{GroupVersion, GroupVersionKind};
use kube::discovery::{ApiResource, Discovery};

use crate::{Error, Result};

/// Resolves a `GroupVersionKind` to the resource it is served under
pub trait RestMapper: Send + Sync {
    /// Finds the API resource (and with it the plural name) for `gvk`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the kind is not served by the cluster.
    fn resource_for(&self, gvk: &GroupVersionKind) -> Result<ApiResource>;
}

impl RestMapper for Discovery {
    fn resource_for(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        self.resolve_gvk(gvk)
            .map(|(ar, _)| ar)
            .ok_or_else(|| Error::Mapping(display_gvk(gvk)))
    }
}

/// A fixed set of known resources, keyed by `apiVersion` and kind
#[derive(Clone, Debug, Default)]
pub struct StaticMapper {
    resources: BTreeMap<(String, String), ApiResource>,
}

impl StaticMapper {
    /// Creates an empty mapper
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource, replacing any earlier entry of the same kind
    #[must_use]
    pub fn with(mut self, ar: ApiResource) -> Self {
        self.insert(ar);
        self
    }

    /// Adds a resource, replacing any earlier entry of the same kind
    pub fn insert(&mut self, ar: ApiResource) {
        self.resources
            .insert((ar.api_version.clone(), ar.kind.clone()), ar);
    }
}

impl FromIterator<ApiResource> for StaticMapper {
    fn from_iter<I: IntoIterator<Item = ApiResource>>(iter: I) -> Self {
        let mut mapper = Self::new();
        for ar in iter {
            mapper.insert(ar);
        }
        mapper
    }
}

impl RestMapper for StaticMapper {
    fn resource_for(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        self.resources
            .get(&(gvk.api_version(), gvk.kind.clone()))
            .cloned()
            .ok_or_else(|| Error::Mapping(display_gvk(gvk)))
    }
}

/// Parses `apiVersion` and pairs it with `kind`.
///
/// # Errors
///
/// Returns [`Error::ParseError`] for a malformed `apiVersion`.
pub fn gvk_of(api_version: &str, kind: &str) -> Result<GroupVersionKind> {
    let gv: GroupVersion = api_version.parse()?;
    Ok(GroupVersionKind::gvk(&gv.group, &gv.version, kind))
}

fn display_gvk(gvk: &GroupVersionKind) -> String {
    format!("{}, Kind={}", gvk.api_version(), gvk.kind)
}
