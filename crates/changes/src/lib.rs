// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Resource changes: describing, calculating and applying them against a cluster

use kube::core::gvk::ParseGroupVersionError;

/// Generic Error for describing and applying resource changes
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kubernetes internal error
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    /// `serde` errors
    #[error("Serialization Error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Malformed `apiVersion` strings
    #[error("Parse Error: {0}")]
    ParseError(#[from] ParseGroupVersionError),

    /// The inputs of an operation are inconsistent with each other
    #[error("Validation Error: {0}")]
    Validation(String),

    /// A kind could not be resolved to an addressable resource
    #[error("Mapping Error: no resource found for {0}")]
    Mapping(String),

    /// The addressed resource does not exist
    #[error("Not Found: {0}")]
    NotFound(ResourceReference),

    /// The patch type is known but cannot be applied
    #[error("Unsupported patch type: {0:?}")]
    UnsupportedPatch(PatchType),

    /// Generic string error messages
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Returns true when the error signals a missing resource, either from the
    /// adapter or straight from the API server.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

/// Generic result type for change handling
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod apply;
pub mod calculator;
pub mod change;
pub mod client;
pub mod mapper;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use crate::apply::{
    ApplyError, ApplyMetrics, ApplyOptions, ChangeFailure, OperationMetrics, apply_changes,
};
pub use crate::calculator::{create_merge_patch_change, merge_patch_diff};
pub use crate::change::{
    CreateChange, DeleteChange, NamespacedName, Operation, PatchChange, PatchType,
    ResourceChange, ResourceReference,
};
pub use crate::client::{KubeResourceClient, ResourceClient, client_from};
pub use crate::mapper::{RestMapper, StaticMapper, gvk_of};
