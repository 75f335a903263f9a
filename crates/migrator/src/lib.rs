// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Declarative cluster-state migrations

use std::fmt;

/// Generic Error for the migration lifecycle
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Kubernetes internal error
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    /// `serde` errors
    #[error("Serialization Error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Errors from describing or addressing resource changes
    #[error("Change Error: {0}")]
    ChangeError(#[from] migrator_changes::Error),

    /// A migration failed to calculate its changes
    #[error("calculating changes for migration {name:?}: {source}")]
    Changes {
        /// Name of the migration
        name: String,
        /// Why the calculation failed
        #[source]
        source: Box<Error>,
    },

    /// Some changes of a migration could not be applied
    #[error("Apply Error: {0}")]
    Apply(#[from] migrator_changes::ApplyError),

    /// The requested migration is not registered
    #[error(transparent)]
    UnknownMigration(#[from] UnknownMigrationError),

    /// Two migrations were registered under the same name
    #[error("migration {0:?} is already registered")]
    DuplicateMigration(String),

    /// Reading or writing the status of a migration failed
    #[error("status of migration {name:?}: {source}")]
    Status {
        /// Name of the migration
        name: String,
        /// Why the status store failed
        #[source]
        source: Box<Error>,
    },

    /// Invalid process configuration
    #[error("Config Error: {0}")]
    Config(String),

    /// Several independent failures
    #[error("{0}")]
    Joined(Errors),

    /// Generic string error messages
    #[error("{0}")]
    Message(String),

    /// Represents any error
    #[error("Anyhow Error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl Error {
    /// Every cause carried by this error, flattening [`Error::Joined`]
    #[must_use]
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Error::Joined(errors) => errors.iter().flat_map(Error::causes).collect(),
            other => vec![other],
        }
    }
}

/// Returned for requests to operate on a migration that is not registered
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown migration {name:?}")]
pub struct UnknownMigrationError {
    /// The requested name
    pub name: String,
}

/// A collection of errors that were gathered instead of returned one by one
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// Creates an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error, unpacking nested collections
    pub fn push(&mut self, err: impl Into<Error>) {
        match err.into() {
            Error::Joined(errors) => self.0.extend(errors.0),
            other => self.0.push(other),
        }
    }

    /// Adds the error of `result`, if any
    pub fn check<T, E: Into<Error>>(&mut self, result: std::result::Result<T, E>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Iterates over the gathered errors
    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// Number of gathered errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing failed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok` when nothing failed, the single error if there is one, a
    /// [`Error::Joined`] otherwise
    ///
    /// # Errors
    ///
    /// Returns every gathered error.
    pub fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Joined(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Generic result type for migrations
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod apply;
pub mod config;
mod diagnostics;
pub mod example;
pub mod lease;
pub mod migration;
pub mod registry;
pub mod runner;
pub mod server;
pub mod status;
pub mod telemetry;

pub use crate::apply::{Engine, Report};
pub use crate::diagnostics::*;
pub use crate::migration::{Migration, MigrationChanges, MigrationOptions, name_for};
pub use crate::registry::Registry;
pub use crate::runner::{State, run};
pub use crate::status::{
    ConfigMapStatusClient, MemoryStatusClient, MigrationInfo, MigrationStatus, StatusClient,
    StatusGetter,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_errors_flatten_and_display_each_cause() {
        let mut inner = Errors::new();
        inner.push(Error::Message("first".into()));
        inner.push(Error::Message("second".into()));

        let mut outer = Errors::new();
        outer.push(Error::Joined(inner));
        outer.push(UnknownMigrationError { name: "x".into() });
        assert_eq!(outer.len(), 3);

        let err = outer.into_result().unwrap_err();
        assert_eq!(err.to_string(), "first\nsecond\nunknown migration \"x\"");
        assert_eq!(err.causes().len(), 3);
        assert!(
            err.causes()
                .iter()
                .any(|e| matches!(e, Error::UnknownMigration(u) if u.name == "x"))
        );
    }

    #[test]
    fn single_error_is_not_wrapped() {
        let mut errors = Errors::new();
        assert!(errors.check::<(), Error>(Ok(())).is_some());
        errors.push(Error::Message("only".into()));

        assert!(matches!(errors.into_result(), Err(Error::Message(m)) if m == "only"));
        assert!(Errors::new().into_result().is_ok());
    }
}
