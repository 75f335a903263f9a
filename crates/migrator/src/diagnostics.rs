// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use migrator_changes::ApplyMetrics;
use serde::Serialize;

use crate::Result;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// When migrations were last applied by this replica
    pub last_run: Option<DateTime<Utc>>,
    /// Whether this replica currently holds the lease
    pub leader: bool,
    /// Metrics of every migration applied by the last run
    pub metrics: BTreeMap<String, Option<ApplyMetrics>>,
    /// Failures of the last run, if any
    pub last_error: Option<String>,
}

impl Diagnostics {
    /// Records the outcome of applying one or more migrations
    pub fn record(&mut self, metrics: BTreeMap<String, Option<ApplyMetrics>>, result: &Result<()>) {
        self.last_run = Some(Utc::now());
        self.metrics.extend(metrics);
        self.last_error = result.as_ref().err().map(ToString::to_string);
    }
}
