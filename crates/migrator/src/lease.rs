// Copyright 2026 Migrator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Leader election, using the k8s lease pattern.
//! <https://kubernetes.io/docs/concepts/architecture/leases/>
//!
//! Migrations are only applied by the current leader so that two replicas
//! never apply the same migration at once.

use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::{sync::watch, time::sleep};
use tracing::{error, info};

/// How long an acquired lease is valid without renewal
pub const LEASE_TTL: Duration = Duration::from_secs(15);

/// How often the lease is renewed or retried
pub const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Identity and location of the lease
#[derive(Clone, Debug)]
pub struct LeaseConfig {
    /// Namespace holding the lease
    pub namespace: String,
    /// Name of the lease object
    pub lease_name: String,
    /// Identity of this replica
    pub holder_id: String,
}

/// Keeps trying to acquire or renew the lease, publishing leadership changes
/// through `leader_tx`. Runs until the receiving side is dropped.
pub async fn run_leader_election(
    client: Client,
    config: LeaseConfig,
    leader_tx: watch::Sender<bool>,
) {
    let leadership = LeaseLock::new(
        client,
        &config.namespace,
        LeaseLockParams {
            holder_id: config.holder_id.clone(),
            lease_name: config.lease_name.clone(),
            lease_ttl: LEASE_TTL,
        },
    );

    loop {
        match leadership.try_acquire_or_renew().await {
            Ok(ll) => {
                let changed = leader_tx.send_if_modified(|leader| {
                    let changed = *leader != ll.acquired_lease;
                    *leader = ll.acquired_lease;
                    changed
                });
                if changed {
                    info!(
                        holder_id = %config.holder_id,
                        leader = ll.acquired_lease,
                        "leadership changed"
                    );
                }
            }
            Err(err) => {
                error!(error = err.to_string(), "failed to acquire lease lock");
                leader_tx.send_replace(false);
            }
        }

        if leader_tx.is_closed() {
            return;
        }

        sleep(RENEW_INTERVAL).await;
    }
}
