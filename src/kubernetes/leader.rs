// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Leader election backed by coordination.k8s.io/v1 Leases.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::constants::CONTROLLER_NAME;
use crate::error::Result;

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Lease-based leader elector. Only the holder of the lease runs the
/// controllers; everyone else blocks in `acquire`.
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

/// Held while this process is the leader. `lost` resolves when a renewal
/// fails, at which point the process must stop reconciling.
pub struct LeaderGuard {
    lost_rx: oneshot::Receiver<()>,
}

impl LeaderGuard {
    pub async fn lost(self) {
        let _ = self.lost_rx.await;
    }
}

impl LeaderElector {
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until leadership is acquired, then keep renewing it from a
    /// background task.
    pub async fn acquire(self) -> Result<LeaderGuard> {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_lease().await {
                Ok(true) => break,
                Ok(false) => debug!(identity = %self.identity, "Lease held by another, waiting..."),
                Err(e) => warn!(identity = %self.identity, error = %e, "Failed to acquire lease"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        info!(identity = %self.identity, "Leadership acquired");

        let (lost_tx, lost_rx) = oneshot::channel();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RENEW_INTERVAL).await;
                match self.try_acquire_lease().await {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        warn!(identity = %self.identity, "Leadership lost");
                        let _ = lost_tx.send(());
                        return;
                    }
                }
            }
        });

        Ok(LeaderGuard { lost_rx })
    }

    /// Acquire, renew or take over the lease. Returns whether we hold it.
    async fn try_acquire_lease(&self) -> Result<bool> {
        let leases: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        match leases.get_opt(&self.lease_name).await? {
            None => self.create_lease(&leases, now).await,
            Some(lease) => {
                let holder = lease
                    .spec
                    .as_ref()
                    .and_then(|s| s.holder_identity.as_deref());

                if holder == Some(self.identity.as_str()) {
                    return self.renew_lease(&leases, now).await;
                }

                if lease_expired(&lease, now) {
                    let transitions = lease
                        .spec
                        .as_ref()
                        .and_then(|s| s.lease_transitions)
                        .unwrap_or(0);
                    self.take_over_lease(&leases, now, transitions).await
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn create_lease(&self, leases: &Api<Lease>, now: DateTime<Utc>) -> Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };

        match leases.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn renew_lease(&self, leases: &Api<Lease>, now: DateTime<Utc>) -> Result<bool> {
        let patch = serde_json::json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {"name": self.lease_name, "namespace": self.namespace},
            "spec": {"renewTime": MicroTime(now)}
        });

        leases
            .patch(
                &self.lease_name,
                &PatchParams::apply(CONTROLLER_NAME).force(),
                &Patch::Apply(&patch),
            )
            .await?;
        Ok(true)
    }

    async fn take_over_lease(
        &self,
        leases: &Api<Lease>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool> {
        let patch = serde_json::json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {"name": self.lease_name, "namespace": self.namespace},
            "spec": {
                "holderIdentity": self.identity,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION.as_secs() as i32,
                "leaseTransitions": transitions + 1,
            }
        });

        match leases
            .patch(
                &self.lease_name,
                &PatchParams::apply(CONTROLLER_NAME).force(),
                &Patch::Apply(&patch),
            )
            .await
        {
            Ok(_) => {
                info!(identity = %self.identity, "Took over expired lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// A lease with no renew time or duration counts as expired so a fresh
/// leader can claim it.
fn lease_expired(lease: &Lease, now: DateTime<Utc>) -> bool {
    let spec = lease.spec.as_ref();
    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);

    match (renew_time, duration) {
        (Some(renew), Some(duration)) => now > renew.0 + chrono::Duration::seconds(duration as i64),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lease(renewed_secs_ago: i64, duration_secs: i32) -> Lease {
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: Some("other".to_string()),
                lease_duration_seconds: Some(duration_secs),
                renew_time: Some(MicroTime(
                    Utc::now() - chrono::Duration::seconds(renewed_secs_ago),
                )),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_recently_renewed_lease_is_not_expired() {
        assert!(!lease_expired(&make_lease(5, 15), Utc::now()));
    }

    #[test]
    fn test_stale_lease_is_expired() {
        assert!(lease_expired(&make_lease(60, 15), Utc::now()));
    }

    #[test]
    fn test_lease_without_spec_is_expired() {
        let lease = Lease {
            metadata: ObjectMeta::default(),
            spec: None,
        };
        assert!(lease_expired(&lease, Utc::now()));
    }
}
