// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use std::time::{Duration, Instant};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{discovery::Discovery, Api, Client};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::constants::crd::{DISCOVERY_BUDGET_SECS, ESTABLISHED_BUDGET_SECS, POLL_INTERVAL_SECS};
use crate::constants::{CRD_NAME, GROUP};
use crate::error::{Result, TemplatedSecretError};

/// Wait until the SecretTemplate CRD is established and the API resource is
/// discoverable. Both checks poll once per second within their own budget;
/// exceeding a budget is a fatal setup error.
pub async fn wait_for_secret_template_crd(client: &Client) -> Result<()> {
    wait_for_established(client).await?;
    wait_for_discoverable(client).await
}

async fn wait_for_established(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let deadline = Instant::now() + Duration::from_secs(ESTABLISHED_BUDGET_SECS);

    loop {
        match crds.get_opt(CRD_NAME).await {
            Ok(Some(crd)) if is_established(&crd) => {
                info!("SecretTemplate CRD is established");
                return Ok(());
            }
            Ok(Some(_)) => info!("SecretTemplate CRD found but not yet established, retrying..."),
            Ok(None) => info!("SecretTemplate CRD not found, retrying..."),
            Err(e) => warn!("Error checking for SecretTemplate CRD: {}, retrying...", e),
        }

        if Instant::now() >= deadline {
            return Err(TemplatedSecretError::CrdWait(format!(
                "{CRD_NAME} not established within {ESTABLISHED_BUDGET_SECS}s"
            )));
        }
        sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
    }
}

/// The apiserver's discovery cache can lag behind the Established condition,
/// so also verify the resource shows up through discovery.
async fn wait_for_discoverable(client: &Client) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(DISCOVERY_BUDGET_SECS);

    loop {
        match check_discoverable(client).await {
            Ok(true) => {
                info!("SecretTemplate API resource is discoverable");
                return Ok(());
            }
            Ok(false) => info!("SecretTemplate not yet discoverable, retrying..."),
            Err(e) => warn!("Error running discovery: {}, retrying...", e),
        }

        if Instant::now() >= deadline {
            return Err(TemplatedSecretError::CrdWait(format!(
                "SecretTemplate not discoverable within {DISCOVERY_BUDGET_SECS}s"
            )));
        }
        sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
    }
}

async fn check_discoverable(client: &Client) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[GROUP])
        .run()
        .await?;

    for group in discovery.groups() {
        if group.name() == GROUP {
            for (ar, _) in group.recommended_resources() {
                if ar.kind == "SecretTemplate" && ar.version == "v1alpha1" {
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}

fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
    };

    fn make_crd(conditions: Vec<CustomResourceDefinitionCondition>) -> CustomResourceDefinition {
        CustomResourceDefinition {
            status: Some(CustomResourceDefinitionStatus {
                conditions: Some(conditions),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_established_condition_true() {
        let crd = make_crd(vec![CustomResourceDefinitionCondition {
            type_: "Established".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]);
        assert!(is_established(&crd));
    }

    #[test]
    fn test_established_condition_false() {
        let crd = make_crd(vec![CustomResourceDefinitionCondition {
            type_: "Established".to_string(),
            status: "False".to_string(),
            ..Default::default()
        }]);
        assert!(!is_established(&crd));
    }

    #[test]
    fn test_no_status_is_not_established() {
        assert!(!is_established(&CustomResourceDefinition::default()));
    }
}
