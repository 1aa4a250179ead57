// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes clients scoped to a service account's credentials.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{config::AuthInfo, Client, Config};
use secrecy::SecretString;
use tracing::debug;

use crate::error::{Result, TemplatedSecretError};
use crate::kubernetes::token::TokenManager;

/// Produces clients whose requests are authenticated as a given service
/// account. The reconciler depends on this seam rather than on the token
/// machinery directly.
#[async_trait]
pub trait ClientLoader: Send + Sync {
    async fn scoped_client(&self, sa_name: &str, sa_namespace: &str) -> Result<Client>;
}

/// ClientLoader that swaps a cached service account bearer token into the
/// controller's own connection settings.
pub struct ServiceAccountLoader {
    token_manager: Arc<TokenManager>,
    base_config: Config,
}

impl ServiceAccountLoader {
    pub fn new(token_manager: Arc<TokenManager>, base_config: Config) -> Self {
        Self {
            token_manager,
            base_config,
        }
    }
}

#[async_trait]
impl ClientLoader for ServiceAccountLoader {
    async fn scoped_client(&self, sa_name: &str, sa_namespace: &str) -> Result<Client> {
        let token = self
            .token_manager
            .get_service_account_token(sa_namespace, sa_name)
            .await?;

        debug!(
            service_account = %format!("{sa_namespace}/{sa_name}"),
            "Building client for service account"
        );

        // Same API server and TLS settings as the controller, different identity.
        let mut config = self.base_config.clone();
        config.auth_info = AuthInfo {
            token: Some(SecretString::from(token)),
            ..AuthInfo::default()
        };

        Client::try_from(config).map_err(TemplatedSecretError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::token::KubeTokenApi;
    use crate::test_utils::{token_request_json, MockService};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_scoped_client_mints_token_for_service_account() {
        let expiration = Utc::now() + Duration::hours(2);
        let mock = MockService::new().on_post(
            "/api/v1/namespaces/team-a/serviceaccounts/reader/token",
            201,
            &token_request_json("sa-token", expiration),
        );

        let manager = Arc::new(TokenManager::new(Box::new(KubeTokenApi::new(
            mock.into_client(),
        ))));
        let loader = ServiceAccountLoader::new(
            manager,
            Config::new("https://kubernetes.default.svc".parse().unwrap()),
        );

        // The loader returns a usable client without touching the API beyond
        // the token request.
        loader.scoped_client("reader", "team-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_scoped_client_propagates_token_failure() {
        let mock = MockService::new();

        let manager = Arc::new(TokenManager::new(Box::new(KubeTokenApi::new(
            mock.into_client(),
        ))));
        let loader = ServiceAccountLoader::new(
            manager,
            Config::new("https://kubernetes.default.svc".parse().unwrap()),
        );

        let err = match loader.scoped_client("reader", "team-a").await {
            Ok(_) => panic!("expected scoped_client to fail"),
            Err(err) => err,
        };
        assert!(err.to_string().starts_with("fetch token"));
    }
}
