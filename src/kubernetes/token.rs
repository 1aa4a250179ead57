// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service account token cache backed by the TokenRequest API.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use k8s_openapi::api::authentication::v1::{
    TokenRequest, TokenRequestSpec, TokenReview, TokenReviewSpec,
};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::{api::PostParams, Api, Client};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::constants::satoken::{GC_PERIOD, MAX_JITTER, MAX_TTL};
use crate::error::{Result, TemplatedSecretError};

/// The TokenRequest and TokenReview calls, behind a seam so tests can fake
/// the API server.
#[async_trait]
pub trait TokenApi: Send + Sync {
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest>;

    async fn review_token(&self, review: &TokenReview) -> Result<TokenReview>;
}

/// TokenApi implementation against a live cluster.
pub struct KubeTokenApi {
    client: Client,
}

impl KubeTokenApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenApi for KubeTokenApi {
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest> {
        let service_accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        service_accounts
            .create_token_request(name, &PostParams::default(), request)
            .await
            .map_err(Into::into)
    }

    async fn review_token(&self, review: &TokenReview) -> Result<TokenReview> {
        let reviews: Api<TokenReview> = Api::all(self.client.clone());
        reviews
            .create(&PostParams::default(), review)
            .await
            .map_err(Into::into)
    }
}

/// Caches service account tokens keyed by `(name, namespace)` and refreshes
/// them before they expire.
pub struct TokenManager {
    api: Box<dyn TokenApi>,
    cache: RwLock<HashMap<String, TokenRequest>>,
}

impl TokenManager {
    pub fn new(api: Box<dyn TokenApi>) -> Self {
        Self {
            api,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Periodically evict expired entries. Runs for the process lifetime.
    pub fn spawn_gc(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(GC_PERIOD).await;
                manager.cleanup();
            }
        });
    }

    /// Get a bearer token for the service account, from cache when still
    /// fresh. A failed refresh falls back to the cached token while it has
    /// not expired.
    pub async fn get_service_account_token(&self, namespace: &str, name: &str) -> Result<String> {
        let key = format!("{name}/{namespace}");

        let cached = self.get(&key);
        if let Some(current) = &cached {
            if !self.requires_refresh(current).await {
                return token_of(current);
            }
        }

        let request = TokenRequest {
            spec: TokenRequestSpec {
                expiration_seconds: Some(MAX_TTL.as_secs() as i64),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.api.create_token(namespace, name, &request).await {
            Ok(fresh) => {
                let token = token_of(&fresh)?;
                self.set(&key, fresh);
                Ok(token)
            }
            Err(err) => match cached {
                None => Err(TemplatedSecretError::FetchToken(err.to_string())),
                Some(current) if expired(&current) => Err(TemplatedSecretError::TokenExpired {
                    key,
                    reason: err.to_string(),
                }),
                Some(current) => {
                    error!(cache_key = %key, error = %err, "Failed to refresh token, using cached");
                    token_of(&current)
                }
            },
        }
    }

    fn cleanup(&self) {
        let mut cache = self.cache.write().expect("token cache lock poisoned");
        let before = cache.len();
        cache.retain(|_, tr| !expired(tr));
        let evicted = before - cache.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired service account tokens");
        }
    }

    fn get(&self, key: &str) -> Option<TokenRequest> {
        self.cache
            .read()
            .expect("token cache lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, tr: TokenRequest) {
        self.cache
            .write()
            .expect("token cache lock poisoned")
            .insert(key.to_string(), tr);
    }

    /// A token needs a refresh when the API server no longer authenticates
    /// it, or when it is past half of its TTL (minus jitter, to avoid a
    /// thundering herd of refreshes).
    async fn requires_refresh(&self, tr: &TokenRequest) -> bool {
        let Ok(token) = token_of(tr) else {
            return true;
        };

        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token),
                ..Default::default()
            },
            ..Default::default()
        };
        let authenticated = match self.api.review_token(&review).await {
            Ok(result) => result
                .status
                .and_then(|s| s.authenticated)
                .unwrap_or(false),
            Err(_) => false,
        };
        if !authenticated {
            return true;
        }

        let Some(status) = &tr.status else {
            return true;
        };
        let Some(expiration_seconds) = tr.spec.expiration_seconds else {
            info!("Expiration seconds was not set for token request");
            return false;
        };

        let now = Utc::now();
        let expiration = status.expiration_timestamp.0;
        let issued_at = expiration - ChronoDuration::seconds(expiration_seconds);

        let jitter_secs = rand::thread_rng().gen_range(0.0..MAX_JITTER.as_secs_f64());
        let jitter = ChronoDuration::milliseconds((jitter_secs * 1000.0) as i64);

        if now > issued_at + ChronoDuration::from_std(MAX_TTL).unwrap_or_default() - jitter {
            return true;
        }

        now > expiration - ChronoDuration::seconds(expiration_seconds / 2) - jitter
    }
}

fn token_of(tr: &TokenRequest) -> Result<String> {
    tr.status
        .as_ref()
        .map(|s| s.token.clone())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TemplatedSecretError::FetchToken("token request has no status".to_string()))
}

fn expired(tr: &TokenRequest) -> bool {
    match &tr.status {
        Some(status) => Utc::now() > status.expiration_timestamp.0,
        None => true,
    }
}
