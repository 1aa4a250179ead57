// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! SecretTemplate reconciler - renders owned Secrets from input resources.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, ApiResource, DynamicObject, ObjectMeta, PostParams};
use kube::core::GroupVersion;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{controller, controller::Action, watcher, Controller};
use kube::{Client, ResourceExt};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{requeue, API_VERSION};
use crate::error::{Result, TemplatedSecretError};
use crate::expand::{evaluate_template, Expression, SecretShape};
use crate::kubernetes::ClientLoader;
use crate::reconcilers::generate_inputs::GenerateInputs;
use crate::reconcilers::status::ReconcileStatus;
use crate::tracker::{ResourceKey, Tracker};
use crate::types::{InputResourceRef, SecretTemplate, SecretTemplateStatus};

/// Knobs taken from the command line.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Requeue period when relying on polling instead of watches.
    pub reconciliation_interval: Duration,
    /// Secrets older than this are cleared and regenerated. Zero disables.
    pub max_secret_age: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            reconciliation_interval: Duration::from_secs(60 * 60),
            max_secret_age: Duration::from_secs(720 * 60 * 60),
        }
    }
}

pub struct SecretTemplateReconciler {
    client: Client,
    loader: Arc<dyn ClientLoader>,
    tracker: Arc<Tracker>,
    settings: ReconcileSettings,
    /// Consecutive failure counts per template, for requeue backoff.
    failures: Mutex<HashMap<ResourceKey, u32>>,
}

impl SecretTemplateReconciler {
    pub fn new(
        client: Client,
        loader: Arc<dyn ClientLoader>,
        tracker: Arc<Tracker>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            client,
            loader,
            tracker,
            settings,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Run the controller until the watch streams end. Three watches feed the
    /// queue: SecretTemplates themselves, Secrets owned by a SecretTemplate,
    /// and arbitrary Secrets mapped through the tracker's reverse index.
    pub async fn run(self: Arc<Self>, namespace: Option<String>) -> anyhow::Result<()> {
        let (templates, secrets) = match namespace.as_deref() {
            Some(ns) => (
                Api::<SecretTemplate>::namespaced(self.client.clone(), ns),
                Api::<Secret>::namespaced(self.client.clone(), ns),
            ),
            None => (
                Api::<SecretTemplate>::all(self.client.clone()),
                Api::<Secret>::all(self.client.clone()),
            ),
        };

        self.spawn_delete_watch(templates.clone());

        let tracker = Arc::clone(&self.tracker);
        Controller::new(templates, watcher::Config::default())
            // Per-item work is light and cache reads dominate, so a single
            // worker keeps reconciles serialized.
            .with_config(controller::Config::default().concurrency(1))
            .owns(secrets.clone(), watcher::Config::default())
            .watches(secrets, watcher::Config::default(), move |secret: Secret| {
                let key = ResourceKey::new(
                    &secret.namespace().unwrap_or_default(),
                    &secret.name_any(),
                );
                tracker
                    .get_tracking(&key)
                    .into_iter()
                    .map(|tpl| ObjectRef::new(&tpl.name).within(&tpl.namespace))
                    .collect::<Vec<_>>()
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, self)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled SecretTemplate: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// The runtime does not run the reconciler for objects already gone from
    /// its store, so deletions prune tracker edges from a side watch.
    fn spawn_delete_watch(&self, templates: Api<SecretTemplate>) {
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(async move {
            let stream = watcher(templates, watcher::Config::default());
            pin_mut!(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::Delete(template)) => {
                        let key = ResourceKey::new(
                            &template.namespace().unwrap_or_default(),
                            &template.name_any(),
                        );
                        debug!("SecretTemplate {} deleted, dropping tracker edges", key);
                        tracker.untrack_all(&key);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("SecretTemplate delete watch error: {}", e),
                }
            }
        });
    }

    /// The body of one reconcile pass, between the Reconciling and completed
    /// status transitions.
    async fn reconcile_template(
        &self,
        template: &SecretTemplate,
        key: &ResourceKey,
        status: &mut ReconcileStatus,
    ) -> Result<Action> {
        let inputs = self.resolve_input_resources(template, key).await?;

        let shape = evaluate_template(template.spec.template.as_ref(), &inputs)?;

        self.apply_owned_secret(template, &shape, &inputs).await?;

        status.set_secret_name(&template.name_any());

        // Inputs read through a service account have no watch feeding the
        // queue, and age-based regeneration needs the clock to advance, so
        // both rely on periodic requeue.
        if template.service_account().is_some() || !self.settings.max_secret_age.is_zero() {
            return Ok(Action::requeue(self.settings.reconciliation_interval));
        }
        Ok(Action::await_change())
    }

    /// Resolve all inputs in declared order. The tracker edge set is replaced
    /// with whatever was observed, on success and on failure alike.
    async fn resolve_input_resources(
        &self,
        template: &SecretTemplate,
        key: &ResourceKey,
    ) -> Result<Value> {
        let client = self
            .client_for_template(template)
            .await
            .map_err(|e| TemplatedSecretError::ClientLoad(e.to_string()))?;

        let mut resolved_keys: Vec<ResourceKey> = Vec::new();
        let result = self
            .resolve_each(template, &client, &mut resolved_keys)
            .await;

        if template.should_track_inputs() {
            self.tracker.untrack_all(key);
            if !resolved_keys.is_empty() {
                self.tracker.track(key, &resolved_keys);
            }
        }

        result
    }

    async fn resolve_each(
        &self,
        template: &SecretTemplate,
        client: &Client,
        resolved_keys: &mut Vec<ResourceKey>,
    ) -> Result<Value> {
        let namespace = template
            .namespace()
            .ok_or(TemplatedSecretError::NamespaceRequired)?;
        let mut values = serde_json::Map::new();

        for input in &template.spec.input_resources {
            // Only Secrets may be read with the controller's own credentials.
            if template.service_account().is_none()
                && (input.reference.kind != "Secret" || input.reference.api_version != "v1")
            {
                return Err(TemplatedSecretError::NonSecretWithoutServiceAccount);
            }

            let resolved_name = Expression::new(&input.reference.name)
                .evaluate(&Value::Object(values.clone()))
                .map_err(|e| TemplatedSecretError::ResolveInputResource {
                    name: input.name.clone(),
                    reason: e.to_string(),
                })?;

            let api_resource = api_resource_for(&input.reference).map_err(|reason| {
                TemplatedSecretError::ResolveInputResource {
                    name: input.name.clone(),
                    reason,
                }
            })?;
            let api: Api<DynamicObject> =
                Api::namespaced_with(client.clone(), &namespace, &api_resource);

            // Track before fetching so a missing input still re-enqueues this
            // template once it appears.
            resolved_keys.push(ResourceKey::new(&namespace, &resolved_name));

            let object = api.get(&resolved_name).await.map_err(|e| {
                TemplatedSecretError::FetchInputResource {
                    name: resolved_name.clone(),
                    reason: api_error_message(&e),
                }
            })?;

            let mut content = serde_json::to_value(&object)?;
            if input.reference.kind == "Secret" && input.reference.api_version == "v1" {
                decode_secret_data(&mut content, &resolved_name)?;
            }

            values.insert(input.name.clone(), content);
        }

        Ok(Value::Object(values))
    }

    /// Client used to read input resources: the service account's when one is
    /// named, otherwise the controller's own.
    async fn client_for_template(&self, template: &SecretTemplate) -> Result<Client> {
        match template.service_account() {
            Some(sa_name) => {
                let namespace = template
                    .namespace()
                    .ok_or(TemplatedSecretError::NamespaceRequired)?;
                self.loader.scoped_client(sa_name, &namespace).await
            }
            None => Ok(self.client.clone()),
        }
    }

    /// Create or update the Secret owned by this template.
    async fn apply_owned_secret(
        &self,
        template: &SecretTemplate,
        shape: &SecretShape,
        inputs: &Value,
    ) -> Result<()> {
        let name = template.name_any();
        let namespace = template
            .namespace()
            .ok_or(TemplatedSecretError::NamespaceRequired)?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);

        let existing = secrets.get_opt(&name).await?;

        let force_regeneration = existing.as_ref().is_some_and(|s| self.past_max_age(s));
        if force_regeneration {
            info!(
                secret = %format!("{namespace}/{name}"),
                "Secret exceeded the maximum age, clearing data and regenerating"
            );
        }

        let snapshot = GenerateInputs::with_inputs(serde_json::json!({
            "spec": template.spec,
            "inputs": inputs,
        }));

        let mut desired = desired_secret(template, shape);
        snapshot.add(desired.metadata.annotations.get_or_insert_with(BTreeMap::new));

        let Some(current) = existing else {
            secrets.create(&PostParams::default(), &desired).await?;
            return Ok(());
        };

        let no_annotations = BTreeMap::new();
        let current_annotations = current.metadata.annotations.as_ref().unwrap_or(&no_annotations);
        if !force_regeneration && !snapshot.is_changed(current_annotations) {
            debug!(
                secret = %format!("{namespace}/{name}"),
                "Inputs unchanged, skipping secret update"
            );
            return Ok(());
        }

        // Secret type is immutable in Kubernetes. Keep the existing type and
        // log when the template asks for a different one.
        let evaluated_type = shape.type_.clone().unwrap_or_default();
        if let Some(existing_type) = current.type_.as_deref().filter(|t| !t.is_empty()) {
            if existing_type != evaluated_type {
                warn!(
                    secret = %format!("{namespace}/{name}"),
                    existing_type,
                    desired_type = %evaluated_type,
                    "Secret type changes are not supported without manual deletion"
                );
                desired.type_ = current.type_.clone();
            }
        }

        desired.metadata.resource_version = current.metadata.resource_version.clone();
        desired.metadata.uid = current.metadata.uid.clone();
        secrets.replace(&name, &PostParams::default(), &desired).await?;
        Ok(())
    }

    fn past_max_age(&self, secret: &Secret) -> bool {
        if self.settings.max_secret_age.is_zero() {
            return false;
        }
        let Some(created) = &secret.metadata.creation_timestamp else {
            return false;
        };
        let max_age = chrono::Duration::from_std(self.settings.max_secret_age)
            .unwrap_or(chrono::Duration::MAX);
        Utc::now() - created.0 > max_age
    }

    /// Write the status back through the status subresource. Conflicts are
    /// retried briefly and then abandoned; the next reconcile publishes fresh
    /// state.
    async fn update_status(
        &self,
        templates: &Api<SecretTemplate>,
        name: &str,
        status: SecretTemplateStatus,
    ) {
        let mut delay = Duration::from_millis(50);
        for _ in 0..3 {
            let mut latest = match templates.get_opt(name).await {
                Ok(Some(latest)) => latest,
                // Deleted after reconciliation started, nothing to record.
                Ok(None) => return,
                Err(e) => {
                    warn!("Fetching SecretTemplate {} for status update: {}", name, e);
                    return;
                }
            };
            latest.status = Some(status.clone());

            let body = match serde_json::to_vec(&latest) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Serializing SecretTemplate {} status: {}", name, e);
                    return;
                }
            };

            match templates
                .replace_status(name, &PostParams::default(), body)
                .await
            {
                Ok(_) => return,
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    warn!("Updating SecretTemplate {} status: {}", name, e);
                    return;
                }
            }
        }
        debug!(
            "Status update for SecretTemplate {} still conflicting, leaving to next reconcile",
            name
        );
    }

    /// Exponential per-template backoff for failed reconciles.
    fn next_failure_delay(&self, key: &ResourceKey) -> Duration {
        let mut failures = self.failures.lock().expect("failure map lock poisoned");
        let count = failures.entry(key.clone()).or_insert(0);
        let exponent = (*count).min(16);
        *count = count.saturating_add(1);

        requeue::BASE_DELAY
            .saturating_mul(1u32 << exponent)
            .min(requeue::MAX_DELAY)
    }

    fn forget_failures(&self, key: &ResourceKey) {
        self.failures
            .lock()
            .expect("failure map lock poisoned")
            .remove(key);
    }
}

/// Entry point for the controller runtime.
pub async fn reconcile(
    template: Arc<SecretTemplate>,
    ctx: Arc<SecretTemplateReconciler>,
) -> Result<Action> {
    let name = template.name_any();
    let namespace = template
        .namespace()
        .ok_or(TemplatedSecretError::NamespaceRequired)?;
    let key = ResourceKey::new(&namespace, &name);

    debug!("Reconciling SecretTemplate {}", key);

    // Fresh read, the cached object may lag behind the API.
    let templates: Api<SecretTemplate> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(template) = templates.get_opt(&name).await? else {
        debug!("SecretTemplate {} not found, dropping tracker edges", key);
        ctx.tracker.untrack_all(&key);
        ctx.forget_failures(&key);
        return Ok(Action::await_change());
    };

    if template.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let mut status = ReconcileStatus::new(template.status.clone().unwrap_or_default());
    status.set_reconciling(template.metadata.generation);

    let outcome = ctx.reconcile_template(&template, &key, &mut status).await;
    let result = status.complete(outcome);

    ctx.update_status(&templates, &name, status.into_inner()).await;

    if result.is_ok() {
        ctx.forget_failures(&key);
    }
    result
}

/// Failed reconciles requeue with per-template exponential backoff.
pub fn error_policy(
    template: Arc<SecretTemplate>,
    error: &TemplatedSecretError,
    ctx: Arc<SecretTemplateReconciler>,
) -> Action {
    let key = ResourceKey::new(
        &template.namespace().unwrap_or_default(),
        &template.name_any(),
    );
    let delay = ctx.next_failure_delay(&key);
    warn!(
        template = %key,
        error = %error,
        "Reconcile failed, requeueing in {:?}",
        delay
    );
    Action::requeue(delay)
}

fn desired_secret(template: &SecretTemplate, shape: &SecretShape) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(template.name_any()),
            namespace: template.namespace(),
            labels: (!shape.labels.is_empty()).then(|| shape.labels.clone()),
            annotations: (!shape.annotations.is_empty()).then(|| shape.annotations.clone()),
            owner_references: Some(vec![owner_reference(template)]),
            ..Default::default()
        },
        type_: shape.type_.clone().filter(|t| !t.is_empty()),
        data: (!shape.data.is_empty()).then(|| {
            shape
                .data
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect()
        }),
        string_data: (!shape.string_data.is_empty()).then(|| shape.string_data.clone()),
        immutable: None,
    }
}

fn owner_reference(template: &SecretTemplate) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: "SecretTemplate".to_string(),
        name: template.name_any(),
        uid: template.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Resource coordinates for a dynamic get of the referenced kind.
fn api_resource_for(
    reference: &InputResourceRef,
) -> std::result::Result<ApiResource, String> {
    let group_version =
        GroupVersion::from_str(&reference.api_version).map_err(|e| e.to_string())?;
    Ok(ApiResource::from_gvk(
        &group_version.with_kind(&reference.kind),
    ))
}

/// Base64-decode a fetched Secret's data into an additive decodedData
/// sibling. The original entries are left untouched.
fn decode_secret_data(content: &mut Value, name: &str) -> Result<()> {
    let Some(data) = content.get("data").and_then(Value::as_object) else {
        return Ok(());
    };

    let mut decoded = serde_json::Map::new();
    for (key, value) in data {
        if let Some(encoded) = value.as_str() {
            let bytes =
                BASE64
                    .decode(encoded)
                    .map_err(|e| TemplatedSecretError::InputDataDecode {
                        name: name.to_string(),
                        key: key.clone(),
                        source: e,
                    })?;
            decoded.insert(
                key.clone(),
                Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            );
        }
    }

    content["decodedData"] = Value::Object(decoded);
    Ok(())
}

/// The API server's own message for API errors, the raw error otherwise.
fn api_error_message(err: &kube::Error) -> String {
    match err {
        kube::Error::Api(response) => response.message.clone(),
        other => other.to_string(),
    }
}
