// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// SecretTemplate describes a set of input resources and a JSONPath template
/// used to render a Secret owned by this resource.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(
    group = "templatedsecret.starstreak.dev",
    version = "v1alpha1",
    kind = "SecretTemplate"
)]
#[kube(namespaced)]
#[kube(status = "SecretTemplateStatus")]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplateSpec {
    /// Input resources are resolved in declared order, so later entries may
    /// reference earlier ones in their dynamic name expressions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_resources: Vec<InputResource>,
    /// Service account used to read input resources. When absent, the
    /// controller's own credentials are used and only Secret inputs are
    /// permitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<JsonPathTemplate>,
}

/// A named reference to an object whose content feeds the template.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InputResource {
    /// Key under which the resolved content is exposed to expressions.
    /// Must be unique within a template.
    pub name: String,
    #[serde(rename = "ref")]
    pub reference: InputResourceRef,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InputResourceRef {
    pub api_version: String,
    pub kind: String,
    /// Object name. May itself be a JSONPath expression evaluated against
    /// previously resolved inputs.
    pub name: String,
}

/// Template for the Secret produced from the resolved inputs. Every string
/// value may embed one or more `$( <jsonpath> )` expressions.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JsonPathTemplate {
    #[serde(default, skip_serializing_if = "TemplateMetadata::is_empty")]
    pub metadata: TemplateMetadata,
    /// Secret type, itself evaluated as a JSONPath expression.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Values are base64-decoded after evaluation unless the expression reads
    /// an input Secret's already-decoded data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl TemplateMetadata {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Reference to the Secret this template produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretReference>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum ConditionType {
    Reconciling,
    ReconcileFailed,
    ReconcileSucceeded,
    Invalid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// "True", "False" or "Unknown", matching corev1.ConditionStatus.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

impl SecretTemplate {
    /// Service account name, treating an empty string the same as absent.
    pub fn service_account(&self) -> Option<&str> {
        self.spec
            .service_account_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Input resources are only tracked when no service account is specified,
    /// which implicitly limits tracking to Secret resources.
    pub fn should_track_inputs(&self) -> bool {
        self.service_account().is_none()
    }
}
