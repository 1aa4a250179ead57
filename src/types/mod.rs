// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types for the SecretTemplate API.

pub mod secret_template;

pub use secret_template::{
    Condition, ConditionType, InputResource, InputResourceRef, JsonPathTemplate, SecretReference,
    SecretTemplate, SecretTemplateSpec, SecretTemplateStatus, TemplateMetadata,
};
