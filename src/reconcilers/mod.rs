// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod generate_inputs;
pub mod secret_template;
pub mod status;

pub use secret_template::{ReconcileSettings, SecretTemplateReconciler};
pub use status::ReconcileStatus;
