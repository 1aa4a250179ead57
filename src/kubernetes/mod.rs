// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, scoped clients, tokens and leases.

pub mod client;
pub mod crd;
pub mod leader;
pub mod token;

pub use client::{ClientLoader, ServiceAccountLoader};
pub use crd::wait_for_secret_template_crd;
pub use leader::{LeaderElector, LeaderGuard};
pub use token::{KubeTokenApi, TokenManager};
