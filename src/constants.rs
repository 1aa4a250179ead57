// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// API group of the SecretTemplate custom resource
pub const GROUP: &str = "templatedsecret.starstreak.dev";

/// Full apiVersion of the SecretTemplate custom resource
pub const API_VERSION: &str = "templatedsecret.starstreak.dev/v1alpha1";

/// Name of the CustomResourceDefinition backing SecretTemplate
pub const CRD_NAME: &str = "secrettemplates.templatedsecret.starstreak.dev";

/// The controller name used for server-side apply and logging
pub const CONTROLLER_NAME: &str = "templated-secret-controller";

/// Kubernetes annotation keys written by the controller
pub mod annotations {
    /// Serialized snapshot of the inputs a Secret was generated from.
    /// Compared on reconcile to short-circuit no-op updates.
    pub const GENERATE_INPUTS: &str = "templatedsecret.starstreak.dev/generate-inputs";
}

/// CRD readiness polling configuration
pub mod crd {
    /// Polling interval in seconds while waiting for the CRD
    pub const POLL_INTERVAL_SECS: u64 = 1;
    /// Budget in seconds for the Established condition check
    pub const ESTABLISHED_BUDGET_SECS: u64 = 60;
    /// Budget in seconds for the discovery check
    pub const DISCOVERY_BUDGET_SECS: u64 = 30;
}

/// Failed-reconcile requeue backoff
pub mod requeue {
    use std::time::Duration;

    /// First retry delay after a failed reconcile
    pub const BASE_DELAY: Duration = Duration::from_millis(100);
    /// Upper bound on the retry delay
    pub const MAX_DELAY: Duration = Duration::from_secs(120);
}

/// Service account token lifecycle
pub mod satoken {
    use std::time::Duration;

    /// Maximum TTL requested for service account tokens
    pub const MAX_TTL: Duration = Duration::from_secs(2 * 60 * 60);
    /// How often the cache sweeps out expired tokens
    pub const GC_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
    /// Upper bound of the uniform refresh jitter
    pub const MAX_JITTER: Duration = Duration::from_secs(10);
}
