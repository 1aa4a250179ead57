// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplatedSecretError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("JSONPathTemplate is nil")]
    NilTemplate,

    #[error("{0} is not found")]
    PathNotFound(String),

    #[error("invalid JSONPath expression {expression}: {reason}")]
    PathParse { expression: String, reason: String },

    #[error("JSONPath '{0}' didn't produce exactly one value")]
    PathNotSingular(String),

    #[error("templating {field}: {source}")]
    Templating {
        field: &'static str,
        #[source]
        source: Box<TemplatedSecretError>,
    },

    #[error("failed decoding base64 from a Secret: {0}")]
    DataDecode(base64::DecodeError),

    #[error("failed decoding base64 from Secret {name}, data field {key}: {source}")]
    InputDataDecode {
        name: String,
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("unable to load non-secrets without a specified serviceaccount")]
    NonSecretWithoutServiceAccount,

    #[error("unable to resolve input resource {name}: {reason}")]
    ResolveInputResource { name: String, reason: String },

    #[error("cannot fetch input resource {name}: {reason}")]
    FetchInputResource { name: String, reason: String },

    #[error("unable to load client for reading Input Resources: {0}")]
    ClientLoad(String),

    #[error("fetch token: {0}")]
    FetchToken(String),

    #[error("token {key} expired and refresh failed: {reason}")]
    TokenExpired { key: String, reason: String },

    #[error("SecretTemplate has no namespace")]
    NamespaceRequired,

    #[error("waiting for CRD: {0}")]
    CrdWait(String),

    #[error(transparent)]
    Terminal(Box<TemplatedSecretError>),
}

impl TemplatedSecretError {
    /// Wrap an error so it is recorded in status but never requeued.
    pub fn terminal(err: TemplatedSecretError) -> Self {
        TemplatedSecretError::Terminal(Box::new(err))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TemplatedSecretError::Terminal(_))
    }

    /// Wrap an error with the template field class it occurred under.
    pub fn templating(field: &'static str, source: TemplatedSecretError) -> Self {
        TemplatedSecretError::Templating {
            field,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, TemplatedSecretError>;
