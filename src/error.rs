/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/error.rs
*
* Error types for every layer of the synchronisation engine. Each layer owns
* one `thiserror` enum and converts the errors of the layer below through
* `#[from]`, so the reconciler can tell an expected "record absent" apart from
* a real datastore failure without ever inspecting message strings.
*
* SPDX-License-Identifier: Apache-2.0
*/

use thiserror::Error;

/// Errors returned by a `DataStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    RecordExist,

    #[error("record does not exist")]
    RecordNotExist,

    #[error("entity primary key is empty")]
    PrimaryKeyEmpty,

    #[error("invalid index: {0}")]
    IndexInvalid(String),

    #[error("failed to encode or decode record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::RecordNotExist)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::RecordExist)
    }
}

/// Errors returned by a `ClusterClient`.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to decode {kind} payload: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while converting an Application CR into datastore entities.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid properties on {entity} '{name}': {reason}")]
    InvalidProperties {
        entity: &'static str,
        name: String,
        reason: String,
    },

    #[error("failed to resolve cluster reference: {0}")]
    Cluster(#[from] ClusterError),

    #[error("failed to resolve application key: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced by the reconciler entry points.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("failed to store {stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    pub(crate) fn store(stage: &'static str) -> impl FnOnce(StoreError) -> SyncError {
        move |source| SyncError::Store { stage, source }
    }
}

/// Invalid operator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}, expected one of: {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
