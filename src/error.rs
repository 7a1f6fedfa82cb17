// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReflectorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Tag store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Failed to serialize status: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Status update for {0} kept conflicting")]
    StatusConflict(String),

    #[error("Resource is missing {0}")]
    MissingObjectKey(&'static str),
}

impl ReflectorError {
    /// Errors that leave the process unable to uphold its durability guarantee.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReflectorError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, ReflectorError>;
