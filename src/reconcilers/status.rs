// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Optimistic status writes shared by both reconcilers.

use crate::constants::{status::MAX_UPDATE_ATTEMPTS, OPERATOR_NAME};
use crate::error::{ReflectorError, Result};
use crate::types::{ImagePolicy, ImagePolicyStatus, ImageRepository, ImageRepositoryStatus};
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// A custom resource with a status subresource
pub trait StatusObject:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    type Status: Clone + Default + Serialize;

    fn current_status(&self) -> Option<&Self::Status>;
}

impl StatusObject for ImageRepository {
    type Status = ImageRepositoryStatus;

    fn current_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

impl StatusObject for ImagePolicy {
    type Status = ImagePolicyStatus;

    fn current_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

/// Apply `mutate` to the status of `obj` and write it back.
///
/// The write is conditional on the resource version the status was derived from. When the
/// object changed in the meantime the latest version is read and `mutate` runs again.
pub async fn update_status<K, F>(api: &Api<K>, obj: &K, mut mutate: F) -> Result<K>
where
    K: StatusObject,
    F: FnMut(&mut K::Status),
{
    let name = obj.name_any();
    let params = PatchParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    };
    let mut current = obj.clone();

    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let mut status = current.current_status().cloned().unwrap_or_default();
        mutate(&mut status);

        let mut patch = json!({ "status": serde_json::to_value(&status)? });
        if let Some(version) = current.resource_version() {
            patch["metadata"] = json!({ "resourceVersion": version });
        }

        match api.patch_status(&name, &params, &Patch::Merge(&patch)).await {
            Ok(updated) => return Ok(updated),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!(
                    "Status of {} changed underneath us (attempt {}/{}), retrying",
                    name, attempt, MAX_UPDATE_ATTEMPTS
                );
                current = api.get_status(&name).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ReflectorError::StatusConflict(name))
}
