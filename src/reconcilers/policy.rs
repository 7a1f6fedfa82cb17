// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ImagePolicy reconciler - selects the latest tag from the stored scan results.

use crate::config::Config;
use crate::constants::conditions::{
    DEPENDENCY_NOT_READY, FALSE, INVALID_POLICY, NO_MATCHING_TAG, SUCCEEDED, TRUE,
};
use crate::error::{ReflectorError, Result};
use crate::policy::{PolicyEngine, PolicyError};
use crate::reconcilers::status::update_status;
use crate::store::{TagEntry, TagStore};
use crate::types::condition::set_ready_condition;
use crate::types::{ImagePolicy, ImageRepository};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    runtime::{controller, controller::Action, reflector::ObjectRef, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct PolicyReconciler {
    client: Client,
    store: TagStore,
    config: Config,
}

impl PolicyReconciler {
    pub fn new(client: Client, store: TagStore, config: Config) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Run the controller until shutdown. Policies are re-evaluated whenever the
    /// repository they reference changes.
    pub async fn run(self) -> anyhow::Result<()> {
        let (policies, repositories): (Api<ImagePolicy>, Api<ImageRepository>) =
            match &self.config.watch_namespace {
                Some(namespace) => (
                    Api::namespaced(self.client.clone(), namespace),
                    Api::namespaced(self.client.clone(), namespace),
                ),
                None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
            };
        let context = Arc::new(self);

        let controller = Controller::new(policies, WatcherConfig::default());
        let cache = controller.store();
        let controller = controller
            .watches(repositories, WatcherConfig::default(), move |repo: ImageRepository| {
                let name = repo.name_any();
                let namespace = repo.namespace().unwrap_or_default();
                cache
                    .state()
                    .into_iter()
                    .filter(|policy| policy.refers_to(&name, &namespace))
                    .map(|policy| ObjectRef::from_obj(&*policy))
                    .collect::<Vec<_>>()
            })
            .shutdown_on_signal();

        let mut results = std::pin::pin!(controller.run(reconcile, error_policy, context));

        while let Some(res) = results.next().await {
            match res {
                Ok(o) => debug!("Reconciled image policy: {:?}", o),
                Err(controller::Error::ReconcilerFailed(err, obj)) if err.is_fatal() => {
                    error!("Fatal error while reconciling {}: {}", obj, err);
                    return Err(err.into());
                }
                Err(e) => warn!("Reconciliation error: {:?}", e),
            }
        }

        info!("Image policy controller stopped");
        Ok(())
    }

    async fn stored_entry(&self, canonical_name: &str) -> Result<Option<TagEntry>> {
        let store = self.store.clone();
        let key = canonical_name.to_string();
        Ok(tokio::task::spawn_blocking(move || store.get(&key)).await??)
    }

    async fn report_failure(
        &self,
        api: &Api<ImagePolicy>,
        policy: &ImagePolicy,
        reason: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        update_status(api, policy, |status| {
            set_ready_condition(&mut status.conditions, FALSE, reason, message.clone(), now);
        })
        .await?;
        Ok(())
    }
}

async fn reconcile(policy: Arc<ImagePolicy>, ctx: Arc<PolicyReconciler>) -> Result<Action> {
    let name = policy.name_any();
    let namespace = policy
        .namespace()
        .ok_or(ReflectorError::MissingObjectKey(".metadata.namespace"))?;

    debug!("Reconciling image policy: {}/{}", namespace, name);

    let api: Api<ImagePolicy> = Api::namespaced(ctx.client.clone(), &namespace);
    let now = Utc::now();

    let engine = match PolicyEngine::from_spec(&policy.spec) {
        Ok(engine) => engine,
        Err(e) => {
            warn!("Image policy {}/{}: {}", namespace, name, e);
            ctx.report_failure(&api, &policy, INVALID_POLICY, e.to_string(), now)
                .await?;
            return Ok(Action::await_change());
        }
    };

    let repo_namespace = policy.repository_namespace();
    let repo_name = &policy.spec.image_repository_ref.name;
    let repositories: Api<ImageRepository> = Api::namespaced(ctx.client.clone(), &repo_namespace);
    let waiting = ctx.config.dependency_requeue_interval;

    let Some(repo) = repositories.get_opt(repo_name).await? else {
        let message = format!(
            "referenced ImageRepository {}/{} does not exist",
            repo_namespace, repo_name
        );
        debug!("Image policy {}/{}: {}", namespace, name, message);
        ctx.report_failure(&api, &policy, DEPENDENCY_NOT_READY, message, now)
            .await?;
        return Ok(Action::requeue(waiting));
    };

    let canonical_name = repo.canonical_image_name();
    let entry = if canonical_name.is_empty() {
        None
    } else {
        ctx.stored_entry(canonical_name).await?
    };
    let Some(entry) = entry else {
        let message = format!(
            "waiting for ImageRepository {}/{} to be scanned",
            repo_namespace, repo_name
        );
        debug!("Image policy {}/{}: {}", namespace, name, message);
        ctx.report_failure(&api, &policy, DEPENDENCY_NOT_READY, message, now)
            .await?;
        return Ok(Action::requeue(waiting));
    };

    // Evaluation follows the repository's scan schedule
    let requeue = repo.interval().unwrap_or(waiting);

    let tag = match engine.select(&entry.tags) {
        Ok(tag) => tag,
        Err(PolicyError::NoMatch) => {
            let message = format!(
                "no tag of '{}' matches the policy ({} tags scanned)",
                canonical_name,
                entry.tags.len()
            );
            info!("Image policy {}/{}: {}", namespace, name, message);
            ctx.report_failure(&api, &policy, NO_MATCHING_TAG, message, now)
                .await?;
            return Ok(Action::requeue(requeue));
        }
        Err(e) => {
            ctx.report_failure(&api, &policy, INVALID_POLICY, e.to_string(), now)
                .await?;
            return Ok(Action::await_change());
        }
    };

    let latest_image = format!("{}:{}", canonical_name, tag);
    if policy.latest_image() != Some(latest_image.as_str()) {
        info!(
            "Image policy {}/{} selected {} (was {})",
            namespace,
            name,
            latest_image,
            policy.latest_image().unwrap_or("<none>")
        );
    }

    let generation = policy.metadata.generation;
    let message = format!("Latest image tag for '{}' resolved to {}", canonical_name, tag);
    update_status(&api, &policy, |status| {
        if status.latest_image.as_deref() != Some(latest_image.as_str()) {
            status.observed_previous_image = status.latest_image.take();
            status.latest_image = Some(latest_image.clone());
        }
        status.observed_generation = generation;
        set_ready_condition(&mut status.conditions, TRUE, SUCCEEDED, message.clone(), now);
    })
    .await?;

    Ok(Action::requeue(requeue))
}

fn error_policy(
    policy: Arc<ImagePolicy>,
    error: &ReflectorError,
    _ctx: Arc<PolicyReconciler>,
) -> Action {
    error!(
        "Reconciliation error for image policy {}: {}",
        policy.name_any(),
        error
    );
    Action::requeue(Duration::from_secs(60))
}
