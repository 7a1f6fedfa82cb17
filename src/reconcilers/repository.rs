// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! ImageRepository reconciler - scans registries on an interval and records the tags.

use crate::config::Config;
use crate::constants::conditions::{
    AUTHENTICATION_FAILED, FALSE, IMAGE_URL_INVALID, INVALID_SPEC, READ_OPERATION_FAILED,
    SUCCEEDED, TRUE,
};
use crate::constants::scan::LATEST_TAGS_COUNT;
use crate::error::{ReflectorError, Result};
use crate::reconcilers::status::update_status;
use crate::registry::{credentials_from_secret, scan_image, ImageName, RegistryScanner, ScanError};
use crate::store::{TagEntry, TagStore};
use crate::types::condition::{find_ready_condition, set_ready_condition};
use crate::types::image_repository::{FailedScan, ImageRepository, ScanResult};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    runtime::{controller, controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct RepositoryReconciler {
    client: Client,
    store: TagStore,
    scanner: Arc<dyn RegistryScanner>,
    config: Config,
}

impl RepositoryReconciler {
    pub fn new(
        client: Client,
        store: TagStore,
        scanner: Arc<dyn RegistryScanner>,
        config: Config,
    ) -> Self {
        Self {
            client,
            store,
            scanner,
            config,
        }
    }

    /// Run the controller until shutdown. Tag store failures stop the loop with an error.
    pub async fn run(self) -> anyhow::Result<()> {
        let repositories: Api<ImageRepository> = match &self.config.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let context = Arc::new(self);

        let mut results = std::pin::pin!(Controller::new(repositories, WatcherConfig::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, context));

        while let Some(res) = results.next().await {
            match res {
                Ok(o) => debug!("Reconciled image repository: {:?}", o),
                Err(controller::Error::ReconcilerFailed(err, obj)) if err.is_fatal() => {
                    error!("Fatal error while reconciling {}: {}", obj, err);
                    return Err(err.into());
                }
                Err(e) => warn!("Reconciliation error: {:?}", e),
            }
        }

        info!("Image repository controller stopped");
        Ok(())
    }

    /// Backoff after a transient failure, always shorter than the scan interval
    fn retry_backoff(&self, interval: Duration) -> Duration {
        let ceiling = interval / 2;
        self.config
            .scan_retry_interval
            .min(ceiling)
            .max(MIN_RETRY_BACKOFF.min(ceiling))
    }

    async fn stored_entry(&self, canonical_name: &str) -> Result<Option<TagEntry>> {
        let store = self.store.clone();
        let key = canonical_name.to_string();
        Ok(tokio::task::spawn_blocking(move || store.get(&key)).await??)
    }

    async fn store_tags(
        &self,
        canonical_name: &str,
        tags: Vec<String>,
        scan_time: DateTime<Utc>,
    ) -> Result<()> {
        let store = self.store.clone();
        let key = canonical_name.to_string();
        tokio::task::spawn_blocking(move || store.put(&key, &tags, scan_time)).await??;
        Ok(())
    }

    /// Record a failed reconciliation on the Ready condition.
    ///
    /// Transient failures also carry the attempted scan, which holds back retries until the
    /// backoff has passed.
    async fn report_failure(
        &self,
        api: &Api<ImageRepository>,
        repo: &ImageRepository,
        reason: &str,
        message: String,
        attempt: Option<FailedScan>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        update_status(api, repo, |status| {
            if let Some(attempt) = &attempt {
                status.last_failed_scan = Some(attempt.clone());
            }
            set_ready_condition(&mut status.conditions, FALSE, reason, message.clone(), now);
        })
        .await?;
        Ok(())
    }
}

/// Validated scan parameters of a repository spec
struct ScanSettings {
    interval: Duration,
    timeout: Duration,
    exclusion_list: Vec<String>,
    exclusions: Vec<Regex>,
}

impl ScanSettings {
    fn from_repository(repo: &ImageRepository) -> std::result::Result<Self, String> {
        let interval = repo
            .interval()
            .map_err(|e| format!("invalid interval: {}", e))?;
        if interval.is_zero() {
            return Err("invalid interval: must be greater than zero".to_string());
        }
        let timeout = repo
            .timeout()
            .map_err(|e| format!("invalid timeout: {}", e))?;
        if timeout.is_zero() {
            return Err("invalid timeout: must be greater than zero".to_string());
        }

        let exclusion_list = repo.exclusion_list();
        let exclusions = exclusion_list
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| format!("invalid exclusion pattern '{}': {}", pattern, e))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            interval,
            timeout,
            exclusion_list,
            exclusions,
        })
    }

    fn retain(&self, tags: Vec<String>) -> Vec<String> {
        tags.into_iter()
            .filter(|tag| !self.exclusions.iter().any(|re| re.is_match(tag)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanReason {
    FirstScan,
    ImageChanged,
    ReconcileRequested,
    ExclusionListChanged,
    MissingFromStore,
    NotReady,
    IntervalElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanDecision {
    Scan(ScanReason),
    Wait(Duration),
}

/// Decide whether `repo` needs a scan at `now`, or how long until it does
pub(crate) fn scan_decision(
    repo: &ImageRepository,
    canonical_name: &str,
    exclusion_list: &[String],
    interval: Duration,
    backoff: Duration,
    stored: bool,
    now: DateTime<Utc>,
) -> ScanDecision {
    if let Some(remaining) = failure_backoff(repo, canonical_name, exclusion_list, backoff, now) {
        return ScanDecision::Wait(remaining);
    }

    let recorded = repo.canonical_image_name();
    if !recorded.is_empty() && recorded != canonical_name {
        return ScanDecision::Scan(ScanReason::ImageChanged);
    }

    if let Some(token) = repo.reconcile_request_token() {
        if repo.last_handled_reconcile_at() != Some(token) {
            return ScanDecision::Scan(ScanReason::ReconcileRequested);
        }
    }

    let observed = repo
        .status
        .as_ref()
        .and_then(|s| s.observed_exclusion_list.as_deref());
    if observed.is_some_and(|o| o != exclusion_list) {
        return ScanDecision::Scan(ScanReason::ExclusionListChanged);
    }

    let Some(last) = repo.last_scan_result() else {
        return ScanDecision::Scan(ScanReason::FirstScan);
    };
    if !stored {
        return ScanDecision::Scan(ScanReason::MissingFromStore);
    }
    if !repo.is_ready() {
        return ScanDecision::Scan(ScanReason::NotReady);
    }

    let elapsed = since(last.scan_time, now);
    if elapsed >= interval {
        ScanDecision::Scan(ScanReason::IntervalElapsed)
    } else {
        ScanDecision::Wait(interval - elapsed)
    }
}

// Time left before a transiently failed scan may be retried with the same inputs
fn failure_backoff(
    repo: &ImageRepository,
    canonical_name: &str,
    exclusion_list: &[String],
    backoff: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let condition = find_ready_condition(&repo.status.as_ref()?.conditions)?;
    let transient = matches!(
        condition.reason.as_deref(),
        Some(AUTHENTICATION_FAILED) | Some(READ_OPERATION_FAILED)
    );
    if condition.status != FALSE || !transient {
        return None;
    }

    let failed = repo.last_failed_scan()?;
    let same_inputs = failed.canonical_image_name == canonical_name
        && failed.reconcile_requested_at.as_deref() == repo.reconcile_request_token()
        && failed.exclusion_list == exclusion_list;
    if !same_inputs {
        return None;
    }
    let elapsed = since(failed.time, now);
    (elapsed < backoff).then(|| backoff - elapsed)
}

fn since(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or_default()
}

/// Scan times of a repository strictly increase
fn next_scan_time(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(previous) if now <= previous => previous + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

fn latest_tags(tags: &[String]) -> Vec<String> {
    let mut latest = tags.to_vec();
    latest.sort_unstable_by(|a, b| b.cmp(a));
    latest.truncate(LATEST_TAGS_COUNT);
    latest
}

fn failure_reason(error: &ScanError) -> &'static str {
    match error {
        ScanError::InvalidReference(_) => IMAGE_URL_INVALID,
        ScanError::Unauthorized(_) => AUTHENTICATION_FAILED,
        ScanError::Timeout(_) | ScanError::Registry(_) => READ_OPERATION_FAILED,
    }
}

async fn reconcile(repo: Arc<ImageRepository>, ctx: Arc<RepositoryReconciler>) -> Result<Action> {
    let name = repo.name_any();
    let namespace = repo
        .namespace()
        .ok_or(ReflectorError::MissingObjectKey(".metadata.namespace"))?;

    debug!("Reconciling image repository: {}/{}", namespace, name);

    if repo.is_suspended() {
        debug!("Image repository {}/{} is suspended, skipping", namespace, name);
        return Ok(Action::await_change());
    }

    let api: Api<ImageRepository> = Api::namespaced(ctx.client.clone(), &namespace);
    let now = Utc::now();

    let image = match ImageName::parse(&repo.spec.image) {
        Ok(image) => image,
        Err(e) => {
            warn!("Image repository {}/{}: {}", namespace, name, e);
            ctx.report_failure(&api, &repo, IMAGE_URL_INVALID, e.to_string(), None, now)
                .await?;
            return Ok(Action::await_change());
        }
    };

    let settings = match ScanSettings::from_repository(&repo) {
        Ok(settings) => settings,
        Err(message) => {
            warn!("Image repository {}/{}: {}", namespace, name, message);
            ctx.report_failure(&api, &repo, INVALID_SPEC, message, None, now)
                .await?;
            return Ok(Action::await_change());
        }
    };

    let canonical_name = image.canonical();
    let backoff = ctx.retry_backoff(settings.interval);
    let stored = ctx.stored_entry(&canonical_name).await?.is_some();

    match scan_decision(
        &repo,
        &canonical_name,
        &settings.exclusion_list,
        settings.interval,
        backoff,
        stored,
        now,
    ) {
        ScanDecision::Wait(remaining) => {
            debug!(
                "Next scan of {} due in {:?}, requeueing",
                canonical_name, remaining
            );
            return Ok(Action::requeue(remaining));
        }
        ScanDecision::Scan(reason) => {
            info!(
                "Scanning {} for {}/{} ({:?})",
                canonical_name, namespace, name, reason
            );
        }
    }

    let attempt = FailedScan {
        time: now,
        canonical_image_name: canonical_name.clone(),
        reconcile_requested_at: repo.reconcile_request_token().map(String::from),
        exclusion_list: settings.exclusion_list.clone(),
    };

    let credentials = match &repo.spec.secret_ref {
        Some(secret) => {
            match credentials_from_secret(&ctx.client, &namespace, &secret.name, image.registry())
                .await
            {
                Ok(credentials) => Some(credentials),
                Err(e) => {
                    warn!("Image repository {}/{}: {}", namespace, name, e);
                    ctx.report_failure(
                        &api,
                        &repo,
                        AUTHENTICATION_FAILED,
                        e.to_string(),
                        Some(attempt),
                        now,
                    )
                    .await?;
                    return Ok(Action::requeue(backoff));
                }
            }
        }
        None => None,
    };

    let outcome = match scan_image(
        ctx.scanner.as_ref(),
        &image,
        credentials.as_ref(),
        settings.timeout,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Scan of {} failed: {}", canonical_name, e);
            let attempt = e.is_transient().then_some(attempt);
            ctx.report_failure(&api, &repo, failure_reason(&e), e.to_string(), attempt, now)
                .await?;
            return Ok(if e.is_transient() {
                Action::requeue(backoff)
            } else {
                Action::await_change()
            });
        }
    };

    let tags = settings.retain(outcome.tags);
    let scan_time = next_scan_time(repo.last_scan_result().map(|r| r.scan_time), now);
    ctx.store_tags(&outcome.canonical_name, tags.clone(), scan_time)
        .await?;

    let token = repo.reconcile_request_token().map(String::from);
    let generation = repo.metadata.generation;
    let message = format!("successful scan: found {} tags", tags.len());
    update_status(&api, &repo, |status| {
        status.canonical_image_name = Some(outcome.canonical_name.clone());
        status.last_scan_result = Some(ScanResult {
            tag_count: tags.len(),
            scan_time,
            latest_tags: latest_tags(&tags),
        });
        if token.is_some() {
            status.last_handled_reconcile_at = token.clone();
        }
        status.observed_exclusion_list = Some(settings.exclusion_list.clone());
        status.observed_generation = generation;
        set_ready_condition(&mut status.conditions, TRUE, SUCCEEDED, message.clone(), now);
    })
    .await?;

    info!(
        "Scanned {}: {} tags stored for {}/{}",
        outcome.canonical_name,
        tags.len(),
        namespace,
        name
    );
    Ok(Action::requeue(settings.interval))
}

fn error_policy(
    repo: Arc<ImageRepository>,
    error: &ReflectorError,
    _ctx: Arc<RepositoryReconciler>,
) -> Action {
    error!(
        "Reconciliation error for image repository {}: {}",
        repo.name_any(),
        error
    );
    Action::requeue(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::annotations::RECONCILE_REQUESTED_AT;
    use crate::registry::scanner::tests::FakeScanner;
    use crate::test_utils::{requests_with_method, MockService, RecordedRequest};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const STATUS_PATH: &str =
        "/apis/image.reflector.io/v1beta1/namespaces/default/imagerepositories/podinfo/status";
    const SECRET_PATH: &str = "/api/v1/namespaces/default/secrets/ghcr-auth";
    const CANONICAL: &str = "ghcr.io/stefanprodan/podinfo";

    const PODINFO_TAGS: &[&str] = &[
        "6.0.0", "6.1.0", "6.2.0", "6.3.0", "6.4.0", "6.5.0", "latest", "sha256-abc.sig",
    ];

    struct Harness {
        ctx: Arc<RepositoryReconciler>,
        scanner: Arc<FakeScanner>,
        store: TagStore,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
        _dir: TempDir,
    }

    impl Harness {
        fn new(mock: MockService, scanner: FakeScanner) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = TagStore::open(&dir.path().join("tags.redb")).unwrap();
            let scanner = Arc::new(scanner);
            let requests = mock.recorder();
            let ctx = Arc::new(RepositoryReconciler::new(
                mock.into_client(),
                store.clone(),
                scanner.clone(),
                Config::default(),
            ));
            Self {
                ctx,
                scanner,
                store,
                requests,
                _dir: dir,
            }
        }

        fn patches(&self) -> Vec<RecordedRequest> {
            requests_with_method(&self.requests, "PATCH")
        }

        fn last_status(&self) -> Value {
            self.patches().last().unwrap().body["status"].clone()
        }
    }

    fn repository(spec: Value, status: Option<Value>, token: Option<&str>) -> ImageRepository {
        let mut object = json!({
            "apiVersion": "image.reflector.io/v1beta1",
            "kind": "ImageRepository",
            "metadata": {
                "name": "podinfo",
                "namespace": "default",
                "resourceVersion": "1",
                "generation": 1
            },
            "spec": spec
        });
        if let Some(status) = status {
            object["status"] = status;
        }
        if let Some(token) = token {
            object["metadata"]["annotations"] = json!({ RECONCILE_REQUESTED_AT: token });
        }
        serde_json::from_value(object).unwrap()
    }

    fn podinfo_spec() -> Value {
        json!({ "image": CANONICAL, "interval": "5m" })
    }

    fn scanned_status(scan_time: DateTime<Utc>, handled: Option<&str>) -> Value {
        let mut status = json!({
            "canonicalImageName": CANONICAL,
            "lastScanResult": { "tagCount": 2, "scanTime": scan_time },
            "observedExclusionList": ["^.*\\.sig$"],
            "conditions": [{
                "type": "Ready",
                "status": "True",
                "reason": "Succeeded",
                "message": "successful scan: found 2 tags",
                "lastTransitionTime": scan_time
            }]
        });
        if let Some(handled) = handled {
            status["lastHandledReconcileAt"] = json!(handled);
        }
        status
    }

    fn mock_for(repo: &ImageRepository) -> MockService {
        MockService::new().on_patch(STATUS_PATH, 200, &serde_json::to_string(repo).unwrap())
    }

    fn docker_config_secret(username: &str, password: &str) -> String {
        let config = json!({ "auths": { "ghcr.io": { "username": username, "password": password } } });
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("ghcr-auth".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                ".dockerconfigjson".to_string(),
                ByteString(serde_json::to_vec(&config).unwrap()),
            )])),
            type_: Some("kubernetes.io/dockerconfigjson".to_string()),
            ..Default::default()
        };
        serde_json::to_string(&secret).unwrap()
    }

    #[tokio::test]
    async fn test_suspended_repository_is_left_alone() {
        let mut spec = podinfo_spec();
        spec["suspend"] = json!(true);
        let repo = repository(spec, None, None);
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(harness.scanner.calls(), 0);
        assert!(harness.requests.lock().unwrap().is_empty());
        assert!(harness.store.get(CANONICAL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_url_scheme_is_rejected_without_network_call() {
        let repo = repository(
            json!({ "image": "https://ghcr.io/stefanprodan/podinfo", "interval": "5m" }),
            None,
            None,
        );
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(harness.scanner.calls(), 0);

        let status = harness.last_status();
        assert_eq!(status["conditions"][0]["status"], "False");
        assert_eq!(status["conditions"][0]["reason"], "ImageURLInvalid");
        assert!(status["conditions"][0]["message"]
            .as_str()
            .unwrap()
            .contains("remove 'https://'"));
        assert!(status.get("lastScanResult").is_none());
        assert!(status.get("lastFailedScan").is_none());
    }

    #[tokio::test]
    async fn test_invalid_interval_is_reported() {
        let repo = repository(
            json!({ "image": CANONICAL, "interval": "soon" }),
            None,
            None,
        );
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(harness.scanner.calls(), 0);
        assert_eq!(harness.last_status()["conditions"][0]["reason"], "InvalidSpec");
    }

    #[tokio::test]
    async fn test_first_scan_stores_tags_and_reports_count() {
        let repo = repository(podinfo_spec(), None, None);
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(harness.scanner.calls(), 1);

        let status = harness.last_status();
        assert_eq!(status["canonicalImageName"], CANONICAL);
        assert_eq!(status["lastScanResult"]["tagCount"], 7);
        assert_eq!(status["lastScanResult"]["latestTags"][0], "latest");
        assert_eq!(status["observedExclusionList"], json!(["^.*\\.sig$"]));
        assert_eq!(status["observedGeneration"], 1);
        assert_eq!(status["conditions"][0]["status"], "True");
        assert_eq!(status["conditions"][0]["reason"], "Succeeded");

        let entry = harness.store.get(CANONICAL).unwrap().unwrap();
        assert_eq!(entry.tags.len(), 7);
        assert!(!entry.tags.contains(&"sha256-abc.sig".to_string()));
    }

    #[tokio::test]
    async fn test_custom_exclusion_list_replaces_default() {
        let mut spec = podinfo_spec();
        spec["exclusionList"] = json!(["^latest$"]);
        let repo = repository(spec, None, None);
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        let entry = harness.store.get(CANONICAL).unwrap().unwrap();
        assert_eq!(entry.tags.len(), 7);
        assert!(entry.tags.contains(&"sha256-abc.sig".to_string()));
        assert!(!entry.tags.contains(&"latest".to_string()));
    }

    #[tokio::test]
    async fn test_scan_waits_for_interval() {
        let scanned_at = Utc::now() - chrono::Duration::seconds(60);
        let repo = repository(podinfo_spec(), Some(scanned_status(scanned_at, None)), None);
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));
        harness
            .store
            .put(CANONICAL, &["6.0.0".to_string(), "6.1.0".to_string()], scanned_at)
            .unwrap();

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.scanner.calls(), 0);
        assert!(harness.patches().is_empty());
        assert_ne!(action, Action::await_change());
        assert_ne!(action, Action::requeue(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_missing_store_entry_forces_rescan() {
        let scanned_at = Utc::now() - chrono::Duration::seconds(60);
        let repo = repository(podinfo_spec(), Some(scanned_status(scanned_at, None)), None);
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.scanner.calls(), 1);
        assert_eq!(harness.store.get(CANONICAL).unwrap().unwrap().tags.len(), 7);
    }

    #[tokio::test]
    async fn test_new_token_forces_rescan_with_later_scan_time() {
        // A previous scan time ahead of the clock still yields a strictly later one
        let previous = Utc::now() + chrono::Duration::hours(1);
        let repo = repository(
            podinfo_spec(),
            Some(scanned_status(previous, Some("2026-10-16T09:00:00Z"))),
            Some("2026-10-16T10:00:00Z"),
        );
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));
        harness
            .store
            .put(CANONICAL, &["6.0.0".to_string()], previous)
            .unwrap();

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.scanner.calls(), 1);
        let status = harness.last_status();
        assert_eq!(status["lastHandledReconcileAt"], "2026-10-16T10:00:00Z");

        let scan_time: DateTime<Utc> =
            serde_json::from_value(status["lastScanResult"]["scanTime"].clone()).unwrap();
        assert!(scan_time > previous);
        assert_eq!(harness.store.get(CANONICAL).unwrap().unwrap().scan_time, scan_time);
    }

    #[tokio::test]
    async fn test_handled_token_does_not_rescan() {
        let scanned_at = Utc::now() - chrono::Duration::seconds(10);
        let repo = repository(
            podinfo_spec(),
            Some(scanned_status(scanned_at, Some("2026-10-16T10:00:00Z"))),
            Some("2026-10-16T10:00:00Z"),
        );
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));
        harness.store.put(CANONICAL, &[], scanned_at).unwrap();

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.scanner.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_previous_tags() {
        let scanned_at = Utc::now() - chrono::Duration::minutes(10);
        let repo = repository(podinfo_spec(), Some(scanned_status(scanned_at, None)), None);
        let scanner = FakeScanner::with_tags(PODINFO_TAGS);
        *scanner.fail_with.lock().unwrap() = Some("connection refused".to_string());
        let harness = Harness::new(mock_for(&repo), scanner);
        let previous = vec!["6.0.0".to_string(), "6.1.0".to_string()];
        harness.store.put(CANONICAL, &previous, scanned_at).unwrap();

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        let status = harness.last_status();
        assert_eq!(status["conditions"][0]["status"], "False");
        assert_eq!(status["conditions"][0]["reason"], "ReadOperationFailed");
        assert_eq!(status["lastScanResult"]["tagCount"], 2);

        assert_eq!(status["lastFailedScan"]["canonicalImageName"], CANONICAL);
        assert!(status["lastFailedScan"]["time"].is_string());

        let entry = harness.store.get(CANONICAL).unwrap().unwrap();
        assert_eq!(entry.tags, previous);
    }

    #[tokio::test]
    async fn test_failed_token_is_not_retried_on_own_status_update() {
        let scanned_at = Utc::now() - chrono::Duration::minutes(10);
        let repo = repository(
            podinfo_spec(),
            Some(scanned_status(scanned_at, Some("t1"))),
            Some("t2"),
        );
        let scanner = FakeScanner::with_tags(PODINFO_TAGS);
        *scanner.fail_with.lock().unwrap() = Some("connection refused".to_string());
        let harness = Harness::new(mock_for(&repo), scanner);
        harness.store.put(CANONICAL, &[], scanned_at).unwrap();

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();
        assert_eq!(harness.scanner.calls(), 1);
        let status = harness.last_status();
        assert_eq!(status["lastFailedScan"]["reconcileRequestedAt"], "t2");
        assert_eq!(status["lastHandledReconcileAt"], "t1");

        // The watch event caused by the failure write
        let updated = repository(podinfo_spec(), Some(status), Some("t2"));
        reconcile(Arc::new(updated), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.scanner.calls(), 1);
    }

    #[tokio::test]
    async fn test_credentials_from_secret_are_used() {
        let mut spec = podinfo_spec();
        spec["secretRef"] = json!({ "name": "ghcr-auth" });
        let repo = repository(spec, None, None);
        let mock = mock_for(&repo).on_get(SECRET_PATH, 200, &docker_config_secret("bot", "s3cret"));
        let harness = Harness::new(mock, FakeScanner::with_tags(PODINFO_TAGS).requiring("bot", "s3cret"));

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.last_status()["conditions"][0]["reason"], "Succeeded");
        assert!(harness.store.get(CANONICAL).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wrong_credentials_report_authentication_failure() {
        let mut spec = podinfo_spec();
        spec["secretRef"] = json!({ "name": "ghcr-auth" });
        let repo = repository(spec, None, None);
        let mock = mock_for(&repo).on_get(SECRET_PATH, 200, &docker_config_secret("bot", "wrong"));
        let harness = Harness::new(mock, FakeScanner::with_tags(PODINFO_TAGS).requiring("bot", "s3cret"));

        let action = reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        let status = harness.last_status();
        assert_eq!(status["conditions"][0]["reason"], "AuthenticationFailed");
        assert_eq!(status["lastFailedScan"]["canonicalImageName"], CANONICAL);
        assert!(harness.store.get(CANONICAL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_secret_reports_authentication_failure() {
        let mut spec = podinfo_spec();
        spec["secretRef"] = json!({ "name": "ghcr-auth" });
        let repo = repository(spec, None, None);
        let harness = Harness::new(mock_for(&repo), FakeScanner::with_tags(PODINFO_TAGS));

        reconcile(Arc::new(repo), harness.ctx.clone()).await.unwrap();

        assert_eq!(harness.scanner.calls(), 0);
        assert_eq!(
            harness.last_status()["conditions"][0]["reason"],
            "AuthenticationFailed"
        );
    }

    fn failed_status(
        transition: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        attempted_token: Option<&str>,
        handled: Option<&str>,
    ) -> Value {
        let mut status = json!({
            "lastFailedScan": {
                "time": failed_at,
                "canonicalImageName": CANONICAL,
                "exclusionList": ["^.*\\.sig$"]
            },
            "conditions": [{
                "type": "Ready",
                "status": "False",
                "reason": "ReadOperationFailed",
                "message": "connection refused",
                "lastTransitionTime": transition
            }]
        });
        if let Some(token) = attempted_token {
            status["lastFailedScan"]["reconcileRequestedAt"] = json!(token);
        }
        if let Some(handled) = handled {
            status["lastHandledReconcileAt"] = json!(handled);
        }
        status
    }

    #[test]
    fn test_scan_decision_after_recent_failure_waits() {
        let now = Utc::now();
        let failed_at = now - chrono::Duration::seconds(10);
        let repo = repository(
            podinfo_spec(),
            Some(failed_status(failed_at, failed_at, None, None)),
            None,
        );
        let exclusions = repo.exclusion_list();
        let interval = Duration::from_secs(300);
        let backoff = Duration::from_secs(30);

        assert_eq!(
            scan_decision(&repo, CANONICAL, &exclusions, interval, backoff, false, now),
            ScanDecision::Wait(Duration::from_secs(20))
        );
        assert_eq!(
            scan_decision(
                &repo,
                CANONICAL,
                &exclusions,
                interval,
                backoff,
                false,
                now + chrono::Duration::seconds(30)
            ),
            ScanDecision::Scan(ScanReason::FirstScan)
        );
    }

    #[test]
    fn test_attempted_token_waits_out_failure_backoff() {
        let now = Utc::now();
        let failed_at = now - chrono::Duration::seconds(1);
        let status = failed_status(failed_at, failed_at, Some("t2"), Some("t1"));
        let interval = Duration::from_secs(300);
        let backoff = Duration::from_secs(30);

        let repo = repository(podinfo_spec(), Some(status.clone()), Some("t2"));
        assert_eq!(
            scan_decision(&repo, CANONICAL, &repo.exclusion_list(), interval, backoff, true, now),
            ScanDecision::Wait(Duration::from_secs(29))
        );

        // A token set after the failure has not been tried yet
        let repo = repository(podinfo_spec(), Some(status), Some("t3"));
        assert_eq!(
            scan_decision(&repo, CANONICAL, &repo.exclusion_list(), interval, backoff, true, now),
            ScanDecision::Scan(ScanReason::ReconcileRequested)
        );
    }

    #[test]
    fn test_changed_inputs_skip_failure_backoff() {
        let now = Utc::now();
        let failed_at = now - chrono::Duration::seconds(1);
        let repo = repository(
            podinfo_spec(),
            Some(failed_status(failed_at, failed_at, None, None)),
            None,
        );
        let interval = Duration::from_secs(300);
        let backoff = Duration::from_secs(30);

        assert_eq!(
            scan_decision(&repo, CANONICAL, &["^v0".to_string()], interval, backoff, false, now),
            ScanDecision::Scan(ScanReason::FirstScan)
        );
        assert_eq!(
            scan_decision(
                &repo,
                "index.docker.io/stefanprodan/podinfo",
                &repo.exclusion_list(),
                interval,
                backoff,
                false,
                now
            ),
            ScanDecision::Scan(ScanReason::FirstScan)
        );
    }

    #[test]
    fn test_repeated_failure_restarts_backoff() {
        let now = Utc::now();
        // Ready has been False for a while, the latest retry failed just now
        let repo = repository(
            podinfo_spec(),
            Some(failed_status(now - chrono::Duration::minutes(10), now, None, None)),
            None,
        );

        assert_eq!(
            scan_decision(
                &repo,
                CANONICAL,
                &repo.exclusion_list(),
                Duration::from_secs(300),
                Duration::from_secs(30),
                false,
                now
            ),
            ScanDecision::Wait(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_scan_decision_on_spec_changes() {
        let now = Utc::now();
        let repo = repository(podinfo_spec(), Some(scanned_status(now, None)), None);
        let interval = Duration::from_secs(300);
        let backoff = Duration::from_secs(30);

        assert_eq!(
            scan_decision(
                &repo,
                "index.docker.io/stefanprodan/podinfo",
                &repo.exclusion_list(),
                interval,
                backoff,
                true,
                now
            ),
            ScanDecision::Scan(ScanReason::ImageChanged)
        );
        assert_eq!(
            scan_decision(&repo, CANONICAL, &["^v0".to_string()], interval, backoff, true, now),
            ScanDecision::Scan(ScanReason::ExclusionListChanged)
        );
        assert_eq!(
            scan_decision(&repo, CANONICAL, &repo.exclusion_list(), interval, backoff, true, now),
            ScanDecision::Wait(interval)
        );
        assert_eq!(
            scan_decision(
                &repo,
                CANONICAL,
                &repo.exclusion_list(),
                interval,
                backoff,
                true,
                now + chrono::Duration::minutes(5)
            ),
            ScanDecision::Scan(ScanReason::IntervalElapsed)
        );
    }

    #[test]
    fn test_next_scan_time_is_strictly_increasing() {
        let now = Utc::now();
        assert_eq!(next_scan_time(None, now), now);
        assert_eq!(next_scan_time(Some(now - chrono::Duration::seconds(1)), now), now);
        assert!(next_scan_time(Some(now), now) > now);
    }

    #[test]
    fn test_latest_tags_are_capped_and_descending() {
        let tags: Vec<String> = (0..15).map(|i| format!("1.{:02}.0", i)).collect();
        let latest = latest_tags(&tags);

        assert_eq!(latest.len(), LATEST_TAGS_COUNT);
        assert_eq!(latest[0], "1.14.0");
        assert_eq!(latest[9], "1.05.0");
    }

    #[tokio::test]
    async fn test_retry_backoff_is_shorter_than_interval() {
        let harness = Harness::new(MockService::new(), FakeScanner::with_tags(&[]));

        assert_eq!(
            harness.ctx.retry_backoff(Duration::from_secs(300)),
            Duration::from_secs(30)
        );
        assert_eq!(
            harness.ctx.retry_backoff(Duration::from_secs(20)),
            Duration::from_secs(10)
        );
        assert_eq!(
            harness.ctx.retry_backoff(Duration::from_secs(1)),
            Duration::from_millis(500)
        );
        assert_eq!(
            harness.ctx.retry_backoff(Duration::from_millis(10)),
            Duration::from_millis(5)
        );
    }
}
