// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys used by the reflector
pub mod annotations {
    /// Changing the value of this annotation forces an out-of-schedule scan
    pub const RECONCILE_REQUESTED_AT: &str = "reconcile.image.reflector.io/requestedAt";
}

/// The operator name used as field manager for status patches
pub const OPERATOR_NAME: &str = "image-reflector";

/// API group and version of the custom resources
pub const API_GROUP: &str = "image.reflector.io";
pub const API_VERSION: &str = "v1beta1";

/// Condition types and reasons written to resource status
pub mod conditions {
    pub const READY: &str = "Ready";

    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";

    pub const SUCCEEDED: &str = "Succeeded";
    pub const IMAGE_URL_INVALID: &str = "ImageURLInvalid";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const AUTHENTICATION_FAILED: &str = "AuthenticationFailed";
    pub const READ_OPERATION_FAILED: &str = "ReadOperationFailed";
    pub const DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
    pub const NO_MATCHING_TAG: &str = "NoMatchingTag";
    pub const INVALID_POLICY: &str = "InvalidPolicy";
}

/// Registry defaults applied during canonicalization
pub mod registry {
    /// Host used when an image reference carries no registry
    pub const DEFAULT_REGISTRY: &str = "index.docker.io";
    /// Alias of the default registry accepted in references and credentials
    pub const DOCKER_HUB_ALIAS: &str = "docker.io";
    /// Namespace inserted for single-component repositories on the default registry
    pub const DEFAULT_NAMESPACE: &str = "library";
    /// Number of tags requested per page when listing
    pub const TAG_PAGE_SIZE: usize = 1000;
}

/// Scan bookkeeping defaults
pub mod scan {
    /// Tags matching these patterns are dropped before they are stored
    pub const DEFAULT_EXCLUSION_LIST: &[&str] = &[r"^.*\.sig$"];
    /// Number of tags echoed into `lastScanResult.latestTags`
    pub const LATEST_TAGS_COUNT: usize = 10;
}

/// Optimistic status update configuration
pub mod status {
    /// Attempts made before giving up on conflicting status writes
    pub const MAX_UPDATE_ATTEMPTS: usize = 5;
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
