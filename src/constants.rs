// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Label keys read from workloads, AppGroups and Ingresses
pub mod labels {
    /// Marks an AppGroup as a child of the named parent group
    pub const PARENT: &str = "w7.cc/parent";
    pub const IDENTIFIE: &str = "w7.cc/identifie";
    /// Groups several Helm releases under one AppGroup
    pub const GROUP_NAME: &str = "w7.cc/group-name";
    pub const RELEASE_NAME: &str = "w7.cc/release-name";
    pub const INSTANCE: &str = "app.kubernetes.io/instance";
    pub const SUFFIX: &str = "w7.cc/suffix";
    /// Either "Helm" or the name of a Deployment that manages this workload
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    /// Links an Ingress to its AppGroup
    pub const INGRESS_GROUP: &str = "group";
}

/// Annotation keys used by the controller
pub mod annotations {
    /// Overrides every label-based group name resolution
    pub const HELM_RELEASE_NAME: &str = "meta.helm.sh/release-name";
    pub const TITLE: &str = "title";
    /// Install ticket reported back on completion
    pub const TICKET: &str = "w7.cc/ticket";
    /// Present once the install-complete notification succeeded
    pub const NOTIFY_INSTALLED: &str = "w7.cc/notify-installed";
    /// JSON array of lifecycle shell scripts
    pub const SHELLS: &str = "w7.cc/shells";
    /// JSON array of external URLs served by the group's Ingresses
    pub const DOMAINS: &str = "w7.cc/domains";
    pub const DEFAULT_DOMAIN: &str = "w7.cc/default-domain";
    pub const FRONT_TYPE: &str = "w7.cc/front-type";
    pub const CREATE_SVC: &str = "w7.cc/create-svc";
    pub const CREATE_HEADLESS_SVC: &str = "w7.cc/create-headless-svc";
    /// JSON map from container port to LoadBalancer port
    pub const LB_PORTS: &str = "w7.cc.app/ports";
    pub const CLUSTER_ISSUER: &str = "cert-manager.io/cluster-issuer";
}

/// Annotations carried by charts packaged for the offline store
pub mod chart {
    pub const SOURCE: &str = "w7.cc/source";
    pub const REPOSITORY_URL: &str = "w7.cc/repository-url";
    pub const CHART_NAME: &str = "w7.cc/chart-name";
    pub const ZPK_VERSION: &str = "w7.cc/zpk-version";
    pub const ZPK_URL: &str = "w7.cc/zpk-url";
    pub const TITLE: &str = "w7.cc/title";
    pub const LOGO: &str = "w7.cc/logo";
    pub const IDENTIFIE: &str = "w7.cc/identifie";
    pub const MANIFEST_TYPE: &str = "w7.cc/manifest-type";
}

/// Finalizer placed on every AppGroup created by the controller
pub const FINALIZER: &str = "appgroup.w7.cc/finalizer";

/// Secret type used by the Helm v3 release store
pub const HELM_SECRET_TYPE: &str = "helm.sh/release.v1";

/// Value of `app.kubernetes.io/managed-by` on Helm-installed objects
pub const HELM_MANAGER: &str = "Helm";

/// Front-end type that requests a static bundle prefetch
pub const THIRD_PARTY_FRONT: &str = "thirdparty_cd";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Work queue tuning
pub mod queue {
    pub const BASE_DELAY_MS: u64 = 5;
    pub const MAX_DELAY_SECS: u64 = 1000;
    /// Global token bucket shared by all requeues
    pub const RATE_PER_SEC: u32 = 100;
    pub const BURST: u32 = 1000;
    /// Total handler invocations before a key is dropped
    pub const MAX_ATTEMPTS: u32 = 3;
}

/// Completion callback tuning
pub mod notify {
    /// Total POSTs per callback before giving up
    pub const ATTEMPTS: u32 = 3;
    /// Wait before the second attempt, doubled for each one after
    pub const RETRY_DELAY_MS: u64 = 500;
}

/// Cleanup tuning
pub mod cleanup {
    pub const UNINSTALL_JOB_TTL_SECS: i32 = 300;
    pub const UNINSTALL_SHELL_TYPE: &str = "uninstall";
    /// Attempts for fetch-mutate-replace updates that hit a conflict
    pub const UPDATE_RETRIES: usize = 5;
}
