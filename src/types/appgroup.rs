// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{annotations, labels};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kinds whose status gates a DeployItem. Jobs and non-workload kinds are tracked but never gate.
const GATING_KINDS: [&str; 3] = ["Deployment", "StatefulSet", "DaemonSet"];

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "appgroup.w7.cc", version = "v1alpha1", kind = "AppGroup")]
#[kube(namespaced)]
#[kube(status = "AppGroupStatus")]
#[kube(shortname = "ag")]
#[kube(derive = "PartialEq")]
#[serde(rename_all = "camelCase", default)]
pub struct AppGroupSpec {
    /// Application type key
    pub identifie: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    pub version: String,
    pub upgrading_version: String,
    pub title: String,
    pub logo: String,
    pub description: String,
    pub suffix: String,
    pub zpk_url: String,
    pub helm_config: HelmConfig,
    pub is_helm: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Helm,
    Zpk,
    Console,
    #[default]
    #[serde(other)]
    Custom,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmConfig {
    pub chart_name: String,
    pub repository: String,
    pub version: String,
}

/// Deployment progress of a resource, a deploy item, or a whole group.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Deploying,
    Deployed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AppGroupStatus {
    pub items: Vec<AppGroupItemStatus>,
    #[serde(rename = "deployInfo")]
    pub deploy_items: Vec<DeployItem>,
    pub deploy_status: DeployStatus,
    pub ready: bool,
    pub is_zero_replicas: bool,
}

impl AppGroupStatus {
    pub fn compute_is_failed(&self) -> bool {
        self.deploy_items.iter().any(DeployItem::compute_is_failed)
    }

    pub fn compute_is_ready(&self) -> bool {
        self.deploy_items.iter().all(DeployItem::compute_is_ready)
    }

    /// Worst-of over all deploy items.
    pub fn compute_deploy_status(&self) -> DeployStatus {
        if self.compute_is_failed() {
            DeployStatus::Failed
        } else if !self.compute_is_ready() {
            DeployStatus::Deploying
        } else {
            DeployStatus::Deployed
        }
    }
}

/// Observed state of one tracked workload.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AppGroupItemStatus {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    pub title: String,
    pub ready: bool,
    pub is_helm_work_load: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub creation_timestamp: Option<Time>,
    pub deploy_status: DeployStatus,
    pub is_zero_replicas: bool,
}

impl AppGroupItemStatus {
    /// Items are keyed by (name, kind, apiVersion).
    pub fn same_resource(&self, other: &AppGroupItemStatus) -> bool {
        self.name == other.name && self.kind == other.kind && self.api_version == other.api_version
    }
}

/// A unit of installation tracked across several resources.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployItem {
    pub identifie: String,
    pub title: String,
    #[serde(rename = "resourcesList")]
    pub resource_list: Vec<ResourceInfo>,
    pub deploy_status: DeployStatus,
}

impl DeployItem {
    fn gating_resources(&self) -> impl Iterator<Item = &ResourceInfo> {
        self.resource_list.iter().filter(|r| r.is_workload())
    }

    pub fn compute_is_failed(&self) -> bool {
        self.gating_resources()
            .any(|r| r.deploy_status == DeployStatus::Failed)
    }

    pub fn compute_is_ready(&self) -> bool {
        self.gating_resources()
            .all(|r| r.deploy_status == DeployStatus::Deployed)
    }

    pub fn compute_deploy_status(&self) -> DeployStatus {
        if self.compute_is_failed() {
            DeployStatus::Failed
        } else if !self.compute_is_ready() {
            DeployStatus::Deploying
        } else {
            DeployStatus::Deployed
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceInfo {
    pub name: String,
    pub namespace: String,
    pub api_version: String,
    pub kind: String,
    pub deploy_status: DeployStatus,
    pub deploy_title: String,
}

impl ResourceInfo {
    pub fn is_workload(&self) -> bool {
        GATING_KINDS.contains(&self.kind.as_str())
    }

    pub fn matches(&self, item: &AppGroupItemStatus) -> bool {
        self.name == item.name && self.kind == item.kind && self.api_version == item.api_version
    }
}

impl AppGroup {
    pub fn status_mut(&mut self) -> &mut AppGroupStatus {
        self.status.get_or_insert_with(AppGroupStatus::default)
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.labels().get(labels::PARENT).map(String::as_str)
    }

    /// The install ticket, if this group is ticket-tracked.
    pub fn ticket(&self) -> Option<&str> {
        self.annotation(annotations::TICKET).filter(|t| !t.is_empty())
    }

    pub fn is_install_notified(&self) -> bool {
        self.annotations().contains_key(annotations::NOTIFY_INSTALLED)
    }

    /// Ready, ticket-tracked and not yet reported.
    pub fn needs_install_notice(&self) -> bool {
        self.is_ready() && self.ticket().is_some() && !self.is_install_notified()
    }

    /// Recompute deploy status, readiness and version promotion from the current status data.
    pub fn compute_status(&mut self) {
        let status = self.status.get_or_insert_with(AppGroupStatus::default);

        for item in status.deploy_items.iter_mut() {
            if item.deploy_status != DeployStatus::Deployed {
                item.deploy_status = item.compute_deploy_status();
            }
        }
        if status.deploy_status != DeployStatus::Deployed {
            status.deploy_status = status.compute_deploy_status();
        }

        if status.deploy_status == DeployStatus::Deployed
            && !self.spec.upgrading_version.is_empty()
            && self.spec.version != self.spec.upgrading_version
        {
            self.spec.version = self.spec.upgrading_version.clone();
        }

        status.is_zero_replicas = status.items.len() == 1 && status.items[0].is_zero_replicas;
        status.ready = status.items.iter().all(|i| i.ready || i.is_zero_replicas);
    }

    pub fn domains(&self) -> Vec<String> {
        self.annotation(annotations::DOMAINS)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn default_domain(&self) -> Option<&str> {
        self.annotation(annotations::DEFAULT_DOMAIN)
            .filter(|d| !d.is_empty())
    }

    pub fn set_domains(&mut self, domains: &[String]) {
        if let Ok(encoded) = serde_json::to_string(domains) {
            self.annotations_mut()
                .insert(annotations::DOMAINS.to_string(), encoded);
        }
    }

    /// Add a URL to the domain list. Returns false when it was already present.
    pub fn append_domain(&mut self, url: &str) -> bool {
        let mut domains = self.domains();
        if domains.iter().any(|d| d == url) {
            return false;
        }
        domains.push(url.to_string());
        self.set_domains(&domains);
        true
    }

    /// Remove a URL from the domain list. Returns false when it was not present.
    pub fn delete_domain(&mut self, url: &str) -> bool {
        let domains = self.domains();
        let remaining: Vec<String> = domains.iter().filter(|d| *d != url).cloned().collect();
        if remaining.len() == domains.len() {
            return false;
        }
        self.set_domains(&remaining);
        true
    }
}
