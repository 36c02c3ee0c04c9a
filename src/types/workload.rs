// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Uniform view over the workload kinds an AppGroup tracks.

use crate::constants::{annotations, labels, HELM_MANAGER};
use crate::types::appgroup::{AppGroupItemStatus, AppGroupSpec, DeployStatus, GroupType};
use crate::types::event::K8sResourceEvent;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodTemplateSpec};
use kube::api::ObjectMeta;
use kube::Resource;
use std::sync::Arc;

/// Kubernetes default for `spec.backoffLimit` on Jobs
const DEFAULT_BACKOFF_LIMIT: i32 = 6;

/// Readiness predicates of a single workload kind.
pub trait WorkloadStatus {
    fn ready(&self) -> bool;

    fn deploy_status(&self) -> DeployStatus {
        if self.ready() {
            DeployStatus::Deployed
        } else {
            DeployStatus::Deploying
        }
    }

    fn is_zero_replicas(&self) -> bool;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;
}

impl WorkloadStatus for Deployment {
    fn ready(&self) -> bool {
        let status = self.status.as_ref();
        let replicas = status.and_then(|s| s.replicas).unwrap_or(0);
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        ready == replicas
    }

    fn is_zero_replicas(&self) -> bool {
        self.status.as_ref().and_then(|s| s.replicas).unwrap_or(0) == 0
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl WorkloadStatus for StatefulSet {
    fn ready(&self) -> bool {
        let status = self.status.as_ref();
        let replicas = status.map(|s| s.replicas).unwrap_or(0);
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        ready == replicas
    }

    fn is_zero_replicas(&self) -> bool {
        self.status.as_ref().map(|s| s.replicas).unwrap_or(0) == 0
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl WorkloadStatus for DaemonSet {
    fn ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.number_ready > 0 && s.number_ready == s.number_available.unwrap_or(0)
        })
    }

    fn is_zero_replicas(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.desired_number_scheduled)
            .unwrap_or(0)
            == 0
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl WorkloadStatus for Job {
    fn ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.succeeded)
            .unwrap_or(0)
            >= 1
    }

    fn deploy_status(&self) -> DeployStatus {
        if self.ready() {
            return DeployStatus::Deployed;
        }
        let failed = self.status.as_ref().and_then(|s| s.failed).unwrap_or(0);
        let backoff_limit = self
            .spec
            .as_ref()
            .and_then(|s| s.backoff_limit)
            .unwrap_or(DEFAULT_BACKOFF_LIMIT);
        if failed >= backoff_limit {
            DeployStatus::Failed
        } else {
            DeployStatus::Deploying
        }
    }

    fn is_zero_replicas(&self) -> bool {
        false
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

/// Identity of a workload that is no longer in the cache.
#[derive(Clone, Debug)]
pub struct WorkloadRef {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
}

#[derive(Clone, Debug)]
pub enum Workload {
    Deployment(Arc<Deployment>),
    StatefulSet(Arc<StatefulSet>),
    DaemonSet(Arc<DaemonSet>),
    Job(Arc<Job>),
    /// Stand-in for a deleted object, carrying only what the event recorded
    Placeholder(WorkloadRef),
}

impl Workload {
    pub fn placeholder(event: &K8sResourceEvent) -> Self {
        let optional = |map: &std::collections::BTreeMap<String, String>| {
            (!map.is_empty()).then(|| map.clone())
        };
        Workload::Placeholder(WorkloadRef {
            api_version: event.api_version.clone(),
            kind: event.kind.clone(),
            metadata: ObjectMeta {
                name: Some(event.name.clone()),
                namespace: Some(event.namespace.clone()),
                labels: optional(&event.labels),
                annotations: optional(&event.annotations),
                ..Default::default()
            },
        })
    }

    fn status(&self) -> Option<&dyn WorkloadStatus> {
        match self {
            Workload::Deployment(d) => Some(d.as_ref()),
            Workload::StatefulSet(s) => Some(s.as_ref()),
            Workload::DaemonSet(d) => Some(d.as_ref()),
            Workload::Job(j) => Some(j.as_ref()),
            Workload::Placeholder(_) => None,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Workload::Deployment(_) => "Deployment",
            Workload::StatefulSet(_) => "StatefulSet",
            Workload::DaemonSet(_) => "DaemonSet",
            Workload::Job(_) => "Job",
            Workload::Placeholder(r) => &r.kind,
        }
    }

    pub fn api_version(&self) -> &str {
        match self {
            Workload::Job(_) => "batch/v1",
            Workload::Placeholder(r) => &r.api_version,
            _ => "apps/v1",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(d) => d.meta(),
            Workload::StatefulSet(s) => s.meta(),
            Workload::DaemonSet(d) => d.meta(),
            Workload::Job(j) => j.meta(),
            Workload::Placeholder(r) => &r.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn is_job(&self) -> bool {
        self.kind() == "Job"
    }

    pub fn ready(&self) -> bool {
        self.status().is_some_and(|s| s.ready())
    }

    pub fn deploy_status(&self) -> DeployStatus {
        self.status()
            .map(|s| s.deploy_status())
            .unwrap_or(DeployStatus::Deploying)
    }

    pub fn is_zero_replicas(&self) -> bool {
        self.status().is_some_and(|s| s.is_zero_replicas())
    }

    pub fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.status().and_then(|s| s.pod_template())
    }

    pub fn containers(&self) -> &[Container] {
        self.pod_template()
            .and_then(|t| t.spec.as_ref())
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
    }

    /// Ports declared by every container of the pod template, in order.
    pub fn container_ports(&self) -> Vec<ContainerPort> {
        self.containers()
            .iter()
            .flat_map(|c| c.ports.iter().flatten().cloned())
            .collect()
    }

    pub fn is_helm(&self) -> bool {
        self.label(labels::MANAGED_BY) == Some(HELM_MANAGER)
    }

    /// Name of the Deployment managing this workload, when it is not Helm.
    pub fn managed_by_workload(&self) -> Option<&str> {
        self.label(labels::MANAGED_BY)
            .filter(|m| *m != HELM_MANAGER)
    }

    /// Release name from labels, first match wins.
    pub fn release_name(&self) -> Option<&str> {
        [
            labels::GROUP_NAME,
            labels::RELEASE_NAME,
            labels::INSTANCE,
            labels::SUFFIX,
        ]
        .into_iter()
        .find_map(|key| self.label(key))
    }

    pub fn title(&self) -> String {
        match &self.metadata().annotations {
            None => self.name().to_string(),
            Some(annotations) => annotations
                .get(annotations::TITLE)
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn to_item_status(&self) -> AppGroupItemStatus {
        AppGroupItemStatus {
            kind: self.kind().to_string(),
            api_version: self.api_version().to_string(),
            name: self.name().to_string(),
            title: self.title(),
            ready: self.ready(),
            is_helm_work_load: self.is_helm(),
            creation_timestamp: self.metadata().creation_timestamp.clone(),
            deploy_status: self.deploy_status(),
            is_zero_replicas: self.is_zero_replicas(),
        }
    }

    /// Spec used when this workload is the first thing seen of its group.
    pub fn default_group_spec(&self) -> AppGroupSpec {
        AppGroupSpec {
            group_type: GroupType::Custom,
            identifie: self.release_name().unwrap_or_default().to_string(),
            suffix: self.label(labels::SUFFIX).unwrap_or_default().to_string(),
            title: self.title(),
            ..Default::default()
        }
    }
}
