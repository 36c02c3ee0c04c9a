// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Buffered status mutations for one reconciliation pass over an AppGroup.

use crate::constants::annotations;
use crate::types::{AppGroup, AppGroupItemStatus, DeployStatus};
use kube::ResourceExt;

/// One AppGroup plus the bookkeeping `AppGroupApi::persist` needs to pick a write.
///
/// A parent wrapper, when attached, receives every item mutation as well.
/// The link is built fresh for each pass and never outlives it.
#[derive(Debug, Clone)]
pub struct AppGroupWrapper {
    group: AppGroup,
    original: AppGroup,
    exists: bool,
    delete_enabled: bool,
    parent: Option<Box<AppGroupWrapper>>,
}

impl AppGroupWrapper {
    pub fn new(group: AppGroup, exists: bool) -> Self {
        Self {
            original: group.clone(),
            group,
            exists,
            delete_enabled: false,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: AppGroupWrapper) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn group(&self) -> &AppGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut AppGroup {
        &mut self.group
    }

    pub fn parent(&self) -> Option<&AppGroupWrapper> {
        self.parent.as_deref()
    }

    pub fn parent_mut(&mut self) -> Option<&mut AppGroupWrapper> {
        self.parent.as_deref_mut()
    }

    pub fn name(&self) -> String {
        self.group.name_any()
    }

    pub fn namespace(&self) -> String {
        self.group.namespace().unwrap_or_default()
    }

    /// Upsert a workload into `status.items`. Jobs only touch deploy items.
    pub fn add_status_item(&mut self, item: AppGroupItemStatus) {
        if item.kind != "Job" {
            let status = self.group.status_mut();
            match status.items.iter_mut().find(|i| i.same_resource(&item)) {
                Some(existing) => *existing = item.clone(),
                None => status.items.push(item.clone()),
            }
            let title = status
                .items
                .iter()
                .find(|i| i.kind != "Job" && !i.title.is_empty())
                .map(|i| i.title.clone());
            if let Some(title) = title {
                self.group.spec.title = title;
            }
        }

        self.fix_deploy_item(&item);

        if let Some(parent) = self.parent.as_mut() {
            parent.add_status_item(item);
        }
    }

    /// Carry a workload's status into every deploy item that lists it, then recompute.
    /// A resource that reached `deployed` keeps that status, and `unknown` never overwrites.
    pub fn fix_deploy_item(&mut self, item: &AppGroupItemStatus) {
        let status = self.group.status_mut();
        for resource in status
            .deploy_items
            .iter_mut()
            .flat_map(|d| d.resource_list.iter_mut())
            .filter(|r| r.matches(item))
        {
            if resource.deploy_status != DeployStatus::Deployed
                && item.deploy_status != DeployStatus::Unknown
            {
                resource.deploy_status = item.deploy_status;
            }
        }
        self.group.compute_status();
    }

    pub fn remove_status_item(&mut self, item: &AppGroupItemStatus) {
        let status = self.group.status_mut();
        status.items.retain(|i| !i.same_resource(item));
        for deploy in status.deploy_items.iter_mut() {
            deploy.resource_list.retain(|r| !r.matches(item));
        }
        self.delete_enabled = true;
        self.group.compute_status();

        if let Some(parent) = self.parent.as_mut() {
            parent.remove_status_item(item);
        }
    }

    /// Drop every item that belongs to a Helm-installed workload.
    pub fn del_helm_items(&mut self) {
        self.group
            .status_mut()
            .items
            .retain(|i| !i.is_helm_work_load);
    }

    pub fn has_item(&self, item: &AppGroupItemStatus) -> bool {
        self.group
            .status
            .as_ref()
            .is_some_and(|s| s.items.iter().any(|i| i.same_resource(item)))
    }

    /// No tracked workloads and no deploy item still listing resources.
    pub fn is_empty(&self) -> bool {
        self.group.status.as_ref().map_or(true, |s| {
            s.items.is_empty() && s.deploy_items.iter().all(|d| d.resource_list.is_empty())
        })
    }

    pub fn is_changed(&self) -> bool {
        self.group != self.original
    }

    pub fn is_exists(&self) -> bool {
        self.exists
    }

    pub fn is_delete_enabled(&self) -> bool {
        self.delete_enabled
    }

    pub fn needs_install_notice(&self) -> bool {
        self.group.needs_install_notice()
    }

    pub fn mark_notified(&mut self) {
        self.group
            .annotations_mut()
            .insert(annotations::NOTIFY_INSTALLED.to_string(), "true".to_string());
    }

    /// Adopt the object the API server returned after a write.
    pub(crate) fn mark_persisted(&mut self, group: AppGroup) {
        self.original = group.clone();
        self.group = group;
        self.exists = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_appgroup;
    use crate::types::{DeployItem, ResourceInfo};

    fn make_item(kind: &str, name: &str, ready: bool) -> AppGroupItemStatus {
        AppGroupItemStatus {
            kind: kind.to_string(),
            api_version: (if kind == "Job" { "batch/v1" } else { "apps/v1" }).to_string(),
            name: name.to_string(),
            title: format!("{} title", name),
            ready,
            deploy_status: if ready {
                DeployStatus::Deployed
            } else {
                DeployStatus::Deploying
            },
            ..Default::default()
        }
    }

    fn make_tracked(kind: &str, name: &str) -> DeployItem {
        DeployItem {
            identifie: "install".to_string(),
            title: "Install".to_string(),
            resource_list: vec![ResourceInfo {
                name: name.to_string(),
                namespace: "default".to_string(),
                api_version: (if kind == "Job" { "batch/v1" } else { "apps/v1" }).to_string(),
                kind: kind.to_string(),
                deploy_status: DeployStatus::Unknown,
                deploy_title: String::new(),
            }],
            deploy_status: DeployStatus::Unknown,
        }
    }

    #[test]
    fn test_add_status_item_is_idempotent() {
        let mut wrapper = AppGroupWrapper::new(make_appgroup("app1"), true);
        wrapper.add_status_item(make_item("Deployment", "web", false));
        wrapper.add_status_item(make_item("Deployment", "web", false));
        assert_eq!(wrapper.group().status.as_ref().unwrap().items.len(), 1);

        wrapper.add_status_item(make_item("Deployment", "web", true));
        let items = &wrapper.group().status.as_ref().unwrap().items;
        assert_eq!(items.len(), 1);
        assert!(items[0].ready);
    }

    #[test]
    fn test_jobs_never_enter_items() {
        let mut group = make_appgroup("app1");
        group.status_mut().deploy_items = vec![make_tracked("Job", "init")];
        let mut wrapper = AppGroupWrapper::new(group, true);

        wrapper.add_status_item(make_item("Job", "init", true));

        let status = wrapper.group().status.as_ref().unwrap();
        assert!(status.items.is_empty());
        assert_eq!(
            status.deploy_items[0].resource_list[0].deploy_status,
            DeployStatus::Deployed
        );
    }

    #[test]
    fn test_title_follows_first_titled_item() {
        let mut wrapper = AppGroupWrapper::new(make_appgroup("app1"), true);
        let mut untitled = make_item("Deployment", "sidecar", true);
        untitled.title = String::new();
        wrapper.add_status_item(untitled);
        assert_eq!(wrapper.group().spec.title, "");

        wrapper.add_status_item(make_item("StatefulSet", "db", true));
        wrapper.add_status_item(make_item("Deployment", "web", true));
        assert_eq!(wrapper.group().spec.title, "db title");
    }

    #[test]
    fn test_deployed_resource_status_is_kept() {
        let mut group = make_appgroup("app1");
        group.status_mut().deploy_items = vec![make_tracked("Deployment", "web")];
        let mut wrapper = AppGroupWrapper::new(group, true);

        let mut unknown = make_item("Deployment", "web", false);
        unknown.deploy_status = DeployStatus::Unknown;
        wrapper.fix_deploy_item(&unknown);
        let resource = |w: &AppGroupWrapper| {
            w.group().status.as_ref().unwrap().deploy_items[0].resource_list[0].deploy_status
        };
        assert_eq!(resource(&wrapper), DeployStatus::Unknown);

        wrapper.fix_deploy_item(&make_item("Deployment", "web", true));
        assert_eq!(resource(&wrapper), DeployStatus::Deployed);

        wrapper.fix_deploy_item(&make_item("Deployment", "web", false));
        assert_eq!(resource(&wrapper), DeployStatus::Deployed);
    }

    #[test]
    fn test_remove_purges_items_and_resources() {
        let mut group = make_appgroup("app1");
        group.status_mut().deploy_items = vec![make_tracked("Deployment", "web")];
        let mut wrapper = AppGroupWrapper::new(group, true);
        let item = make_item("Deployment", "web", true);
        wrapper.add_status_item(item.clone());
        assert!(wrapper.has_item(&item));
        assert!(!wrapper.is_delete_enabled());

        wrapper.remove_status_item(&item);

        assert!(!wrapper.has_item(&item));
        assert!(wrapper.is_empty());
        assert!(wrapper.is_delete_enabled());
        assert!(wrapper.group().status.as_ref().unwrap().deploy_items[0]
            .resource_list
            .is_empty());
    }

    #[test]
    fn test_mutations_propagate_to_parent() {
        let child = make_appgroup("child");
        let parent = AppGroupWrapper::new(make_appgroup("parent"), true);
        let mut wrapper = AppGroupWrapper::new(child, true).with_parent(parent);
        let item = make_item("Deployment", "web", true);

        wrapper.add_status_item(item.clone());
        assert!(wrapper.parent().unwrap().has_item(&item));
        assert!(wrapper.parent().unwrap().is_changed());

        wrapper.remove_status_item(&item);
        assert!(!wrapper.parent().unwrap().has_item(&item));
        assert!(wrapper.parent().unwrap().is_delete_enabled());
    }

    #[test]
    fn test_unchanged_when_item_already_current() {
        let mut group = make_appgroup("app1");
        let item = make_item("Deployment", "web", true);
        group.status_mut().items = vec![item.clone()];
        group.spec.title = item.title.clone();
        group.compute_status();
        let mut wrapper = AppGroupWrapper::new(group, true);

        wrapper.add_status_item(item);
        assert!(!wrapper.is_changed());
    }

    #[test]
    fn test_del_helm_items() {
        let mut wrapper = AppGroupWrapper::new(make_appgroup("app1"), true);
        let mut helm = make_item("Deployment", "chart-web", true);
        helm.is_helm_work_load = true;
        wrapper.add_status_item(helm.clone());
        wrapper.add_status_item(make_item("Deployment", "web", true));

        wrapper.del_helm_items();

        assert!(!wrapper.has_item(&helm));
        assert_eq!(wrapper.group().status.as_ref().unwrap().items.len(), 1);
    }

    #[test]
    fn test_deploy_item_with_resources_is_not_empty() {
        let mut group = make_appgroup("app1");
        group.status_mut().deploy_items = vec![make_tracked("Job", "init")];
        let wrapper = AppGroupWrapper::new(group, true);
        assert!(!wrapper.is_empty());
    }
}
