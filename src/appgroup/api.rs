// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed access to AppGroups and the create/update/delete decision for a wrapper.

use crate::appgroup::wrapper::AppGroupWrapper;
use crate::constants::cleanup::UPDATE_RETRIES;
use crate::constants::{labels, FINALIZER};
use crate::error::Result;
use crate::types::{AppGroup, AppGroupSpec, AppGroupStatus};
use kube::api::{DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

/// What `AppGroupApi::persist` did with a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

#[derive(Clone)]
pub struct AppGroupApi {
    client: Client,
}

/// Status lists are always written as arrays, never omitted.
pub fn normalize(group: &mut AppGroup) {
    group.status.get_or_insert_with(AppGroupStatus::default);
}

impl AppGroupApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<AppGroup> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<AppGroup> {
        Ok(self.api(namespace).get(name).await?)
    }

    pub async fn get_opt(&self, namespace: &str, name: &str) -> Result<Option<AppGroup>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<AppGroup>> {
        Ok(self.api(namespace).list(&ListParams::default()).await?.items)
    }

    /// Groups installed from the same application type.
    pub async fn list_by_label(&self, namespace: &str, identifie: &str) -> Result<Vec<AppGroup>> {
        let params = ListParams::default().labels(&format!("{}={}", labels::IDENTIFIE, identifie));
        Ok(self.api(namespace).list(&params).await?.items)
    }

    /// Groups labelled as children of `parent`.
    pub async fn list_children(&self, namespace: &str, parent: &str) -> Result<Vec<AppGroup>> {
        let params = ListParams::default().labels(&format!("{}={}", labels::PARENT, parent));
        Ok(self.api(namespace).list(&params).await?.items)
    }

    pub async fn create(&self, group: &AppGroup) -> Result<AppGroup> {
        let mut group = group.clone();
        normalize(&mut group);
        let namespace = group.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .create(&PostParams::default(), &group)
            .await?)
    }

    pub async fn update(&self, group: &AppGroup) -> Result<AppGroup> {
        let mut group = group.clone();
        normalize(&mut group);
        let namespace = group.namespace().unwrap_or_default();
        Ok(self
            .api(&namespace)
            .replace(&group.name_any(), &PostParams::default(), &group)
            .await?)
    }

    /// Delete a group. Deleting a group that is already gone succeeds.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch, mutate and replace a group, starting over when another writer got there first.
    /// `mutate` returns false when there is nothing to write. A missing group is left alone.
    /// Returns whether a write happened.
    pub async fn modify<F>(&self, namespace: &str, name: &str, mut mutate: F) -> Result<bool>
    where
        F: FnMut(&mut AppGroup) -> bool,
    {
        let mut attempt = 1;
        loop {
            let Some(mut group) = self.get_opt(namespace, name).await? else {
                return Ok(false);
            };
            if !mutate(&mut group) {
                return Ok(false);
            }
            match self.update(&group).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) if e.is_conflict() && attempt < UPDATE_RETRIES => {
                    debug!("Conflict updating AppGroup {}, attempt {}", name, attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop every finalizer so the API server can remove a terminating group.
    pub async fn clear_finalizers(&self, namespace: &str, name: &str) -> Result<bool> {
        self.modify(namespace, name, |group| {
            if group.finalizers().is_empty() {
                return false;
            }
            group.metadata.finalizers = None;
            true
        })
        .await
    }

    /// Load the named group, or stage a new one with `defaults` as its spec.
    /// The parent named by the group's label is attached when it exists.
    pub async fn wrapper_for(
        &self,
        namespace: &str,
        name: &str,
        defaults: AppGroupSpec,
    ) -> Result<AppGroupWrapper> {
        let wrapper = match self.get_opt(namespace, name).await? {
            Some(group) => AppGroupWrapper::new(group, true),
            None => AppGroupWrapper::new(new_group(namespace, name, defaults), false),
        };

        let Some(parent_name) = wrapper.group().parent_name().map(str::to_string) else {
            return Ok(wrapper);
        };
        match self.get_opt(namespace, &parent_name).await {
            Ok(Some(parent)) => Ok(wrapper.with_parent(AppGroupWrapper::new(parent, true))),
            Ok(None) => {
                debug!("Parent group {} of {} not found", parent_name, name);
                Ok(wrapper)
            }
            Err(e) => {
                warn!("Failed to load parent group {} of {}: {}", parent_name, name, e);
                Ok(wrapper)
            }
        }
    }

    /// Write whatever the wrapper needs, then its parent.
    #[instrument(skip(self, wrapper), fields(group = %wrapper.name()))]
    pub async fn persist(&self, wrapper: &mut AppGroupWrapper) -> Result<PersistOutcome> {
        let outcome = self.persist_one(wrapper).await?;
        if let Some(parent) = wrapper.parent_mut() {
            self.persist_one(parent).await?;
        }
        Ok(outcome)
    }

    async fn persist_one(&self, wrapper: &mut AppGroupWrapper) -> Result<PersistOutcome> {
        if !wrapper.is_exists() {
            let created = self.create(wrapper.group()).await?;
            info!("Created AppGroup {}", created.name_any());
            wrapper.mark_persisted(created);
            return Ok(PersistOutcome::Created);
        }

        if wrapper.is_empty() && !wrapper.group().spec.is_helm && wrapper.is_delete_enabled() {
            info!("AppGroup {} has no workloads left, deleting", wrapper.name());
            self.delete(&wrapper.namespace(), &wrapper.name()).await?;
            return Ok(PersistOutcome::Deleted);
        }

        if !wrapper.is_changed() {
            return Ok(PersistOutcome::Unchanged);
        }

        let updated = self.update(wrapper.group()).await?;
        debug!("Updated AppGroup {}", updated.name_any());
        wrapper.mark_persisted(updated);
        Ok(PersistOutcome::Updated)
    }
}

fn new_group(namespace: &str, name: &str, spec: AppGroupSpec) -> AppGroup {
    AppGroup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            finalizers: Some(vec![FINALIZER.to_string()]),
            ..Default::default()
        },
        spec,
        status: Some(AppGroupStatus::default()),
    }
}
