// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Queue handler that folds workload events into AppGroup status.

use crate::appgroup::{AppGroupApi, AppGroupWrapper, PersistOutcome};
use crate::config::Config;
use crate::constants::{annotations, labels};
use crate::controllers::ingress::IngressHooks;
use crate::controllers::services::sync_services;
use crate::error::{ControllerError, Result};
use crate::helm::HelmClient;
use crate::kubernetes::cache::is_helm_release_secret;
use crate::kubernetes::ResourceCaches;
use crate::notify::{NotifyAction, Notifier};
use crate::queue::{EventQueue, QueueHandler};
use crate::static_assets::StaticAssets;
use crate::sync::HelmWorkloadSync;
use crate::types::{K8sResourceEvent, Workload};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Everything a queue worker needs to reconcile one key.
pub struct WorkloadManager {
    pub(crate) client: Client,
    pub(crate) config: Config,
    pub(crate) caches: ResourceCaches,
    pub(crate) groups: AppGroupApi,
    pub(crate) queue: EventQueue,
    pub(crate) helm: Arc<dyn HelmClient>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) assets: Arc<dyn StaticAssets>,
    pub(crate) helm_sync: HelmWorkloadSync,
    pub(crate) ingress: IngressHooks,
}

impl WorkloadManager {
    pub fn new(
        client: Client,
        config: Config,
        caches: ResourceCaches,
        queue: EventQueue,
        helm: Arc<dyn HelmClient>,
        notifier: Arc<dyn Notifier>,
        assets: Arc<dyn StaticAssets>,
    ) -> Self {
        let groups = AppGroupApi::new(client.clone());
        let helm_sync = HelmWorkloadSync::new(
            helm.clone(),
            caches.clone(),
            groups.clone(),
            queue.clone(),
            config.watch_namespace.clone(),
            config.helm_recheck_delay,
        );
        let ingress = IngressHooks::new(client.clone(), caches.clone(), config.tls_cluster_issuer.clone());
        Self {
            client,
            config,
            caches,
            groups,
            queue,
            helm,
            notifier,
            assets,
            helm_sync,
            ingress,
        }
    }

    pub fn helm_sync(&self) -> &HelmWorkloadSync {
        &self.helm_sync
    }

    /// Decode a queue key and route it by kind.
    #[instrument(skip(self, key))]
    pub async fn handle_queue(&self, key: &str) -> Result<()> {
        let event = K8sResourceEvent::from_key(key)?;
        if event.namespace != self.config.watch_namespace || event.kind == "Event" {
            return Ok(());
        }
        debug!(
            "Handling {:?} of {} {}/{}",
            event.event_type, event.kind, event.namespace, event.name
        );

        match event.kind.as_str() {
            "Secret" => self.handle_secret(&event).await,
            "Ingress" => self.ingress.handle_event(&event).await,
            "AppGroup" => match self.caches.appgroup(&event.namespace, &event.name) {
                Some(group) => self.handle_app_group(group.as_ref().clone(), event.is_init).await,
                None => {
                    debug!("AppGroup {} is gone, nothing to do", event.name);
                    Ok(())
                }
            },
            "Deployment" | "StatefulSet" | "DaemonSet" | "Job" => {
                // The cache is authoritative: a miss means the workload is gone.
                match self.caches.workload(&event.kind, &event.namespace, &event.name) {
                    Some(workload) => self.handle_workload(&workload, false).await,
                    None => self.handle_workload(&Workload::placeholder(&event), true).await,
                }
            }
            other => Err(ControllerError::UnsupportedKind(other.to_string())),
        }
    }

    /// Any change to a Helm release store Secret triggers a full Helm sync.
    async fn handle_secret(&self, event: &K8sResourceEvent) -> Result<()> {
        if event.is_delete() {
            return Ok(());
        }
        let reference = ObjectRef::<Secret>::new(&event.name).within(&event.namespace);
        let Some(secret) = self.caches.secrets.get(&reference) else {
            return Ok(());
        };
        if !is_helm_release_secret(&secret) {
            return Ok(());
        }
        let created = self.helm_sync.sync().await?;
        if created > 0 {
            info!("Helm sync created {} AppGroups", created);
        }
        Ok(())
    }

    /// Name of the AppGroup a workload belongs to.
    pub fn group_name(&self, workload: &Workload) -> String {
        if let Some(release) = workload.annotation(annotations::HELM_RELEASE_NAME) {
            return release.to_string();
        }

        let mut name = workload.release_name().unwrap_or(workload.name()).to_string();
        if let Some(manager) = workload.managed_by_workload() {
            match self.caches.deployment(workload.namespace(), manager) {
                Some(owner) => {
                    if let Some(instance) = owner.labels().get(labels::INSTANCE) {
                        name = instance.clone();
                    }
                }
                None => debug!("Managing Deployment {} of {} not cached", manager, workload.name()),
            }
        }
        name
    }

    #[instrument(skip(self, workload), fields(kind = %workload.kind(), name = %workload.name()))]
    pub async fn handle_workload(&self, workload: &Workload, delete: bool) -> Result<()> {
        let group_name = self.group_name(workload);
        let mut wrapper = self
            .groups
            .wrapper_for(workload.namespace(), &group_name, workload.default_group_spec())
            .await?;
        let item = workload.to_item_status();

        if delete {
            if wrapper.is_exists() {
                wrapper.remove_status_item(&item);
                let outcome = self.groups.persist(&mut wrapper).await?;
                debug!("Removed {} from {}: {:?}", item.name, group_name, outcome);
            }
        } else if workload.is_job() {
            if !wrapper.is_exists() {
                return Ok(());
            }
            wrapper.fix_deploy_item(&item);
            self.groups.persist(&mut wrapper).await?;
        } else {
            if !wrapper.is_exists() && (workload.is_helm() || workload.managed_by_workload().is_some()) {
                debug!("AppGroup {} not created yet, leaving {} to its owner", group_name, item.name);
                return Ok(());
            }
            wrapper.add_status_item(item);
            self.send_install_notices(&mut wrapper).await;
            if self.groups.persist(&mut wrapper).await? == PersistOutcome::Created {
                info!("AppGroup {} created for {}", group_name, workload.name());
            }
        }

        if !workload.is_job() {
            sync_services(&self.client, workload, delete).await?;
        }
        Ok(())
    }

    /// Report install completion for the group and its parent when they just became ready.
    /// The flag is only set after the callback succeeded, and is written with the status.
    async fn send_install_notices(&self, wrapper: &mut AppGroupWrapper) {
        self.send_install_notice(wrapper).await;
        if let Some(parent) = wrapper.parent_mut() {
            self.send_install_notice(parent).await;
        }
    }

    async fn send_install_notice(&self, wrapper: &mut AppGroupWrapper) {
        if !wrapper.needs_install_notice() {
            return;
        }
        match self.notifier.notify(NotifyAction::Install, wrapper.group()).await {
            Ok(()) => wrapper.mark_notified(),
            Err(e) => warn!("Install notification for {} failed: {}", wrapper.name(), e),
        }
    }
}

#[async_trait]
impl QueueHandler for WorkloadManager {
    async fn handle(&self, key: &str) -> Result<()> {
        self.handle_queue(key).await
    }
}
