// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Wires the caches, watch loops, queue and periodic Helm sync together.

use crate::config::Config;
use crate::controllers::WorkloadManager;
use crate::helm::{CliHelm, HelmClient};
use crate::kubernetes::cache::{is_helm_release_secret, watch_into_queue};
use crate::kubernetes::{caches, CacheWriters};
use crate::metrics::{self, Metrics};
use crate::notify::HttpNotifier;
use crate::queue::EventQueue;
use crate::static_assets::LocalStaticAssets;
use crate::types::AppGroup;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct AppController {
    client: Client,
    config: Config,
}

impl AppController {
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    /// Run until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let client = self.client;
        let config = self.config;
        let namespace = config.watch_namespace.clone();

        let (caches, writers) = caches();
        let queue = EventQueue::new(Metrics::new()?);
        let helm: Arc<dyn HelmClient> = Arc::new(CliHelm::new(caches.clone(), config.helm_binary.clone()));
        let notifier = Arc::new(HttpNotifier::new(config.notify_timeout)?);
        let assets = Arc::new(LocalStaticAssets::new(config.microapp_path.clone()));
        let workers = config.worker_count;
        let metrics_addr = config.metrics_addr.clone();
        let sync_interval = config.helm_sync_interval;

        let manager = Arc::new(WorkloadManager::new(
            client.clone(),
            config,
            caches.clone(),
            queue.clone(),
            helm,
            notifier,
            assets,
        ));

        let CacheWriters {
            deployments,
            statefulsets,
            daemonsets,
            jobs,
            secrets,
            appgroups,
            ingresses,
        } = writers;

        let mut watches = JoinSet::new();
        watches.spawn(watch_into_queue(
            Api::<Deployment>::namespaced(client.clone(), &namespace),
            deployments,
            queue.clone(),
            token.clone(),
            |_| true,
        ));
        watches.spawn(watch_into_queue(
            Api::<StatefulSet>::namespaced(client.clone(), &namespace),
            statefulsets,
            queue.clone(),
            token.clone(),
            |_| true,
        ));
        watches.spawn(watch_into_queue(
            Api::<DaemonSet>::namespaced(client.clone(), &namespace),
            daemonsets,
            queue.clone(),
            token.clone(),
            |_| true,
        ));
        watches.spawn(watch_into_queue(
            Api::<Job>::namespaced(client.clone(), &namespace),
            jobs,
            queue.clone(),
            token.clone(),
            |_| true,
        ));
        watches.spawn(watch_into_queue(
            Api::<Secret>::namespaced(client.clone(), &namespace),
            secrets,
            queue.clone(),
            token.clone(),
            is_helm_release_secret,
        ));
        watches.spawn(watch_into_queue(
            Api::<AppGroup>::namespaced(client.clone(), &namespace),
            appgroups,
            queue.clone(),
            token.clone(),
            |_| true,
        ));
        watches.spawn(watch_into_queue(
            Api::<Ingress>::namespaced(client.clone(), &namespace),
            ingresses,
            queue.clone(),
            token.clone(),
            |_| true,
        ));

        info!("Waiting for caches in namespace {} to sync", namespace);
        tokio::select! {
            _ = token.cancelled() => {
                warn!("Shutdown requested before caches synced");
                while watches.join_next().await.is_some() {}
                return Ok(());
            }
            ready = caches.wait_until_ready() => ready?,
        }
        info!("Caches synced");

        match manager.helm_sync().sync().await {
            Ok(created) => info!("Initial Helm sync created {} AppGroups", created),
            Err(e) => error!("Initial Helm sync failed: {}", e),
        }

        let helm_sync = manager.helm_sync().clone();
        let (_, synced, served) = tokio::join!(
            queue.run(manager, workers, token.clone()),
            helm_sync.run(sync_interval, token.clone()),
            metrics::serve(&metrics_addr, queue.metrics().clone(), token.clone())
        );
        if let Err(e) = served {
            error!("Metrics endpoint stopped: {:#}", e);
        }

        while watches.join_next().await.is_some() {}
        let metrics = queue.metrics();
        info!(
            processed = metrics.processed(),
            retries = metrics.retries(),
            dropped = metrics.dropped(),
            "Controller stopped"
        );
        synced
    }
}
