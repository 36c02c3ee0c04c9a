// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mirrors deployed Helm releases into AppGroups.

use crate::appgroup::AppGroupApi;
use crate::constants::{chart, FINALIZER};
use crate::error::Result;
use crate::helm::{parse_manifest, HelmClient, Release};
use crate::kubernetes::ResourceCaches;
use crate::queue::EventQueue;
use crate::types::{AppGroup, AppGroupSpec, AppGroupStatus, EventType, GroupType, HelmConfig, K8sResourceEvent};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const RECHECKED_KINDS: [&str; 3] = ["Deployment", "StatefulSet", "DaemonSet"];

/// Build the AppGroup that stands for a release nobody has grouped yet.
pub fn release_to_appgroup(release: &Release) -> AppGroup {
    let meta = &release.chart.metadata;
    let annotation = |key: &str| release.chart_annotation(key).map(str::to_string);

    let (group_type, is_helm) = if release.chart_annotation(chart::SOURCE) == Some("zpk") {
        (GroupType::Zpk, release.chart_annotation(chart::MANIFEST_TYPE) == Some("helm"))
    } else {
        (GroupType::Helm, true)
    };

    AppGroup {
        metadata: ObjectMeta {
            name: Some(release.name.clone()),
            namespace: Some(release.namespace.clone()),
            finalizers: Some(vec![FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: AppGroupSpec {
            identifie: annotation(chart::IDENTIFIE).unwrap_or_else(|| release.name.clone()),
            group_type,
            version: annotation(chart::ZPK_VERSION).unwrap_or_else(|| meta.app_version.clone()),
            title: annotation(chart::TITLE).unwrap_or_else(|| release.name.clone()),
            logo: annotation(chart::LOGO).unwrap_or_else(|| meta.icon.clone()),
            description: meta.description.clone(),
            suffix: release.name.clone(),
            zpk_url: annotation(chart::ZPK_URL).unwrap_or_default(),
            helm_config: HelmConfig {
                chart_name: annotation(chart::CHART_NAME).unwrap_or_default(),
                repository: annotation(chart::REPOSITORY_URL).unwrap_or_default(),
                version: meta.app_version.clone(),
            },
            is_helm,
            ..Default::default()
        },
        status: Some(AppGroupStatus {
            ready: true,
            ..Default::default()
        }),
    }
}

/// Creates AppGroups for deployed releases that have none.
///
/// Groups of releases that disappeared are left alone. The uninstall path
/// removes those, and a sync racing an uninstall would otherwise see the
/// release as missing too early.
#[derive(Clone)]
pub struct HelmWorkloadSync {
    helm: Arc<dyn HelmClient>,
    caches: ResourceCaches,
    groups: AppGroupApi,
    queue: EventQueue,
    namespace: String,
    recheck_delay: Duration,
}

impl HelmWorkloadSync {
    pub fn new(
        helm: Arc<dyn HelmClient>,
        caches: ResourceCaches,
        groups: AppGroupApi,
        queue: EventQueue,
        namespace: impl Into<String>,
        recheck_delay: Duration,
    ) -> Self {
        Self {
            helm,
            caches,
            groups,
            queue,
            namespace: namespace.into(),
            recheck_delay,
        }
    }

    /// Returns how many AppGroups were created.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn sync(&self) -> Result<usize> {
        let releases = self.helm.list_releases(&self.namespace).await?;
        let grouped: HashSet<String> = self
            .caches
            .appgroups_in(&self.namespace)
            .iter()
            .map(|g| g.name_any())
            .collect();

        let mut created = 0;
        for release in releases.iter().filter(|r| !grouped.contains(&r.name)) {
            if !release.is_deployed() {
                debug!("Release {} is {}, skipping", release.name, release.info.status);
                continue;
            }
            match self.groups.create(&release_to_appgroup(release)).await {
                Ok(_) => {
                    info!("Created AppGroup for Helm release {}", release.name);
                    created += 1;
                }
                Err(e) if e.is_conflict() => {
                    debug!("AppGroup {} already exists", release.name);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to create AppGroup for release {}: {}", release.name, e);
                    continue;
                }
            }
            self.schedule_rechecks(release);
        }
        Ok(created)
    }

    /// Revisit the release's workloads once they had time to roll out.
    fn schedule_rechecks(&self, release: &Release) {
        let resources = match parse_manifest(&release.manifest) {
            Ok(resources) => resources,
            Err(e) => {
                warn!("Failed to decode manifest of release {}: {}", release.name, e);
                return;
            }
        };
        for resource in resources
            .into_iter()
            .filter(|r| RECHECKED_KINDS.contains(&r.kind.as_str()))
        {
            let namespace = resource.namespace.unwrap_or_else(|| release.namespace.clone());
            let event = K8sResourceEvent::new(
                "apps/v1",
                &resource.kind,
                &resource.name,
                &namespace,
                EventType::Update,
            );
            debug!(
                "Re-checking {} {}/{} in {:?}",
                resource.kind, namespace, resource.name, self.recheck_delay
            );
            self.queue.add_after(&event, self.recheck_delay);
        }
    }

    /// Sync every `interval` until cancelled. The first sync is left to the caller.
    pub async fn run(self, interval: Duration, token: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync().await {
                        error!("Periodic Helm sync failed: {}", e);
                    }
                }
            }
        }
        info!("Helm sync stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::{Chart, ChartMetadata, ReleaseInfo};
    use crate::metrics::Metrics;
    use crate::test_utils::{make_appgroup, populate, FakeApiServer, FakeHelm};
    use std::collections::BTreeMap;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: shop
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: shop-web
---
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: shop-db
  namespace: data
"#;

    fn make_release(name: &str, status: &str, annotations: &[(&str, &str)]) -> Release {
        Release {
            name: name.to_string(),
            namespace: "default".to_string(),
            version: 1,
            info: ReleaseInfo {
                status: status.to_string(),
                ..Default::default()
            },
            chart: Chart {
                metadata: ChartMetadata {
                    name: name.to_string(),
                    version: "0.1.0".to_string(),
                    app_version: "2.4.0".to_string(),
                    description: "A shop".to_string(),
                    icon: "https://example.com/icon.png".to_string(),
                    annotations: annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                },
            },
            manifest: MANIFEST.to_string(),
        }
    }

    #[test]
    fn test_plain_chart_becomes_helm_group() {
        let group = release_to_appgroup(&make_release("shop", "deployed", &[]));

        assert_eq!(group.spec.group_type, GroupType::Helm);
        assert!(group.spec.is_helm);
        assert_eq!(group.spec.identifie, "shop");
        assert_eq!(group.spec.title, "shop");
        assert_eq!(group.spec.logo, "https://example.com/icon.png");
        assert_eq!(group.spec.version, "2.4.0");
        assert_eq!(group.spec.suffix, "shop");
        assert_eq!(group.finalizers(), &[FINALIZER.to_string()]);
        assert!(group.is_ready());
        assert!(group.status.as_ref().unwrap().items.is_empty());
    }

    #[test]
    fn test_zpk_chart_annotations() {
        let release = make_release(
            "shop",
            "deployed",
            &[
                (chart::SOURCE, "zpk"),
                (chart::IDENTIFIE, "w7-shop"),
                (chart::TITLE, "Shop"),
                (chart::ZPK_VERSION, "1.0.3"),
                (chart::ZPK_URL, "https://zpk.example.com/shop"),
                (chart::CHART_NAME, "shop-chart"),
                (chart::REPOSITORY_URL, "https://charts.example.com"),
            ],
        );
        let group = release_to_appgroup(&release);

        assert_eq!(group.spec.group_type, GroupType::Zpk);
        assert!(!group.spec.is_helm);
        assert_eq!(group.spec.identifie, "w7-shop");
        assert_eq!(group.spec.title, "Shop");
        assert_eq!(group.spec.version, "1.0.3");
        assert_eq!(group.spec.zpk_url, "https://zpk.example.com/shop");
        assert_eq!(group.spec.helm_config.chart_name, "shop-chart");
        assert_eq!(group.spec.helm_config.version, "2.4.0");

        let wrapped = make_release(
            "shop",
            "deployed",
            &[(chart::SOURCE, "zpk"), (chart::MANIFEST_TYPE, "helm")],
        );
        assert!(release_to_appgroup(&wrapped).spec.is_helm);
    }

    #[tokio::test]
    async fn test_sync_creates_missing_groups_only() {
        let server = FakeApiServer::new();
        let (caches, mut writers) = crate::kubernetes::caches();
        populate(&mut writers.appgroups, vec![make_appgroup("blog")]);
        let helm = Arc::new(FakeHelm::with_releases(vec![
            make_release("shop", "deployed", &[]),
            make_release("blog", "deployed", &[]),
            make_release("broken", "failed", &[]),
        ]));
        let queue = EventQueue::new(Metrics::new().unwrap());
        let sync = HelmWorkloadSync::new(
            helm,
            caches,
            AppGroupApi::new(server.client()),
            queue.clone(),
            "default",
            Duration::ZERO,
        );

        assert_eq!(sync.sync().await.unwrap(), 1);

        assert!(server.get_object::<AppGroup>("default", "shop").is_some());
        assert!(server.get_object::<AppGroup>("default", "broken").is_none());
        assert_eq!(server.count("POST", "/apis/appgroup.w7.cc"), 1);

        let mut queued = Vec::new();
        while !queue.is_empty() {
            let key = queue.get().await.unwrap();
            queued.push(K8sResourceEvent::from_key(&key).unwrap());
            queue.done(&key);
        }
        queued.sort_by(|a, b| a.name.cmp(&b.name));
        let summary: Vec<(&str, &str, &str)> = queued
            .iter()
            .map(|e| (e.kind.as_str(), e.namespace.as_str(), e.name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![("StatefulSet", "data", "shop-db"), ("Deployment", "default", "shop-web")]
        );
        assert!(queued.iter().all(|e| e.event_type == EventType::Update));
    }

    #[tokio::test]
    async fn test_existing_group_conflict_is_not_an_error() {
        let server = FakeApiServer::new();
        server.insert_object(&make_appgroup("shop"));
        let (caches, mut writers) = crate::kubernetes::caches();
        populate(&mut writers.appgroups, vec![]);
        let sync = HelmWorkloadSync::new(
            Arc::new(FakeHelm::with_releases(vec![make_release("shop", "deployed", &[])])),
            caches,
            AppGroupApi::new(server.client()),
            EventQueue::new(Metrics::new().unwrap()),
            "default",
            Duration::from_secs(60),
        );

        assert_eq!(sync.sync().await.unwrap(), 0);
    }
}
