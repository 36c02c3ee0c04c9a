// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch-backed local caches for every kind the controller reads.
//!
//! Each kind has a reflector store that is kept current by one watch loop.
//! The loop also classifies what changed, so the queue receives `add`,
//! `update` and `delete` events instead of raw watcher events.

use crate::constants::HELM_SECRET_TYPE;
use crate::queue::EventQueue;
use crate::types::{AppGroup, EventType, K8sResourceEvent, Workload};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::watcher::{self, Config as WatcherConfig, Event};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read side of every cache. Cheap to clone.
#[derive(Clone)]
pub struct ResourceCaches {
    pub deployments: Store<Deployment>,
    pub statefulsets: Store<StatefulSet>,
    pub daemonsets: Store<DaemonSet>,
    pub jobs: Store<Job>,
    pub secrets: Store<Secret>,
    pub appgroups: Store<AppGroup>,
    pub ingresses: Store<Ingress>,
}

/// Write side of every cache, consumed by the watch loops.
pub struct CacheWriters {
    pub deployments: Writer<Deployment>,
    pub statefulsets: Writer<StatefulSet>,
    pub daemonsets: Writer<DaemonSet>,
    pub jobs: Writer<Job>,
    pub secrets: Writer<Secret>,
    pub appgroups: Writer<AppGroup>,
    pub ingresses: Writer<Ingress>,
}

pub fn caches() -> (ResourceCaches, CacheWriters) {
    let (deployments, deployments_w) = reflector::store();
    let (statefulsets, statefulsets_w) = reflector::store();
    let (daemonsets, daemonsets_w) = reflector::store();
    let (jobs, jobs_w) = reflector::store();
    let (secrets, secrets_w) = reflector::store();
    let (appgroups, appgroups_w) = reflector::store();
    let (ingresses, ingresses_w) = reflector::store();

    (
        ResourceCaches {
            deployments,
            statefulsets,
            daemonsets,
            jobs,
            secrets,
            appgroups,
            ingresses,
        },
        CacheWriters {
            deployments: deployments_w,
            statefulsets: statefulsets_w,
            daemonsets: daemonsets_w,
            jobs: jobs_w,
            secrets: secrets_w,
            appgroups: appgroups_w,
            ingresses: ingresses_w,
        },
    )
}

fn lookup<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store.get(&ObjectRef::new(name).within(namespace))
}

fn in_namespace<K>(store: &Store<K>, namespace: &str) -> Vec<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .into_iter()
        .filter(|o| o.namespace().as_deref() == Some(namespace))
        .collect()
}

impl ResourceCaches {
    /// Block until every store has received its initial list.
    pub async fn wait_until_ready(&self) -> anyhow::Result<()> {
        self.deployments.wait_until_ready().await?;
        self.statefulsets.wait_until_ready().await?;
        self.daemonsets.wait_until_ready().await?;
        self.jobs.wait_until_ready().await?;
        self.secrets.wait_until_ready().await?;
        self.appgroups.wait_until_ready().await?;
        self.ingresses.wait_until_ready().await?;
        Ok(())
    }

    pub fn workload(&self, kind: &str, namespace: &str, name: &str) -> Option<Workload> {
        match kind {
            "Deployment" => lookup(&self.deployments, namespace, name).map(Workload::Deployment),
            "StatefulSet" => lookup(&self.statefulsets, namespace, name).map(Workload::StatefulSet),
            "DaemonSet" => lookup(&self.daemonsets, namespace, name).map(Workload::DaemonSet),
            "Job" => lookup(&self.jobs, namespace, name).map(Workload::Job),
            _ => None,
        }
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>> {
        lookup(&self.deployments, namespace, name)
    }

    pub fn appgroup(&self, namespace: &str, name: &str) -> Option<Arc<AppGroup>> {
        lookup(&self.appgroups, namespace, name)
    }

    pub fn appgroups_in(&self, namespace: &str) -> Vec<Arc<AppGroup>> {
        in_namespace(&self.appgroups, namespace)
    }

    pub fn helm_release_secrets(&self, namespace: &str) -> Vec<Arc<Secret>> {
        in_namespace(&self.secrets, namespace)
            .into_iter()
            .filter(|s| is_helm_release_secret(s))
            .collect()
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Arc<Ingress>> {
        lookup(&self.ingresses, namespace, name)
    }

    pub fn ingresses_in(&self, namespace: &str) -> Vec<Arc<Ingress>> {
        in_namespace(&self.ingresses, namespace)
    }
}

pub fn is_helm_release_secret(secret: &Secret) -> bool {
    secret.type_.as_deref() == Some(HELM_SECRET_TYPE)
}

/// A classified change to one cached object.
#[derive(Debug, Clone)]
pub enum ResourceChange<K> {
    /// Seen in the first full list after start-up
    Replayed(K),
    Added(K),
    Updated { old: Arc<K>, new: K },
    Deleted(K),
}

impl<K> ResourceChange<K> {
    pub fn object(&self) -> &K {
        match self {
            ResourceChange::Replayed(o) | ResourceChange::Added(o) | ResourceChange::Deleted(o) => o,
            ResourceChange::Updated { new, .. } => new,
        }
    }
}

/// Applies watcher events to a store and reports what changed.
///
/// Objects from an initial list are buffered until the list completes, the
/// same way the store itself swaps them in. A relist after a broken watch is
/// diffed against the previous store contents.
pub struct ChangeTracker<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    synced: bool,
    pending: Vec<K>,
    previous: HashMap<ObjectRef<K>, Arc<K>>,
}

impl<K> Default for ChangeTracker<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn default() -> Self {
        Self {
            synced: false,
            pending: Vec::new(),
            previous: HashMap::new(),
        }
    }
}

impl<K> ChangeTracker<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn observe(&mut self, writer: &mut Writer<K>, event: Event<K>) -> Vec<ResourceChange<K>> {
        let reader = writer.as_reader();
        let changes = match &event {
            Event::Init => {
                self.pending.clear();
                self.previous = reader
                    .state()
                    .into_iter()
                    .map(|o| (ObjectRef::from_obj(o.as_ref()), o))
                    .collect();
                Vec::new()
            }
            Event::InitApply(obj) => {
                self.pending.push(obj.clone());
                Vec::new()
            }
            Event::InitDone => self.finish_list(),
            Event::Apply(obj) => match reader.get(&ObjectRef::from_obj(obj)) {
                Some(old) => vec![ResourceChange::Updated {
                    old,
                    new: obj.clone(),
                }],
                None => vec![ResourceChange::Added(obj.clone())],
            },
            Event::Delete(obj) => vec![ResourceChange::Deleted(obj.clone())],
        };
        writer.apply_watcher_event(&event);
        changes
    }

    fn finish_list(&mut self) -> Vec<ResourceChange<K>> {
        let listed = std::mem::take(&mut self.pending);
        let mut previous = std::mem::take(&mut self.previous);

        if !self.synced {
            self.synced = true;
            return listed.into_iter().map(ResourceChange::Replayed).collect();
        }

        let mut changes = Vec::new();
        for obj in listed {
            match previous.remove(&ObjectRef::from_obj(&obj)) {
                None => changes.push(ResourceChange::Added(obj)),
                Some(old) if old.resource_version() != obj.resource_version() => {
                    changes.push(ResourceChange::Updated { old, new: obj })
                }
                Some(_) => {}
            }
        }
        changes.extend(
            previous
                .into_values()
                .map(|gone| ResourceChange::Deleted(gone.as_ref().clone())),
        );
        changes
    }
}

/// Keep `writer` current from a namespaced watch and hand every change to `on_change`
/// until `token` is cancelled.
pub async fn run_reflector<K, F>(
    api: Api<K>,
    mut writer: Writer<K>,
    token: CancellationToken,
    mut on_change: F,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: FnMut(ResourceChange<K>),
{
    let kind = K::kind(&()).to_string();
    let mut tracker = ChangeTracker::default();
    let stream = watcher::watcher(api, WatcherConfig::default()).default_backoff();
    futures::pin_mut!(stream);

    info!("Starting {} watch", kind);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    for change in tracker.observe(&mut writer, event) {
                        on_change(change);
                    }
                }
                Some(Err(e)) => warn!("{} watch error: {}", kind, e),
                None => break,
            },
        }
    }
    info!("{} watch stopped", kind);
}

/// Convert a change into the queue event the workers consume.
///
/// Only deletes keep labels and annotations, since the object can no longer be
/// read from the cache. Every other change is keyed by identity alone, so
/// repeated updates of one object coalesce while it waits.
pub fn to_queue_event<K>(change: &ResourceChange<K>) -> K8sResourceEvent
where
    K: Resource<DynamicType = ()>,
{
    match change {
        ResourceChange::Replayed(o) => {
            K8sResourceEvent::from_resource(o, EventType::Add, true).identity_only()
        }
        ResourceChange::Added(o) => {
            K8sResourceEvent::from_resource(o, EventType::Add, false).identity_only()
        }
        ResourceChange::Updated { new, .. } => {
            K8sResourceEvent::from_resource(new, EventType::Update, false).identity_only()
        }
        ResourceChange::Deleted(o) => K8sResourceEvent::from_resource(o, EventType::Delete, false),
    }
}

/// Run a reflector that pushes every change accepted by `filter` onto the queue.
pub async fn watch_into_queue<K>(
    api: Api<K>,
    writer: Writer<K>,
    queue: EventQueue,
    token: CancellationToken,
    filter: fn(&K) -> bool,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    run_reflector(api, writer, token, move |change| {
        if !filter(change.object()) {
            return;
        }
        let event = to_queue_event(&change);
        debug!("Queueing {:?} {}/{}", event.event_type, event.kind, event.name);
        queue.push(&event);
    })
    .await;
}
