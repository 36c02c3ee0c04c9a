// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keeps the domain list of an AppGroup in line with the Ingresses of its release.
//!
//! Ingress events arrive through the work queue like every other kind. The
//! handler compares the cached Ingress with the one it last applied, so the
//! order in which add, update and delete events coalesce does not matter.

use crate::appgroup::AppGroupApi;
use crate::constants::{annotations, labels};
use crate::error::Result;
use crate::kubernetes::dynamic::{certificate_resource, delete_dynamic};
use crate::kubernetes::ResourceCaches;
use crate::types::K8sResourceEvent;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Client, ResourceExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// The external URL an Ingress serves, taken from its first rule.
pub fn ingress_url(ingress: &Ingress, tls_issuer: &str) -> Option<String> {
    let rule = ingress.spec.as_ref()?.rules.as_ref()?.first()?;
    let host = rule.host.as_deref().unwrap_or_default();
    let scheme = if has_auto_tls(ingress, tls_issuer) {
        "https"
    } else {
        "http"
    };
    let mut url = format!("{}://{}", scheme, host);

    let path = rule
        .http
        .as_ref()
        .and_then(|http| http.paths.first())
        .and_then(|p| p.path.as_deref())
        .unwrap_or_default();
    if !path.is_empty() && path != "/" {
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
    }
    Some(url)
}

pub fn group_of(ingress: &Ingress) -> Option<&str> {
    ingress
        .labels()
        .get(labels::INGRESS_GROUP)
        .map(String::as_str)
        .filter(|g| !g.is_empty())
}

fn has_auto_tls(ingress: &Ingress, tls_issuer: &str) -> bool {
    ingress
        .annotations()
        .get(annotations::CLUSTER_ISSUER)
        .is_some_and(|issuer| issuer == tls_issuer)
}

fn tls_secrets(ingress: &Ingress) -> BTreeSet<String> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.tls.iter().flatten())
        .filter_map(|tls| tls.secret_name.clone())
        .collect()
}

/// TLS secrets whose certificates lost their Ingress. `new` is `None` for a delete.
pub fn certificates_to_retire(old: &Ingress, new: Option<&Ingress>, tls_issuer: &str) -> BTreeSet<String> {
    if !has_auto_tls(old, tls_issuer) {
        return BTreeSet::new();
    }
    match new {
        Some(new) if has_auto_tls(new, tls_issuer) => BTreeSet::new(),
        _ => tls_secrets(old),
    }
}

type IngressId = (String, String);

#[derive(Clone)]
pub struct IngressHooks {
    groups: AppGroupApi,
    client: Client,
    caches: ResourceCaches,
    tls_issuer: String,
    /// Last Ingress state whose domains and certificates were applied
    applied: Arc<Mutex<HashMap<IngressId, Arc<Ingress>>>>,
}

impl IngressHooks {
    pub fn new(client: Client, caches: ResourceCaches, tls_issuer: impl Into<String>) -> Self {
        Self {
            groups: AppGroupApi::new(client.clone()),
            client,
            caches,
            tls_issuer: tls_issuer.into(),
            applied: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn applied(&self) -> MutexGuard<'_, HashMap<IngressId, Arc<Ingress>>> {
        self.applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bring domains and certificates in line with the cached Ingress.
    ///
    /// The start-up replay only records what exists: the domain list already
    /// reflects those Ingresses. An error leaves the record untouched, so the
    /// queue's retry repeats the same transition.
    pub async fn handle_event(&self, event: &K8sResourceEvent) -> Result<()> {
        let id = (event.namespace.clone(), event.name.clone());
        let current = self.caches.ingress(&event.namespace, &event.name);

        if event.is_init {
            if let Some(ingress) = current {
                self.applied().insert(id, ingress);
            }
            return Ok(());
        }

        let previous = self.applied().get(&id).cloned();
        match (previous, current) {
            (None, Some(new)) => {
                self.on_add(&new).await?;
                self.applied().insert(id, new);
            }
            (Some(old), Some(new)) => {
                if old.resource_version() == new.resource_version() {
                    return Ok(());
                }
                self.on_update(&old, &new).await?;
                self.applied().insert(id, new);
            }
            (Some(old), None) => {
                self.on_delete(&old).await?;
                self.applied().remove(&id);
            }
            (None, None) => debug!("Ingress {} was never applied, nothing to undo", event.name),
        }
        Ok(())
    }

    #[instrument(skip(self, ingress), fields(ingress = %ingress.name_any()))]
    pub async fn on_add(&self, ingress: &Ingress) -> Result<()> {
        let (Some(group), Some(url)) = (group_of(ingress), ingress_url(ingress, &self.tls_issuer)) else {
            return Ok(());
        };
        let namespace = ingress.namespace().unwrap_or_default();
        if self
            .groups
            .modify(&namespace, group, |g| g.append_domain(&url))
            .await?
        {
            info!("Added domain {} to AppGroup {}", url, group);
        }
        Ok(())
    }

    #[instrument(skip(self, old, new), fields(ingress = %new.name_any()))]
    pub async fn on_update(&self, old: &Ingress, new: &Ingress) -> Result<()> {
        let namespace = new.namespace().unwrap_or_default();
        let old_url = ingress_url(old, &self.tls_issuer);
        let new_url = ingress_url(new, &self.tls_issuer);

        match (group_of(old), group_of(new)) {
            (Some(before), Some(after)) if before == after => {
                if old_url != new_url {
                    self.groups
                        .modify(&namespace, after, |g| {
                            let removed = old_url.as_deref().is_some_and(|u| g.delete_domain(u));
                            let added = new_url.as_deref().is_some_and(|u| g.append_domain(u));
                            removed || added
                        })
                        .await?;
                }
            }
            (before, _) => {
                if let (Some(group), Some(url)) = (before, old_url.as_deref()) {
                    self.groups
                        .modify(&namespace, group, |g| g.delete_domain(url))
                        .await?;
                }
                self.on_add(new).await?;
            }
        }

        for secret in certificates_to_retire(old, Some(new), &self.tls_issuer) {
            self.delete_certificate_unless_shared(&namespace, &secret, &new.name_any())
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, ingress), fields(ingress = %ingress.name_any()))]
    pub async fn on_delete(&self, ingress: &Ingress) -> Result<()> {
        let namespace = ingress.namespace().unwrap_or_default();
        if let (Some(group), Some(url)) = (group_of(ingress), ingress_url(ingress, &self.tls_issuer)) {
            if self
                .groups
                .modify(&namespace, group, |g| g.delete_domain(&url))
                .await?
            {
                info!("Removed domain {} from AppGroup {}", url, group);
            }
        }

        for secret in certificates_to_retire(ingress, None, &self.tls_issuer) {
            self.delete_certificate_unless_shared(&namespace, &secret, &ingress.name_any())
                .await?;
        }
        Ok(())
    }

    /// Delete the Certificate behind `secret` unless another Ingress still serves it.
    async fn delete_certificate_unless_shared(&self, namespace: &str, secret: &str, owner: &str) -> Result<bool> {
        let shared = self
            .caches
            .ingresses_in(namespace)
            .iter()
            .filter(|other| other.name_any() != owner)
            .any(|other| tls_secrets(other).contains(secret));
        if shared {
            debug!("Certificate {} is still in use", secret);
            return Ok(false);
        }
        let deleted = delete_dynamic(&self.client, &certificate_resource(), namespace, secret).await?;
        if deleted {
            info!("Deleted Certificate {}/{}", namespace, secret);
        }
        Ok(deleted)
    }
}
