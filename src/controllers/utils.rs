// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::error::Result;
use kube::{
    api::{DeleteParams, ListParams},
    Api, Client, Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Delete a namespaced object by name. A missing object is not an error.
/// Returns whether a delete was issued for an existing object.
pub async fn delete_named<K>(client: &Client, namespace: &str, name: &str) -> Result<bool>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            debug!("Deleted {} {}/{}", K::kind(&()), namespace, name);
            Ok(true)
        }
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// List namespaced objects matching an equality label selector.
pub async fn list_labelled<K>(client: &Client, namespace: &str, key: &str, value: &str) -> Result<Vec<K>>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("{}={}", key, value));
    Ok(api.list(&lp).await?.items)
}

/// Log the failure of a step that must not stop the steps after it.
pub fn best_effort<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to {}: {}", what, e);
            None
        }
    }
}
