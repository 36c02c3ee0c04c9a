// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Queue key describing one observed resource change.

use crate::error::{ControllerError, Result};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Add,
    Update,
    Delete,
}

/// Identity of a changed resource plus the labels needed to route it after it is gone.
///
/// The serialized form is the queue key, so two pending events with the same
/// identity, type and metadata coalesce into one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct K8sResourceEvent {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub event_type: EventType,
    /// Set only for objects replayed by the initial cache sync
    #[serde(default)]
    pub is_init: bool,
}

impl K8sResourceEvent {
    pub fn new(
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
        event_type: EventType,
    ) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            event_type,
            is_init: false,
        }
    }

    pub fn from_resource<K>(obj: &K, event_type: EventType, is_init: bool) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            labels: obj.labels().clone(),
            annotations: obj.annotations().clone(),
            event_type,
            is_init,
        }
    }

    /// Drop labels and annotations, leaving the identity and event type.
    pub fn identity_only(mut self) -> Self {
        self.labels.clear();
        self.annotations.clear();
        self
    }

    pub fn is_delete(&self) -> bool {
        self.event_type == EventType::Delete
    }

    pub fn to_key(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The object this event is about, independent of what happened to it.
    pub fn object_id(&self) -> String {
        format!("{}/{}/{}/{}", self.api_version, self.kind, self.namespace, self.name)
    }

    pub fn from_key(key: &str) -> Result<Self> {
        serde_json::from_str(key).map_err(|e| ControllerError::InvalidKey(format!("{}: {}", key, e)))
    }
}

/// Object id of a queue key. Keys that are not events stand for themselves.
pub fn object_id_of(key: &str) -> String {
    match serde_json::from_str::<K8sResourceEvent>(key) {
        Ok(event) => event.object_id(),
        Err(_) => key.to_string(),
    }
}
