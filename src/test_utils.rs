// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: an in-memory Kubernetes API and recording fakes.

use crate::error::{ControllerError, Result};
use crate::helm::{HelmClient, Release};
use crate::notify::{NotifyAction, Notifier};
use crate::static_assets::StaticAssets;
use crate::types::AppGroup;
use async_trait::async_trait;
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher::Event;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

#[derive(Default)]
struct ServerState {
    objects: BTreeMap<String, Value>,
    requests: Vec<(String, String)>,
    failures: HashMap<(String, String), Vec<u16>>,
    resource_version: u64,
}

/// A fake API server that keeps objects by URL path.
///
/// Supports get, list (with equality label selectors), create, replace and
/// delete, which is everything the controller issues. Replaces carrying a
/// stale resourceVersion are rejected with 409. Deleting an object with
/// finalizers only marks it terminating; it goes away once a replace clears
/// the last finalizer.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    pub fn insert(&self, path: &str, object: Value) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(path.to_string(), object);
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    /// Store a typed object at its canonical path.
    pub fn insert_object<K>(&self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let meta = obj.meta();
        let path = object_path::<K>(
            meta.namespace.as_deref().unwrap_or("default"),
            meta.name.as_deref().unwrap_or_default(),
        );
        self.insert(&path, serde_json::to_value(obj).unwrap());
    }

    pub fn get_object<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        self.get(&object_path::<K>(namespace, name))
            .map(|v| serde_json::from_value(v).unwrap())
    }

    /// Answer the next `count` matching requests with `code` instead of serving them.
    pub fn fail(&self, method: &str, path: &str, code: u16, count: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((method.to_string(), path.to_string()), vec![code; count]);
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of requests with `method` whose path starts with `prefix`.
    pub fn count(&self, method: &str, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(m, p)| m == method && p.starts_with(prefix))
            .count()
    }

    fn handle(&self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) -> (u16, Value) {
        let mut state = self.state.lock().unwrap();
        state.requests.push((method.to_string(), path.to_string()));

        if let Some(codes) = state.failures.get_mut(&(method.to_string(), path.to_string())) {
            if let Some(code) = codes.pop() {
                return (code, status_json(code, "injected failure"));
            }
        }

        match method.as_str() {
            "GET" => {
                if let Some(obj) = state.objects.get(path) {
                    return (200, obj.clone());
                }
                if !is_collection(path) {
                    return (404, status_json(404, "not found"));
                }
                let selector = label_selector(query);
                let prefix = format!("{}/", path);
                let items: Vec<Value> = state
                    .objects
                    .iter()
                    .filter(|(p, _)| p.starts_with(&prefix) && !p[prefix.len()..].contains('/'))
                    .map(|(_, o)| o.clone())
                    .filter(|o| matches_selector(o, &selector))
                    .collect();
                (
                    200,
                    json!({
                        "apiVersion": "v1",
                        "kind": "List",
                        "metadata": {"resourceVersion": state.resource_version.to_string()},
                        "items": items,
                    }),
                )
            }
            "POST" => {
                let mut obj: Value = serde_json::from_slice(body).unwrap();
                let name = obj["metadata"]["name"].as_str().unwrap_or_default().to_string();
                let object_path = format!("{}/{}", path, name);
                if state.objects.contains_key(&object_path) {
                    return (409, status_json(409, "already exists"));
                }
                state.resource_version += 1;
                obj["metadata"]["resourceVersion"] = json!(state.resource_version.to_string());
                state.objects.insert(object_path, obj.clone());
                (201, obj)
            }
            "PUT" => {
                let mut obj: Value = serde_json::from_slice(body).unwrap();
                let Some(current) = state.objects.get(path) else {
                    return (404, status_json(404, "not found"));
                };
                let sent = obj["metadata"]["resourceVersion"].as_str();
                let stored = current["metadata"]["resourceVersion"].as_str();
                if sent.is_some() && stored.is_some() && sent != stored {
                    return (409, status_json(409, "the object has been modified"));
                }
                if is_terminating(&obj) && !has_finalizers(&obj) {
                    state.objects.remove(path);
                    return (200, obj);
                }
                state.resource_version += 1;
                obj["metadata"]["resourceVersion"] = json!(state.resource_version.to_string());
                state.objects.insert(path.to_string(), obj.clone());
                (200, obj)
            }
            "DELETE" => {
                let Some(current) = state.objects.get(path).cloned() else {
                    return (404, status_json(404, "not found"));
                };
                if has_finalizers(&current) {
                    // Finalizers hold the object in a terminating state.
                    let mut obj = current;
                    if !is_terminating(&obj) {
                        obj["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
                        state.resource_version += 1;
                        obj["metadata"]["resourceVersion"] = json!(state.resource_version.to_string());
                        state.objects.insert(path.to_string(), obj.clone());
                    }
                    return (200, obj);
                }
                state.objects.remove(path);
                (
                    200,
                    json!({"kind": "Status", "apiVersion": "v1", "status": "Success", "code": 200}),
                )
            }
            _ => (405, status_json(405, "method not allowed")),
        }
    }
}

/// Canonical path of a namespaced object.
pub fn object_path<K>(namespace: &str, name: &str) -> String
where
    K: Resource<DynamicType = ()>,
{
    format!("{}/{}", K::url_path(&(), Some(namespace)), name)
}

fn is_collection(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.iter().position(|s| *s == "namespaces") {
        Some(i) => segments.len() - i - 1 == 2,
        None => match segments.first() {
            Some(&"api") => segments.len() == 3,
            Some(&"apis") => segments.len() == 4,
            _ => false,
        },
    }
}

fn label_selector(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .filter(|(k, _)| k == "labelSelector")
                .flat_map(|(_, v)| {
                    v.split(',')
                        .filter_map(|pair| pair.split_once('='))
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn matches_selector(obj: &Value, selector: &[(String, String)]) -> bool {
    selector
        .iter()
        .all(|(k, v)| obj["metadata"]["labels"][k].as_str() == Some(v.as_str()))
}

fn has_finalizers(obj: &Value) -> bool {
    obj["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn is_terminating(obj: &Value) -> bool {
    obj["metadata"]["deletionTimestamp"].is_string()
}

fn status_json(code: u16, message: &str) -> Value {
    let reason = match code {
        404 => "NotFound",
        409 => "Conflict",
        _ => "InternalError",
    };
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    })
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            let (status, value) = server.handle(
                &parts.method,
                parts.uri.path(),
                parts.uri.query(),
                &bytes,
            );
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value)?))
                .unwrap())
        })
    }
}

/// Feed `objs` into a store as one complete initial list.
pub fn populate<K>(writer: &mut Writer<K>, objs: Vec<K>)
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    writer.apply_watcher_event(&Event::Init);
    for obj in objs {
        writer.apply_watcher_event(&Event::InitApply(obj));
    }
    writer.apply_watcher_event(&Event::InitDone);
}

pub fn make_appgroup(name: &str) -> AppGroup {
    let mut group = AppGroup::new(name, Default::default());
    group.metadata.namespace = Some("default".to_string());
    group
}

/// Notifier that records every call and answers with a fixed outcome.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(NotifyAction, String)>>,
    reject: bool,
}

impl RecordingNotifier {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(NotifyAction, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, action: NotifyAction, group: &AppGroup) -> Result<()> {
        let ticket = group.ticket().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push((action, ticket));
        if self.reject {
            return Err(ControllerError::NotifyError("status 500".to_string()));
        }
        Ok(())
    }
}

/// Helm release store backed by a fixed list.
#[derive(Default)]
pub struct FakeHelm {
    releases: Mutex<Vec<Release>>,
    uninstalled: Mutex<Vec<(String, String)>>,
}

impl FakeHelm {
    pub fn with_releases(releases: Vec<Release>) -> Self {
        Self {
            releases: Mutex::new(releases),
            ..Default::default()
        }
    }

    pub fn uninstalled(&self) -> Vec<(String, String)> {
        self.uninstalled.lock().unwrap().clone()
    }
}

#[async_trait]
impl HelmClient for FakeHelm {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>> {
        Ok(self
            .releases
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.uninstalled
            .lock()
            .unwrap()
            .push((release.to_string(), namespace.to_string()));
        Ok(())
    }
}

/// Static asset hook that records which releases were touched.
#[derive(Default)]
pub struct RecordingAssets {
    prefetched: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
}

impl RecordingAssets {
    pub fn prefetched(&self) -> Vec<String> {
        self.prefetched.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl StaticAssets for RecordingAssets {
    async fn prefetch(&self, group: &AppGroup) -> Result<()> {
        self.prefetched
            .lock()
            .unwrap()
            .push(group.metadata.name.clone().unwrap_or_default());
        Ok(())
    }

    async fn clean(&self, release: &str) -> Result<()> {
        self.cleaned.lock().unwrap().push(release.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths() {
        assert!(is_collection("/apis/apps/v1/namespaces/default/deployments"));
        assert!(!is_collection("/apis/apps/v1/namespaces/default/deployments/web"));
        assert!(is_collection("/api/v1/namespaces/default/services"));
        assert!(is_collection("/apis/appgroup.w7.cc/v1alpha1/appgroups"));
        assert!(!is_collection("/api/v1/namespaces/default"));
    }

    #[test]
    fn test_label_selector_parsing() {
        let selector = label_selector(Some("labelSelector=w7.cc%2Fidentifie%3Dshop&limit=5"));
        assert_eq!(selector, vec![("w7.cc/identifie".to_string(), "shop".to_string())]);
        assert!(label_selector(None).is_empty());
    }
}
