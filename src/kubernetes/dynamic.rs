// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources owned by other operators, addressed without typed bindings.

use crate::error::Result;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use tracing::debug;

pub fn microapp_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("microapp.w7.cc", "v1alpha1", "MicroApp"),
        "microapps",
    )
}

pub fn certificate_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"),
        "certificates",
    )
}

/// Delete a namespaced dynamic object. A missing object is not an error.
/// Returns whether anything was deleted.
pub async fn delete_dynamic(
    client: &Client,
    resource: &ApiResource,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, resource);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!("Deleted {} {}/{}", resource.kind, namespace, name);
            Ok(true)
        }
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeApiServer;

    #[test]
    fn test_resource_paths() {
        let microapp = microapp_resource();
        assert_eq!(microapp.api_version, "microapp.w7.cc/v1alpha1");
        assert_eq!(microapp.plural, "microapps");

        let certificate = certificate_resource();
        assert_eq!(certificate.group, "cert-manager.io");
        assert_eq!(certificate.plural, "certificates");
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_ok() {
        let server = FakeApiServer::new();
        let client = server.client();

        let deleted = delete_dynamic(&client, &microapp_resource(), "default", "shop")
            .await
            .unwrap();
        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_delete_existing_object() {
        let server = FakeApiServer::new();
        server.insert(
            "/apis/cert-manager.io/v1/namespaces/default/certificates/shop-tls",
            serde_json::json!({
                "apiVersion": "cert-manager.io/v1",
                "kind": "Certificate",
                "metadata": {"name": "shop-tls", "namespace": "default"}
            }),
        );

        let deleted = delete_dynamic(&server.client(), &certificate_resource(), "default", "shop-tls")
            .await
            .unwrap();
        assert!(deleted);
        assert!(server
            .get("/apis/cert-manager.io/v1/namespaces/default/certificates/shop-tls")
            .is_none());
    }
}
