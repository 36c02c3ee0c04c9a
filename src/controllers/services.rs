// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keeps the Services exposing a workload in line with its container ports.
//!
//! Three Services may exist per workload: `<name>` (ClusterIP),
//! `<name>-headless` and `<name>-lb` (LoadBalancer). Ports come from the pod
//! template; LoadBalancer ports are mapped through the `w7.cc.app/ports`
//! annotation.

use crate::constants::annotations;
use crate::controllers::utils::{best_effort, delete_named};
use crate::error::{ControllerError, Result};
use crate::types::Workload;
use k8s_openapi::api::core::v1::{ContainerPort, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

pub const HEADLESS_SUFFIX: &str = "-headless";
pub const LB_SUFFIX: &str = "-lb";

const CLUSTER_IP: &str = "ClusterIP";
const LOAD_BALANCER: &str = "LoadBalancer";

/// Service ports mirroring every declared container port.
pub fn service_ports(ports: &[ContainerPort]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|p| make_port(p, p.container_port))
        .collect()
}

/// LoadBalancer ports for the container ports that have a non-zero mapping.
pub fn lb_service_ports(ports: &[ContainerPort], mapping: &BTreeMap<String, i32>) -> Vec<ServicePort> {
    ports
        .iter()
        .filter_map(|p| {
            mapping
                .get(&p.container_port.to_string())
                .filter(|lb| **lb != 0)
                .map(|lb| make_port(p, *lb))
        })
        .collect()
}

pub fn parse_lb_ports(raw: &str) -> Result<BTreeMap<String, i32>> {
    serde_json::from_str(raw)
        .map_err(|e| ControllerError::InvalidAnnotation(format!("{}: {}", annotations::LB_PORTS, e)))
}

fn make_port(port: &ContainerPort, exposed: i32) -> ServicePort {
    ServicePort {
        name: port.name.clone(),
        protocol: Some(port.protocol.clone().unwrap_or_else(|| "TCP".to_string())),
        port: exposed,
        target_port: Some(IntOrString::Int(port.container_port)),
        ..Default::default()
    }
}

fn build_service(
    namespace: &str,
    name: &str,
    ports: Vec<ServicePort>,
    selector: &BTreeMap<String, String>,
    service_type: &str,
    headless: bool,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector: Some(selector.clone()),
            type_: Some(service_type.to_string()),
            cluster_ip: headless.then(|| "None".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ports compared by what the controller sets, ignoring server-filled fields.
fn same_ports(current: Option<&Vec<ServicePort>>, desired: &[ServicePort]) -> bool {
    let key = |p: &ServicePort| (p.name.clone(), p.protocol.clone(), p.port, p.target_port.clone());
    let current = current.map(Vec::as_slice).unwrap_or_default();
    current.len() == desired.len() && current.iter().map(key).eq(desired.iter().map(key))
}

/// Create the Service, or replace the port list of the one already there.
async fn apply_service(client: &Client, desired: Service) -> Result<()> {
    let namespace = desired.metadata.namespace.clone().unwrap_or_default();
    let name = desired.metadata.name.clone().unwrap_or_default();
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);

    let Some(mut existing) = api.get_opt(&name).await? else {
        api.create(&PostParams::default(), &desired).await?;
        info!("Created Service {}/{}", namespace, name);
        return Ok(());
    };

    let desired_spec = desired.spec.unwrap_or_default();
    let wants_lb = desired_spec.type_.as_deref() == Some(LOAD_BALANCER);
    let spec = existing.spec.get_or_insert_with(ServiceSpec::default);
    let current_type = spec.type_.as_deref().unwrap_or(CLUSTER_IP);
    if !wants_lb && current_type != CLUSTER_IP {
        debug!(
            "Service {}/{} is of type {}, leaving it to its owner",
            namespace, name, current_type
        );
        return Ok(());
    }

    let ports = desired_spec.ports.unwrap_or_default();
    if same_ports(spec.ports.as_ref(), &ports) {
        return Ok(());
    }
    spec.ports = Some(ports);
    api.replace(&name, &PostParams::default(), &existing).await?;
    info!("Updated ports of Service {}/{}", namespace, name);
    Ok(())
}

async fn delete_all(client: &Client, namespace: &str, name: &str) {
    for service in [
        name.to_string(),
        format!("{}{}", name, LB_SUFFIX),
        format!("{}{}", name, HEADLESS_SUFFIX),
    ] {
        best_effort(
            &format!("delete Service {}/{}", namespace, service),
            delete_named::<Service>(client, namespace, &service).await,
        );
    }
}

/// Bring the Services of `workload` in line with its ports, or remove them on delete.
#[instrument(skip(client, workload), fields(kind = %workload.kind(), name = %workload.name()))]
pub async fn sync_services(client: &Client, workload: &Workload, delete: bool) -> Result<()> {
    let namespace = workload.namespace();
    let name = workload.name();

    if delete {
        delete_all(client, namespace, name).await;
        return Ok(());
    }

    let headless = workload.annotation(annotations::CREATE_HEADLESS_SVC) == Some("true");
    if !headless {
        best_effort(
            "delete headless Service",
            delete_named::<Service>(client, namespace, &format!("{}{}", name, HEADLESS_SUFFIX)).await,
        );
    }

    let Some(template) = workload.pod_template() else {
        return Ok(());
    };
    let ports = workload.container_ports();
    if ports.is_empty() {
        debug!("{} {} declares no ports, removing its Services", workload.kind(), name);
        delete_all(client, namespace, name).await;
        return Ok(());
    }
    let selector = template.metadata.as_ref().and_then(|m| m.labels.clone()).unwrap_or_default();

    let exposed = service_ports(&ports);
    // Without the annotation the base Service belongs to whoever shipped the workload.
    if workload
        .annotation(annotations::CREATE_SVC)
        .is_some_and(|v| v != "false")
    {
        apply_service(
            client,
            build_service(namespace, name, exposed.clone(), &selector, CLUSTER_IP, false),
        )
        .await?;
    }
    if headless {
        let headless_name = format!("{}{}", name, HEADLESS_SUFFIX);
        apply_service(
            client,
            build_service(namespace, &headless_name, exposed, &selector, CLUSTER_IP, true),
        )
        .await?;
    }

    let Some(raw) = workload.annotation(annotations::LB_PORTS) else {
        return Ok(());
    };
    let mapping = match parse_lb_ports(raw) {
        Ok(mapping) => mapping,
        Err(e) => {
            warn!("Ignoring LoadBalancer ports of {}: {}", name, e);
            return Ok(());
        }
    };
    let lb_name = format!("{}{}", name, LB_SUFFIX);
    let lb_ports = lb_service_ports(&ports, &mapping);
    if lb_ports.is_empty() {
        best_effort(
            "delete LoadBalancer Service",
            delete_named::<Service>(client, namespace, &lb_name).await,
        );
        return Ok(());
    }
    apply_service(
        client,
        build_service(namespace, &lb_name, lb_ports, &selector, LOAD_BALANCER, false),
    )
    .await
}
