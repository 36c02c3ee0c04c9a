// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Removal of everything an AppGroup brought into its namespace.
//!
//! Every step is best-effort: a failure is logged and the next step runs, so a
//! terminating group never gets stuck on one stale object.

use crate::config::Config;
use crate::constants::cleanup::{UNINSTALL_JOB_TTL_SECS, UNINSTALL_SHELL_TYPE};
use crate::constants::{annotations, labels};
use crate::controllers::services::LB_SUFFIX;
use crate::controllers::utils::{best_effort, delete_named, list_labelled};
use crate::controllers::WorkloadManager;
use crate::error::{ControllerError, Result};
use crate::kubernetes::dynamic::{delete_dynamic, microapp_resource};
use crate::types::AppGroup;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, ResourceExt};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

const JOB_SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const JOB_SUFFIX_LEN: usize = 12;

/// A lifecycle script registered on a group.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Shell {
    pub shell: String,
    pub title: String,
    #[serde(rename = "type")]
    pub shell_type: String,
    pub search_job: String,
    /// Image to run the script in, the controller image when empty
    pub image: String,
}

pub fn parse_shells(group: &AppGroup) -> Result<Vec<Shell>> {
    match group.annotation(annotations::SHELLS) {
        None => Ok(Vec::new()),
        Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ControllerError::InvalidAnnotation(format!("{}: {}", annotations::SHELLS, e))),
    }
}

/// The uninstall script of a group, if it registered a non-empty one.
pub fn uninstall_shell(group: &AppGroup) -> Result<Option<Shell>> {
    Ok(parse_shells(group)?
        .into_iter()
        .find(|s| s.shell_type == UNINSTALL_SHELL_TYPE)
        .filter(|s| !s.shell.trim().is_empty()))
}

pub fn uninstall_job_name(group: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..JOB_SUFFIX_LEN)
        .map(|_| JOB_SUFFIX_CHARS[rng.gen_range(0..JOB_SUFFIX_CHARS.len())] as char)
        .collect();
    format!("{}-uninstall-{}", group, suffix)
}

/// One-shot Job running the uninstall script of `group`.
pub fn build_uninstall_job(group: &AppGroup, shell: &Shell, config: &Config) -> Job {
    let image = if shell.image.is_empty() {
        config.self_image.clone()
    } else {
        shell.image.clone()
    };
    let container = Container {
        name: "uninstall".to_string(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), shell.shell.clone()]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(uninstall_job_name(&group.name_any())),
            namespace: group.namespace(),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(UNINSTALL_JOB_TTL_SECS),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    dns_policy: Some("ClusterFirstWithHostNet".to_string()),
                    service_account_name: Some(config.service_account_name.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl WorkloadManager {
    /// Tear down what the group installed. Never fails; every step logs its own error.
    #[instrument(skip(self, group), fields(group = %group.name_any()))]
    pub(crate) async fn clean_app_group(&self, group: &AppGroup) {
        let name = group.name_any();
        let namespace = group.namespace().unwrap_or_default();
        info!("Cleaning up AppGroup {}/{}", namespace, name);

        // Uninstall first so controllers watching the workloads do not race the release.
        if group.spec.is_helm {
            best_effort(
                "uninstall Helm release",
                self.helm.uninstall(&name, &namespace).await,
            );
        }

        self.delete_items(group, &namespace).await;
        self.delete_labelled_jobs(&name, &namespace).await;

        let ingresses = best_effort(
            "list Ingresses",
            list_labelled::<Ingress>(&self.client, &namespace, labels::INGRESS_GROUP, &name).await,
        );
        for ingress in ingresses.unwrap_or_default() {
            let ingress_name = ingress.name_any();
            best_effort(
                &format!("delete Ingress {}", ingress_name),
                delete_named::<Ingress>(&self.client, &namespace, &ingress_name).await,
            );
        }

        best_effort(
            "delete MicroApp",
            delete_dynamic(&self.client, &microapp_resource(), &namespace, &name).await,
        );
        best_effort("clean static assets", self.assets.clean(&name).await);

        best_effort(
            "uninstall Helm release",
            self.helm.uninstall(&name, &namespace).await,
        );
        self.run_uninstall_shell(group, &namespace).await;
    }

    /// Delete the workloads recorded in `status.items` along with their Services.
    async fn delete_items(&self, group: &AppGroup, namespace: &str) {
        let Some(status) = group.status.as_ref() else {
            return;
        };
        for item in &status.items {
            let client = &self.client;
            let result = match item.kind.as_str() {
                "Deployment" => delete_named::<Deployment>(client, namespace, &item.name).await,
                "StatefulSet" => delete_named::<StatefulSet>(client, namespace, &item.name).await,
                "DaemonSet" => delete_named::<DaemonSet>(client, namespace, &item.name).await,
                "CronJob" => delete_named::<CronJob>(client, namespace, &item.name).await,
                "Job" => delete_named::<Job>(client, namespace, &item.name).await,
                other => {
                    debug!("Not deleting item {} of kind {}", item.name, other);
                    continue;
                }
            };
            best_effort(&format!("delete {} {}", item.kind, item.name), result);

            for service in [item.name.clone(), format!("{}{}", item.name, LB_SUFFIX)] {
                best_effort(
                    &format!("delete Service {}", service),
                    delete_named::<Service>(client, namespace, &service).await,
                );
            }
        }
    }

    /// Jobs and CronJobs that carry the group label but never made it into the status.
    async fn delete_labelled_jobs(&self, name: &str, namespace: &str) {
        let jobs = best_effort(
            "list Jobs",
            list_labelled::<Job>(&self.client, namespace, labels::GROUP_NAME, name).await,
        );
        for job in jobs.unwrap_or_default() {
            let job_name = job.name_any();
            best_effort(
                &format!("delete Job {}", job_name),
                delete_named::<Job>(&self.client, namespace, &job_name).await,
            );
        }

        let cron_jobs = best_effort(
            "list CronJobs",
            list_labelled::<CronJob>(&self.client, namespace, labels::GROUP_NAME, name).await,
        );
        for cron_job in cron_jobs.unwrap_or_default() {
            let cron_name = cron_job.name_any();
            best_effort(
                &format!("delete CronJob {}", cron_name),
                delete_named::<CronJob>(&self.client, namespace, &cron_name).await,
            );
        }
    }

    async fn run_uninstall_shell(&self, group: &AppGroup, namespace: &str) {
        let shell = match uninstall_shell(group) {
            Ok(Some(shell)) => shell,
            Ok(None) => return,
            Err(e) => {
                warn!("Skipping uninstall script of {}: {}", group.name_any(), e);
                return;
            }
        };
        let job = build_uninstall_job(group, &shell, &self.config);
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        if let Some(created) = best_effort(
            "create uninstall Job",
            jobs.create(&PostParams::default(), &job).await.map_err(Into::into),
        ) {
            info!("Started uninstall Job {}", created.name_any());
        }
    }
}
