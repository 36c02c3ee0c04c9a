// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Read access to the Helm v3 release store and the uninstall command.
//!
//! Helm keeps every release revision in a Secret of type `helm.sh/release.v1`.
//! The `release` key holds base64 text of a gzipped JSON document.

use crate::error::{ControllerError, Result};
use crate::kubernetes::ResourceCaches;
use async_trait::async_trait;
use base64::Engine;
use flate2::read::GzDecoder;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use tokio::process::Command;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub version: i32,
    pub info: ReleaseInfo,
    pub chart: Chart,
    pub manifest: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ReleaseInfo {
    pub status: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Chart {
    pub metadata: ChartMetadata,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    pub app_version: String,
    pub description: String,
    pub icon: String,
    pub annotations: BTreeMap<String, String>,
}

impl Release {
    pub fn is_deployed(&self) -> bool {
        self.info.status == "deployed"
    }

    pub fn chart_annotation(&self, key: &str) -> Option<&str> {
        self.chart
            .metadata
            .annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Decode the release stored in a Helm release Secret.
pub fn decode_release(secret: &Secret) -> Result<Release> {
    let name = secret.name_any();
    let encoded = secret
        .data
        .as_ref()
        .and_then(|d| d.get("release"))
        .ok_or_else(|| ControllerError::InvalidRelease(format!("{}: no release data", name)))?;

    let raw = base64::engine::general_purpose::STANDARD
        .decode(&encoded.0)
        .map_err(|e| ControllerError::InvalidRelease(format!("{}: {}", name, e)))?;

    let json = if raw.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
        decoded
    } else {
        raw
    };

    serde_json::from_slice(&json).map_err(|e| ControllerError::InvalidRelease(format!("{}: {}", name, e)))
}

/// Keep only the highest revision of each release name, ordered by name.
pub fn latest_releases(releases: Vec<Release>) -> Vec<Release> {
    let mut latest: HashMap<String, Release> = HashMap::new();
    for release in releases {
        match latest.get(&release.name) {
            Some(current) if current.version >= release.version => {}
            _ => {
                latest.insert(release.name.clone(), release);
            }
        }
    }
    let mut releases: Vec<Release> = latest.into_values().collect();
    releases.sort_by(|a, b| a.name.cmp(&b.name));
    releases
}

/// Identity of one object in a rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ManifestHeader {
    api_version: String,
    kind: String,
    metadata: ManifestMetadata,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ManifestMetadata {
    name: String,
    namespace: Option<String>,
}

/// Split a multi-document manifest into the objects it declares.
pub fn parse_manifest(manifest: &str) -> Result<Vec<ManifestResource>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let header: ManifestHeader = serde_yaml::from_value(value)?;
        if header.kind.is_empty() || header.metadata.name.is_empty() {
            continue;
        }
        resources.push(ManifestResource {
            api_version: header.api_version,
            kind: header.kind,
            name: header.metadata.name,
            namespace: header.metadata.namespace,
        });
    }
    Ok(resources)
}

/// The Helm operations the controller depends on.
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Latest revision of every release in the namespace.
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>>;

    /// Uninstall a release. A release that does not exist is not an error.
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()>;
}

/// Reads releases from the cached release Secrets and shells out for uninstall.
pub struct CliHelm {
    caches: ResourceCaches,
    binary: String,
}

impl CliHelm {
    pub fn new(caches: ResourceCaches, binary: impl Into<String>) -> Self {
        Self {
            caches,
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl HelmClient for CliHelm {
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>> {
        let releases = self
            .caches
            .helm_release_secrets(namespace)
            .iter()
            .filter_map(|secret| match decode_release(secret) {
                Ok(release) => Some(release),
                Err(e) => {
                    warn!("Skipping undecodable Helm release secret: {}", e);
                    None
                }
            })
            .collect();
        Ok(latest_releases(releases))
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        info!("Uninstalling Helm release {}/{}", namespace, release);
        let output = Command::new(&self.binary)
            .args([
                "uninstall",
                release,
                "-n",
                namespace,
                "--wait",
                "--ignore-not-found",
                "--timeout",
                "600s",
            ])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ControllerError::HelmError(format!(
                "uninstall {} failed: {}",
                release,
                stderr.trim()
            )));
        }
        debug!("Helm uninstall of {} finished", release);
        Ok(())
    }
}
