// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_IMAGE_REPO: &str = "ccr.ccs.tencentyun.com/afan-public/w7panel";
const DEFAULT_IMAGE_TAG: &str = "1.0.107";

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace whose resources are reconciled
    pub watch_namespace: String,
    pub worker_count: usize,
    pub helm_binary: String,
    pub helm_sync_interval: Duration,
    /// Delay before workloads of a freshly discovered release are re-checked
    pub helm_recheck_delay: Duration,
    pub notify_timeout: Duration,
    pub static_down_enabled: bool,
    pub microapp_path: PathBuf,
    /// Service account used by uninstall shell jobs
    pub service_account_name: String,
    /// Image used by uninstall shell jobs that do not name one
    pub self_image: String,
    pub tls_cluster_issuer: String,
    /// Listen address of the Prometheus endpoint
    pub metrics_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            watch_namespace: "default".to_string(),
            worker_count: 5,
            helm_binary: "helm".to_string(),
            helm_sync_interval: Duration::from_secs(300),
            helm_recheck_delay: Duration::from_secs(60),
            notify_timeout: Duration::from_secs(10),
            static_down_enabled: false,
            microapp_path: PathBuf::from("/home/kodata/microapp"),
            service_account_name: "w7panel".to_string(),
            self_image: format!("{}:{}", DEFAULT_IMAGE_REPO, DEFAULT_IMAGE_TAG),
            tls_cluster_issuer: "w7-letsencrypt-prod".to_string(),
            metrics_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let worker_count: usize = parse_var("WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            anyhow::bail!("WORKER_COUNT must be at least 1");
        }

        let image_repo = env::var("IMAGE_REPO").unwrap_or_else(|_| DEFAULT_IMAGE_REPO.to_string());
        let image_tag = env::var("HELM_VERSION").unwrap_or_else(|_| DEFAULT_IMAGE_TAG.to_string());

        Ok(Config {
            watch_namespace: env::var("WATCH_NAMESPACE").unwrap_or(defaults.watch_namespace),
            worker_count,
            helm_binary: env::var("HELM_BINARY").unwrap_or(defaults.helm_binary),
            helm_sync_interval: Duration::from_secs(parse_var("HELM_SYNC_INTERVAL_SECS", 300)?),
            helm_recheck_delay: Duration::from_secs(parse_var("HELM_RECHECK_DELAY_SECS", 60)?),
            notify_timeout: Duration::from_secs(parse_var("NOTIFY_TIMEOUT_SECS", 10)?),
            static_down_enabled: env::var("STATIC_DOWN_ENABLED").is_ok_and(|v| v == "true"),
            microapp_path: env::var("MICROAPP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.microapp_path),
            service_account_name: env::var("SERVICE_ACCOUNT_NAME")
                .unwrap_or(defaults.service_account_name),
            self_image: format!("{}:{}", image_repo, image_tag),
            tls_cluster_issuer: env::var("TLS_CLUSTER_ISSUER")
                .unwrap_or(defaults.tls_cluster_issuer),
            metrics_addr: env::var("METRICS_ADDR").unwrap_or(defaults.metrics_addr),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}
