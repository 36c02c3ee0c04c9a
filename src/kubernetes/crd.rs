// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! AppGroup CRD availability check

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use crate::types::AppGroup;
use kube::discovery::{ApiGroup, Discovery};
use kube::{Client, Resource};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait until the API server serves AppGroups.
/// The CRD is installed by the platform chart, so it may appear after this process starts.
pub async fn wait_for_appgroup_crd(client: &Client) -> Result<()> {
    let group = AppGroup::group(&());
    let version = AppGroup::version(&());
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match appgroup_crd_exists(client).await {
            Ok(true) => {
                info!("AppGroup CRD ({}/{}) is available", group, version);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "AppGroup CRD ({}/{}) not yet available, waiting {} seconds...",
                    group, version, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for AppGroup CRD: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

async fn appgroup_crd_exists(client: &Client) -> Result<bool> {
    let group = AppGroup::group(&());
    let discovery = Discovery::new(client.clone())
        .filter(&[group.as_ref()])
        .run()
        .await?;

    let found = discovery.groups().any(serves_appgroup);
    Ok(found)
}

fn serves_appgroup(group: &ApiGroup) -> bool {
    group.name() == AppGroup::group(&())
        && group
            .recommended_resources()
            .iter()
            .any(|(ar, _)| ar.kind == AppGroup::kind(&()) && ar.version == AppGroup::version(&()))
}
