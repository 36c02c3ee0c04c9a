// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Hooks for the front-end bundles some applications ship.
//!
//! Downloading bundles is done elsewhere. The controller only decides when a
//! prefetch is due and removes the local copy when an application goes away.

use crate::constants::{annotations, THIRD_PARTY_FRONT};
use crate::error::Result;
use crate::types::AppGroup;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

#[async_trait]
pub trait StaticAssets: Send + Sync {
    async fn prefetch(&self, _group: &AppGroup) -> Result<()> {
        Ok(())
    }

    /// Remove the local bundle of a release.
    async fn clean(&self, release: &str) -> Result<()>;
}

/// Whether a replayed group should have its bundle fetched.
pub fn wants_prefetch(group: &AppGroup, enabled: bool) -> bool {
    enabled
        && group
            .annotation(annotations::FRONT_TYPE)
            .is_some_and(|t| t.contains(THIRD_PARTY_FRONT))
}

/// Bundles unpacked under `<root>/<release>`.
pub struct LocalStaticAssets {
    root: PathBuf,
}

impl LocalStaticAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StaticAssets for LocalStaticAssets {
    async fn clean(&self, release: &str) -> Result<()> {
        if release.is_empty() || release.contains(['/', '\\']) || release == ".." {
            debug!("Refusing to clean static assets for release {:?}", release);
            return Ok(());
        }
        let dir = self.root.join(release);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed static assets in {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
