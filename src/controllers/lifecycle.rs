// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! AppGroup events: defaults, install notices and finalizer-gated deletion.

use crate::constants::annotations;
use crate::controllers::utils::best_effort;
use crate::controllers::WorkloadManager;
use crate::error::Result;
use crate::notify::NotifyAction;
use crate::static_assets::wants_prefetch;
use crate::types::AppGroup;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

impl WorkloadManager {
    #[instrument(skip(self, group), fields(group = %group.name_any()))]
    pub async fn handle_app_group(&self, group: AppGroup, is_init: bool) -> Result<()> {
        if group.is_deleting() {
            return self.finalize_app_group(&group).await;
        }

        let namespace = group.namespace().unwrap_or_default();
        let name = group.name_any();
        let Some(live) = self.groups.get_opt(&namespace, &name).await? else {
            debug!("AppGroup {}/{} is gone", namespace, name);
            return Ok(());
        };
        if live.is_deleting() {
            return self.finalize_app_group(&live).await;
        }

        let mut notified = false;
        if live.needs_install_notice() {
            match self.notifier.notify(NotifyAction::Install, &live).await {
                Ok(()) => {
                    info!("Reported install of AppGroup {}", name);
                    notified = true;
                }
                Err(e) => warn!("Install notification for {} failed: {}", name, e),
            }
        }

        let needs_suffix = live.spec.suffix.is_empty();
        if needs_suffix || notified {
            self.groups
                .modify(&namespace, &name, |group| {
                    let mut changed = false;
                    if group.spec.suffix.is_empty() {
                        group.spec.suffix = group.name_any();
                        changed = true;
                    }
                    if notified && !group.is_install_notified() {
                        group
                            .annotations_mut()
                            .insert(annotations::NOTIFY_INSTALLED.to_string(), "true".to_string());
                        changed = true;
                    }
                    changed
                })
                .await?;
        }

        if is_init && wants_prefetch(&live, self.config.static_down_enabled) {
            best_effort("prefetch static assets", self.assets.prefetch(&live).await);
        }
        Ok(())
    }

    /// Tear the group down, then let go of whichever finalizer is now free to go.
    async fn finalize_app_group(&self, group: &AppGroup) -> Result<()> {
        let namespace = group.namespace().unwrap_or_default();
        let name = group.name_any();
        self.clean_app_group(group).await;

        match group.parent_name() {
            Some(parent) => {
                self.groups.clear_finalizers(&namespace, &name).await?;
                info!("Released child AppGroup {}/{}", namespace, name);
                // Only a parent that is itself going away waits on its children.
                if let Some(parent) = self.groups.get_opt(&namespace, parent).await? {
                    if parent.is_deleting() {
                        self.clean_group_children(&parent).await?;
                    }
                }
            }
            None => {
                if let Err(e) = self.notifier.notify(NotifyAction::Uninstall, group).await {
                    warn!("Uninstall notification for {} failed: {}", name, e);
                }
                self.clean_group_children(group).await?;
            }
        }
        Ok(())
    }

    /// Ask the children of `group` to go and clear its finalizer once none are left.
    /// Returns whether the finalizer was cleared.
    pub(crate) async fn clean_group_children(&self, group: &AppGroup) -> Result<bool> {
        let namespace = group.namespace().unwrap_or_default();
        let name = group.name_any();
        let children = self.groups.list_children(&namespace, &name).await?;

        for child in children.iter().filter(|c| !c.is_deleting()) {
            info!("Deleting child AppGroup {} of {}", child.name_any(), name);
            self.groups.delete(&namespace, &child.name_any()).await?;
        }
        if !children.is_empty() {
            debug!("AppGroup {} waits on {} children", name, children.len());
            return Ok(false);
        }

        self.groups.clear_finalizers(&namespace, &name).await?;
        info!("Released AppGroup {}/{}", namespace, name);
        Ok(true)
    }
}
