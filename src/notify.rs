// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Install/uninstall completion callbacks to the package repository.

use crate::constants::notify;
use crate::error::{ControllerError, Result};
use crate::types::AppGroup;
use async_trait::async_trait;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    Install,
    Uninstall,
}

impl NotifyAction {
    fn path(self) -> &'static str {
        match self {
            NotifyAction::Install => "/zpk/respo/install/complete-notify",
            NotifyAction::Uninstall => "/zpk/respo/uninstall/complete-notify",
        }
    }
}

/// The callback lives on the same host as the package URL.
pub fn notify_url(zpk_url: &str, action: NotifyAction) -> Result<Url> {
    let mut url = Url::parse(zpk_url)?;
    url.set_path(action.path());
    Ok(url)
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Report a finished lifecycle step for a ticket-tracked group.
    /// Groups without a ticket are skipped.
    async fn notify(&self, action: NotifyAction, group: &AppGroup) -> Result<()>;
}

pub struct HttpNotifier {
    client: reqwest::Client,
    attempts: u32,
    retry_delay: Duration,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            attempts: notify::ATTEMPTS,
            retry_delay: Duration::from_millis(notify::RETRY_DELAY_MS),
        })
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn post_once(&self, url: &Url, ticket: &str) -> Result<()> {
        let response = self
            .client
            .post(url.clone())
            .form(&[("ticket", ticket)])
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(ControllerError::NotifyError(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, action: NotifyAction, group: &AppGroup) -> Result<()> {
        let Some(ticket) = group.ticket() else {
            debug!("AppGroup {} has no ticket, not notifying", group.name_any());
            return Ok(());
        };

        let url = notify_url(&group.spec.zpk_url, action)?;
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.post_once(&url, ticket).await {
                Ok(()) => {
                    info!("Sent {:?} notification for {}", action, group.name_any());
                    return Ok(());
                }
                Err(e) if attempt < self.attempts => {
                    warn!(attempt, "Notification to {} failed, retrying: {}", url, e);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
