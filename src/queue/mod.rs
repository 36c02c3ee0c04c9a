// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited, deduplicating work queue drained by a fixed worker pool.
//!
//! Keys are plain strings. A key that is already waiting is not queued twice,
//! and a key that is being processed is parked until its worker reports done.
//! Keys naming the same object (an update and a delete of one Deployment, say)
//! are also held back while any of them is in flight, so one object is never
//! handled by two workers at once.

use crate::constants::queue::{BASE_DELAY_MS, BURST, MAX_ATTEMPTS, MAX_DELAY_SECS, RATE_PER_SEC};
use crate::error::{ControllerError, Result};
use crate::metrics::Metrics;
use crate::types::{object_id_of, K8sResourceEvent};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one queue key.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    async fn handle(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Object ids of the keys in `processing`
    busy: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

impl QueueState {
    /// Pop the first key whose object is not already being processed.
    fn take_ready(&mut self) -> Option<String> {
        let position = self
            .queue
            .iter()
            .position(|key| !self.busy.contains(&object_id_of(key)))?;
        let key = self.queue.remove(position)?;
        self.dirty.remove(&key);
        self.busy.insert(object_id_of(&key));
        self.processing.insert(key.clone());
        Some(key)
    }
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: DefaultDirectRateLimiter,
    metrics: Metrics,
}

#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl EventQueue {
    pub fn new(metrics: Metrics) -> Self {
        let rate = NonZeroU32::new(RATE_PER_SEC).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(BURST).unwrap_or(NonZeroU32::MIN);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
                metrics,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Enqueue a key unless it is already pending.
    pub fn add(&self, key: String) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    pub fn push(&self, event: &K8sResourceEvent) {
        match event.to_key() {
            Ok(key) => self.add(key),
            Err(e) => warn!("Failed to encode event for {}/{}: {}", event.kind, event.name, e),
        }
    }

    /// Enqueue an event once `delay` has passed.
    pub fn add_after(&self, event: &K8sResourceEvent, delay: Duration) {
        let key = match event.to_key() {
            Ok(key) => key,
            Err(e) => {
                warn!("Failed to encode event for {}/{}: {}", event.kind, event.name, e);
                return;
            }
        };
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Requeue after the per-key exponential backoff, then wait for the global rate limit.
    pub fn add_rate_limited(&self, key: String) {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = backoff_delay(*failures);
            *failures += 1;
            delay
        };
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.inner.limiter.until_ready().await;
            queue.add(key);
        });
    }

    pub fn forget(&self, key: &str) {
        self.state().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next key. Returns `None` once the queue shuts down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.take_ready() {
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as no longer in flight. A re-add that arrived meanwhile is queued now.
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        state.busy.remove(&object_id_of(key));
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
        }
        let waiting = !state.queue.is_empty();
        drop(state);
        // Keys held back behind this object may be runnable now.
        if waiting {
            self.inner.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Drain the queue with `workers` tasks until `token` is cancelled.
    /// In-flight handlers finish before this returns.
    pub async fn run<H: QueueHandler>(&self, handler: Arc<H>, workers: usize, token: CancellationToken) {
        info!("Starting event queue with {} workers", workers);

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let queue = self.clone();
            let handler = handler.clone();
            tasks.spawn(async move { queue.worker(handler).await });
        }

        token.cancelled().await;
        self.shut_down();
        while tasks.join_next().await.is_some() {}

        info!("Event queue stopped");
    }

    async fn worker<H: QueueHandler>(&self, handler: Arc<H>) {
        while let Some(key) = self.get().await {
            let task_handler = handler.clone();
            let task_key = key.clone();
            // A panicking handler only takes down its own task.
            let outcome = match tokio::spawn(async move { task_handler.handle(&task_key).await }).await {
                Ok(result) => result,
                Err(e) => {
                    self.inner.metrics.record_panic();
                    Err(ControllerError::HandlerPanic(e.to_string()))
                }
            };
            self.handle_result(&key, outcome);
            self.done(&key);
        }
    }

    fn handle_result(&self, key: &str, outcome: Result<()>) {
        let err = match outcome {
            Ok(()) => {
                self.forget(key);
                self.inner.metrics.record_processed();
                return;
            }
            Err(err) => err,
        };

        if err.is_permanent() {
            warn!(key = %key, error = %err, "Dropping item that cannot succeed");
            self.forget(key);
            return;
        }

        let attempts = self.num_requeues(key) + 1;
        if attempts < MAX_ATTEMPTS {
            debug!(key = %key, attempts, error = %err, "Requeuing item");
            self.inner.metrics.record_retry();
            self.add_rate_limited(key.to_string());
        } else {
            error!(key = %key, attempts, error = %err, "Dropping item after exhausting retries");
            self.inner.metrics.record_dropped();
            self.forget(key);
        }
    }
}

/// 5ms doubled per prior failure, capped at 1000s.
fn backoff_delay(failures: u32) -> Duration {
    let factor = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_DELAY_MS.saturating_mul(factor))
        .min(Duration::from_secs(MAX_DELAY_SECS))
}
