//! Controller runtime: turns a watch stream into serialised reconcile calls.
//!
//! - one reconcile per key at a time; events arriving mid-pass mark the key
//!   dirty and it runs again once the current pass ends
//! - at most `max_concurrent_reconciles` passes run across all keys
//! - failed passes are retried with capped exponential backoff
//! - shutdown drops in-flight passes

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use rand::Rng;
use tokio::sync::{Semaphore, watch};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ReconcileError, StoreError};
use crate::resources::{ObjectKey, ResourceKind};
use crate::store::ResourceStore;

/// What the runtime should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Wait for the next change.
    Done,
    /// Run again after the delay even if nothing changes.
    RequeueAfter(Duration),
}

/// Level-triggered handler for one resource kind.
///
/// A pass is given only the key and must re-read current state itself.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn kind(&self) -> ResourceKind;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

/// Requeue delays for failed passes: `base * 2^attempt`, capped, plus up to
/// 25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt.min(32) as i32);
        let capped = exp.min(self.max.as_secs_f64());
        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
        Duration::from_secs_f64(capped * jitter)
    }
}

enum Outcome {
    Finished(Result<Action, ReconcileError>),
    Panicked,
}

/// Drives one [`Reconciler`] from the store's watch stream.
pub struct Controller {
    store: Arc<dyn ResourceStore>,
    reconciler: Arc<dyn Reconciler>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        reconciler: Arc<dyn Reconciler>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            config,
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Only a failure to open the watch is returned; reconcile errors are
    /// logged and retried.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        let kind = self.reconciler.kind();
        let mut events = self.store.watch(kind).await?;
        let mut queue = WorkQueue::new(Arc::clone(&self.reconciler), &self.config);

        info!(%kind, max_concurrent = self.config.max_concurrent_reconciles, "Controller started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = events.next() => match next {
                    Some(key) => queue.enqueue(key),
                    None => {
                        warn!(%kind, "Watch stream ended");
                        break;
                    }
                },
                Some(joined) = queue.passes.join_next() => match joined {
                    Ok((key, outcome)) => queue.complete(key, outcome),
                    Err(e) => error!(%kind, error = %e, "Reconcile task failed to join"),
                },
                Some(fired) = queue.timers.join_next() => {
                    // Aborted timers are superseded by a newer one.
                    if let Ok(key) = fired {
                        queue.fire_timer(key);
                    }
                }
            }
        }

        let dropped = queue.in_flight.len();
        queue.passes.shutdown().await;
        queue.timers.shutdown().await;
        info!(%kind, dropped, "Controller stopped");
        Ok(())
    }
}

/// Per-controller scheduling state. Only touched from the run loop.
struct WorkQueue {
    kind: ResourceKind,
    reconciler: Arc<dyn Reconciler>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    backoff: Backoff,
    passes: JoinSet<(ObjectKey, Outcome)>,
    timers: JoinSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    scheduled: HashMap<ObjectKey, AbortHandle>,
}

impl WorkQueue {
    fn new(reconciler: Arc<dyn Reconciler>, config: &ControllerConfig) -> Self {
        Self {
            kind: reconciler.kind(),
            reconciler,
            permits: Arc::new(Semaphore::new(config.max_concurrent_reconciles.max(1))),
            timeout: config.reconcile_timeout,
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            passes: JoinSet::new(),
            timers: JoinSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
            scheduled: HashMap::new(),
        }
    }

    fn enqueue(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return;
        }
        self.in_flight.insert(key.clone());

        let reconciler = Arc::clone(&self.reconciler);
        let permits = Arc::clone(&self.permits);
        let timeout = self.timeout;
        self.passes.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            let pass = tokio::time::timeout(timeout, reconciler.reconcile(&key));
            let outcome = match AssertUnwindSafe(pass).catch_unwind().await {
                Ok(Ok(result)) => Outcome::Finished(result),
                Ok(Err(_)) => Outcome::Finished(Err(ReconcileError::Timeout(timeout))),
                Err(_) => Outcome::Panicked,
            };
            (key, outcome)
        });
    }

    fn complete(&mut self, key: ObjectKey, outcome: Outcome) {
        self.in_flight.remove(&key);
        let kind = self.kind;

        match outcome {
            Outcome::Finished(Ok(Action::Done)) => {
                self.failures.remove(&key);
                self.cancel_timer(&key);
                debug!(%kind, key = %key, "Reconciled");
            }
            Outcome::Finished(Ok(Action::RequeueAfter(delay))) => {
                self.failures.remove(&key);
                debug!(%kind, key = %key, delay_ms = delay.as_millis() as u64, "Reconciled, requeue requested");
                self.schedule(key.clone(), delay);
            }
            Outcome::Finished(Err(e)) => {
                let delay = self.record_failure(&key);
                warn!(%kind, key = %key, error = %e, retry_in_ms = delay.as_millis() as u64, "Reconcile failed");
                self.schedule(key.clone(), delay);
            }
            Outcome::Panicked => {
                let delay = self.record_failure(&key);
                error!(%kind, key = %key, retry_in_ms = delay.as_millis() as u64, "Reconcile panicked");
                self.schedule(key.clone(), delay);
            }
        }

        if self.dirty.remove(&key) {
            self.enqueue(key);
        }
    }

    fn record_failure(&mut self, key: &ObjectKey) -> Duration {
        let attempt = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.backoff.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        delay
    }

    fn cancel_timer(&mut self, key: &ObjectKey) {
        if let Some(previous) = self.scheduled.remove(key) {
            previous.abort();
        }
    }

    /// Replaces any timer already pending for `key`.
    fn schedule(&mut self, key: ObjectKey, delay: Duration) {
        self.cancel_timer(&key);
        let timer_key = key.clone();
        let handle = self.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            timer_key
        });
        self.scheduled.insert(key, handle);
    }

    fn fire_timer(&mut self, key: ObjectKey) {
        self.scheduled.remove(&key);
        self.enqueue(key);
    }
}
