//! Dispatcher running reconciliation passes on a pool of workers.
//!
//! This module provides:
//! - [`WorkQueue`]: de-duplicated keys, never on two workers at once
//! - [`Backoff`]: per-key exponential requeue delays
//! - Trigger sources: periodic resync and store change events
//! - [`Controller`]: the worker pool itself

mod backoff;
mod queue;
mod trigger;

pub use backoff::Backoff;
pub use queue::WorkQueue;
pub use trigger::{spawn_event_forwarder, spawn_resync};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::model::ObjectKey;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::{InstanceStore, UnitStore};

/// Runs reconciliation passes for queued instance keys.
pub struct Controller<I: InstanceStore + ?Sized, U: UnitStore + ?Sized> {
    reconciler: Arc<Reconciler<I, U>>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<Backoff>>,
    workers: usize,
}

impl<I, U> Controller<I, U>
where
    I: InstanceStore + ?Sized + 'static,
    U: UnitStore + ?Sized + 'static,
{
    /// Creates a controller around a reconciler.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler<I, U>>, config: &ControllerConfig) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_secs(config.backoff_max_secs),
        );

        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            backoff: Arc::new(Mutex::new(backoff)),
            workers: config.workers.max(1),
        }
    }

    /// Returns the work queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Processes triggers until `shutdown` resolves.
    ///
    /// Passes already running when `shutdown` resolves are allowed to
    /// finish; queued keys are dropped.
    pub async fn run<F>(&self, mut triggers: mpsc::Receiver<ObjectKey>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Starting controller with {} workers", self.workers);

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(work(
                id,
                Arc::clone(&self.reconciler),
                Arc::clone(&self.queue),
                Arc::clone(&self.backoff),
            ));
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                trigger = triggers.recv() => match trigger {
                    Some(key) => self.queue.add(key).await,
                    None => {
                        debug!("All trigger sources closed");
                        (&mut shutdown).await;
                        break;
                    }
                },
            }
        }

        info!("Shutting down controller, waiting for running passes");
        self.queue.shutdown().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Worker ended abnormally: {e}");
            }
        }
        info!("Controller stopped");
    }
}

async fn work<I, U>(
    id: usize,
    reconciler: Arc<Reconciler<I, U>>,
    queue: Arc<WorkQueue>,
    backoff: Arc<Mutex<Backoff>>,
) where
    I: InstanceStore + ?Sized,
    U: UnitStore + ?Sized,
{
    debug!("Worker {id} started");

    while let Some(key) = queue.next().await {
        match reconciler.reconcile(&key).await {
            Ok(outcome) => {
                backoff.lock().await.forget(&key);
                if let ReconcileOutcome::Reconciled(result) = &outcome {
                    if !result.converged {
                        debug!("{key} not converged yet: {result}");
                    }
                }
            }
            Err(e) => {
                let delay = backoff
                    .lock()
                    .await
                    .next_delay(&key, e.retry_delay_secs());
                warn!("Reconciliation of {key} failed, retrying in {delay:?}: {e}");
                queue.add_after(key.clone(), delay);
            }
        }
        queue.done(&key).await;
    }

    debug!("Worker {id} stopped");
}
