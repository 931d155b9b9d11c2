//! Sources of reconcile triggers.
//!
//! Both sources deliver instance keys at least once; duplicates are
//! collapsed by the work queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::model::ObjectKey;
use crate::store::{ClusterEvent, InstanceLister};

/// Enqueues every instance key once per `interval`, starting immediately.
///
/// The task ends when the receiving side of `tx` is dropped.
pub fn spawn_resync<L>(
    lister: Arc<L>,
    namespace: Option<String>,
    interval: Duration,
    tx: mpsc::Sender<ObjectKey>,
) -> JoinHandle<()>
where
    L: InstanceLister + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let keys = match lister.list_keys(namespace.as_deref()).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Resync listing failed: {e}");
                    continue;
                }
            };

            debug!("Resync enqueues {} instances", keys.len());
            for key in keys {
                if tx.send(key).await.is_err() {
                    return;
                }
            }
        }
    })
}

/// Maps store change events to the key of the instance they concern.
///
/// Events of units without a controlling owner are dropped. The task ends
/// when either channel closes.
pub fn spawn_event_forwarder(
    mut events: broadcast::Receiver<ClusterEvent>,
    tx: mpsc::Sender<ObjectKey>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(key) = event.instance_key() else {
                        continue;
                    };
                    if tx.send(key.clone()).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {skipped} change events; resync will catch up");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}
