//! Keeps the in-memory collection, the flat mirror and the durable store in step.
//!
//! Reconciliation order: the flat mirror is written synchronously on every change;
//! the durable store is written directly while online and through the pending
//! queue otherwise. The queue is drained on every transition to online.

mod operation;
mod queue;
mod replicator;

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use operation::{Mutation, PendingOperation};
pub use queue::PendingQueue;
use queue::QueueEntry;
pub use replicator::{MirrorReplicator, Replicator};

use crate::context::{PlatformEvent, Subscription};
use crate::db::Database;
use crate::kv::PlanMirror;
use crate::workout::types::WorkoutPlan;

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Operations applied and flagged synced, in the order they were applied
  pub synced: Vec<i64>,
  /// Operations whose apply step failed, retried on the next drain, and rows
  /// whose payload can't be decoded
  pub failed: Vec<i64>,
  /// Operations held back because an earlier one for the same plan failed
  pub deferred: Vec<i64>,
}

impl DrainReport {
  pub fn is_clean(&self) -> bool {
    self.failed.is_empty() && self.deferred.is_empty()
  }
}

#[derive(Clone)]
pub struct Synchronizer {
  inner: Arc<Inner>,
}

struct Inner {
  mirror: PlanMirror,
  queue: PendingQueue,
  replicator: Arc<dyn Replicator>,
  online: watch::Sender<bool>,
  /// Serializes drains and direct mirror writes so replay order holds
  drain_lock: Mutex<()>,
}

impl Synchronizer {
  pub fn new(mirror: PlanMirror, db: Arc<Database>, online: bool) -> Self {
    let replicator = Arc::new(MirrorReplicator::new(db.clone()));
    Self::with_replicator(mirror, db, replicator, online)
  }

  pub fn with_replicator(
    mirror: PlanMirror,
    db: Arc<Database>,
    replicator: Arc<dyn Replicator>,
    online: bool,
  ) -> Self {
    let (online, _) = watch::channel(online);

    Self {
      inner: Arc::new(Inner {
        mirror,
        queue: PendingQueue::new(db),
        replicator,
        online,
        drain_lock: Mutex::new(()),
      }),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.inner.online.borrow()
  }

  /// Read-only view of the connectivity flag
  pub fn connectivity(&self) -> watch::Receiver<bool> {
    self.inner.online.subscribe()
  }

  pub fn mirror(&self) -> &PlanMirror {
    &self.inner.mirror
  }

  pub fn queue(&self) -> &PendingQueue {
    &self.inner.queue
  }

  /// Persist the outcome of a mutation.
  ///
  /// The flat mirror always receives the full collection. Each mutation is then
  /// written to the durable store directly when online and nothing is queued ahead
  /// of it; otherwise (or if that write fails) it is queued. Fails only when the
  /// queue itself can't be written.
  pub async fn persist(&self, plans: &[WorkoutPlan], mutations: Vec<Mutation>) -> Result<()> {
    self.inner.mirror.save(plans);

    for mutation in mutations {
      if self.is_online() {
        self.apply_or_enqueue(&mutation).await?;
      } else {
        self.enqueue(&mutation).await?;
      }
    }

    Ok(())
  }

  /// Write directly when the queue is empty. A failed write is queued before the
  /// lock is released so no later mutation can be written ahead of it.
  async fn apply_or_enqueue(&self, mutation: &Mutation) -> Result<()> {
    let guard = self.inner.drain_lock.lock().await;

    // Anything still queued must be replayed first
    let backlog = match self.inner.queue.unsynced_count().await {
      Ok(n) => n,
      Err(e) => {
        warn!("Failed to inspect pending queue: {}", e);
        1
      }
    };

    if backlog == 0 {
      match self.inner.replicator.apply(mutation).await {
        Ok(()) => return Ok(()),
        Err(e) => {
          warn!(kind = %mutation.kind(), "Mirror write failed, queueing operation: {}", e);
        }
      }
    }

    let operation = self.inner.queue.append(mutation).await?;
    debug!(id = operation.id, kind = %operation.kind, "Queued operation");
    drop(guard);

    self.spawn_drain();
    Ok(())
  }

  /// Durably queue a mutation. When online, a drain is started in the background.
  pub async fn enqueue(&self, mutation: &Mutation) -> Result<PendingOperation> {
    let operation = self.inner.queue.append(mutation).await?;
    debug!(id = operation.id, kind = %operation.kind, "Queued operation");

    if self.is_online() {
      self.spawn_drain();
    }

    Ok(operation)
  }

  fn spawn_drain(&self) {
    let this = self.clone();
    tokio::spawn(async move {
      if let Err(e) = this.drain().await {
        warn!("Background drain failed: {}", e);
      }
    });
  }

  /// Replay every unsynced operation in id order.
  ///
  /// A failed operation doesn't stop the pass, but later operations on the same
  /// plan are held back so they can't overtake it. Rows that no longer decode are
  /// reported as failed and left in place.
  pub async fn drain(&self) -> Result<DrainReport> {
    let _guard = self.inner.drain_lock.lock().await;

    let entries = self.inner.queue.entries().await?;
    let mut report = DrainReport::default();
    let mut blocked: HashSet<String> = HashSet::new();

    for entry in entries {
      let operation = match entry {
        QueueEntry::Ready(operation) => operation,
        QueueEntry::Unreadable { id, reason } => {
          warn!(id, "Skipping unreadable operation: {}", reason);
          report.failed.push(id);
          continue;
        }
      };

      let plan_id = operation.payload.plan_id();
      if blocked.contains(plan_id) {
        report.deferred.push(operation.id);
        continue;
      }

      let applied = match self.inner.replicator.apply(&operation.payload).await {
        Ok(()) => self.inner.queue.mark_synced(operation.id).await.map(|_| ()),
        Err(e) => Err(e),
      };

      match applied {
        Ok(()) => report.synced.push(operation.id),
        Err(e) => {
          warn!(id = operation.id, kind = %operation.kind, "Failed to sync operation: {}", e);
          blocked.insert(plan_id.to_string());
          report.failed.push(operation.id);
        }
      }
    }

    if !report.synced.is_empty() || !report.is_clean() {
      info!(
        synced = report.synced.len(),
        failed = report.failed.len(),
        deferred = report.deferred.len(),
        "Drained pending operations"
      );
    }

    Ok(report)
  }

  /// Update the connectivity flag. Going online always drains.
  pub async fn set_online(&self, online: bool) -> Result<Option<DrainReport>> {
    self.inner.online.send_replace(online);

    if online {
      info!("Online, draining pending operations");
      Ok(Some(self.drain().await?))
    } else {
      info!("Offline, mutations will be queued");
      Ok(None)
    }
  }

  pub async fn handle_event(&self, event: PlatformEvent) -> Result<Option<DrainReport>> {
    match event {
      PlatformEvent::Online => self.set_online(true).await,
      PlatformEvent::Offline => self.set_online(false).await,
      PlatformEvent::InstallAvailable | PlatformEvent::Shutdown => Ok(None),
    }
  }

  /// Follow connectivity events until the context shuts down.
  pub fn listen(&self, mut subscription: Subscription) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      while let Some(event) = subscription.next().await {
        if event == PlatformEvent::Shutdown {
          break;
        }
        if let Err(e) = this.handle_event(event).await {
          warn!("Failed to handle {:?}: {}", event, e);
        }
      }
      debug!("Connectivity listener stopped");
    })
  }
}
