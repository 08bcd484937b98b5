//! Durable, ordered log of mutations that have not reached the mirror yet.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::debug;

use super::operation::{Mutation, PendingOperation};
use crate::db::records::Partition;
use crate::db::Database;

pub struct PendingQueue {
  db: Arc<Database>,
}

/// Row as read from `offline_queue`, before the payload is decoded.
type QueueRow = (i64, String, String, bool);

/// An unsynced row. Rows written by an older build may no longer decode; they
/// are surfaced so a drain can report them instead of failing outright.
#[derive(Debug, Clone)]
pub enum QueueEntry {
  Ready(PendingOperation),
  Unreadable { id: i64, reason: String },
}

impl PendingQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Durably append a mutation. The store assigns the id.
  pub async fn append(&self, mutation: &Mutation) -> Result<PendingOperation> {
    let payload =
      serde_json::to_string(mutation).map_err(|e| eyre!("Failed to serialize operation: {}", e))?;
    let enqueued_at = Utc::now();
    let kind = mutation.kind();

    let id = self
      .db
      .with_conn(|conn| {
        conn
          .execute(
            &format!(
              "INSERT INTO {} (action, payload, timestamp, synced) VALUES (?, ?, ?, 0)",
              Partition::PendingQueue.table()
            ),
            params![kind.tag(), payload, enqueued_at.to_rfc3339()],
          )
          .map_err(|e| eyre!("Failed to enqueue operation: {}", e))?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(PendingOperation {
      id,
      kind,
      payload: mutation.clone(),
      enqueued_at,
      synced: false,
    })
  }

  /// Every unsynced row, oldest first, readable or not.
  pub async fn entries(&self) -> Result<Vec<QueueEntry>> {
    self.load(UNSYNCED_SQL).await
  }

  /// Unsynced operations that can be replayed, oldest first.
  pub async fn unsynced(&self) -> Result<Vec<PendingOperation>> {
    Ok(ready(self.load(UNSYNCED_SQL).await?))
  }

  pub async fn all(&self) -> Result<Vec<PendingOperation>> {
    let entries = self
      .load("SELECT id, payload, timestamp, synced FROM offline_queue ORDER BY id")
      .await?;
    Ok(ready(entries))
  }

  pub async fn get(&self, id: i64) -> Result<Option<PendingOperation>> {
    let row: Option<QueueRow> = self
      .db
      .with_conn(|conn| {
        conn
          .query_row(
            "SELECT id, payload, timestamp, synced FROM offline_queue WHERE id = ?",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()
          .map_err(|e| eyre!("Failed to load operation {}: {}", id, e))
      })
      .await?;

    row.map(decode).transpose()
  }

  /// Flag an operation as synced. Returns false if it was already synced or unknown.
  pub async fn mark_synced(&self, id: i64) -> Result<bool> {
    let changed = self
      .db
      .with_conn(|conn| {
        conn
          .execute(
            "UPDATE offline_queue SET synced = 1 WHERE id = ? AND synced = 0",
            params![id],
          )
          .map_err(|e| eyre!("Failed to mark operation {} synced: {}", id, e))
      })
      .await?;

    Ok(changed > 0)
  }

  /// Number of unsynced operations that can be replayed. Unreadable rows never
  /// will be, so they don't hold back direct writes.
  pub async fn unsynced_count(&self) -> Result<usize> {
    Ok(self.unsynced().await?.len())
  }

  /// Drop operations that have already been replayed.
  pub async fn purge_synced(&self) -> Result<usize> {
    self
      .db
      .with_conn(|conn| {
        conn
          .execute("DELETE FROM offline_queue WHERE synced = 1", [])
          .map_err(|e| eyre!("Failed to purge synced operations: {}", e))
      })
      .await
  }

  async fn load(&self, sql: &'static str) -> Result<Vec<QueueEntry>> {
    let rows: Vec<QueueRow> = self
      .db
      .with_conn(|conn| {
        let mut stmt = conn
          .prepare(sql)
          .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;
        let rows = stmt
          .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })
          .map_err(|e| eyre!("Failed to query queue: {}", e))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| eyre!("Failed to read queue row: {}", e))?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|row| {
          let id = row.0;
          match decode(row) {
            Ok(operation) => QueueEntry::Ready(operation),
            Err(e) => QueueEntry::Unreadable {
              id,
              reason: e.to_string(),
            },
          }
        })
        .collect(),
    )
  }
}

const UNSYNCED_SQL: &str =
  "SELECT id, payload, timestamp, synced FROM offline_queue WHERE synced = 0 ORDER BY id";

fn ready(entries: Vec<QueueEntry>) -> Vec<PendingOperation> {
  entries
    .into_iter()
    .filter_map(|entry| match entry {
      QueueEntry::Ready(operation) => Some(operation),
      QueueEntry::Unreadable { id, reason } => {
        debug!(id, "Skipping unreadable queue row: {}", reason);
        None
      }
    })
    .collect()
}

fn decode((id, payload, timestamp, synced): QueueRow) -> Result<PendingOperation> {
  let payload: Mutation = serde_json::from_str(&payload)
    .map_err(|e| eyre!("Failed to decode operation {}: {}", id, e))?;
  let enqueued_at = DateTime::parse_from_rfc3339(&timestamp)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", timestamp, e))?;

  Ok(PendingOperation {
    id,
    kind: payload.kind(),
    payload,
    enqueued_at,
    synced,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::operation::OperationKind;

  async fn insert_raw(db: &Database, payload: &str) {
    let payload = payload.to_string();
    db.with_conn(move |conn| {
      conn
        .execute(
          "INSERT INTO offline_queue (action, payload, timestamp, synced) VALUES ('UNKNOWN', ?, ?, 0)",
          params![payload, Utc::now().to_rfc3339()],
        )
        .map_err(|e| eyre!("insert failed: {}", e))
    })
    .await
    .unwrap();
  }

  fn delete_plan(id: &str) -> Mutation {
    Mutation::DeletePlan {
      plan_id: id.to_string(),
    }
  }

  #[tokio::test]
  async fn test_append_assigns_increasing_ids() {
    let queue = PendingQueue::new(Arc::new(Database::in_memory()));

    let first = queue.append(&delete_plan("a")).await.unwrap();
    let second = queue.append(&delete_plan("b")).await.unwrap();

    assert!(second.id > first.id);
    assert!(!first.synced);
    assert_eq!(first.kind, OperationKind::DeletePlan);
    assert_eq!(queue.unsynced_count().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_unsynced_in_id_order_and_mark_once() {
    let queue = PendingQueue::new(Arc::new(Database::in_memory()));
    for id in ["a", "b", "c"] {
      queue.append(&delete_plan(id)).await.unwrap();
    }

    let pending = queue.unsynced().await.unwrap();
    let ids: Vec<i64> = pending.iter().map(|op| op.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(pending[0].payload.entity_id(), "a");

    assert!(queue.mark_synced(ids[1]).await.unwrap());
    assert!(!queue.mark_synced(ids[1]).await.unwrap());

    let remaining: Vec<i64> = queue
      .unsynced()
      .await
      .unwrap()
      .iter()
      .map(|op| op.id)
      .collect();
    assert_eq!(remaining, vec![ids[0], ids[2]]);
    assert!(queue.get(ids[1]).await.unwrap().unwrap().synced);
  }

  #[tokio::test]
  async fn test_purge_synced() {
    let queue = PendingQueue::new(Arc::new(Database::in_memory()));
    let op = queue.append(&delete_plan("a")).await.unwrap();
    queue.append(&delete_plan("b")).await.unwrap();
    queue.mark_synced(op.id).await.unwrap();

    assert_eq!(queue.purge_synced().await.unwrap(), 1);
    assert_eq!(queue.all().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_unreadable_row_is_surfaced_not_fatal() {
    let db = Arc::new(Database::in_memory());
    let queue = PendingQueue::new(db.clone());
    insert_raw(&db, r#"{"action":"old_shape"}"#).await;
    let op = queue.append(&delete_plan("a")).await.unwrap();

    let entries = queue.entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(matches!(entries[0], QueueEntry::Unreadable { .. }));
    assert!(matches!(&entries[1], QueueEntry::Ready(ready) if ready.id == op.id));

    let pending = queue.unsynced().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, op.id);
    assert_eq!(queue.unsynced_count().await.unwrap(), 1);
    assert_eq!(queue.all().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_append_fails_when_store_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();

    let queue = PendingQueue::new(Arc::new(Database::new(blocker.join("q.db"))));
    assert!(queue.append(&delete_plan("a")).await.is_err());
  }
}
