//! Durable structured store: plans, exercises and the pending-operation queue in
//! SQLite. The connection is opened lazily on first use.

pub mod records;
pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::info;

pub use records::{ExerciseRecord, PlanRecord, Record};

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  Memory,
}

/// Database connection wrapper for the durable store.
///
/// Opening and schema creation happen on the first operation. Concurrent first
/// operations share one initialization; a failed one is retried by the next call.
pub struct Database {
  location: Location,
  conn: OnceCell<Mutex<Connection>>,
}

impl Database {
  pub fn new(path: PathBuf) -> Self {
    Self {
      location: Location::File(path),
      conn: OnceCell::new(),
    }
  }

  /// Private in-memory database (for testing).
  pub fn in_memory() -> Self {
    Self {
      location: Location::Memory,
      conn: OnceCell::new(),
    }
  }

  pub fn default_path(data_dir: &Path) -> PathBuf {
    data_dir.join("fittracker.db")
  }

  async fn connection(&self) -> Result<&Mutex<Connection>> {
    self
      .conn
      .get_or_try_init(|| async { self.open_connection() })
      .await
  }

  fn open_connection(&self) -> Result<Mutex<Connection>> {
    let conn = match &self.location {
      Location::File(path) => {
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
        }

        Connection::open(path)
          .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?
      }
      Location::Memory => Connection::open_in_memory()
        .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?,
    };

    run_migrations(&conn)?;

    Ok(Mutex::new(conn))
  }

  /// Run `f` with exclusive access to the connection.
  pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Connection) -> Result<T> + Send,
  {
    let conn = self.connection().await?;
    let mut guard = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    f(&mut guard)
  }

  /// Run `f` inside a transaction; it is committed only if `f` succeeds.
  pub async fn transaction<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Transaction<'_>) -> Result<T> + Send,
  {
    self
      .with_conn(|conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
        let value = f(&tx)?;
        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(value)
      })
      .await
  }

  pub async fn put<R: Record>(&self, record: &R) -> Result<()> {
    self.with_conn(|conn| records::put(conn, record)).await
  }

  pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
    self.with_conn(|conn| records::get(conn, id)).await
  }

  pub async fn get_all<R: Record>(&self) -> Result<Vec<R>> {
    self.with_conn(|conn| records::get_all(conn)).await
  }

  pub async fn children<R: Record>(&self, parent_id: &str) -> Result<Vec<R>> {
    self
      .with_conn(|conn| records::children(conn, parent_id))
      .await
  }

  pub async fn delete<R: Record>(&self, id: &str) -> Result<bool> {
    self.with_conn(|conn| records::delete::<R>(conn, id)).await
  }
}

fn run_migrations(conn: &Connection) -> Result<()> {
  let version: i32 = conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

  if version < schema::CURRENT_VERSION {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    conn
      .pragma_update(None, "user_version", schema::CURRENT_VERSION)
      .map_err(|e| eyre!("Failed to record schema version: {}", e))?;

    info!(version = schema::CURRENT_VERSION, "Durable store schema created");
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::workout::types::{Exercise, WorkoutSet};
  use chrono::Utc;

  fn plan_record(id: &str) -> PlanRecord {
    PlanRecord {
      id: id.to_string(),
      name: format!("Plan {}", id),
      description: None,
      is_active: true,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn exercise_record(plan_id: &str, id: &str) -> ExerciseRecord {
    ExerciseRecord {
      workout_plan_id: plan_id.to_string(),
      exercise: Exercise {
        id: id.to_string(),
        name: "Row".to_string(),
        sets: vec![WorkoutSet {
          id: format!("{}-s", id),
          reps: 10,
          weight: 30.0,
          completed: false,
          notes: None,
        }],
        rest_time: None,
        notes: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
      },
    }
  }

  #[tokio::test]
  async fn test_put_get_delete() {
    let db = Database::in_memory();
    db.put(&plan_record("p1")).await.unwrap();

    let loaded: Option<PlanRecord> = db.get("p1").await.unwrap();
    assert_eq!(loaded.unwrap().name, "Plan p1");

    assert!(db.delete::<PlanRecord>("p1").await.unwrap());
    assert!(!db.delete::<PlanRecord>("p1").await.unwrap());
    assert!(db.get::<PlanRecord>("p1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_put_is_last_write_wins() {
    let db = Database::in_memory();
    db.put(&plan_record("p1")).await.unwrap();

    let mut renamed = plan_record("p1");
    renamed.name = "Renamed".to_string();
    db.put(&renamed).await.unwrap();

    let all: Vec<PlanRecord> = db.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "Renamed");
  }

  #[tokio::test]
  async fn test_children_by_plan() {
    let db = Database::in_memory();
    db.put(&exercise_record("p1", "e1")).await.unwrap();
    db.put(&exercise_record("p1", "e2")).await.unwrap();
    db.put(&exercise_record("p2", "e3")).await.unwrap();

    let of_p1: Vec<ExerciseRecord> = db.children("p1").await.unwrap();
    assert_eq!(of_p1.len(), 2);

    let removed = db
      .transaction(|tx| records::delete_children::<ExerciseRecord>(tx, "p1"))
      .await
      .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(db.get_all::<ExerciseRecord>().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_failed_transaction_rolls_back() {
    let db = Database::in_memory();
    let result: Result<()> = db
      .transaction(|tx| {
        records::put(tx, &plan_record("p1"))?;
        Err(eyre!("boom"))
      })
      .await;

    assert!(result.is_err());
    assert!(db.get::<PlanRecord>("p1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_concurrent_first_use_initializes_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("store.db"));
    let record = plan_record("p1");

    let (a, b) = tokio::join!(db.get_all::<PlanRecord>(), db.put(&record));
    a.unwrap();
    b.unwrap();

    let all: Vec<PlanRecord> = db.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
  }

  #[tokio::test]
  async fn test_reopen_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    Database::new(path.clone())
      .put(&plan_record("p1"))
      .await
      .unwrap();

    let reopened = Database::new(path);
    assert!(reopened.get::<PlanRecord>("p1").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_unavailable_store_is_retried_on_next_use() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let db = Database::new(blocker.join("store.db"));
    assert!(db.get_all::<PlanRecord>().await.is_err());

    std::fs::remove_file(&blocker).unwrap();
    assert!(db.get_all::<PlanRecord>().await.unwrap().is_empty());
  }
}
