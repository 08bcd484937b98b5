//! Record types stored in the durable store and generic per-partition access.
//!
//! The helpers take a plain `&Connection` so they work the same inside and outside
//! a transaction.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::workout::types::{Exercise, WorkoutPlan};

/// The three collections of the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
  Plans,
  Exercises,
  PendingQueue,
}

impl Partition {
  pub fn table(self) -> &'static str {
    match self {
      Partition::Plans => "workout_plans",
      Partition::Exercises => "exercises",
      Partition::PendingQueue => "offline_queue",
    }
  }
}

/// Trait for entities kept in an id-keyed partition.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
  fn partition() -> Partition;

  fn record_id(&self) -> &str;

  /// Owning record, used for cascade deletes and per-owner lookups.
  fn parent_id(&self) -> Option<&str> {
    None
  }
}

/// A plan without its exercises; those live in their own partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecord {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl From<&WorkoutPlan> for PlanRecord {
  fn from(plan: &WorkoutPlan) -> Self {
    Self {
      id: plan.id.clone(),
      name: plan.name.clone(),
      description: plan.description.clone(),
      is_active: plan.is_active,
      created_at: plan.created_at,
      updated_at: plan.updated_at,
    }
  }
}

impl Record for PlanRecord {
  fn partition() -> Partition {
    Partition::Plans
  }

  fn record_id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRecord {
  pub workout_plan_id: String,
  pub exercise: Exercise,
}

impl Record for ExerciseRecord {
  fn partition() -> Partition {
    Partition::Exercises
  }

  fn record_id(&self) -> &str {
    &self.exercise.id
  }

  fn parent_id(&self) -> Option<&str> {
    Some(&self.workout_plan_id)
  }
}

pub fn put<R: Record>(conn: &Connection, record: &R) -> Result<()> {
  let data =
    serde_json::to_string(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

  conn
    .execute(
      &format!(
        "INSERT OR REPLACE INTO {} (id, parent_id, data, last_modified) VALUES (?, ?, ?, ?)",
        R::partition().table()
      ),
      params![
        record.record_id(),
        record.parent_id(),
        data,
        Utc::now().to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store record: {}", e))?;

  Ok(())
}

pub fn get<R: Record>(conn: &Connection, id: &str) -> Result<Option<R>> {
  let data: Option<String> = conn
    .query_row(
      &format!("SELECT data FROM {} WHERE id = ?", R::partition().table()),
      params![id],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to load record {}: {}", id, e))?;

  match data {
    Some(data) => {
      let record =
        serde_json::from_str(&data).map_err(|e| eyre!("Failed to deserialize record: {}", e))?;
      Ok(Some(record))
    }
    None => Ok(None),
  }
}

pub fn get_all<R: Record>(conn: &Connection) -> Result<Vec<R>> {
  query_records(
    conn,
    &format!("SELECT data FROM {} ORDER BY id", R::partition().table()),
    params![],
  )
}

pub fn children<R: Record>(conn: &Connection, parent_id: &str) -> Result<Vec<R>> {
  query_records(
    conn,
    &format!(
      "SELECT data FROM {} WHERE parent_id = ? ORDER BY id",
      R::partition().table()
    ),
    params![parent_id],
  )
}

pub fn delete<R: Record>(conn: &Connection, id: &str) -> Result<bool> {
  let removed = conn
    .execute(
      &format!("DELETE FROM {} WHERE id = ?", R::partition().table()),
      params![id],
    )
    .map_err(|e| eyre!("Failed to delete record {}: {}", id, e))?;

  Ok(removed > 0)
}

pub fn delete_children<R: Record>(conn: &Connection, parent_id: &str) -> Result<usize> {
  conn
    .execute(
      &format!("DELETE FROM {} WHERE parent_id = ?", R::partition().table()),
      params![parent_id],
    )
    .map_err(|e| eyre!("Failed to delete records of {}: {}", parent_id, e))
}

fn query_records<R: Record>(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> Result<Vec<R>> {
  let mut stmt = conn
    .prepare(sql)
    .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

  let rows: Vec<String> = stmt
    .query_map(params, |row| row.get(0))
    .map_err(|e| eyre!("Failed to query records: {}", e))?
    .filter_map(|r| r.ok())
    .collect();

  let records = rows
    .into_iter()
    .filter_map(|data| match serde_json::from_str(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(table = R::partition().table(), "Skipping unreadable record: {}", e);
        None
      }
    })
    .collect();

  Ok(records)
}
