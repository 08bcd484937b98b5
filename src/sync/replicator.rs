//! The step that carries a mutation to the "remote" copy.
//!
//! There is no server; the remote copy is the durable store. A real backend would
//! implement [`Replicator`] and use the queue id as the request's idempotency key.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use futures::future::BoxFuture;
use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::operation::Mutation;
use crate::db::{records, Database, ExerciseRecord, PlanRecord};
use crate::workout::types::WorkoutPlan;

/// Applies mutations to the remote copy. Implementations must be idempotent:
/// an operation whose outcome was lost is applied again on the next drain.
pub trait Replicator: Send + Sync {
  fn apply<'a>(&'a self, mutation: &'a Mutation) -> BoxFuture<'a, Result<()>>;
}

/// Writes mutations into the durable store. Every write is an upsert or delete by
/// id, so replays converge.
pub struct MirrorReplicator {
  db: Arc<Database>,
}

impl MirrorReplicator {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  async fn apply_mutation(&self, mutation: &Mutation) -> Result<()> {
    debug!(kind = %mutation.kind(), id = mutation.entity_id(), "Mirroring operation");

    match mutation {
      Mutation::CreatePlan(plan) | Mutation::UpdatePlan(plan) => {
        self.db.transaction(|tx| replace_plan(tx, plan)).await
      }
      Mutation::DeletePlan { plan_id } => {
        self
          .db
          .transaction(|tx| {
            records::delete_children::<ExerciseRecord>(tx, plan_id)?;
            records::delete::<PlanRecord>(tx, plan_id)?;
            Ok(())
          })
          .await
      }
      Mutation::CreateExercise {
        plan_id,
        plan_updated_at,
        exercise,
      }
      | Mutation::UpdateExercise {
        plan_id,
        plan_updated_at,
        exercise,
      } => {
        self
          .db
          .transaction(|tx| {
            records::put(
              tx,
              &ExerciseRecord {
                workout_plan_id: plan_id.clone(),
                exercise: exercise.clone(),
              },
            )?;
            touch_plan(tx, plan_id, *plan_updated_at)
          })
          .await
      }
      Mutation::DeleteExercise {
        plan_id,
        plan_updated_at,
        exercise_id,
      } => {
        self
          .db
          .transaction(|tx| {
            records::delete::<ExerciseRecord>(tx, exercise_id)?;
            touch_plan(tx, plan_id, *plan_updated_at)
          })
          .await
      }
    }
  }
}

impl Replicator for MirrorReplicator {
  fn apply<'a>(&'a self, mutation: &'a Mutation) -> BoxFuture<'a, Result<()>> {
    Box::pin(self.apply_mutation(mutation))
  }
}

/// Make the stored plan and its exercises match the snapshot exactly.
fn replace_plan(conn: &Connection, plan: &WorkoutPlan) -> Result<()> {
  records::put(conn, &PlanRecord::from(plan))?;

  let keep: HashSet<&str> = plan.exercises.iter().map(|e| e.id.as_str()).collect();
  let stored: Vec<ExerciseRecord> = records::children(conn, &plan.id)?;
  for stale in stored.iter().filter(|r| !keep.contains(r.exercise.id.as_str())) {
    records::delete::<ExerciseRecord>(conn, &stale.exercise.id)?;
  }

  for exercise in &plan.exercises {
    records::put(
      conn,
      &ExerciseRecord {
        workout_plan_id: plan.id.clone(),
        exercise: exercise.clone(),
      },
    )?;
  }

  Ok(())
}

/// Carry the owning plan's `updated_at` forward. Never moves it backwards, so an
/// old operation replayed late can't undo a newer plan snapshot.
fn touch_plan(conn: &Connection, plan_id: &str, updated_at: DateTime<Utc>) -> Result<()> {
  if let Some(mut plan) = records::get::<PlanRecord>(conn, plan_id)? {
    if plan.updated_at < updated_at {
      plan.updated_at = updated_at;
      records::put(conn, &plan)?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::workout::types::{Exercise, WorkoutSet};

  fn exercise(id: &str) -> Exercise {
    Exercise {
      id: id.to_string(),
      name: "Dip".to_string(),
      sets: vec![WorkoutSet {
        id: format!("{}-1", id),
        reps: 12,
        weight: 0.0,
        completed: false,
        notes: None,
      }],
      rest_time: Some(60),
      notes: None,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn plan(id: &str, exercises: Vec<Exercise>) -> WorkoutPlan {
    WorkoutPlan {
      id: id.to_string(),
      name: "Push".to_string(),
      description: None,
      is_active: true,
      exercises,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_plan_snapshot_replaces_exercises() {
    let db = Arc::new(Database::in_memory());
    let replicator = MirrorReplicator::new(db.clone());

    let created = plan("p1", vec![exercise("e1"), exercise("e2")]);
    replicator
      .apply(&Mutation::CreatePlan(created))
      .await
      .unwrap();

    let updated = plan("p1", vec![exercise("e2")]);
    replicator
      .apply(&Mutation::UpdatePlan(updated))
      .await
      .unwrap();

    let stored: Vec<ExerciseRecord> = db.children("p1").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].exercise.id, "e2");
  }

  #[tokio::test]
  async fn test_replay_is_idempotent() {
    let db = Arc::new(Database::in_memory());
    let replicator = MirrorReplicator::new(db.clone());
    let mutation = Mutation::CreatePlan(plan("p1", vec![exercise("e1")]));

    replicator.apply(&mutation).await.unwrap();
    replicator.apply(&mutation).await.unwrap();

    assert_eq!(db.get_all::<PlanRecord>().await.unwrap().len(), 1);
    assert_eq!(db.get_all::<ExerciseRecord>().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_delete_plan_cascades() {
    let db = Arc::new(Database::in_memory());
    let replicator = MirrorReplicator::new(db.clone());
    replicator
      .apply(&Mutation::CreatePlan(plan("p1", vec![exercise("e1")])))
      .await
      .unwrap();

    replicator
      .apply(&Mutation::DeletePlan {
        plan_id: "p1".to_string(),
      })
      .await
      .unwrap();

    assert!(db.get_all::<PlanRecord>().await.unwrap().is_empty());
    assert!(db.get_all::<ExerciseRecord>().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_exercise_mutation_bumps_plan_forward_only() {
    let db = Arc::new(Database::in_memory());
    let replicator = MirrorReplicator::new(db.clone());
    let base = plan("p1", Vec::new());
    let created_at = base.updated_at;
    replicator.apply(&Mutation::CreatePlan(base)).await.unwrap();

    let later = created_at + chrono::Duration::seconds(30);
    replicator
      .apply(&Mutation::CreateExercise {
        plan_id: "p1".to_string(),
        plan_updated_at: later,
        exercise: exercise("e1"),
      })
      .await
      .unwrap();

    let earlier = created_at - chrono::Duration::seconds(30);
    replicator
      .apply(&Mutation::DeleteExercise {
        plan_id: "p1".to_string(),
        plan_updated_at: earlier,
        exercise_id: "e1".to_string(),
      })
      .await
      .unwrap();

    let stored: PlanRecord = db.get("p1").await.unwrap().unwrap();
    assert_eq!(stored.updated_at, later);
    assert!(db.get::<ExerciseRecord>("e1").await.unwrap().is_none());
  }
}
