use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::workout::types::{Exercise, WorkoutPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  CreatePlan,
  UpdatePlan,
  DeletePlan,
  CreateExercise,
  UpdateExercise,
  DeleteExercise,
}

impl OperationKind {
  /// Tag stored in the queue's `action` column
  pub fn tag(self) -> &'static str {
    match self {
      OperationKind::CreatePlan => "CREATE_WORKOUT_PLAN",
      OperationKind::UpdatePlan => "UPDATE_WORKOUT_PLAN",
      OperationKind::DeletePlan => "DELETE_WORKOUT_PLAN",
      OperationKind::CreateExercise => "CREATE_EXERCISE",
      OperationKind::UpdateExercise => "UPDATE_EXERCISE",
      OperationKind::DeleteExercise => "DELETE_EXERCISE",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      OperationKind::CreatePlan => "create plan",
      OperationKind::UpdatePlan => "update plan",
      OperationKind::DeletePlan => "delete plan",
      OperationKind::CreateExercise => "create exercise",
      OperationKind::UpdateExercise => "update exercise",
      OperationKind::DeleteExercise => "delete exercise",
    };
    f.write_str(label)
  }
}

/// A change to the plan collection, carrying everything needed to replay it.
///
/// Plan payloads are full snapshots (exercises included) and exercise payloads
/// carry the owning plan's new `updated_at`, so replaying any operation twice
/// leaves the mirror in the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Mutation {
  CreatePlan(WorkoutPlan),
  UpdatePlan(WorkoutPlan),
  DeletePlan {
    plan_id: String,
  },
  CreateExercise {
    plan_id: String,
    plan_updated_at: DateTime<Utc>,
    exercise: Exercise,
  },
  UpdateExercise {
    plan_id: String,
    plan_updated_at: DateTime<Utc>,
    exercise: Exercise,
  },
  DeleteExercise {
    plan_id: String,
    plan_updated_at: DateTime<Utc>,
    exercise_id: String,
  },
}

impl Mutation {
  pub fn kind(&self) -> OperationKind {
    match self {
      Mutation::CreatePlan(_) => OperationKind::CreatePlan,
      Mutation::UpdatePlan(_) => OperationKind::UpdatePlan,
      Mutation::DeletePlan { .. } => OperationKind::DeletePlan,
      Mutation::CreateExercise { .. } => OperationKind::CreateExercise,
      Mutation::UpdateExercise { .. } => OperationKind::UpdateExercise,
      Mutation::DeleteExercise { .. } => OperationKind::DeleteExercise,
    }
  }

  /// Id of the entity the mutation targets
  pub fn entity_id(&self) -> &str {
    match self {
      Mutation::CreatePlan(plan) | Mutation::UpdatePlan(plan) => &plan.id,
      Mutation::DeletePlan { plan_id } => plan_id,
      Mutation::CreateExercise { exercise, .. } | Mutation::UpdateExercise { exercise, .. } => {
        &exercise.id
      }
      Mutation::DeleteExercise { exercise_id, .. } => exercise_id,
    }
  }

  /// Plan the mutation belongs to (the plan itself for plan mutations)
  pub fn plan_id(&self) -> &str {
    match self {
      Mutation::CreatePlan(plan) | Mutation::UpdatePlan(plan) => &plan.id,
      Mutation::DeletePlan { plan_id }
      | Mutation::CreateExercise { plan_id, .. }
      | Mutation::UpdateExercise { plan_id, .. }
      | Mutation::DeleteExercise { plan_id, .. } => plan_id,
    }
  }
}

/// A mutation waiting in the durable queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
  /// Assigned by the store, strictly increasing
  pub id: i64,
  pub kind: OperationKind,
  pub payload: Mutation,
  pub enqueued_at: DateTime<Utc>,
  pub synced: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_labels() {
    assert_eq!(OperationKind::CreatePlan.to_string(), "create plan");
    assert_eq!(OperationKind::DeleteExercise.tag(), "DELETE_EXERCISE");
  }

  #[test]
  fn test_mutation_payload_shape() {
    let mutation = Mutation::DeletePlan {
      plan_id: "p1".to_string(),
    };
    let json = serde_json::to_value(&mutation).unwrap();
    assert_eq!(json["action"], "delete_plan");
    assert_eq!(json["data"]["plan_id"], "p1");

    let back: Mutation = serde_json::from_value(json).unwrap();
    assert_eq!(back, mutation);
    assert_eq!(back.entity_id(), "p1");
    assert_eq!(back.kind(), OperationKind::DeletePlan);
  }
}
