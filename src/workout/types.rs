use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One performed unit of an exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSet {
  pub id: String,
  pub reps: u32,
  /// Kilograms
  pub weight: f64,
  #[serde(default)]
  pub completed: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

/// A movement within a plan. Sets are kept in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "super::transfer::RawExercise")]
pub struct Exercise {
  pub id: String,
  pub name: String,
  pub sets: Vec<WorkoutSet>,
  /// Rest between sets, in seconds
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rest_time: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutPlan {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default = "default_active")]
  pub is_active: bool,
  #[serde(default)]
  pub exercises: Vec<Exercise>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
  true
}

impl WorkoutPlan {
  /// Total volume (reps x weight) across all sets of the plan
  pub fn volume(&self) -> f64 {
    self.exercises.iter().map(Exercise::volume).sum()
  }
}

impl Exercise {
  pub fn volume(&self) -> f64 {
    self
      .sets
      .iter()
      .map(|s| f64::from(s.reps) * s.weight)
      .sum()
  }
}

// ============================================================================
// Mutation inputs
// ============================================================================

/// A set as supplied by the caller, before it is given an identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetDraft {
  pub reps: u32,
  pub weight: f64,
  pub completed: bool,
  pub notes: Option<String>,
}

impl SetDraft {
  pub fn new(reps: u32, weight: f64) -> Self {
    Self {
      reps,
      weight,
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewExercise {
  pub name: String,
  pub sets: Vec<SetDraft>,
  pub rest_time: Option<u32>,
  pub notes: Option<String>,
}

/// Fields left as `None` are kept as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanUpdate {
  pub name: Option<String>,
  pub description: Option<String>,
  pub is_active: Option<bool>,
}

/// Fields left as `None` are kept as they are. `sets` replaces the whole list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExerciseUpdate {
  pub name: Option<String>,
  pub sets: Option<Vec<SetDraft>>,
  pub rest_time: Option<u32>,
  pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(sets: &[(u32, f64)]) -> Exercise {
    let now = Utc::now();
    Exercise {
      id: "e1".to_string(),
      name: "Bench".to_string(),
      sets: sets
        .iter()
        .enumerate()
        .map(|(i, (reps, weight))| WorkoutSet {
          id: format!("s{}", i),
          reps: *reps,
          weight: *weight,
          completed: false,
          notes: None,
        })
        .collect(),
      rest_time: Some(90),
      notes: None,
      created_at: now,
      updated_at: now,
    }
  }

  #[test]
  fn test_exercise_volume() {
    assert_eq!(exercise(&[(8, 40.0), (6, 50.0)]).volume(), 620.0);
  }

  #[test]
  fn test_exercise_serializes_camel_case() {
    let json = serde_json::to_value(exercise(&[(8, 40.0)])).unwrap();
    assert_eq!(json["restTime"], 90);
    assert!(json.get("createdAt").is_some());
    assert!(json.get("notes").is_none());
    assert_eq!(json["sets"][0]["reps"], 8);
  }

  #[test]
  fn test_plan_defaults_active_and_empty() {
    let json = r#"{
      "id": "p1",
      "name": "Push Day",
      "createdAt": "2024-01-01T10:00:00Z",
      "updatedAt": "2024-01-01T10:00:00Z"
    }"#;
    let plan: WorkoutPlan = serde_json::from_str(json).unwrap();
    assert!(plan.is_active);
    assert!(plan.exercises.is_empty());
    assert_eq!(plan.description, None);
  }
}
