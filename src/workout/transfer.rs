//! Transfer format for export/import and the flat-store mirror.
//!
//! Both use the same JSON shape: an array of plans with exercises and sets nested
//! inside. Exercises written by older versions carry `sets`/`reps`/`weight` as plain
//! numbers; they are expanded into uniform sets on read and always written back in
//! the nested form.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

use super::types::{Exercise, WorkoutPlan, WorkoutSet};

/// `sets` is either the nested list or, in legacy records, a count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawSets {
  List(Vec<WorkoutSet>),
  Count(u32),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExercise {
  pub id: String,
  pub name: String,
  pub sets: Option<RawSets>,
  pub reps: Option<u32>,
  pub weight: Option<f64>,
  pub rest_time: Option<u32>,
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TryFrom<RawExercise> for Exercise {
  type Error = String;

  fn try_from(raw: RawExercise) -> Result<Self, Self::Error> {
    let sets = match raw.sets {
      Some(RawSets::List(sets)) => sets,
      Some(RawSets::Count(count)) => {
        let (reps, weight) = match (raw.reps, raw.weight) {
          (Some(reps), Some(weight)) => (reps, weight),
          _ => {
            return Err(format!(
              "exercise {} has a set count but no reps/weight",
              raw.id
            ))
          }
        };
        expand_legacy_sets(&raw.id, count, reps, weight)
      }
      None => return Err(format!("exercise {} has no sets", raw.id)),
    };

    Ok(Exercise {
      id: raw.id,
      name: raw.name,
      sets,
      rest_time: raw.rest_time,
      notes: raw.notes,
      created_at: raw.created_at,
      updated_at: raw.updated_at,
    })
  }
}

/// Legacy records have no set identities; derive stable ones from the exercise id.
fn expand_legacy_sets(exercise_id: &str, count: u32, reps: u32, weight: f64) -> Vec<WorkoutSet> {
  (0..count)
    .map(|n| WorkoutSet {
      id: format!("{}-set-{}", exercise_id, n + 1),
      reps,
      weight,
      completed: false,
      notes: None,
    })
    .collect()
}

/// Serialize the full collection for export.
pub fn export_plans(plans: &[WorkoutPlan]) -> Result<String> {
  serde_json::to_string_pretty(plans).map_err(|e| eyre!("Failed to serialize plans: {}", e))
}

/// Parse an import payload. The top level must be an array and every element must
/// be a valid plan; anything else is rejected as a whole.
pub fn parse_plans(payload: &str) -> Result<Vec<WorkoutPlan>> {
  let value: serde_json::Value =
    serde_json::from_str(payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;

  if !value.is_array() {
    return Err(eyre!("Payload must be a JSON array of plans"));
  }

  serde_json::from_value(value).map_err(|e| eyre!("Payload contains an invalid plan: {}", e))
}
