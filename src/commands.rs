/// Available commands and argument parsing
use clap::Subcommand;
use std::path::PathBuf;

use crate::workout::types::SetDraft;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List workout plans
  #[command(alias = "ls")]
  Plans,

  /// Show a plan with its exercises and sets
  Show { plan_id: String },

  /// Create an empty plan
  CreatePlan {
    name: String,
    #[arg(short, long)]
    description: Option<String>,
  },

  /// Change a plan's name, description or active flag
  UpdatePlan {
    plan_id: String,
    #[arg(short, long)]
    name: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(long)]
    active: Option<bool>,
  },

  /// Delete a plan and its exercises
  DeletePlan { plan_id: String },

  /// Add an exercise to a plan
  AddExercise {
    plan_id: String,
    name: String,
    /// A set as REPSxWEIGHT, e.g. 8x40. Repeat for more sets.
    #[arg(short, long = "set", value_parser = parse_set, required = true)]
    sets: Vec<SetDraft>,
    /// Rest between sets in seconds
    #[arg(short, long)]
    rest: Option<u32>,
    #[arg(long)]
    notes: Option<String>,
  },

  /// Edit an exercise; any --set replaces the whole set list
  UpdateExercise {
    plan_id: String,
    exercise_id: String,
    #[arg(short, long)]
    name: Option<String>,
    #[arg(short, long = "set", value_parser = parse_set)]
    sets: Vec<SetDraft>,
    #[arg(short, long)]
    rest: Option<u32>,
    #[arg(long)]
    notes: Option<String>,
  },

  /// Remove an exercise from a plan
  DeleteExercise { plan_id: String, exercise_id: String },

  /// Append a set copied from the exercise's last set
  AddSet { plan_id: String, exercise_id: String },

  /// Drop an exercise's last set (the only set is kept)
  RemoveSet { plan_id: String, exercise_id: String },

  /// Mark a set done, or undo it
  ToggleSet {
    plan_id: String,
    exercise_id: String,
    set_id: String,
  },

  /// Write all plans as JSON
  Export {
    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Replace all plans with the contents of a JSON export
  Import { path: PathBuf },

  /// Remove all plans from memory and the local mirror
  Clear,

  /// Show pending operations
  Queue {
    /// Include operations that were already synced
    #[arg(short, long)]
    all: bool,
  },

  /// Replay pending operations now
  Sync {
    /// Drop synced operations afterwards
    #[arg(long)]
    purge: bool,
  },

  /// Cache the static assets, then activate
  Install,

  /// Delete caches left behind by other versions
  Activate,

  /// Route a single request through the cache engine
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// Treat the request as a page load
    #[arg(long)]
    navigate: bool,
  },

  /// List caches and their entries
  Caches {
    /// Also list every cached URL
    #[arg(short, long)]
    verbose: bool,
  },
}

/// Parse `REPSxWEIGHT` (e.g. `8x40`, `12x22.5`). A bare number is reps at zero weight.
pub fn parse_set(input: &str) -> Result<SetDraft, String> {
  let input = input.trim();
  let (reps, weight) = match input.split_once(['x', 'X']) {
    Some((reps, weight)) => (reps, Some(weight)),
    None => (input, None),
  };

  let reps: u32 = reps
    .trim()
    .parse()
    .map_err(|_| format!("invalid reps in '{}'", input))?;
  let weight: f64 = match weight {
    Some(w) => w
      .trim()
      .parse()
      .map_err(|_| format!("invalid weight in '{}'", input))?,
    None => 0.0,
  };

  if weight < 0.0 || !weight.is_finite() {
    return Err(format!("weight must be a non-negative number in '{}'", input));
  }

  Ok(SetDraft::new(reps, weight))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_set() {
    assert_eq!(parse_set("8x40").unwrap(), SetDraft::new(8, 40.0));
    assert_eq!(parse_set(" 12X22.5 ").unwrap(), SetDraft::new(12, 22.5));
    assert_eq!(parse_set("15").unwrap(), SetDraft::new(15, 0.0));
  }

  #[test]
  fn test_parse_set_rejects_garbage() {
    assert!(parse_set("x40").is_err());
    assert!(parse_set("8xheavy").is_err());
    assert!(parse_set("8x-5").is_err());
  }
}
