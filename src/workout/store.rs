//! In-memory source of truth for workout plans.
//!
//! Every mutation edits the state held in a `watch` channel without suspending,
//! so two mutations never interleave their in-memory effects. Persistence is
//! awaited afterwards and may complete in any order relative to other mutations.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::ids::IdGenerator;
use super::transfer;
use super::types::{
  Exercise, ExerciseUpdate, NewExercise, PlanUpdate, SetDraft, WorkoutPlan, WorkoutSet,
};
use crate::sync::{Mutation, Synchronizer};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
  pub plans: Vec<WorkoutPlan>,
  pub selected_plan_id: Option<String>,
}

impl StoreState {
  pub fn plan(&self, plan_id: &str) -> Option<&WorkoutPlan> {
    self.plans.iter().find(|p| p.id == plan_id)
  }

  /// The selected plan, if the pointer refers to a plan that exists
  pub fn selected_plan(&self) -> Option<&WorkoutPlan> {
    self
      .selected_plan_id
      .as_deref()
      .and_then(|id| self.plan(id))
  }
}

pub struct WorkoutStore {
  state: watch::Sender<StoreState>,
  ids: Arc<dyn IdGenerator>,
  sync: Synchronizer,
}

impl WorkoutStore {
  /// Build the store, hydrating it from the flat mirror.
  pub fn load(ids: Arc<dyn IdGenerator>, sync: Synchronizer) -> Self {
    let plans = sync.mirror().load().unwrap_or_default();
    info!(plans = plans.len(), "Loaded workout plans");

    let (state, _) = watch::channel(StoreState {
      plans,
      selected_plan_id: None,
    });

    Self { state, ids, sync }
  }

  /// Observe state snapshots. The receiver is notified after every change.
  pub fn subscribe(&self) -> watch::Receiver<StoreState> {
    self.state.subscribe()
  }

  pub fn snapshot(&self) -> StoreState {
    self.state.borrow().clone()
  }

  pub fn plans(&self) -> Vec<WorkoutPlan> {
    self.state.borrow().plans.clone()
  }

  pub fn plan(&self, plan_id: &str) -> Option<WorkoutPlan> {
    self.state.borrow().plan(plan_id).cloned()
  }

  pub fn selected_plan(&self) -> Option<WorkoutPlan> {
    self.state.borrow().selected_plan().cloned()
  }

  pub fn is_offline(&self) -> bool {
    !self.sync.is_online()
  }

  pub fn synchronizer(&self) -> &Synchronizer {
    &self.sync
  }

  // ==========================================================================
  // Plans
  // ==========================================================================

  pub async fn create_plan(&self, name: &str, description: Option<&str>) -> Result<WorkoutPlan> {
    let now = Utc::now();
    let plan = WorkoutPlan {
      id: self.ids.next_id(),
      name: name.to_string(),
      description: description.map(str::to_string),
      is_active: true,
      exercises: Vec::new(),
      created_at: now,
      updated_at: now,
    };

    self.state.send_modify(|state| state.plans.push(plan.clone()));
    self.persist(vec![Mutation::CreatePlan(plan.clone())]).await?;

    Ok(plan)
  }

  /// Merge the provided fields. `None` if the plan is unknown.
  pub async fn update_plan(&self, plan_id: &str, update: PlanUpdate) -> Result<Option<WorkoutPlan>> {
    let updated = self.modify_plan(plan_id, |plan| {
      if let Some(name) = update.name {
        plan.name = name;
      }
      if let Some(description) = update.description {
        plan.description = Some(description);
      }
      if let Some(is_active) = update.is_active {
        plan.is_active = is_active;
      }
      plan.updated_at = Utc::now();
      Some(plan.clone())
    });

    let Some(plan) = updated else {
      return Ok(None);
    };
    self.persist(vec![Mutation::UpdatePlan(plan.clone())]).await?;

    Ok(Some(plan))
  }

  /// Remove a plan with its exercises. Returns whether anything was removed.
  pub async fn delete_plan(&self, plan_id: &str) -> Result<bool> {
    let removed = self.state.send_if_modified(|state| {
      let Some(index) = state.plans.iter().position(|p| p.id == plan_id) else {
        return false;
      };
      state.plans.remove(index);
      if state.selected_plan_id.as_deref() == Some(plan_id) {
        state.selected_plan_id = None;
      }
      true
    });

    if removed {
      self
        .persist(vec![Mutation::DeletePlan {
          plan_id: plan_id.to_string(),
        }])
        .await?;
    }

    Ok(removed)
  }

  /// Point the selection at a plan, or clear it. Stored data is untouched.
  pub fn select_plan(&self, plan_id: Option<&str>) {
    self.state.send_if_modified(|state| {
      let next = plan_id.map(str::to_string);
      std::mem::replace(&mut state.selected_plan_id, next.clone()) != next
    });
  }

  // ==========================================================================
  // Exercises
  // ==========================================================================

  /// Append an exercise. `None` if the plan is unknown or no sets were given.
  pub async fn add_exercise(&self, plan_id: &str, data: NewExercise) -> Result<Option<Exercise>> {
    if data.sets.is_empty() {
      return Ok(None);
    }

    let added = self.modify_plan(plan_id, |plan| {
      let now = Utc::now();
      let exercise_id = self.ids.next_id();
      let exercise = Exercise {
        sets: self.build_sets(data.sets),
        id: exercise_id,
        name: data.name,
        rest_time: data.rest_time,
        notes: data.notes,
        created_at: now,
        updated_at: now,
      };
      plan.exercises.push(exercise.clone());
      plan.updated_at = now;
      Some((exercise, now))
    });

    let Some((exercise, plan_updated_at)) = added else {
      return Ok(None);
    };
    self
      .persist(vec![Mutation::CreateExercise {
        plan_id: plan_id.to_string(),
        plan_updated_at,
        exercise: exercise.clone(),
      }])
      .await?;

    Ok(Some(exercise))
  }

  /// Merge the provided fields; `sets` replaces the whole list. `None` if either
  /// id is unknown or the replacement list is empty.
  pub async fn update_exercise(
    &self,
    plan_id: &str,
    exercise_id: &str,
    update: ExerciseUpdate,
  ) -> Result<Option<Exercise>> {
    if update.sets.as_ref().is_some_and(Vec::is_empty) {
      return Ok(None);
    }

    self
      .edit_exercise(plan_id, exercise_id, |exercise, ids| {
        if let Some(name) = update.name {
          exercise.name = name;
        }
        if let Some(drafts) = update.sets {
          exercise.sets = drafts.into_iter().map(|d| new_set(ids, d)).collect();
        }
        if let Some(rest_time) = update.rest_time {
          exercise.rest_time = Some(rest_time);
        }
        if let Some(notes) = update.notes {
          exercise.notes = Some(notes);
        }
        true
      })
      .await
  }

  /// Remove an exercise regardless of its sets. Returns whether it existed.
  pub async fn delete_exercise(&self, plan_id: &str, exercise_id: &str) -> Result<bool> {
    let removed = self.modify_plan(plan_id, |plan| {
      let index = plan.exercises.iter().position(|e| e.id == exercise_id)?;
      plan.exercises.remove(index);
      plan.updated_at = Utc::now();
      Some(plan.updated_at)
    });

    let Some(plan_updated_at) = removed else {
      return Ok(false);
    };
    self
      .persist(vec![Mutation::DeleteExercise {
        plan_id: plan_id.to_string(),
        plan_updated_at,
        exercise_id: exercise_id.to_string(),
      }])
      .await?;

    Ok(true)
  }

  /// Append a set copying the last one's reps and weight.
  pub async fn add_set(&self, plan_id: &str, exercise_id: &str) -> Result<Option<Exercise>> {
    self
      .edit_exercise(plan_id, exercise_id, |exercise, ids| {
        let Some(last) = exercise.sets.last() else {
          return false;
        };
        let set = new_set(ids, SetDraft::new(last.reps, last.weight));
        exercise.sets.push(set);
        true
      })
      .await
  }

  /// Drop the last set. An exercise keeps at least one set, so this is a no-op
  /// (returning `None`) when only one is left.
  pub async fn remove_last_set(&self, plan_id: &str, exercise_id: &str) -> Result<Option<Exercise>> {
    self
      .edit_exercise(plan_id, exercise_id, |exercise, _| {
        if exercise.sets.len() <= 1 {
          return false;
        }
        exercise.sets.pop();
        true
      })
      .await
  }

  pub async fn toggle_set_completed(
    &self,
    plan_id: &str,
    exercise_id: &str,
    set_id: &str,
  ) -> Result<Option<Exercise>> {
    self
      .edit_exercise(plan_id, exercise_id, |exercise, _| {
        match exercise.sets.iter_mut().find(|s| s.id == set_id) {
          Some(set) => {
            set.completed = !set.completed;
            true
          }
          None => false,
        }
      })
      .await
  }

  // ==========================================================================
  // Whole collection
  // ==========================================================================

  pub fn export_all(&self) -> Result<String> {
    transfer::export_plans(&self.state.borrow().plans)
  }

  /// Replace the whole collection with the payload's plans.
  ///
  /// Returns `Ok(false)` and leaves state untouched when the payload is not a
  /// valid collection. Errors only when the result couldn't be persisted.
  pub async fn import_all(&self, payload: &str) -> Result<bool> {
    let imported = match transfer::parse_plans(payload) {
      Ok(plans) => plans,
      Err(e) => {
        warn!("Rejected import: {}", e);
        return Ok(false);
      }
    };

    let mut dropped = Vec::new();
    self.state.send_modify(|state| {
      dropped = state
        .plans
        .iter()
        .filter(|old| !imported.iter().any(|p| p.id == old.id))
        .map(|old| old.id.clone())
        .collect();
      state.plans = imported.clone();
      if state.selected_plan().is_none() {
        state.selected_plan_id = None;
      }
    });
    info!(
      plans = imported.len(),
      dropped = dropped.len(),
      "Imported workout plans"
    );

    let mutations = imported
      .into_iter()
      .map(Mutation::UpdatePlan)
      .chain(dropped.into_iter().map(|plan_id| Mutation::DeletePlan { plan_id }))
      .collect();
    self.persist(mutations).await?;

    Ok(true)
  }

  /// Empty memory and the flat mirror. The durable store is left alone.
  pub fn clear_all(&self) {
    self.state.send_modify(|state| *state = StoreState::default());
    self.sync.mirror().clear();
    info!("Cleared all workout plans");
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  /// Apply `f` to one plan. State is only marked changed when `f` returns Some.
  fn modify_plan<T>(&self, plan_id: &str, f: impl FnOnce(&mut WorkoutPlan) -> Option<T>) -> Option<T> {
    let mut out = None;
    self.state.send_if_modified(|state| {
      let Some(plan) = state.plans.iter_mut().find(|p| p.id == plan_id) else {
        return false;
      };
      out = f(plan);
      out.is_some()
    });
    out
  }

  /// Edit one exercise and persist it as an exercise update. `f` returns whether
  /// it changed anything; timestamps are only bumped if it did.
  async fn edit_exercise(
    &self,
    plan_id: &str,
    exercise_id: &str,
    f: impl FnOnce(&mut Exercise, &dyn IdGenerator) -> bool,
  ) -> Result<Option<Exercise>> {
    let edited = self.modify_plan(plan_id, |plan| {
      let exercise = plan.exercises.iter_mut().find(|e| e.id == exercise_id)?;
      if !f(exercise, self.ids.as_ref()) {
        return None;
      }
      let now = Utc::now();
      exercise.updated_at = now;
      let exercise = exercise.clone();
      plan.updated_at = now;
      Some((exercise, now))
    });

    let Some((exercise, plan_updated_at)) = edited else {
      return Ok(None);
    };
    self
      .persist(vec![Mutation::UpdateExercise {
        plan_id: plan_id.to_string(),
        plan_updated_at,
        exercise: exercise.clone(),
      }])
      .await?;

    Ok(Some(exercise))
  }

  fn build_sets(&self, drafts: Vec<SetDraft>) -> Vec<WorkoutSet> {
    drafts
      .into_iter()
      .map(|d| new_set(self.ids.as_ref(), d))
      .collect()
  }

  async fn persist(&self, mutations: Vec<Mutation>) -> Result<()> {
    let plans = self.plans();
    self.sync.persist(&plans, mutations).await
  }
}

fn new_set(ids: &dyn IdGenerator, draft: SetDraft) -> WorkoutSet {
  WorkoutSet {
    id: ids.next_id(),
    reps: draft.reps,
    weight: draft.weight,
    completed: draft.completed,
    notes: draft.notes,
  }
}
