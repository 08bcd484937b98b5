use crate::cache::{
  CacheEngine, CacheStorage, ConnectivityFetcher, HttpFetcher, Request, ResponseSource,
};
use crate::commands::Command;
use crate::config::Config;
use crate::context::AppContext;
use crate::db::Database;
use crate::kv::{FileStore, PlanMirror};
use crate::sync::Synchronizer;
use crate::workout::ids::UuidGenerator;
use crate::workout::types::{ExerciseUpdate, NewExercise, PlanUpdate, WorkoutPlan};
use crate::workout::WorkoutStore;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Connectivity and install signals
  context: Arc<AppContext>,

  /// Workout plans and their persistence
  store: WorkoutStore,

  /// Asset and request cache. Requests to the origin also drive connectivity.
  engine: CacheEngine<ConnectivityFetcher<HttpFetcher>>,

  /// Follows connectivity events for the synchronizer
  listener: JoinHandle<()>,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;
    info!(data_dir = %data_dir.display(), offline = config.start_offline, "Starting");

    let context = Arc::new(AppContext::new(!config.start_offline));

    // The durable store opens lazily on first use
    let db = Arc::new(Database::new(Database::default_path(&data_dir)));
    let kv = Arc::new(FileStore::open(&data_dir.join("local-storage"))?);
    let sync = Synchronizer::new(PlanMirror::new(kv), db, context.is_online());
    let listener = sync.listen(context.subscribe());

    // Anything left queued by an earlier offline session
    if sync.is_online() {
      if let Err(e) = sync.drain().await {
        warn!("Startup drain failed: {}", e);
      }
    }

    let store = WorkoutStore::load(Arc::new(UuidGenerator), sync);

    let storage = Arc::new(CacheStorage::open(&data_dir.join("cache.db"))?);
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;
    let fetcher = ConnectivityFetcher::new(
      HttpFetcher::new(&config.app_name)?,
      context.clone(),
      &origin,
    );
    let engine = CacheEngine::new(&config, storage, fetcher)?;

    Ok(Self {
      config,
      context,
      store,
      engine,
      listener,
    })
  }

  /// Execute one command, then stop background work.
  pub async fn run(self, command: Command) -> Result<()> {
    let result = self.execute(command).await;

    self.context.shutdown();
    if let Err(e) = self.listener.await {
      warn!("Connectivity listener ended abnormally: {}", e);
    }

    result
  }

  async fn execute(&self, command: Command) -> Result<()> {
    match command {
      Command::Plans => {
        let plans = self.store.plans();
        if plans.is_empty() {
          println!("No workout plans");
        }
        for plan in &plans {
          println!(
            "{}  {}  ({} exercises){}",
            plan.id,
            plan.name,
            plan.exercises.len(),
            if plan.is_active { "" } else { "  [inactive]" }
          );
        }
      }

      Command::Show { plan_id } => {
        self.store.select_plan(Some(&plan_id));
        let plan = self
          .store
          .selected_plan()
          .ok_or_else(|| not_found("Plan", &plan_id))?;
        print_plan(&plan);
      }

      Command::CreatePlan { name, description } => {
        let plan = self
          .store
          .create_plan(&name, description.as_deref())
          .await?;
        println!("Created plan {} ({})", plan.name, plan.id);
        self.note_offline();
      }

      Command::UpdatePlan {
        plan_id,
        name,
        description,
        active,
      } => {
        let update = PlanUpdate {
          name,
          description,
          is_active: active,
        };
        let plan = self
          .store
          .update_plan(&plan_id, update)
          .await?
          .ok_or_else(|| not_found("Plan", &plan_id))?;
        println!("Updated plan {} ({})", plan.name, plan.id);
        self.note_offline();
      }

      Command::DeletePlan { plan_id } => {
        if !self.store.delete_plan(&plan_id).await? {
          return Err(not_found("Plan", &plan_id));
        }
        println!("Deleted plan {}", plan_id);
        self.note_offline();
      }

      Command::AddExercise {
        plan_id,
        name,
        sets,
        rest,
        notes,
      } => {
        let data = NewExercise {
          name,
          sets,
          rest_time: rest,
          notes,
        };
        let exercise = self
          .store
          .add_exercise(&plan_id, data)
          .await?
          .ok_or_else(|| not_found("Plan", &plan_id))?;
        println!("Added exercise {} ({})", exercise.name, exercise.id);
        self.note_offline();
      }

      Command::UpdateExercise {
        plan_id,
        exercise_id,
        name,
        sets,
        rest,
        notes,
      } => {
        let update = ExerciseUpdate {
          name,
          sets: (!sets.is_empty()).then_some(sets),
          rest_time: rest,
          notes,
        };
        let exercise = self
          .store
          .update_exercise(&plan_id, &exercise_id, update)
          .await?
          .ok_or_else(|| not_found("Exercise", &exercise_id))?;
        println!("Updated exercise {} ({})", exercise.name, exercise.id);
        self.note_offline();
      }

      Command::DeleteExercise {
        plan_id,
        exercise_id,
      } => {
        if !self.store.delete_exercise(&plan_id, &exercise_id).await? {
          return Err(not_found("Exercise", &exercise_id));
        }
        println!("Deleted exercise {}", exercise_id);
        self.note_offline();
      }

      Command::AddSet {
        plan_id,
        exercise_id,
      } => {
        let exercise = self
          .store
          .add_set(&plan_id, &exercise_id)
          .await?
          .ok_or_else(|| not_found("Exercise", &exercise_id))?;
        println!("{} now has {} sets", exercise.name, exercise.sets.len());
        self.note_offline();
      }

      Command::RemoveSet {
        plan_id,
        exercise_id,
      } => match self.store.remove_last_set(&plan_id, &exercise_id).await? {
        Some(exercise) => {
          println!("{} now has {} sets", exercise.name, exercise.sets.len());
          self.note_offline();
        }
        None => println!("Nothing removed: unknown exercise or only one set left"),
      },

      Command::ToggleSet {
        plan_id,
        exercise_id,
        set_id,
      } => {
        let exercise = self
          .store
          .toggle_set_completed(&plan_id, &exercise_id, &set_id)
          .await?
          .ok_or_else(|| not_found("Set", &set_id))?;
        if let Some(set) = exercise.sets.iter().find(|s| s.id == set_id) {
          let state = if set.completed { "done" } else { "not done" };
          println!("Set {} marked {}", set.id, state);
        }
        self.note_offline();
      }

      Command::Export { output } => {
        let payload = self.store.export_all()?;
        match output {
          Some(path) => {
            std::fs::write(&path, payload)
              .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
            println!("Exported {} plans to {}", self.store.plans().len(), path.display());
          }
          None => println!("{}", payload),
        }
      }

      Command::Import { path } => {
        let payload = std::fs::read_to_string(&path)
          .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
        if !self.store.import_all(&payload).await? {
          return Err(eyre!(
            "Import failed: {} is not a valid plan export; existing data was kept",
            path.display()
          ));
        }
        println!("Imported {} plans", self.store.plans().len());
        self.note_offline();
      }

      Command::Clear => {
        self.store.clear_all();
        println!("Cleared all plans");
      }

      Command::Queue { all } => {
        let queue = self.store.synchronizer().queue();
        let operations = if all {
          queue.all().await?
        } else {
          queue.unsynced().await?
        };
        if operations.is_empty() {
          println!("No pending operations");
        }
        for op in operations {
          println!(
            "{:>5}  {:<16} {}  {}{}",
            op.id,
            op.kind.to_string(),
            op.payload.entity_id(),
            op.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            if op.synced { "  [synced]" } else { "" }
          );
        }
      }

      Command::Sync { purge } => {
        let sync = self.store.synchronizer();
        // A reachable origin flips the context online and the listener drains too
        if !self.engine.check_origin().await {
          info!("Origin unreachable, staying offline");
        }
        if !self.context.is_online() {
          let pending = sync.queue().unsynced_count().await?;
          println!("Offline: {} operations waiting", pending);
          return Ok(());
        }

        let report = sync.drain().await?;
        println!(
          "Synced {}, failed {}, deferred {}, {} still pending",
          report.synced.len(),
          report.failed.len(),
          report.deferred.len(),
          sync.queue().unsynced_count().await?
        );
        if purge {
          let purged = sync.queue().purge_synced().await?;
          println!("Purged {} synced operations", purged);
        }
      }

      Command::Install => {
        let report = self.engine.install().await;
        println!(
          "Cached {} of {} static assets",
          report.cached.len(),
          report.cached.len() + report.failed.len()
        );
        for (url, reason) in &report.failed {
          println!("  failed: {} ({})", url, reason);
        }

        // A new version takes over straight away instead of waiting
        self.activate().await?;
        self.context.set_install_available(true);
      }

      Command::Activate => self.activate().await?,

      Command::Fetch { url, navigate } => {
        let origin = Url::parse(&self.config.origin)
          .map_err(|e| eyre!("Invalid origin '{}': {}", self.config.origin, e))?;
        let url = origin
          .join(&url)
          .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
        let request = if navigate {
          Request::navigate(url)
        } else {
          Request::get(url)
        };

        match self.engine.handle(&request).await? {
          Some(response) => {
            let source = match response.source {
              ResponseSource::Network => "network",
              ResponseSource::Cache => "cache",
              ResponseSource::Fallback => "root document fallback",
            };
            println!(
              "{} {} from {} ({} bytes)",
              response.status,
              response.url,
              source,
              response.body.len()
            );
          }
          None => println!("Not intercepted: {}", request.url),
        }
      }

      Command::Caches { verbose } => {
        let storage = self.engine.storage();
        let names = storage.keys()?;
        if names.is_empty() {
          println!("No caches");
        }
        for name in names {
          let current = name == self.engine.static_cache_name()
            || name == self.engine.dynamic_cache_name();
          println!(
            "{}  {} entries{}",
            name,
            storage.entry_count(&name)?,
            if current { "" } else { "  [stale]" }
          );
          if verbose {
            for entry in storage.entries(&name)? {
              println!(
                "    {} {} {}  {}",
                entry.status,
                entry.method,
                entry.url,
                entry.cached_at.format("%Y-%m-%d %H:%M:%S")
              );
            }
          }
        }
      }
    }

    Ok(())
  }

  async fn activate(&self) -> Result<()> {
    let report = self.engine.activate().await?;
    if report.deleted.is_empty() {
      println!("Activated; no stale caches");
    } else {
      println!("Activated; deleted {}", report.deleted.join(", "));
    }
    Ok(())
  }

  fn note_offline(&self) {
    if self.store.is_offline() {
      println!("Offline: change queued for sync");
    }
  }
}

fn not_found(what: &str, id: &str) -> color_eyre::Report {
  eyre!("{} {} not found", what, id)
}

fn print_plan(plan: &WorkoutPlan) {
  println!("{}  ({})", plan.name, plan.id);
  if let Some(description) = &plan.description {
    println!("  {}", description);
  }
  println!(
    "  {}  updated {}  volume {:.1} kg",
    if plan.is_active { "active" } else { "inactive" },
    plan.updated_at.format("%Y-%m-%d %H:%M"),
    plan.volume()
  );

  for exercise in &plan.exercises {
    println!();
    match exercise.rest_time {
      Some(rest) => println!("  {} ({})  rest {}s", exercise.name, exercise.id, rest),
      None => println!("  {} ({})", exercise.name, exercise.id),
    }
    for (n, set) in exercise.sets.iter().enumerate() {
      println!(
        "    {}. {} x {} kg  [{}]  {}",
        n + 1,
        set.reps,
        set.weight,
        if set.completed { "x" } else { " " },
        set.id
      );
    }
  }
}
