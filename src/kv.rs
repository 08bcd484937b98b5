//! Flat key-value store holding whole serialized documents, and the plan mirror
//! built on it.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::workout::transfer;
use crate::workout::types::WorkoutPlan;

/// Key under which the full plan collection is mirrored.
pub const PLANS_KEY: &str = "workout-plans";

/// Trait for flat key-value backends.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  fn set(&self, key: &str, value: &str) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key inside a directory.
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  pub fn open(dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(dir)
      .map_err(|e| eyre!("Failed to create storage directory {}: {}", dir.display(), e))?;

    Ok(Self {
      dir: dir.to_path_buf(),
    })
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let name: String = key
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
          c
        } else {
          '_'
        }
      })
      .collect();
    self.dir.join(format!("{}.json", name))
  }
}

impl KeyValueStore for FileStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let path = self.path_for(key);
    match std::fs::read_to_string(&path) {
      Ok(contents) => Ok(Some(contents)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(eyre!("Failed to read {}: {}", path.display(), e)),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let path = self.path_for(key);
    // Write then rename so readers never see a half-written document
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, value).map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path)
      .map_err(|e| eyre!("Failed to replace {}: {}", path.display(), e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let path = self.path_for(key);
    match std::fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove {}: {}", path.display(), e)),
    }
  }
}

/// Process-local store, used when nothing should touch the disk.
#[derive(Default)]
pub struct MemoryStore {
  data: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(data.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    data.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut data = self.data.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    data.remove(key);
    Ok(())
  }
}

/// The full plan collection under [`PLANS_KEY`].
///
/// The mirror is best effort: write failures are logged and dropped, and an
/// unreadable document loads as absent.
#[derive(Clone)]
pub struct PlanMirror {
  store: Arc<dyn KeyValueStore>,
}

impl PlanMirror {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self { store }
  }

  pub fn load(&self) -> Option<Vec<WorkoutPlan>> {
    let contents = match self.store.get(PLANS_KEY) {
      Ok(Some(contents)) => contents,
      Ok(None) => return None,
      Err(e) => {
        warn!("Failed to read plan mirror: {}", e);
        return None;
      }
    };

    match transfer::parse_plans(&contents) {
      Ok(plans) => Some(plans),
      Err(e) => {
        warn!("Ignoring unreadable plan mirror: {}", e);
        None
      }
    }
  }

  pub fn save(&self, plans: &[WorkoutPlan]) {
    let result = serde_json::to_string(plans)
      .map_err(|e| eyre!("Failed to serialize plans: {}", e))
      .and_then(|json| self.store.set(PLANS_KEY, &json));

    if let Err(e) = result {
      warn!("Failed to write plan mirror: {}", e);
    }
  }

  pub fn clear(&self) {
    if let Err(e) = self.store.remove(PLANS_KEY) {
      warn!("Failed to remove plan mirror: {}", e);
    }
  }
}
