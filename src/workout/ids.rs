/// Source of entity identities. Injected so tests can use deterministic ids.
pub trait IdGenerator: Send + Sync {
  fn next_id(&self) -> String;
}

/// Random v4 UUIDs in their compact hex form.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
  fn next_id(&self) -> String {
    uuid::Uuid::new_v4().simple().to_string()
  }
}

#[cfg(test)]
pub use sequential::SequentialIds;

#[cfg(test)]
mod sequential {
  use std::sync::atomic::{AtomicU64, Ordering};

  /// `id-1`, `id-2`, ... in call order.
  #[derive(Debug, Default)]
  pub struct SequentialIds {
    counter: AtomicU64,
  }

  impl super::IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
      format!("id-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
  }
}
