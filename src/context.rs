use tokio::sync::{broadcast, watch};

/// Platform events shared across the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
  /// Network connectivity came back
  Online,
  /// Network connectivity was lost
  Offline,
  /// The application can be installed (assets cached and activated)
  InstallAvailable,
  /// The context is being torn down; listeners should stop
  Shutdown,
}

/// Process-wide context constructed at startup.
///
/// Owns the connectivity flag and the install-availability flag and fans out
/// transitions to subscribers. In the binary, connectivity follows the outcome of
/// requests to the app origin (see `ConnectivityFetcher`).
pub struct AppContext {
  events: broadcast::Sender<PlatformEvent>,
  online: watch::Sender<bool>,
  install_available: watch::Sender<bool>,
}

impl AppContext {
  pub fn new(online: bool) -> Self {
    let (events, _) = broadcast::channel(64);
    let (online, _) = watch::channel(online);
    let (install_available, _) = watch::channel(false);

    Self {
      events,
      online,
      install_available,
    }
  }

  /// Subscribe to events published from now on
  pub fn subscribe(&self) -> Subscription {
    Subscription {
      rx: self.events.subscribe(),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.online.borrow()
  }

  pub fn is_install_available(&self) -> bool {
    *self.install_available.borrow()
  }

  pub fn go_online(&self) {
    self.set_online(true);
  }

  pub fn go_offline(&self) {
    self.set_online(false);
  }

  /// Publish a connectivity transition. Setting the current value again is not a
  /// transition and publishes nothing.
  fn set_online(&self, online: bool) {
    if self.online.send_if_modified(|current| std::mem::replace(current, online) != online) {
      self.publish(if online {
        PlatformEvent::Online
      } else {
        PlatformEvent::Offline
      });
    }
  }

  pub fn set_install_available(&self, available: bool) {
    let changed = self
      .install_available
      .send_if_modified(|current| std::mem::replace(current, available) != available);
    if changed && available {
      self.publish(PlatformEvent::InstallAvailable);
    }
  }

  /// Tell every listener to stop.
  pub fn shutdown(&self) {
    self.publish(PlatformEvent::Shutdown);
  }

  fn publish(&self, event: PlatformEvent) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }
}

/// A live subscription; dropping it unsubscribes.
pub struct Subscription {
  rx: broadcast::Receiver<PlatformEvent>,
}

impl Subscription {
  /// Receive the next event. Returns None once the context is gone.
  pub async fn next(&mut self) -> Option<PlatformEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        // Missed events are superseded by later ones; the flags hold current state
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  pub fn unsubscribe(self) {}
}
