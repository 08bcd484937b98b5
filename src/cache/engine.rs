//! Install, activation and request routing for the asset cache.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use super::http::{CacheMode, Request, Response};
use super::layer::CacheLayer;
use super::storage::CacheStorage;
use super::traits::{FetchError, Fetcher};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      WorkerState::Parsed => "parsed",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
    };
    f.write_str(label)
  }
}

/// Strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted
  Passthrough,
  CacheFirst,
  NetworkFirst,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallReport {
  pub cached: Vec<Url>,
  /// Asset URL with the reason it wasn't cached
  pub failed: Vec<(Url, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivateReport {
  /// Stale caches removed
  pub deleted: Vec<String>,
}

struct ManifestEntry {
  url: Url,
  /// Given as a path relative to the origin
  relative: bool,
}

/// Caches the static asset manifest at install time and serves requests with
/// the strategy their URL calls for.
pub struct CacheEngine<F: Fetcher> {
  layer: CacheLayer<F>,
  storage: Arc<CacheStorage>,
  fetcher: Arc<F>,
  origin: Url,
  root_document: Url,
  manifest: Vec<ManifestEntry>,
  static_cache: String,
  dynamic_cache: String,
  state: watch::Sender<WorkerState>,
}

impl<F: Fetcher> CacheEngine<F> {
  pub fn new(config: &Config, storage: Arc<CacheStorage>, fetcher: F) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;

    let manifest = config
      .static_assets
      .iter()
      .map(|asset| {
        let relative = Url::parse(asset).is_err();
        let url = origin
          .join(asset)
          .map_err(|e| eyre!("Invalid static asset '{}': {}", asset, e))?;
        Ok(ManifestEntry { url, relative })
      })
      .collect::<Result<Vec<_>>>()?;

    let root_document = origin
      .join(&config.root_document)
      .map_err(|e| eyre!("Invalid root document '{}': {}", config.root_document, e))?;

    let fetcher = Arc::new(fetcher);
    let static_cache = config.static_cache_name();
    let dynamic_cache = config.dynamic_cache_name();
    let layer = CacheLayer::new(
      storage.clone(),
      fetcher.clone(),
      static_cache.clone(),
      dynamic_cache.clone(),
      root_document.clone(),
    );
    let (state, _) = watch::channel(WorkerState::Parsed);

    Ok(Self {
      layer,
      storage,
      fetcher,
      origin,
      root_document,
      manifest,
      static_cache,
      dynamic_cache,
      state,
    })
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  pub fn static_cache_name(&self) -> &str {
    &self.static_cache
  }

  pub fn dynamic_cache_name(&self) -> &str {
    &self.dynamic_cache
  }

  pub fn storage(&self) -> &CacheStorage {
    &self.storage
  }

  fn set_state(&self, state: WorkerState) {
    self.state.send_replace(state);
    debug!(%state, "Cache engine state changed");
  }

  /// Fetch every manifest asset and store it in the static cache.
  ///
  /// Each asset succeeds or fails on its own; failures are logged and reported,
  /// never returned as an error.
  pub async fn install(&self) -> InstallReport {
    self.set_state(WorkerState::Installing);

    if let Err(e) = self.storage.open_cache(&self.static_cache) {
      warn!(cache = %self.static_cache, "Failed to open static cache: {}", e);
    }

    let mut report = InstallReport::default();
    for entry in &self.manifest {
      // Relative assets are ours; make sure we get a fresh copy
      let mode = if entry.relative {
        CacheMode::Reload
      } else {
        CacheMode::Default
      };
      let request = Request::get(entry.url.clone()).with_cache(mode);

      match self.install_asset(&request).await {
        Ok(()) => report.cached.push(entry.url.clone()),
        Err(reason) => {
          warn!(url = %entry.url, "Failed to cache static asset: {}", reason);
          report.failed.push((entry.url.clone(), reason));
        }
      }
    }

    self.set_state(WorkerState::Installed);
    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "Installed static assets"
    );

    report
  }

  async fn install_asset(&self, request: &Request) -> std::result::Result<(), String> {
    let response = self
      .fetcher
      .fetch(request)
      .await
      .map_err(|e| e.to_string())?;

    if !response.ok() {
      return Err(format!("HTTP {}", response.status));
    }

    self
      .storage
      .put(&self.static_cache, request, &response)
      .map_err(|e| e.to_string())
  }

  /// Delete every cache that is neither the current static nor dynamic one and
  /// take over open sessions.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.set_state(WorkerState::Activating);

    let mut report = ActivateReport::default();
    for name in self.storage.keys()? {
      if name == self.static_cache || name == self.dynamic_cache {
        continue;
      }
      match self.storage.delete(&name) {
        Ok(_) => {
          info!(cache = %name, "Deleted stale cache");
          report.deleted.push(name);
        }
        Err(e) => warn!(cache = %name, "Failed to delete stale cache: {}", e),
      }
    }

    self.set_state(WorkerState::Activated);

    Ok(report)
  }

  /// Ask the origin for the root document, bypassing every cache. True if the
  /// origin answered at all, whatever the status.
  pub async fn check_origin(&self) -> bool {
    let request = Request::get(self.root_document.clone()).with_cache(CacheMode::Reload);
    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        debug!(status = response.status, "Origin reachable");
        true
      }
      Err(e) => {
        debug!("Origin unreachable: {}", e);
        false
      }
    }
  }

  /// Pick the strategy for a request: manifest assets are cache-first, other
  /// same-origin requests network-first, everything else cache-first. Non-HTTP
  /// requests aren't intercepted.
  pub fn route(&self, request: &Request) -> Route {
    if !request.is_http() {
      return Route::Passthrough;
    }

    let url = request.cache_url();
    if self.manifest.iter().any(|entry| entry.url == url) {
      Route::CacheFirst
    } else if url.origin() == self.origin.origin() {
      Route::NetworkFirst
    } else {
      Route::CacheFirst
    }
  }

  /// Serve a request. `None` means it wasn't intercepted and should go to the
  /// network untouched.
  pub async fn handle(&self, request: &Request) -> Result<Option<Response>, FetchError> {
    let route = self.route(request);
    debug!(url = %request.url, ?route, "Routing request");

    match route {
      Route::Passthrough => Ok(None),
      Route::CacheFirst => self.layer.cache_first(request).await.map(Some),
      Route::NetworkFirst => self.layer.network_first(request).await.map(Some),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::http::ResponseSource;
  use crate::cache::traits::testing::RecordingFetcher;

  const FONT: &str = "https://fonts.googleapis.com/css2?family=Roboto:wght@300;400;500&display=swap";

  fn config() -> Config {
    Config {
      static_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/main.js".to_string(),
        FONT.to_string(),
      ],
      ..Config::default()
    }
  }

  fn engine(fetcher: RecordingFetcher) -> CacheEngine<RecordingFetcher> {
    let storage = Arc::new(CacheStorage::open_in_memory().unwrap());
    CacheEngine::new(&config(), storage, fetcher).unwrap()
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn serve_all(fetcher: &RecordingFetcher) {
    fetcher.respond("http://localhost:4200/", 200, "<html>");
    fetcher.respond("http://localhost:4200/index.html", 200, "<html>");
    fetcher.respond("http://localhost:4200/main.js", 200, "main()");
    fetcher.respond(FONT, 200, "@font-face{}");
  }

  #[tokio::test]
  async fn test_install_caches_manifest() {
    let fetcher = RecordingFetcher::default();
    serve_all(&fetcher);
    let engine = engine(fetcher);

    let report = engine.install().await;
    assert_eq!(report.cached.len(), 4);
    assert!(report.failed.is_empty());
    assert_eq!(engine.state(), WorkerState::Installed);
    assert_eq!(engine.storage().entry_count("fittracker-v1-static").unwrap(), 4);
  }

  #[tokio::test]
  async fn test_install_isolates_failures() {
    let fetcher = RecordingFetcher::default();
    fetcher.respond("http://localhost:4200/", 200, "<html>");
    fetcher.respond("http://localhost:4200/index.html", 500, "boom");
    // main.js and the font are unreachable
    let engine = engine(fetcher);

    let report = engine.install().await;
    assert_eq!(report.cached.len(), 1);
    assert_eq!(report.failed.len(), 3);
    assert_eq!(engine.state(), WorkerState::Installed);
  }

  #[tokio::test]
  async fn test_install_reloads_relative_assets_only() {
    let fetcher = RecordingFetcher::default();
    serve_all(&fetcher);
    let engine = engine(fetcher);
    engine.install().await;

    let requests = engine.fetcher.requests();
    let font = requests.iter().find(|r| r.url.as_str() == FONT).unwrap();
    let main = requests
      .iter()
      .find(|r| r.url.path() == "/main.js")
      .unwrap();
    assert_eq!(font.cache, CacheMode::Default);
    assert_eq!(main.cache, CacheMode::Reload);
  }

  #[tokio::test]
  async fn test_activate_deletes_stale_caches() {
    let engine = engine(RecordingFetcher::default());
    let storage = engine.storage();
    storage.open_cache("fittracker-v0-static").unwrap();
    storage.open_cache("fittracker-v1-static").unwrap();
    storage.open_cache("fittracker-v1-dynamic").unwrap();

    let report = engine.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["fittracker-v0-static".to_string()]);
    assert_eq!(
      storage.keys().unwrap(),
      vec![
        "fittracker-v1-static".to_string(),
        "fittracker-v1-dynamic".to_string()
      ]
    );
    assert_eq!(engine.state(), WorkerState::Activated);
  }

  #[test]
  fn test_route() {
    let engine = engine(RecordingFetcher::default());

    assert_eq!(engine.route(&get("http://localhost:4200/main.js")), Route::CacheFirst);
    assert_eq!(
      engine.route(&get("http://localhost:4200/main.js#L10")),
      Route::CacheFirst
    );
    assert_eq!(
      engine.route(&get("http://localhost:4200/api/plans")),
      Route::NetworkFirst
    );
    assert_eq!(
      engine.route(&get("https://fonts.gstatic.com/s/roboto.woff2")),
      Route::CacheFirst
    );
    assert_eq!(
      engine.route(&get("chrome-extension://abc/content.js")),
      Route::Passthrough
    );
  }

  #[tokio::test]
  async fn test_cached_asset_served_without_network() {
    let fetcher = RecordingFetcher::default();
    serve_all(&fetcher);
    let engine = engine(fetcher);
    engine.install().await;
    let calls = engine.fetcher.calls();

    let response = engine
      .handle(&get("http://localhost:4200/main.js"))
      .await
      .unwrap()
      .unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.text(), "main()");
    assert_eq!(engine.fetcher.calls(), calls);
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_root_document() {
    let fetcher = RecordingFetcher::default();
    serve_all(&fetcher);
    let engine = engine(fetcher);
    engine.install().await;
    engine.fetcher.set_offline(true);

    let page = Request::navigate(Url::parse("http://localhost:4200/plans").unwrap());
    let response = engine.handle(&page).await.unwrap().unwrap();

    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.text(), "<html>");
  }

  #[tokio::test]
  async fn test_origin_check_bypasses_cache() {
    let fetcher = RecordingFetcher::default();
    serve_all(&fetcher);
    let engine = engine(fetcher);
    engine.install().await;

    assert!(engine.check_origin().await);
    let last = engine.fetcher.requests().pop().unwrap();
    assert_eq!(last.url.as_str(), "http://localhost:4200/index.html");
    assert_eq!(last.cache, CacheMode::Reload);

    engine.fetcher.set_offline(true);
    assert!(!engine.check_origin().await);
  }

  #[tokio::test]
  async fn test_passthrough_is_not_fetched() {
    let fetcher = RecordingFetcher::default();
    let engine = engine(fetcher);

    let response = engine
      .handle(&get("chrome-extension://abc/content.js"))
      .await
      .unwrap();

    assert!(response.is_none());
    assert_eq!(engine.fetcher.calls(), 0);
  }
}
