//! The two request strategies and their fallbacks.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::http::{Request, Response, ResponseSource};
use super::storage::CacheStorage;
use super::traits::{FetchError, Fetcher};

/// Serves requests cache-first or network-first on top of a [`CacheStorage`].
///
/// Storage failures never surface to the caller: a failed lookup is treated as a
/// miss and a failed store is logged, with the network response still returned.
pub struct CacheLayer<F: Fetcher> {
  storage: Arc<CacheStorage>,
  fetcher: Arc<F>,
  static_cache: String,
  dynamic_cache: String,
  /// Served in place of navigations that can't be reached
  root_document: Url,
}

impl<F: Fetcher> CacheLayer<F> {
  pub fn new(
    storage: Arc<CacheStorage>,
    fetcher: Arc<F>,
    static_cache: String,
    dynamic_cache: String,
    root_document: Url,
  ) -> Self {
    Self {
      storage,
      fetcher,
      static_cache,
      dynamic_cache,
      root_document,
    }
  }

  /// Serve from any cache without touching the network. On a miss, fetch and
  /// keep successful responses in the static cache. If the network fails, fall
  /// back to the cached root document.
  pub async fn cache_first(&self, request: &Request) -> Result<Response, FetchError> {
    if let Some(cached) = self.lookup(request) {
      debug!(url = %request.url, "Cache hit");
      return Ok(cached);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(&self.static_cache, request, &response);
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, "Cache miss and network failed: {}", e);
        self.root_fallback().ok_or(e)
      }
    }
  }

  /// Fetch first and keep successful responses in the dynamic cache. If the
  /// network fails, serve the cached copy of the request, then (for page loads
  /// only) the cached root document.
  pub async fn network_first(&self, request: &Request) -> Result<Response, FetchError> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store(&self.dynamic_cache, request, &response);
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, "Network failed, trying cache: {}", e);

        if let Some(cached) = self.lookup(request) {
          return Ok(cached);
        }
        if request.is_navigation() {
          if let Some(root) = self.root_fallback() {
            return Ok(root);
          }
        }
        Err(e)
      }
    }
  }

  fn lookup(&self, request: &Request) -> Option<Response> {
    match self.storage.match_any(request) {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %request.url, "Cache lookup failed: {}", e);
        None
      }
    }
  }

  fn store(&self, cache_name: &str, request: &Request, response: &Response) {
    // Other methods are served but never stored
    if request.method != reqwest::Method::GET {
      return;
    }
    if let Err(e) = self.storage.put(cache_name, request, response) {
      warn!(url = %request.url, cache = cache_name, "Failed to cache response: {}", e);
    }
  }

  fn root_fallback(&self) -> Option<Response> {
    let root = Request::get(self.root_document.clone());
    self.lookup(&root).map(|response| Response {
      source: ResponseSource::Fallback,
      ..response
    })
  }
}

impl<F: Fetcher> Clone for CacheLayer<F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      static_cache: self.static_cache.clone(),
      dynamic_cache: self.dynamic_cache.clone(),
      root_document: self.root_document.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::testing::RecordingFetcher;

  const ROOT: &str = "http://localhost:4200/index.html";
  const API: &str = "http://localhost:4200/api/plans";

  fn layer() -> (CacheLayer<RecordingFetcher>, Arc<RecordingFetcher>, Arc<CacheStorage>) {
    let storage = Arc::new(CacheStorage::open_in_memory().unwrap());
    let fetcher = Arc::new(RecordingFetcher::default());
    let layer = CacheLayer::new(
      storage.clone(),
      fetcher.clone(),
      "static".to_string(),
      "dynamic".to_string(),
      Url::parse(ROOT).unwrap(),
    );
    (layer, fetcher, storage)
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_cache_first_stores_then_hits_without_fetching() {
    let (layer, fetcher, storage) = layer();
    fetcher.respond(ROOT, 200, "<html>");

    let first = layer.cache_first(&get(ROOT)).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(storage.entry_count("static").unwrap(), 1);

    let second = layer.cache_first(&get(ROOT)).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let (layer, fetcher, storage) = layer();
    fetcher.respond(ROOT, 404, "missing");

    let response = layer.cache_first(&get(ROOT)).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(storage.entry_count("static").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_network_first_stores_in_dynamic_and_falls_back_to_copy() {
    let (layer, fetcher, storage) = layer();
    fetcher.respond(API, 200, "[]");

    layer.network_first(&get(API)).await.unwrap();
    assert_eq!(storage.entry_count("dynamic").unwrap(), 1);

    fetcher.set_offline(true);
    let cached = layer.network_first(&get(API)).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.text(), "[]");
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_root_document() {
    let (layer, fetcher, _) = layer();
    fetcher.respond(ROOT, 200, "<html>");
    layer.cache_first(&get(ROOT)).await.unwrap();
    fetcher.set_offline(true);

    let page = Request::navigate(Url::parse("http://localhost:4200/plans/42").unwrap());
    let response = layer.network_first(&page).await.unwrap();
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.text(), "<html>");

    // Not a navigation: no root fallback
    assert!(layer.network_first(&get(API)).await.is_err());
  }

  #[tokio::test]
  async fn test_failures_without_fallback_propagate() {
    let (layer, fetcher, _) = layer();
    fetcher.set_offline(true);

    let page = Request::navigate(Url::parse(ROOT).unwrap());
    assert!(layer.network_first(&page).await.is_err());
    assert!(layer.cache_first(&get(API)).await.is_err());
  }

  #[tokio::test]
  async fn test_non_get_is_served_but_not_cached() {
    let (layer, fetcher, storage) = layer();
    fetcher.respond(API, 201, "created");

    let post = get(API).with_method(reqwest::Method::POST);
    let response = layer.network_first(&post).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(storage.entry_count("dynamic").unwrap(), 0);
  }
}
