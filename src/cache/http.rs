//! Request and response values passed through the cache engine.

use reqwest::Method;
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  /// Script, stylesheet, font, API call...
  #[default]
  Subresource,
}

/// How intermediate HTTP caches should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
  #[default]
  Default,
  /// Bypass intermediate caches and revalidate with the server
  Reload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub cache: CacheMode,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      cache: CacheMode::default(),
      headers: Vec::new(),
    }
  }

  /// A page load of `url`
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_cache(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }

  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// URL with the fragment removed. Fragments never reach the server, so two
  /// requests differing only by fragment share a cache entry.
  pub fn cache_url(&self) -> Url {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url
  }

  /// Method plus URL, e.g. `GET https://example.com/main.js`
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.cache_url())
  }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  /// Exact match from a cache partition
  Cache,
  /// The cached root document, served in place of an unreachable page
  Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  /// Status is 2xx
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_ignores_fragment() {
    let url = Url::parse("http://localhost:4200/index.html#top").unwrap();
    let request = Request::get(url);
    assert_eq!(request.cache_key(), "GET http://localhost:4200/index.html");
  }

  #[test]
  fn test_is_http() {
    let http = Request::get(Url::parse("https://fonts.googleapis.com/css").unwrap());
    let ext = Request::get(Url::parse("chrome-extension://abc/script.js").unwrap());
    assert!(http.is_http());
    assert!(!ext.is_http());
  }

  #[test]
  fn test_response_helpers() {
    let response = Response {
      url: Url::parse("http://localhost:4200/").unwrap(),
      status: 204,
      headers: vec![("Content-Type".to_string(), "text/html".to_string())],
      body: b"hi".to_vec(),
      source: ResponseSource::Network,
    };
    assert!(response.ok());
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.text(), "hi");
  }
}
