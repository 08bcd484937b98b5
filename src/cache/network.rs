use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::{CACHE_CONTROL, PRAGMA};

use super::http::{CacheMode, Request, Response, ResponseSource};
use super::traits::{FetchError, Fetcher};

/// Fetches over HTTP(S) with reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(app_name: &str) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(format!("{}/{}", app_name, env!("CARGO_PKG_VERSION")))
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  async fn send(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if request.cache == CacheMode::Reload {
      builder = builder
        .header(CACHE_CONTROL, "no-cache")
        .header(PRAGMA, "no-cache");
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::network(&request.url, e))?;

    let url = response.url().clone();
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::network(&request.url, e))?
      .to_vec();

    Ok(Response {
      url,
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(self.send(request))
  }
}
