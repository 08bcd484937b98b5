//! The seam between the cache engine and the network.

use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

use super::http::{Request, Response};

/// A request that produced no response at all. HTTP error statuses are
/// responses, not errors.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("Network request to {url} failed: {message}")]
  Network { url: String, message: String },
}

impl FetchError {
  pub fn network(url: &Url, message: impl ToString) -> Self {
    Self::Network {
      url: url.to_string(),
      message: message.to_string(),
    }
  }
}

/// Performs network requests on behalf of the cache engine.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}
