//! Derives the process connectivity flag from real network outcomes.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;
use url::{Origin, Url};

use super::http::{Request, Response};
use super::traits::{FetchError, Fetcher};
use crate::context::AppContext;

/// Wraps a fetcher and reports every request to the app origin: any response
/// means the network is back, a transport failure means it is gone. Other
/// origins say nothing about our own reachability and are ignored.
pub struct ConnectivityFetcher<F> {
  inner: F,
  context: Arc<AppContext>,
  origin: Origin,
}

impl<F: Fetcher> ConnectivityFetcher<F> {
  pub fn new(inner: F, context: Arc<AppContext>, origin: &Url) -> Self {
    Self {
      inner,
      context,
      origin: origin.origin(),
    }
  }

  #[cfg(test)]
  pub fn inner(&self) -> &F {
    &self.inner
  }
}

impl<F: Fetcher> Fetcher for ConnectivityFetcher<F> {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
    Box::pin(async move {
      let result = self.inner.fetch(request).await;

      if request.url.origin() == self.origin {
        match &result {
          Ok(_) => self.context.go_online(),
          Err(e) => {
            debug!("Treating origin as unreachable: {}", e);
            self.context.go_offline();
          }
        }
      }

      result
    })
  }
}
