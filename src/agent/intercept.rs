//! Interception decision engine.
//!
//! Every outbound request the application issues runs through `handle_fetch`,
//! which decides between serve-from-store, fetch-then-store, and
//! pass-through, and applies the fallback policy when both store and network
//! fail. The caller never observes where the response came from, and an
//! intercepted request always resolves to some response.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use crate::net::{Fetcher, Request, Response, ResponseKind};
use crate::store::{StoreBackend, StoredResponse};

use super::Agent;

impl<B: StoreBackend + 'static, F: Fetcher> Agent<B, F> {
  /// Produce a response for one outbound request.
  ///
  /// Requests outside the engine's remit (side-effecting verbs, foreign
  /// origins) pass straight through to the network, uncached and
  /// unmodified; only those requests can surface a network error to the
  /// caller.
  pub async fn handle_fetch(&self, request: &Request) -> Result<Response> {
    if !self.intercepts(request) {
      debug!(identity = %request.identity(), "pass-through");
      return self.fetcher.fetch(request).await;
    }

    let identity = request.identity();

    // Cache-first: a hit is returned as-is, no freshness check and no
    // revalidation round-trip. Availability wins over staleness-freedom.
    if let Some(hit) = self.lookup(&identity) {
      debug!(%identity, "served from store");
      return Ok(hit.response);
    }

    match self.bounded_fetch(request).await {
      Ok(response) => {
        if response.is_success() && response.kind == ResponseKind::Basic {
          self.store_aside(&identity, &response);
        }
        Ok(response)
      }
      Err(e) => {
        debug!(%identity, error = %e, "network unavailable, falling back");
        Ok(self.fallback(request))
      }
    }
  }

  /// Applicability filter: read-only verb and same-origin target.
  fn intercepts(&self, request: &Request) -> bool {
    request.method.is_read_only() && request.same_origin(&self.origin)
  }

  /// Store lookup with errors logged and swallowed. A broken store must
  /// never turn a servable response into an error.
  fn lookup(&self, identity: &str) -> Option<StoredResponse> {
    match self.stores.match_any(identity) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(%identity, error = %e, "store lookup failed");
        None
      }
    }
  }

  /// Network fetch bounded by the configured timeout; a hung connection
  /// becomes a network failure instead of stalling the decision forever.
  async fn bounded_fetch(&self, request: &Request) -> Result<Response> {
    match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(request)).await {
      Ok(result) => result,
      Err(_) => Err(eyre!(
        "Fetch of {} timed out after {:?}",
        request.url,
        self.fetch_timeout
      )),
    }
  }

  /// Write a copy of a fetched response into the dynamic store on a spawned
  /// task. The write is a side effect parallel to the response path, never
  /// a prerequisite for it; failures are logged and swallowed.
  fn store_aside(&self, identity: &str, response: &Response) {
    let stores = self.stores.clone();
    let store = self.config.dynamic_store_name();
    let identity = identity.to_string();
    let copy = response.clone();

    tokio::spawn(async move {
      if let Err(e) = stores.put(&store, &identity, &copy) {
        warn!(%identity, error = %e, "dynamic store write failed");
      }
    });
  }

  /// Total-failure policy: navigations get the pre-cached offline page,
  /// everything else a synthetic 503 the caller can branch on.
  fn fallback(&self, request: &Request) -> Response {
    if request.is_navigation() {
      match self.origin.join(&self.config.offline_path) {
        Ok(url) => {
          let offline = Request::get(url);
          if let Some(hit) = self.lookup(&offline.identity()) {
            return hit.response;
          }
          warn!(path = %self.config.offline_path, "offline fallback page missing from store");
        }
        Err(e) => warn!(path = %self.config.offline_path, error = %e, "invalid offline path"),
      }
    }

    Response::service_unavailable()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::support::{
    basic_response, opaque_response, test_agent, test_config, Scripted, ScriptedFetcher,
  };
  use crate::net::{Method, RequestMode};
  use url::Url;

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn store_hit_short_circuits_the_network() {
    let fetcher = ScriptedFetcher::new();
    let (agent, _sink) = test_agent(test_config(), fetcher.clone());

    let stored = basic_response("cached bytes");
    agent
      .stores()
      .put("static-v1", "GET https://app.example.com/data.json", &stored)
      .unwrap();

    let response = agent
      .handle_fetch(&request("https://app.example.com/data.json"))
      .await
      .unwrap();

    assert_eq!(response, stored);
    assert_eq!(fetcher.call_count(), 0);
  }

  #[tokio::test]
  async fn miss_fetches_then_populates_the_dynamic_store() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
      "GET https://app.example.com/data.json",
      Scripted::Respond(basic_response("fresh")),
    );
    let (agent, _sink) = test_agent(test_config(), fetcher.clone());

    let first = agent
      .handle_fetch(&request("https://app.example.com/data.json"))
      .await
      .unwrap();
    assert_eq!(first.body, b"fresh");
    assert_eq!(
      fetcher.calls(),
      vec!["GET https://app.example.com/data.json".to_string()]
    );

    // The store write lands on a spawned task; give it a tick.
    tokio::task::yield_now().await;

    let second = agent
      .handle_fetch(&request("https://app.example.com/data.json"))
      .await
      .unwrap();
    assert_eq!(second.body, b"fresh");
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(agent.stores().len("dynamic-v1").unwrap(), 1);
  }

  #[tokio::test]
  async fn opaque_and_non_success_responses_are_returned_but_never_stored() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
      "GET https://app.example.com/redirected",
      Scripted::Respond(opaque_response("opaque")),
    );
    fetcher.script(
      "GET https://app.example.com/missing",
      Scripted::Respond(Response {
        status: 404,
        reason: "Not Found".to_string(),
        ..basic_response("gone")
      }),
    );
    let (agent, _sink) = test_agent(test_config(), fetcher.clone());

    let opaque = agent
      .handle_fetch(&request("https://app.example.com/redirected"))
      .await
      .unwrap();
    assert_eq!(opaque.body, b"opaque");

    let missing = agent
      .handle_fetch(&request("https://app.example.com/missing"))
      .await
      .unwrap();
    assert_eq!(missing.status, 404);

    tokio::task::yield_now().await;
    assert_eq!(agent.stores().len("dynamic-v1").unwrap(), 0);
    assert_eq!(fetcher.call_count(), 2);
  }

  #[tokio::test]
  async fn cross_origin_and_mutating_requests_pass_through_uncached() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
      "GET https://cdn.example.com/lib.js",
      Scripted::Respond(basic_response("lib")),
    );
    fetcher.script(
      "POST https://app.example.com/api/save",
      Scripted::Respond(basic_response("saved")),
    );
    let (agent, _sink) = test_agent(test_config(), fetcher.clone());

    let foreign = agent
      .handle_fetch(&request("https://cdn.example.com/lib.js"))
      .await
      .unwrap();
    assert_eq!(foreign.body, b"lib");

    let post = Request {
      method: Method::Post,
      url: Url::parse("https://app.example.com/api/save").unwrap(),
      mode: RequestMode::Subresource,
    };
    let saved = agent.handle_fetch(&post).await.unwrap();
    assert_eq!(saved.body, b"saved");

    tokio::task::yield_now().await;
    assert_eq!(agent.stores().len("static-v1").unwrap(), 0);
    assert_eq!(agent.stores().len("dynamic-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn pass_through_failures_propagate_to_the_caller() {
    let fetcher = ScriptedFetcher::new();
    let (agent, _sink) = test_agent(test_config(), fetcher);

    let result = agent
      .handle_fetch(&request("https://cdn.example.com/lib.js"))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn failed_navigation_serves_the_offline_page() {
    let fetcher = ScriptedFetcher::new();
    let (agent, _sink) = test_agent(test_config(), fetcher);

    let offline = basic_response("<h1>offline</h1>");
    agent
      .stores()
      .put("static-v1", "GET https://app.example.com/offline", &offline)
      .unwrap();

    let navigation = Request::navigate(Url::parse("https://app.example.com/schedule").unwrap());
    let response = agent.handle_fetch(&navigation).await.unwrap();

    assert_eq!(response, offline);
  }

  #[tokio::test]
  async fn failed_data_fetch_gets_the_synthetic_unavailable_response() {
    let fetcher = ScriptedFetcher::new();
    let (agent, _sink) = test_agent(test_config(), fetcher);

    let response = agent
      .handle_fetch(&request("https://app.example.com/api/data"))
      .await
      .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.reason, "Service Unavailable");
    assert_eq!(response.header("content-type"), Some("text/plain"));
  }

  #[tokio::test]
  async fn failed_navigation_without_offline_page_degrades_to_503() {
    let fetcher = ScriptedFetcher::new();
    let (agent, _sink) = test_agent(test_config(), fetcher);

    let navigation = Request::navigate(Url::parse("https://app.example.com/x").unwrap());
    let response = agent.handle_fetch(&navigation).await.unwrap();
    assert_eq!(response.status, 503);
  }

  #[tokio::test(start_paused = true)]
  async fn hung_fetch_times_out_into_the_fallback_branch() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script("GET https://app.example.com/slow", Scripted::Hang);
    let (agent, _sink) = test_agent(test_config(), fetcher.clone());

    let response = agent
      .handle_fetch(&request("https://app.example.com/slow"))
      .await
      .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(fetcher.call_count(), 1);
  }
}
