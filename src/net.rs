//! Request/response model and the network seam.
//!
//! The agent never hands `reqwest` types around: requests and responses are
//! captured into plain owned values so they can be stored, replayed from a
//! store, or synthesized without a network in sight. `Fetcher` is the single
//! trait boundary to the real network, which keeps the decision engine
//! testable against scripted doubles.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use url::Url;

/// Request method, restricted to the verbs the agent can encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
  Options,
}

impl Method {
  /// Whether the verb is free of side effects and therefore cacheable.
  pub fn is_read_only(&self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
      Method::Options => "OPTIONS",
    }
  }
}

impl std::str::FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "DELETE" => Ok(Method::Delete),
      "PATCH" => Ok(Method::Patch),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported method: {}", other)),
    }
  }
}

/// How the result of a request will be used by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// The response replaces the top-level document view.
  Navigate,
  /// A subordinate data or asset fetch.
  Subresource,
}

/// An outbound request as seen by the interception engine.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  /// A plain GET subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Subresource,
    }
  }

  /// A GET request for a full-page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Navigate,
    }
  }

  /// Store identity for this request: method plus absolute URL.
  pub fn identity(&self) -> String {
    format!("{} {}", self.method.as_str(), self.url)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Whether this request targets the same origin as `origin`.
  pub fn same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }
}

/// Whether a captured response may be inspected and replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response; status, headers, and body are all visible.
  Basic,
  /// Cross-origin response that cannot be safely replayed from a store.
  Opaque,
}

/// A captured response: everything needed to replay it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub reason: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl Response {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name`, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// The synthetic failure returned when both store and network come up
  /// empty. Callers branch on these exact values, so they are fixed:
  /// status 503, reason "Service Unavailable", plain-text body.
  pub fn service_unavailable() -> Self {
    Self {
      status: 503,
      reason: "Service Unavailable".to_string(),
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Service unavailable: network unreachable and no cached copy exists.".to_vec(),
      kind: ResponseKind::Basic,
    }
  }
}

/// The network boundary. One implementation talks HTTP; tests script their
/// own.
pub trait Fetcher: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;
}

/// Real network fetcher backed by reqwest.
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  /// Create a fetcher; `origin` decides whether captured responses are
  /// basic or opaque.
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
      Method::Patch => reqwest::Method::PATCH,
      Method::Options => reqwest::Method::OPTIONS,
    }
  }
}

impl Fetcher for HttpFetcher {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      let response = self
        .client
        .request(Self::reqwest_method(request.method), request.url.clone())
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

      let status = response.status();
      let reason = status.canonical_reason().unwrap_or_default().to_string();

      // Redirects may land off-origin, so classify by the final URL.
      let kind = if response.url().origin() == self.origin.origin() {
        ResponseKind::Basic
      } else {
        ResponseKind::Opaque
      };

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
        .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
        .to_vec();

      Ok(Response {
        status: status.as_u16(),
        reason,
        headers,
        body,
        kind,
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn identity_includes_method_and_absolute_url() {
    let request = Request::get(url("https://app.example.com/data.json"));
    assert_eq!(request.identity(), "GET https://app.example.com/data.json");

    let head = Request {
      method: Method::Head,
      ..request
    };
    assert_ne!(head.identity(), "GET https://app.example.com/data.json");
  }

  #[test]
  fn read_only_verbs() {
    assert!(Method::Get.is_read_only());
    assert!(Method::Head.is_read_only());
    assert!(!Method::Post.is_read_only());
    assert!(!Method::Delete.is_read_only());
  }

  #[test]
  fn same_origin_ignores_path_but_not_host() {
    let origin = url("https://app.example.com/");
    assert!(Request::get(url("https://app.example.com/a/b")).same_origin(&origin));
    assert!(!Request::get(url("https://cdn.example.com/a")).same_origin(&origin));
    assert!(!Request::get(url("http://app.example.com/a")).same_origin(&origin));
  }

  #[test]
  fn service_unavailable_contract_is_fixed() {
    let response = Response::service_unavailable();
    assert_eq!(response.status, 503);
    assert_eq!(response.reason, "Service Unavailable");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert!(!response.body.is_empty());
  }
}
