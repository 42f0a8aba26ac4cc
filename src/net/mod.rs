//! Request and response snapshots exchanged between the dashboard client,
//! the cache and the network.

mod fetcher;

pub use fetcher::{Fetcher, HttpFetcher};

use std::collections::BTreeMap;

pub type Headers = BTreeMap<String, String>;

/// An outgoing request as issued by the dashboard client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: String,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      method: method.into().to_uppercase(),
      url: url.into(),
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

/// How much of a response the client is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response permitted by CORS headers
  Cors,
  /// Cross-origin response without CORS permission; status and body are hidden
  Opaque,
  /// Network-level error response
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// A fully buffered response snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: String,
  pub status: u16,
  pub response_type: ResponseType,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.into(),
      status,
      response_type: ResponseType::Basic,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// Placeholder served for a dynamic request when neither network nor cache can answer.
  pub fn offline_placeholder(url: &str) -> Self {
    Self::new(url, 200, serde_json::json!({ "offline": true }).to_string())
      .with_header("content-type", "application/json")
  }

  /// Deterministic reply for a static asset that is neither cached nor reachable.
  pub fn not_found(url: &str) -> Self {
    Self::new(url, 404, "Not found").with_header("content-type", "text/plain")
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  /// Only plain 200 responses the client can actually read are worth keeping.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
      && !matches!(
        self.response_type,
        ResponseType::Opaque | ResponseType::Error
      )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_opaque_and_error_are_not_cacheable() {
    let ok = Response::new("https://cdn.example/a.js", 200, "x");
    assert!(ok.is_cacheable());
    assert!(ok.clone().with_type(ResponseType::Cors).is_cacheable());
    assert!(!ok.clone().with_type(ResponseType::Opaque).is_cacheable());
    assert!(!ok.with_type(ResponseType::Error).is_cacheable());
  }

  #[test]
  fn test_non_200_is_not_cacheable() {
    assert!(!Response::new("/", 204, "").is_cacheable());
    assert!(!Response::new("/", 500, "boom").is_cacheable());
  }

  #[test]
  fn test_offline_placeholder_shape() {
    let response = Response::offline_placeholder("http://localhost/api/sales");
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({ "offline": true }));
  }

  #[test]
  fn test_request_method_is_normalized() {
    let request = Request::new("post", "/api/orders");
    assert_eq!(request.method, "POST");
    assert!(!request.is_get());
    assert!(Request::get("/").is_get());
  }
}
