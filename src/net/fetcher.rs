//! Network access behind a trait so the cache and sync layers can be tested with fakes.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Headers, Request, Response, ResponseType};

/// Performs a single network round-trip.
///
/// An `Err` means the network could not be reached at all. Any HTTP status,
/// including 4xx/5xx, is a successful fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed fetcher. Every call is bounded by the client timeout.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: &str, timeout: Duration) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  /// Resolve a possibly relative URL against the app origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid request URL {}: {}", url, e))
  }

  fn response_type(&self, url: &Url, headers: &HeaderMap) -> ResponseType {
    if url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else if headers.contains_key(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN) {
      ResponseType::Cors
    } else {
      ResponseType::Opaque
    }
  }
}

/// Flatten a header map into the snapshot form. Repeated headers are joined
/// with ", " in arrival order; values that are not visible ASCII are skipped.
fn collect_headers(map: &HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    let Ok(value) = value.to_str() else {
      continue;
    };
    headers
      .entry(name.as_str().to_string())
      .and_modify(|joined| {
        joined.push_str(", ");
        joined.push_str(value);
      })
      .or_insert_with(|| value.to_string());
  }
  headers
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = self.resolve(&request.url)?;
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name {}: {}", name, e))?;
      let value =
        HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value: {}", e))?;
      headers.insert(name, value);
    }

    let mut builder = self.client.request(method, url.clone()).headers(headers);
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, url, e))?;

    let status = response.status().as_u16();
    let response_type = self.response_type(response.url(), response.headers());
    let final_url = response.url().to_string();

    let snapshot_headers = collect_headers(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", final_url, e))?;

    debug!(url = %final_url, status, kind = response_type.as_str(), "fetched");

    // Opaque responses hide their status and body from the client.
    if response_type == ResponseType::Opaque {
      return Ok(Response {
        url: final_url,
        status: 0,
        response_type,
        headers: Headers::new(),
        body: Vec::new(),
      });
    }

    Ok(Response {
      url: final_url,
      status,
      response_type,
      headers: snapshot_headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fetcher() -> HttpFetcher {
    HttpFetcher::new("http://localhost:5000", Duration::from_secs(1)).unwrap()
  }

  #[test]
  fn test_resolve_relative_against_origin() {
    let url = fetcher().resolve("/static/js/app.js").unwrap();
    assert_eq!(url.as_str(), "http://localhost:5000/static/js/app.js");
  }

  #[test]
  fn test_resolve_keeps_absolute() {
    let url = fetcher().resolve("https://cdn.example/chart.js").unwrap();
    assert_eq!(url.as_str(), "https://cdn.example/chart.js");
  }

  #[test]
  fn test_response_type_by_origin_and_cors() {
    let f = fetcher();
    let same = Url::parse("http://localhost:5000/").unwrap();
    let other = Url::parse("https://cdn.example/chart.js").unwrap();

    assert_eq!(f.response_type(&same, &HeaderMap::new()), ResponseType::Basic);
    assert_eq!(f.response_type(&other, &HeaderMap::new()), ResponseType::Opaque);

    let mut cors = HeaderMap::new();
    cors.insert(
      reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN,
      HeaderValue::from_static("*"),
    );
    assert_eq!(f.response_type(&other, &cors), ResponseType::Cors);
  }

  #[test]
  fn test_repeated_headers_are_joined() {
    let mut map = HeaderMap::new();
    map.append(reqwest::header::VARY, HeaderValue::from_static("accept-encoding"));
    map.append(reqwest::header::VARY, HeaderValue::from_static("origin"));
    map.append(reqwest::header::SET_COOKIE, HeaderValue::from_static("a=1"));
    map.append(reqwest::header::SET_COOKIE, HeaderValue::from_static("b=2"));
    map.insert(reqwest::header::CONTENT_TYPE, HeaderValue::from_static("text/css"));

    let headers = collect_headers(&map);

    assert_eq!(headers.get("vary").unwrap(), "accept-encoding, origin");
    assert_eq!(headers.get("set-cookie").unwrap(), "a=1, b=2");
    assert_eq!(headers.get("content-type").unwrap(), "text/css");
    assert_eq!(headers.len(), 3);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_error() {
    // Port 9 (discard) on localhost is not expected to accept connections.
    let f = HttpFetcher::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    assert!(f.fetch(&Request::get("/")).await.is_err());
  }
}
