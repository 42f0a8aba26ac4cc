//! Normalized request identity used as the cache key.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Request;

/// Method plus absolute URL. Only GET requests are ever cached, but the
/// method stays part of the identity so a HEAD never matches a GET entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  /// Build the key for `request`, resolving relative URLs against `base`.
  pub fn new(request: &Request, base: &Url) -> Result<Self> {
    let mut url = base
      .join(&request.url)
      .map_err(|e| eyre!("Invalid request URL {}: {}", request.url, e))?;
    url.set_fragment(None);

    Ok(Self {
      method: request.method.to_uppercase(),
      url: url.to_string(),
    })
  }

  /// Human-readable form, stored next to the hash.
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base() -> Url {
    Url::parse("http://localhost:5000").unwrap()
  }

  #[test]
  fn test_relative_and_absolute_forms_match() {
    let a = RequestKey::new(&Request::get("/static/css/style.css"), &base()).unwrap();
    let b = RequestKey::new(
      &Request::get("http://localhost:5000/static/css/style.css"),
      &base(),
    )
    .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::new(&Request::get("/#sales"), &base()).unwrap();
    let b = RequestKey::new(&Request::get("/"), &base()).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn test_query_string_is_significant() {
    let a = RequestKey::new(&Request::get("/api/sales?day=1"), &base()).unwrap();
    let b = RequestKey::new(&Request::get("/api/sales?day=2"), &base()).unwrap();
    assert_ne!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_method_is_part_of_identity() {
    let get = RequestKey::new(&Request::get("/"), &base()).unwrap();
    let head = RequestKey::new(&Request::new("HEAD", "/"), &base()).unwrap();
    assert_ne!(get, head);
    assert_eq!(get.description(), "GET http://localhost:5000/");
  }
}
