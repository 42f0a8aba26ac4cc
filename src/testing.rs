//! Fakes shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::net::{Fetcher, Request, Response};

/// Fetcher answering from a fixed route table and recording every call.
///
/// URLs without a route, or marked as failing, produce a network error.
/// Requests with a stalled method never complete.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  stalled: Mutex<HashSet<String>>,
  offline: Mutex<bool>,
  calls: Mutex<Vec<Request>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(self, url: &str, response: Response) -> Self {
    self.routes.lock().unwrap().insert(url.to_string(), response);
    self
  }

  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn stall(&self, method: &str) {
    self.stalled.lock().unwrap().insert(method.to_uppercase());
  }

  pub fn set_offline(&self, offline: bool) {
    *self.offline.lock().unwrap() = offline;
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    let stalled = self.stalled.lock().unwrap().contains(&request.method);
    if stalled {
      futures::future::pending::<()>().await;
    }

    if *self.offline.lock().unwrap() || self.failing.lock().unwrap().contains(&request.url) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(&request.url)
      .cloned()
      .ok_or_else(|| eyre!("connection refused: {}", request.url))
  }
}
