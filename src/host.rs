//! Line-delimited JSON messages from the embedding host.
//!
//! `run` reads one message per stdin line and turns it into a worker event.
//! Fetch results and window ids go back as one JSON object per line.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::clients::WindowRegistry;
use crate::event::WorkerEvent;
use crate::interceptor::Served;
use crate::net::{Headers, Request};
use crate::notify::NotificationPayload;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostMessage {
  /// A request from a dashboard window; `id` is echoed in the reply
  Fetch {
    id: Option<u64>,
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Headers,
    body: Option<String>,
  },
  Sync {
    tag: String,
  },
  Push {
    payload: Option<serde_json::Value>,
  },
  NotificationClick {
    title: Option<String>,
    body: Option<String>,
  },
  /// A window the host opened on its own
  OpenWindow {
    url: String,
  },
  Shutdown,
}

fn default_method() -> String {
  "GET".to_string()
}

impl HostMessage {
  pub fn parse(line: &str) -> Result<Self> {
    serde_json::from_str(line).map_err(|e| eyre!("Invalid host message: {}", e))
  }
}

/// Read host messages until EOF, forwarding them as worker events.
///
/// Malformed lines are logged and skipped. Stops early once the worker has
/// gone away.
pub async fn forward_host_messages<R: AsyncBufRead + Unpin>(
  reader: R,
  events: mpsc::UnboundedSender<WorkerEvent>,
  clients: Arc<WindowRegistry>,
  replies: mpsc::UnboundedSender<String>,
) -> Result<()> {
  let mut lines = reader.lines();

  while let Some(line) = lines
    .next_line()
    .await
    .map_err(|e| eyre!("Failed to read host input: {}", e))?
  {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }

    let message = match HostMessage::parse(line) {
      Ok(message) => message,
      Err(e) => {
        warn!(error = %e, "skipping host message");
        continue;
      }
    };
    debug!(?message, "host message");

    let event = match message {
      HostMessage::Fetch {
        id,
        url,
        method,
        headers,
        body,
      } => {
        let mut request = Request::new(method, url);
        for (name, value) in &headers {
          request = request.with_header(name, value);
        }
        if let Some(body) = body {
          request = request.with_body(body);
        }

        let (reply, response) = oneshot::channel();
        let replies = replies.clone();
        tokio::spawn(async move {
          // Dropped without a reply when the worker stops first.
          if let Ok(served) = response.await {
            let _ = replies.send(fetch_reply(id, served));
          }
        });
        WorkerEvent::Fetch { request, reply }
      }
      HostMessage::Sync { tag } => WorkerEvent::Sync { tag },
      HostMessage::Push { payload } => {
        WorkerEvent::Push(payload.map(|value| value.to_string().into_bytes()))
      }
      HostMessage::NotificationClick { title, body } => {
        WorkerEvent::NotificationClick(NotificationPayload { title, body })
      }
      HostMessage::OpenWindow { url } => {
        match clients.register(&url) {
          Ok(id) => {
            let reply = serde_json::json!({ "event": "window", "id": id, "url": url });
            let _ = replies.send(reply.to_string());
          }
          Err(e) => warn!(url = %url, error = %e, "failed to register window"),
        }
        continue;
      }
      HostMessage::Shutdown => WorkerEvent::Shutdown,
    };

    if events.send(event).is_err() {
      break;
    }
  }

  Ok(())
}

fn fetch_reply(id: Option<u64>, served: Result<Served>) -> String {
  let reply = match served {
    Ok(served) => serde_json::json!({
      "event": "response",
      "id": id,
      "url": served.response.url,
      "status": served.response.status,
      "source": served.source.as_str(),
      "headers": served.response.headers,
      "body": String::from_utf8_lossy(&served.response.body),
    }),
    Err(e) => serde_json::json!({
      "event": "error",
      "id": id,
      "error": e.to_string(),
    }),
  };
  reply.to_string()
}
