mod cache;
mod clients;
mod config;
mod db;
mod event;
mod host;
mod interceptor;
mod logging;
mod net;
mod notify;
mod queue;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::warn;

use crate::clients::WindowRegistry;
use crate::event::{EventHandler, WorkerEvent};
use crate::net::{Headers, Request};
use crate::notify::{LogNotifier, NotificationPayload};
use crate::queue::{NewMutation, QueueStore};
use crate::worker::ServiceWorker;

#[derive(Parser, Debug)]
#[command(name = "owner-sync")]
#[command(about = "Offline-resilient sync layer for the owner monitoring dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/owner-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static manifest and purge stale cache versions
  Install,
  /// Resolve a GET through the cache policy and print the body
  Fetch { url: String },
  /// Queue a mutation for later replay
  Enqueue {
    /// Target URL
    url: String,
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    /// Header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// List queued mutations
  Queue,
  /// Replay queued mutations once
  Sync,
  /// Show a notification for a push payload
  Push {
    /// JSON payload with optional "title" and "body"
    payload: Option<String>,
  },
  /// Activate a notification: focus the dashboard root window or open one
  NotificationClick {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    body: Option<String>,
    /// Window already open at this URL (repeatable)
    #[arg(long = "window")]
    windows: Vec<String>,
  },
  /// Run the worker: install, activate, then sync on every reconnect.
  /// Host events are read from stdin as JSON lines.
  Run,
}

fn parse_headers(raw: &[String]) -> Result<Headers> {
  raw
    .iter()
    .map(|h| {
      let (name, value) = h
        .split_once(':')
        .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", h))?;
      Ok((name.trim().to_lowercase(), value.trim().to_string()))
    })
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(args.verbose, &config.data_dir()?.join("logs"))?;

  let clients = Arc::new(WindowRegistry::new());
  let notifier = Arc::new(LogNotifier::new());
  let worker = Arc::new(ServiceWorker::open(&config, clients.clone(), notifier)?);

  match args.command {
    Command::Install => {
      let report = worker.cache.install().await;
      let activated = worker.cache.activate()?;
      println!(
        "cached {} of {} assets into {} ({} entries)",
        report.cached.len(),
        worker.cache.manifest().len(),
        worker.cache.version(),
        worker.cache.entry_count()?
      );
      if !report.is_complete() {
        for url in &report.failed {
          println!("  failed: {}", url);
        }
      }
      for name in &activated.deleted {
        println!("  deleted stale cache: {}", name);
      }
      println!("live caches: {}", worker.cache.cache_names()?.join(", "));
    }
    Command::Fetch { url } => {
      let served = worker.interceptor.fetch(&Request::get(url)).await?;
      worker.interceptor.settle().await;
      eprintln!(
        "{} {} ({})",
        served.response.status,
        served.response.header("content-type").unwrap_or("-"),
        served.source.as_str()
      );
      println!("{}", String::from_utf8_lossy(&served.response.body));
    }
    Command::Enqueue {
      url,
      method,
      headers,
      data,
    } => {
      let id = worker.queue.enqueue(&NewMutation {
        url,
        method,
        headers: parse_headers(&headers)?,
        body: data.map(String::into_bytes),
      })?;
      println!("{}", id);
    }
    Command::Queue => {
      println!("{} pending", worker.queue.len()?);
      for record in worker.queue.list_all()? {
        println!(
          "{}\t{}\t{}\tattempts={}\t{}",
          record.id,
          record.method,
          record.url,
          record.attempts,
          record.enqueued_at.to_rfc3339()
        );
      }
    }
    Command::Sync => {
      let report = worker.sync.run_pass().await?;
      println!(
        "replayed {}, failed {}, deferred {}, dropped {}",
        report.replayed.len(),
        report.failed.len(),
        report.deferred.len(),
        report.dropped.len()
      );
    }
    Command::Push { payload } => {
      let shown = worker
        .notifications
        .on_push(payload.as_deref().map(str::as_bytes));
      println!("{}: {}", shown.title, shown.body);
    }
    Command::NotificationClick {
      title,
      body,
      windows,
    } => {
      for url in &windows {
        clients.register(url)?;
      }
      let notification = worker
        .notifications
        .notification_for(NotificationPayload { title, body });
      let activation = worker
        .notifications
        .on_notification_activated(&notification)?;
      println!("{:?}", activation);
    }
    Command::Run => {
      let events = EventHandler::new(Duration::from_secs(config.sync.interval_secs.max(1)));
      let tx = events.sender();
      for event in [
        WorkerEvent::Install,
        WorkerEvent::Activate,
        WorkerEvent::Sync {
          tag: config.sync.tag.clone(),
        },
      ] {
        tx.send(event)
          .map_err(|_| eyre!("Worker event channel closed"))?;
      }

      let (replies, mut outgoing) = mpsc::unbounded_channel::<String>();
      tokio::spawn(async move {
        while let Some(line) = outgoing.recv().await {
          println!("{}", line);
        }
      });

      let host_tx = tx.clone();
      tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = host::forward_host_messages(stdin, host_tx, clients, replies).await {
          warn!(error = %e, "host input closed");
        }
      });

      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          let _ = tx.send(WorkerEvent::Shutdown);
        }
      });

      worker.run(events).await?;
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_headers() {
    let headers = parse_headers(&[
      "Content-Type: application/json".to_string(),
      "X-Shop:  main ".to_string(),
    ])
    .unwrap();
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    assert_eq!(headers.get("x-shop").unwrap(), "main");
  }

  #[test]
  fn test_cli_parses_notification_click() {
    let args = Args::try_parse_from([
      "owner-sync",
      "notification-click",
      "--title",
      "Low stock",
      "--window",
      "/",
      "--window",
      "/reports",
    ])
    .unwrap();
    let Command::NotificationClick { title, body, windows } = args.command else {
      panic!("expected notification-click");
    };
    assert_eq!(title.as_deref(), Some("Low stock"));
    assert!(body.is_none());
    assert_eq!(windows, vec!["/".to_string(), "/reports".to_string()]);
  }

  #[test]
  fn test_parse_headers_rejects_missing_colon() {
    assert!(parse_headers(&["Content-Type".to_string()]).is_err());
  }

  #[test]
  fn test_cli_parses_enqueue() {
    let args = Args::try_parse_from([
      "owner-sync",
      "enqueue",
      "/api/stock",
      "-X",
      "PUT",
      "-H",
      "Content-Type: application/json",
      "-d",
      "{}",
    ])
    .unwrap();
    assert!(matches!(
      args.command,
      Command::Enqueue { ref method, .. } if method == "PUT"
    ));
  }
}
