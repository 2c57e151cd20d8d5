//! Live event channel: task status changes and new log lines pushed over SSE.
//!
//! The channel reconnects on its own after a fixed delay whenever the stream
//! drops, forever. Keepalive pings are swallowed here and never reach
//! subscribers.

use std::time::Duration;

use eventsource_client::{Client, ClientBuilder, ReconnectOptions, SSE};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{TaskId, TaskStatus};
use crate::error::StreamError;
use crate::line::LogLine;

const MSG_TYPE_TASK_STATUS: u64 = 1;
const MSG_TYPE_LOG: u64 = 2;

/// A status change for one task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub reason: Option<String>,
}

/// Events delivered to subscribers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveEvent {
    Connected,
    Status(StatusUpdate),
    Log { task_id: TaskId, line: LogLine },
    Disconnected(StreamError),
}

/// Ids and message kinds arrive either as numbers or as numeric strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(u64),
    Text(String),
}

impl Numeric {
    fn value(&self) -> Option<u64> {
        match self {
            Numeric::Number(n) => Some(*n),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    ping: Option<serde_json::Value>,
    #[serde(default)]
    event: Option<Numeric>,
    #[serde(default)]
    task_id: Option<Numeric>,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusValue {
    status: TaskStatus,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogValue {
    line: String,
    line_number: u64,
}

/// Decode one SSE frame.
///
/// `Ok(None)` means the frame carries nothing for subscribers (keepalive,
/// foreign event type).
pub fn decode_frame(event_type: &str, data: &str) -> Result<Option<LiveEvent>, StreamError> {
    match event_type {
        "connect" => return Ok(Some(LiveEvent::Connected)),
        "" | "message" => {}
        _ => return Ok(None),
    }

    let raw = data.trim().trim_start_matches("data: ");
    let frame: Frame =
        serde_json::from_str(raw).map_err(|e| StreamError::Decode(e.to_string()))?;

    if frame.ping.is_some() {
        return Ok(None);
    }

    let kind = frame
        .event
        .as_ref()
        .and_then(Numeric::value)
        .ok_or_else(|| StreamError::Decode("missing event type".to_string()))?;
    let task_id = frame
        .task_id
        .as_ref()
        .and_then(Numeric::value)
        .ok_or_else(|| StreamError::Decode("missing task_id".to_string()))?;
    let value = frame
        .value
        .ok_or_else(|| StreamError::Decode("missing value".to_string()))?;

    match kind {
        MSG_TYPE_TASK_STATUS => {
            let v: StatusValue =
                serde_json::from_value(value).map_err(|e| StreamError::Decode(e.to_string()))?;
            Ok(Some(LiveEvent::Status(StatusUpdate {
                task_id,
                status: v.status,
                exit_code: v.exit_code,
                reason: v.reason.filter(|r| !r.is_empty()),
            })))
        }
        MSG_TYPE_LOG => {
            let v: LogValue =
                serde_json::from_value(value).map_err(|e| StreamError::Decode(e.to_string()))?;
            if v.line_number == 0 {
                return Err(StreamError::Decode("line_number must be at least 1".to_string()));
            }
            Ok(Some(LiveEvent::Log {
                task_id,
                line: LogLine::new(v.line_number, v.line),
            }))
        }
        other => Err(StreamError::Decode(format!("unknown event type {}", other))),
    }
}

/// Subscription to the server's `/events` endpoint
pub struct EventChannel {
    url: Url,
    reconnect_delay: Duration,
}

impl EventChannel {
    pub fn new(url: Url, reconnect_delay: Duration) -> Self {
        Self {
            url,
            reconnect_delay,
        }
    }

    /// Run the subscription in the background until `tx`'s receiver is dropped
    pub fn spawn(self, tx: mpsc::Sender<LiveEvent>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(tx).await })
    }

    async fn run(&self, tx: mpsc::Sender<LiveEvent>) {
        loop {
            info!(url = %self.url, "connecting to event stream");
            let err = match self.stream_once(&tx).await {
                Ok(()) => return,
                Err(err) => err,
            };

            warn!(error = %err, delay = ?self.reconnect_delay, "event stream dropped, reconnecting");
            if tx.send(LiveEvent::Disconnected(err)).await.is_err() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// One-shot client; reconnects are driven by `run`
    fn client(&self) -> Result<Box<dyn Client>, StreamError> {
        let builder = ClientBuilder::for_url(self.url.as_str())
            .map_err(|e| StreamError::Transport(e.to_string()))?
            .reconnect(ReconnectOptions::reconnect(false).build());
        // The TLS connector needs platform root certificates; plain HTTP does not
        Ok(match self.url.scheme() {
            "https" => Box::new(builder.build()),
            _ => Box::new(builder.build_http()),
        })
    }

    /// Stream until the connection drops. `Ok` means the subscriber went away.
    async fn stream_once(&self, tx: &mpsc::Sender<LiveEvent>) -> Result<(), StreamError> {
        let client = self.client()?;
        let mut stream = client.stream();
        while let Some(item) = stream.next().await {
            match item {
                Ok(SSE::Connected(_)) => debug!("event stream connected"),
                Ok(SSE::Event(ev)) => match decode_frame(&ev.event_type, &ev.data) {
                    Ok(Some(event)) => {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, data = %ev.data, "skipping event"),
                },
                Ok(SSE::Comment(_)) => {}
                Err(err) => return Err(StreamError::Transport(err.to_string())),
            }
        }

        Err(StreamError::Closed)
    }
}
