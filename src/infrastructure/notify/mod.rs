//! Outbound webhook notifications.
//!
//! Every event that leaves the process goes through the
//! [`NotificationDispatcher`]: session lifecycle events and tool-call
//! reports to `{base}/events`, terminal summaries and dial failures to
//! `{base}/webhook_listener/{bridge_id}`. Delivery is a single HTTP POST
//! per event; 200/201 is success, everything else is logged as failed.
//! The dispatcher never retries on its own.

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::session::UsageSummary;
use crate::domain::shared::RoomName;

/// Notification delivery failures. Callers on the fire-and-forget path
/// never see these; they are logged by the worker. `dispatch_now` returns
/// them so terminal-summary callers can decide what to log.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook to {url} failed with status {status}: {body}")]
    DeliveryFailed {
        url: String,
        status: u16,
        body: String,
    },
    #[error("webhook to {url} failed in transport: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Discriminant for outbound events, carried for logging and used as the
/// `event` field of the JSON payload where the receiver expects one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    ToolExecuted,
    SessionClosed,
    DialFailed,
    TerminalSummary,
}

impl OutboundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::ToolExecuted => "function_tools_executed",
            OutboundKind::SessionClosed => "session_closed",
            OutboundKind::DialFailed => "failed_to_create_sip_participant",
            OutboundKind::TerminalSummary => "session_summary",
        }
    }
}

impl std::fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal session summary, sent to the bridge listener once the session
/// has fully closed and the recording has been finalized.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalSummary {
    pub agent_identifier: String,
    pub conversation_id: String,
    pub status: String,
    pub call_status: String,
    pub room_id: String,
    pub recording_url: String,
    pub transcript: Value,
    pub summary: Value,
}

/// A self-contained outbound notification: destination URL, correlation
/// key, and the fully rendered JSON body. Once built it no longer refers
/// to any live session state, so it can be queued, logged, or re-sent
/// as-is.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub kind: OutboundKind,
    pub conversation_id: String,
    pub url: String,
    pub payload: Value,
}

impl OutboundEvent {
    /// Tool-call report for the generic events endpoint.
    pub fn tool_executed(base: &str, room: &RoomName, room_id: &str, mut payload: Value) -> Self {
        if let Some(map) = payload.as_object_mut() {
            map.insert("event".into(), json!(OutboundKind::ToolExecuted.as_str()));
            map.insert("room".into(), json!({ "sid": room_id }));
        }
        Self {
            kind: OutboundKind::ToolExecuted,
            conversation_id: room.as_str().to_string(),
            url: format!("{base}/events"),
            payload,
        }
    }

    /// Session-closed marker for the generic events endpoint.
    pub fn session_closed(base: &str, room: &RoomName, room_id: &str) -> Self {
        Self {
            kind: OutboundKind::SessionClosed,
            conversation_id: room.as_str().to_string(),
            url: format!("{base}/events"),
            payload: json!({
                "event": OutboundKind::SessionClosed.as_str(),
                "conversation_id": room.as_str(),
                "room": { "sid": room_id },
            }),
        }
    }

    /// Dial-failure report for the bridge listener. `status` is the wire
    /// form of the terminal session status (`dial_busy`, ...), `call_status`
    /// the classified outcome string.
    pub fn dial_failed(
        base: &str,
        bridge_id: &str,
        room: &RoomName,
        room_id: &str,
        status: &str,
        call_status: &str,
        error: &str,
    ) -> Self {
        Self {
            kind: OutboundKind::DialFailed,
            conversation_id: room.as_str().to_string(),
            url: format!("{base}/webhook_listener/{bridge_id}"),
            payload: json!({
                "event": OutboundKind::DialFailed.as_str(),
                "conversation_id": room.as_str(),
                "status": status,
                "room_id": room_id,
                "call_status": call_status,
                "error": error,
            }),
        }
    }

    /// Terminal summary for the bridge listener.
    pub fn terminal_summary(base: &str, bridge_id: &str, summary: &TerminalSummary) -> Self {
        Self {
            kind: OutboundKind::TerminalSummary,
            conversation_id: summary.conversation_id.clone(),
            url: format!("{base}/webhook_listener/{bridge_id}"),
            payload: serde_json::to_value(summary).unwrap_or_else(|_| Value::Null),
        }
    }
}

/// Render a [`UsageSummary`] as the `summary` payload field.
pub fn summary_payload(summary: &UsageSummary) -> Value {
    serde_json::to_value(summary).unwrap_or_else(|_| json!({}))
}

/// Serialized outbound HTTP with single-attempt semantics.
///
/// `enqueue` hands the event to a background worker and returns
/// immediately, which keeps event-bus handlers off the network.
/// `dispatch_now` posts inline and is the one deliberate back-pressure
/// point: callers that must see the terminal webhook delivered before the
/// job ends await it. `shutdown` drains whatever is still queued.
pub struct NotificationDispatcher {
    client: reqwest::Client,
    tx: mpsc::UnboundedSender<OutboundEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(client: reqwest::Client) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();
        let worker_client = client.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = post_event(&worker_client, &event).await {
                    warn!(
                        kind = %event.kind,
                        conversation_id = %event.conversation_id,
                        error = %err,
                        "webhook delivery failed"
                    );
                }
            }
        });
        Self {
            client,
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue an event for background delivery. Never blocks, never fails
    /// the caller; a closed queue (shutdown already started) is logged.
    pub fn enqueue(&self, event: OutboundEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!(
                kind = %err.0.kind,
                conversation_id = %err.0.conversation_id,
                "dispatcher queue closed, dropping event"
            );
        }
    }

    /// Post an event inline, bypassing the queue. Single attempt.
    pub async fn dispatch_now(&self, event: &OutboundEvent) -> Result<(), NotifyError> {
        post_event(&self.client, event).await
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn post_event(client: &reqwest::Client, event: &OutboundEvent) -> Result<(), NotifyError> {
    info!(
        kind = %event.kind,
        conversation_id = %event.conversation_id,
        url = %event.url,
        "sending webhook"
    );
    let response = client
        .post(&event.url)
        .json(&event.payload)
        .send()
        .await
        .map_err(|source| NotifyError::Transport {
            url: event.url.clone(),
            source,
        })?;
    let status = response.status();
    if status == StatusCode::OK || status == StatusCode::CREATED {
        info!(
            kind = %event.kind,
            conversation_id = %event.conversation_id,
            status = status.as_u16(),
            "webhook delivered"
        );
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::DeliveryFailed {
            url: event.url.clone(),
            status: status.as_u16(),
            body,
        })
    }
}
