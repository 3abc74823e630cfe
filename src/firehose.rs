//! The firehose module.
//!
//! Every accepted report mutation is announced here and fanned out to every
//! connected viewer. Delivery is best-effort and at-most-once: there is no
//! history, and a subscriber that falls behind or disconnects is dropped and
//! must re-fetch the report list.
use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt as _, Stream};
use metrics::{counter, gauge};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    metrics::{FIREHOSE_LISTENERS, FIREHOSE_MESSAGES},
    models::{Actor, Report},
};

/// Per-subscriber queue depth. A subscriber that lets this fill up is dropped.
const SUBSCRIBER_BUFFER: usize = 256;
/// Interval between websocket keep-alive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// A report lifecycle event. Payloads always carry full state.
pub enum ReportEvent {
    /// A new report now exists.
    Created { report: Report },
    /// Full current state of an existing report.
    Updated { report: Report },
    /// The report no longer exists, whether deleted or expired.
    Deleted { id: String },
}

impl ReportEvent {
    pub const fn kind(&self) -> &'static str {
        match *self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }

    pub fn report_id(&self) -> &str {
        match *self {
            Self::Created { ref report } | Self::Updated { ref report } => &report.id,
            Self::Deleted { ref id } => id,
        }
    }

    /// The event as `viewer` may see it. Flaggers are only shown to administrators.
    #[must_use]
    pub fn redacted_for(&self, viewer: Option<&Actor>) -> Self {
        match *self {
            Self::Created { ref report } => Self::Created {
                report: report.clone().redacted_for(viewer),
            },
            Self::Updated { ref report } => Self::Updated {
                report: report.clone().redacted_for(viewer),
            },
            Self::Deleted { ref id } => Self::Deleted { id: id.clone() },
        }
    }
}

/// Anything lifecycle events can be published to.
///
/// Publishing never fails from the caller's point of view.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ReportEvent);
}

enum FirehoseMessage {
    Broadcast(ReportEvent),
    Connect(mpsc::Sender<Arc<ReportEvent>>),
}

/// A firehose producer. This is used to transmit messages to the firehose for broadcast.
#[derive(Clone, Debug)]
pub struct FirehoseProducer {
    tx: mpsc::Sender<FirehoseMessage>,
}

impl FirehoseProducer {
    /// Register a new subscriber. It receives every event published after this returns.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        drop(self.tx.send(FirehoseMessage::Connect(tx)).await);
        Subscription { rx }
    }
}

#[async_trait::async_trait]
impl EventSink for FirehoseProducer {
    async fn publish(&self, event: ReportEvent) {
        drop(self.tx.send(FirehoseMessage::Broadcast(event)).await);
    }
}

/// The receiving end of a firehose subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Arc<ReportEvent>>,
}

impl Subscription {
    /// Wait for the next event. `None` means the subscription was dropped by the firehose.
    pub async fn recv(&mut self) -> Option<Arc<ReportEvent>> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<ReportEvent>> {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

#[expect(clippy::as_conversions)]
const fn convert_usize_f64(x: usize) -> f64 {
    x as f64
}

/// Broadcast a message out to all clients.
fn broadcast_message(clients: &mut Vec<mpsc::Sender<Arc<ReportEvent>>>, msg: &Arc<ReportEvent>) {
    counter!(FIREHOSE_MESSAGES).increment(1);

    for i in (0..clients.len()).rev() {
        if let Err(e) = clients[i].try_send(Arc::clone(msg)) {
            debug!("Firehose client dropped: {e}");
            drop(clients.swap_remove(i));
        }
    }

    gauge!(FIREHOSE_LISTENERS).set(convert_usize_f64(clients.len()));
}

/// The main entrypoint for the firehose.
///
/// This will broadcast all report events out to anyone who is listening.
pub fn spawn() -> (tokio::task::JoinHandle<()>, FirehoseProducer) {
    let (tx, mut rx) = mpsc::channel(1000);
    let handle = tokio::spawn(async move {
        let mut clients: Vec<mpsc::Sender<Arc<ReportEvent>>> = Vec::new();

        while let Some(msg) = rx.recv().await {
            match msg {
                FirehoseMessage::Broadcast(event) => {
                    info!(
                        "Broadcasting {} {} to {} clients",
                        event.kind(),
                        event.report_id(),
                        clients.len()
                    );
                    broadcast_message(&mut clients, &Arc::new(event));
                }
                FirehoseMessage::Connect(client) => {
                    clients.push(client);
                    gauge!(FIREHOSE_LISTENERS).set(convert_usize_f64(clients.len()));
                }
            }
        }
        // All producers have been destroyed.
        debug!("firehose shutting down");
    });

    (handle, FirehoseProducer { tx })
}

/// Encode an event as a websocket text frame for `viewer`.
fn frame(event: &ReportEvent, viewer: Option<&Actor>) -> serde_json::Result<String> {
    serde_json::to_string(&event.redacted_for(viewer))
}

/// Pump a subscription into a websocket as JSON text frames until either side goes away.
///
/// Frames are redacted for `viewer`, the authenticated owner of the socket if any.
pub async fn serve_socket(mut ws: WebSocket, mut sub: Subscription, viewer: Option<Actor>) {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            event = sub.recv() => {
                let Some(event) = event else {
                    debug!("subscription dropped by firehose, closing socket");
                    break;
                };
                let text = match frame(&event, viewer.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("failed to serialize {} event: {e}", event.kind());
                        continue;
                    }
                };
                if let Err(e) = ws.send(Message::Text(text.into())).await {
                    debug!("Firehose client disconnected: {e}");
                    break;
                }
            }
            _ = ping.tick() => {
                let contents = rand::thread_rng()
                    .sample_iter(rand::distributions::Alphanumeric)
                    .take(15)
                    .map(char::from)
                    .collect::<String>();

                // Send a websocket ping message.
                // Reference: https://developer.mozilla.org/en-US/docs/Web/API/WebSockets_API/Writing_WebSocket_servers#pings_and_pongs_the_heartbeat_of_websockets
                let message = Message::Ping(axum::body::Bytes::from(contents));
                if let Err(e) = ws.send(message).await {
                    debug!("Firehose client disconnected: {e}");
                    break;
                }
            }
            incoming = ws.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(ws.close().await);
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        models::{Category, Role},
        storage::tests::sample,
    };

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let (_handle, producer) = spawn();
        let mut first = producer.subscribe().await;

        let report = sample("r1", Category::Help, Utc::now());
        producer
            .publish(ReportEvent::Created {
                report: report.clone(),
            })
            .await;

        // Subscribed after the first event: sees only what follows.
        let mut second = producer.subscribe().await;
        producer
            .publish(ReportEvent::Deleted { id: "r1".into() })
            .await;

        assert_eq!(first.recv().await.unwrap().kind(), "created");
        assert_eq!(first.recv().await.unwrap().kind(), "deleted");
        let only = second.recv().await.unwrap();
        assert_eq!(*only, ReportEvent::Deleted { id: "r1".into() });
    }

    #[tokio::test]
    async fn dropped_subscribers_do_not_block_others() {
        let (_handle, producer) = spawn();
        let gone = producer.subscribe().await;
        drop(gone);
        let mut live = producer.subscribe().await;

        producer
            .publish(ReportEvent::Deleted { id: "x".into() })
            .await;
        assert_eq!(live.recv().await.unwrap().report_id(), "x");
    }

    #[tokio::test]
    async fn slow_subscribers_are_cut_off() {
        let (_handle, producer) = spawn();
        let mut slow = producer.subscribe().await;

        for i in 0..=SUBSCRIBER_BUFFER {
            producer
                .publish(ReportEvent::Deleted { id: i.to_string() })
                .await;
        }
        // Flush the hub with a fresh subscriber round-trip.
        let mut flush = producer.subscribe().await;
        producer
            .publish(ReportEvent::Deleted { id: "flush".into() })
            .await;
        assert_eq!(flush.recv().await.unwrap().report_id(), "flush");

        let mut received = 0;
        while slow.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[test]
    fn frames_hide_flaggers_from_non_admins() {
        let mut report = sample("r1", Category::Help, Utc::now());
        let _ = report.flagged_by.insert("whistleblower".into());
        let event = ReportEvent::Updated { report };

        let user = Actor {
            id: "u".into(),
            display_name: "U".into(),
            role: Role::User,
        };
        let admin = Actor {
            role: Role::Admin,
            ..user.clone()
        };

        for viewer in [None, Some(&user)] {
            let json: serde_json::Value =
                serde_json::from_str(&frame(&event, viewer).unwrap()).unwrap();
            assert_eq!(json["report"]["flaggedBy"], serde_json::json!([]));
        }
        let json: serde_json::Value =
            serde_json::from_str(&frame(&event, Some(&admin)).unwrap()).unwrap();
        assert_eq!(json["report"]["flaggedBy"], serde_json::json!(["whistleblower"]));

        // The hub's copy is untouched.
        let ReportEvent::Updated { ref report } = event else {
            unreachable!()
        };
        assert!(report.flagged_by.contains("whistleblower"));
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_value(ReportEvent::Deleted { id: "a".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "deleted", "id": "a"}));
    }
}
