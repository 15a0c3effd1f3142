use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use parley_core::events::Topic;

use crate::hub::TopicHub;

/// Forward every event on `topic` to one live client until either side
/// closes. The server pings every `heartbeat`. The topic is released from
/// the hub when this was its last subscriber.
pub async fn handle_ws_connection(socket: WebSocket, hub: Arc<TopicHub>, topic: Topic, heartbeat: Duration) {
    let rx = hub.subscribe(&topic);
    tracing::info!(%topic, subscribers = hub.subscriber_count(&topic), "websocket client subscribed");
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_topic = topic.clone();
    let mut writer = tokio::spawn(async move {
        let mut events = BroadcastStream::new(rx);
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(Ok(text)) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                            tracing::warn!(topic = %writer_topic, skipped = n, "client lagged, dropped events");
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(topic = %writer_topic, "sent ping");
                }
            }
        }
    });

    // Clients only listen; inbound frames matter for close detection.
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let WsMessage::Close(_) = msg {
                break;
            }
        }
    });

    // Wait for the aborted side too, so its receiver is dropped before release.
    tokio::select! {
        _ = &mut writer => {
            reader.abort();
            let _ = reader.await;
        }
        _ = &mut reader => {
            writer.abort();
            let _ = writer.await;
        }
    }
    if hub.release(&topic) {
        tracing::debug!(%topic, "released idle topic");
    }
    tracing::info!(%topic, "websocket client disconnected");
}
