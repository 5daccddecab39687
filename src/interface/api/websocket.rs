//! Real-time call notifications over WebSocket
//!
//! A client subscribes for one organization and receives its `OrgEvent`s
//! as JSON text frames.

use crate::infrastructure::messaging::{EventBroadcaster, OrgEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub organization_id: Uuid,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(broadcaster): State<Arc<EventBroadcaster>>,
) -> Response {
    let rx = broadcaster.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, params.organization_id))
}

async fn handle_socket(socket: WebSocket, mut rx: broadcast::Receiver<OrgEvent>, organization_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    info!("WebSocket client connected for organization {}", organization_id);

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match next_for(&mut rx, organization_id).await {
                Some(event) => event,
                None => break,
            };
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        debug!("WebSocket client went away");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize {} event: {}", event.notification.kind(), e),
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("WebSocket client disconnected for organization {}", organization_id);
}

/// Next event of `organization_id`. Lagging drops the missed events and
/// keeps the subscription; `None` once the broadcaster is gone.
async fn next_for(rx: &mut broadcast::Receiver<OrgEvent>, organization_id: Uuid) -> Option<OrgEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if event.organization_id == organization_id => return Some(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!("WebSocket subscriber lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
