//! The thin outer layer: an HTTP server exposing the demo client page and
//! the `/ws` endpoint that bridges one websocket to one subscription.
//!
//! Everything interesting happens in [`crate::controller`]; this module only
//! picks a controller from the `filter` query parameter, forwards delivered
//! events as JSON text messages, and unsubscribes when the socket goes away.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::{services::ServeFile, trace::TraceLayer};
use tracing::{info, warn};

use crate::controller::StreamController;

#[derive(Clone)]
pub struct AppState {
    pub sample: Arc<StreamController>,
    pub filter: Arc<StreamController>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route_service("/", ServeFile::new("client/index.html"))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsParams {
    /// Comma-separated keywords; absent or empty selects the sample stream.
    filter: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.filter))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, filter: Option<String>) {
    let keywords: Vec<String> = filter
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    info!(?keywords, "websocket connected");

    let subscribed = if keywords.is_empty() {
        state.sample.subscribe(vec![])
    } else {
        state.filter.subscribe(keywords)
    };
    let mut subscription = match subscribed {
        Ok(subscription) => subscription,
        Err(error) => {
            warn!(error = %error, "rejecting websocket subscription");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = subscription.next_event() => match event {
                Some(event) => {
                    if socket.send(Message::Text(event.raw().into())).await.is_err() {
                        info!(subscriber = %subscription.id(), "websocket closed unexpectedly");
                        break;
                    }
                }
                // Controller shut down; nothing more will ever arrive.
                None => break,
            },
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                    info!(subscriber = %subscription.id(), "websocket disconnected by client");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    // `subscription` drops here, which unsubscribes it from the controller.
}
