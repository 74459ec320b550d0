//! HTTP surface of the queue server: the WebSocket push channel, two small
//! JSON endpoints and the static display/admin pages.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use super::counter::{Command, CounterService};

/// Payload pushed to every display, e.g. `{"numero":12}`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NumberUpdate {
    #[serde(rename = "numero")]
    pub value: u8,
}

impl NumberUpdate {
    pub fn to_json(&self) -> String {
        serde_json::json!({ "numero": self.value }).to_string()
    }
}

pub struct AppState {
    pub counter: Arc<CounterService>,
}

/// Build the router served on the shared listener.
pub fn router(counter: Arc<CounterService>, static_dir: &str) -> Router {
    let state = Arc::new(AppState { counter });

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health_check))
        .route("/api/number", get(current_number))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "number-queue",
    }))
}

async fn current_number(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(NumberUpdate {
        value: state.counter.current_value(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Push every published number to the client and apply whatever commands it
/// sends, until either side goes away.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.counter.subscribe();
    info!("🔗 Display connected ({} open)", state.counter.subscriber_count());

    loop {
        tokio::select! {
            published = subscription.recv() => {
                let Some(value) = published else { break };
                let frame = NumberUpdate { value }.to_json();
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => match Command::parse(&text) {
                    Ok(command) => {
                        state.counter.apply(command);
                    }
                    Err(e) => debug!("Ignoring frame {:?}: {}", text, e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("⚠️  WebSocket error: {}", e);
                    break;
                }
            }
        }
    }

    debug!("🔌 Display disconnected");
}
