//! HTTP server for rooms, streams and their websockets
//!
//! Room routes create sessions on demand; stream routes only resolve
//! existing ones through the stream alias.

use crate::chat::serve_chat_client;
use crate::session::Session;
use crate::transport::viewer::handle_viewer_connection;
use crate::transport::{handle_signaling_connection, PeerRole};
use crate::web::shared::SharedState;
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use log::{debug, info};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Run the HTTP server until `shutdown` resolves
pub async fn run_http_server(
    state: Arc<SharedState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

/// Build router
pub fn build_router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/room/create", get(room_create_handler))
        .route("/room/{id}", get(room_handler))
        .route("/room/{id}/websocket", get(room_websocket_handler))
        .route("/room/{id}/chat/websocket", get(room_chat_handler))
        .route("/room/{id}/viewer/websocket", get(room_viewer_handler))
        .route("/stream/{sid}", get(stream_handler))
        .route("/stream/{sid}/websocket", get(stream_websocket_handler))
        .route("/stream/{sid}/chat/websocket", get(stream_chat_handler))
        .route("/stream/{sid}/viewer/websocket", get(stream_viewer_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.uptime().as_secs_f64(),
        "sessions": state.sessions.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn room_create_handler() -> Redirect {
    Redirect::to(&format!("/room/{}", Uuid::new_v4()))
}

/// Describe a room, creating it on first visit
async fn room_handler(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<SharedState>>,
) -> Json<serde_json::Value> {
    let session = state.sessions.lookup(&id);
    let (ws, http, host) = addresses(&state, &headers);

    Json(json!({
        "type": "room",
        "room_id": session.id(),
        "room_link": format!("{}://{}/room/{}", http, host, session.id()),
        "room_websocket": format!("{}://{}/room/{}/websocket", ws, host, session.id()),
        "chat_websocket": format!("{}://{}/room/{}/chat/websocket", ws, host, session.id()),
        "viewer_websocket": format!("{}://{}/room/{}/viewer/websocket", ws, host, session.id()),
        "stream_link": format!("{}://{}/stream/{}", http, host, session.stream_id()),
    }))
}

/// Describe an existing stream
async fn stream_handler(
    Path(sid): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let Some(session) = state.sessions.find_stream(&sid) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "type": "stream", "status": "not found" })))
            .into_response();
    };
    let (ws, _, host) = addresses(&state, &headers);

    Json(json!({
        "type": "stream",
        "stream_id": session.stream_id(),
        "stream_websocket": format!("{}://{}/stream/{}/websocket", ws, host, session.stream_id()),
        "chat_websocket": format!("{}://{}/stream/{}/chat/websocket", ws, host, session.stream_id()),
        "viewer_websocket": format!("{}://{}/stream/{}/viewer/websocket", ws, host, session.stream_id()),
    }))
    .into_response()
}

async fn room_websocket_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let session = state.sessions.lookup(&id);
    signaling_upgrade(ws, Some(session), &state, PeerRole::Participant)
}

async fn stream_websocket_handler(
    ws: WebSocketUpgrade,
    Path(sid): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let session = state.sessions.find_stream(&sid);
    signaling_upgrade(ws, session, &state, PeerRole::Subscriber)
}

async fn room_chat_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let session = state.sessions.find(&id);
    chat_upgrade(ws, session, &state)
}

async fn stream_chat_handler(
    ws: WebSocketUpgrade,
    Path(sid): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let session = state.sessions.find_stream(&sid);
    chat_upgrade(ws, session, &state)
}

async fn room_viewer_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    viewer_upgrade(ws, state.sessions.find(&id))
}

async fn stream_viewer_handler(
    ws: WebSocketUpgrade,
    Path(sid): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    viewer_upgrade(ws, state.sessions.find_stream(&sid))
}

fn signaling_upgrade(
    ws: WebSocketUpgrade,
    session: Option<Arc<Session>>,
    state: &SharedState,
    role: PeerRole,
) -> Response {
    let manager = state.peer_manager.clone();
    ws.on_upgrade(move |socket| async move {
        match session {
            Some(session) => {
                handle_signaling_connection(socket, session.peers().clone(), manager, role).await
            }
            None => reject(socket).await,
        }
    })
}

fn chat_upgrade(ws: WebSocketUpgrade, session: Option<Arc<Session>>, state: &SharedState) -> Response {
    ws.max_message_size(state.config.chat.max_message_size)
        .on_upgrade(move |socket| async move {
            match session {
                Some(session) => serve_chat_client(socket, session.chat().clone()).await,
                None => reject(socket).await,
            }
        })
}

fn viewer_upgrade(ws: WebSocketUpgrade, session: Option<Arc<Session>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        match session {
            Some(session) => handle_viewer_connection(socket, session.peers().clone()).await,
            None => reject(socket).await,
        }
    })
}

/// Close a socket whose session does not exist
async fn reject(mut socket: WebSocket) {
    debug!("Closing websocket for unknown session");
    let _ = socket.send(Message::Close(None)).await;
}

/// Websocket scheme, http scheme and host for links handed to browsers
fn addresses(state: &SharedState, headers: &HeaderMap) -> (&'static str, &'static str, String) {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let http = if state.environment.is_production() { "https" } else { "http" };
    (state.environment.websocket_scheme(), http, host)
}
