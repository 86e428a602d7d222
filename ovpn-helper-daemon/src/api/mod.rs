//! The loopback control API: profile lifecycle, token control, liveness,
//! and the SSE event stream.

pub mod auth;

use crate::daemon::{Daemon, EventBus};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::stream::Stream;
use ovpn_helper_types::Profile;
use serde::Deserialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct IdBody {
    id: String,
}

/// Wraps a subscriber's event receiver so the listener entry is removed
/// from the bus as soon as the stream is dropped — including when a
/// client disconnects mid-stream and the SSE body future is cancelled,
/// not just on graceful completion.
struct SubscriberStream {
    id: Uuid,
    bus: Arc<EventBus>,
    inner: ReceiverStream<ovpn_helper_types::Event>,
}

impl Stream for SubscriberStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|opt| {
            opt.map(|event| {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                Ok(SseEvent::default().data(payload))
            })
        })
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

pub fn router(daemon: Arc<Daemon>) -> Router {
    let auth_state = daemon.auth.clone();

    Router::new()
        .route("/events", get(events))
        .route("/profile", get(list_profiles).post(start_profile).delete(stop_profile))
        .route("/token", put(refresh_token).delete(invalidate_token))
        .route("/ping", get(ping))
        .route("/stop", post(stop_all))
        .route("/restart", post(restart_all))
        .route("/status", get(status))
        .route("/wakeup", post(wakeup))
        .route_layer(axum::middleware::from_fn_with_state(auth_state, auth::require_auth_key))
        .with_state(daemon)
}

async fn events(State(daemon): State<Arc<Daemon>>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (id, rx) = daemon.events.subscribe();
    let stream = SubscriberStream {
        id,
        bus: daemon.events.clone(),
        inner: ReceiverStream::new(rx),
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn list_profiles(State(daemon): State<Arc<Daemon>>) -> Json<Vec<Profile>> {
    Json(daemon.registry.list_profiles())
}

async fn start_profile(State(daemon): State<Arc<Daemon>>, Json(profile): Json<Profile>) -> StatusCode {
    match daemon.registry.start(profile, true) {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            log::error!("failed to start profile: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn stop_profile(State(daemon): State<Arc<Daemon>>, Json(body): Json<IdBody>) -> StatusCode {
    match daemon.registry.stop(&body.id) {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            log::error!("failed to stop profile {}: {}", body.id, err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn refresh_token(State(daemon): State<Arc<Daemon>>, Json(body): Json<IdBody>) -> StatusCode {
    match daemon.registry.refresh_token(&body.id) {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            log::error!("failed to refresh token for {}: {}", body.id, err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn invalidate_token(State(daemon): State<Arc<Daemon>>, Json(body): Json<IdBody>) -> StatusCode {
    daemon.registry.invalidate_token(&body.id);
    StatusCode::OK
}

async fn ping(State(daemon): State<Arc<Daemon>>) -> StatusCode {
    daemon.touch_ping();
    StatusCode::OK
}

async fn stop_all(State(daemon): State<Arc<Daemon>>) -> StatusCode {
    let ids: Vec<String> = daemon.registry.list_profiles().into_iter().map(|p| p.id).collect();
    let registry = daemon.registry.clone();
    let stop_result = tokio::task::spawn_blocking(move || {
        for id in &ids {
            let _ = registry.stop(id);
        }
    })
    .await;
    daemon.autoclean();
    match stop_result {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            log::error!("stop-all task panicked: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn restart_all(State(daemon): State<Arc<Daemon>>) -> StatusCode {
    let registry = daemon.registry.clone();
    match tokio::task::spawn_blocking(move || registry.restart_profiles(true)).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            log::error!("restart-all task panicked: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(serde::Serialize)]
struct StatusBody {
    connected: bool,
}

async fn status(State(daemon): State<Arc<Daemon>>) -> Json<StatusBody> {
    Json(StatusBody {
        connected: daemon.registry.any_connected(),
    })
}

async fn wakeup(State(daemon): State<Arc<Daemon>>) -> impl IntoResponse {
    daemon.touch_awake();
    if daemon.wakeup_and_poll().await {
        (StatusCode::OK, "awake")
    } else {
        (StatusCode::NOT_FOUND, "not awake")
    }
}
