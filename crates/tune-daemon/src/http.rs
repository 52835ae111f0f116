use crate::core::DaemonEvent;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tune_proto::protocol::{Command, SessionState};
use tune_proto::state::StateManager;
use tune_proto::store::{self, AddOutcome, PlaylistStore, SharedStore, StoreError};
use tune_proto::track::{Playlist, PlaylistWithTracks, Track};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    store: SharedStore,
}

#[derive(Deserialize)]
struct QueueRequest {
    tracks: Vec<Track>,
    #[serde(default)]
    start_index: usize,
}

#[derive(Deserialize)]
struct CreatePlaylist {
    name: String,
}

#[derive(Deserialize)]
struct TrackPath {
    path: String,
}

#[derive(Serialize)]
struct AddResult {
    outcome: &'static str,
}

enum ApiError {
    NotFound,
    BadRequest(&'static str),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PlaylistNotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "playlist not found").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Internal(msg) => {
                error!("HTTP API: store error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    store: SharedStore,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx, store);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    store: SharedStore,
) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
        store,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/next", post(next))
        .route("/api/prev", post(prev))
        .route("/api/shuffle", post(shuffle))
        .route("/api/repeat", post(repeat))
        .route("/api/stop", post(stop))
        .route("/api/seek/:ms", post(seek))
        .route("/api/jump/:index", post(jump))
        .route("/api/queue", post(load_queue))
        .route("/api/playlists", get(list_playlists).post(create_playlist))
        .route(
            "/api/playlists/:id",
            get(get_playlist).delete(delete_playlist),
        )
        .route(
            "/api/playlists/:id/tracks",
            post(add_track).delete(remove_track),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

// ── transport ─────────────────────────────────────────────────────────────────

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionState> {
    Json(state.state_manager.get_state().await)
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Play).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Pause).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::TogglePause).await
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Previous).await
}

async fn shuffle(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::ToggleShuffle).await
}

async fn repeat(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::ToggleRepeat).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Stop).await
}

async fn seek(State(state): State<HttpState>, Path(ms): Path<u64>) -> StatusCode {
    send_command(&state, Command::Seek { position_ms: ms }).await
}

async fn jump(State(state): State<HttpState>, Path(index): Path<usize>) -> StatusCode {
    send_command(&state, Command::JumpTo { index }).await
}

async fn load_queue(State(state): State<HttpState>, Json(req): Json<QueueRequest>) -> StatusCode {
    // A long queue would flood the log through the Debug impl
    info!(
        "HTTP API: LoadQueue({} tracks, start {})",
        req.tracks.len(),
        req.start_index
    );
    let cmd = Command::LoadQueue {
        tracks: req.tracks,
        start_index: req.start_index,
    };
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward queue");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

// ── playlists ─────────────────────────────────────────────────────────────────

/// Run a store operation off the async workers.
async fn with_store<T, F>(state: &HttpState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut PlaylistStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = store::lock(&store)?;
        f(&mut guard)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(ApiError::from)
}

async fn list_playlists(State(state): State<HttpState>) -> Result<Json<Vec<Playlist>>, ApiError> {
    with_store(&state, |s| s.list_playlists()).await.map(Json)
}

async fn create_playlist(
    State(state): State<HttpState>,
    Json(req): Json<CreatePlaylist>,
) -> Result<(StatusCode, Json<Playlist>), ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("playlist name must not be empty"));
    }
    info!("HTTP API: create playlist '{}'", name);
    let created = name.clone();
    let id = with_store(&state, move |s| s.create_playlist(&created)).await?;
    Ok((StatusCode::CREATED, Json(Playlist { id, name })))
}

async fn get_playlist(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
) -> Result<Json<PlaylistWithTracks>, ApiError> {
    with_store(&state, move |s| s.get_playlist_with_tracks(id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn delete_playlist(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    info!("HTTP API: delete playlist {}", id);
    if with_store(&state, move |s| s.delete_playlist(id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

async fn add_track(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
    Json(track): Json<Track>,
) -> Result<(StatusCode, Json<AddResult>), ApiError> {
    info!("HTTP API: add {} to playlist {}", track.path, id);
    let outcome = with_store(&state, move |s| s.add_track_to_playlist(id, &track)).await?;
    Ok(match outcome {
        AddOutcome::Added => (StatusCode::CREATED, Json(AddResult { outcome: "added" })),
        AddOutcome::AlreadyMember => (
            StatusCode::OK,
            Json(AddResult {
                outcome: "already_member",
            }),
        ),
    })
}

async fn remove_track(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
    Query(query): Query<TrackPath>,
) -> Result<StatusCode, ApiError> {
    info!("HTTP API: remove {} from playlist {}", query.path, id);
    if with_store(&state, move |s| s.remove_track_from_playlist(id, &query.path)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}
