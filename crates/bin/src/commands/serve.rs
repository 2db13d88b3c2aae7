//! Serve command - runs the room storage server.
//!
//! Each room lives in `<data_dir>/<room>.json` and is loaded (and healed) on
//! first use. Clients fetch the tree and post batches of ops; the server
//! applies them in arrival order and answers with one result per op.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::{Json as ExtractJson, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use trellis::crdt::{NodeItem, Op};
use trellis::storage::{FileDriver, OpResult, RoomStorage};

use crate::cli::ServeArgs;

type Rooms = HashMap<String, RoomStorage<FileDriver>>;

/// Shared application state
#[derive(Clone)]
struct AppState {
    data_dir: PathBuf,
    rooms: Arc<Mutex<Rooms>>,
}

/// Error answered to HTTP clients.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<trellis::Error> for ApiError {
    fn from(err: trellis::Error) -> Self {
        let status = if err.is_usage_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        tracing::error!(module = err.module(), %err, "Request failed");
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

/// Run the Trellis server
pub async fn run(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tokio::fs::create_dir_all(&args.data_dir).await?;
    let app_state = AppState {
        data_dir: args.data_dir.clone(),
        rooms: Arc::new(Mutex::new(HashMap::new())),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(handle_health_endpoint))
        .route(
            "/api/v0/rooms/{room}/storage",
            get(handle_fetch_storage).post(handle_update_storage),
        )
        .with_state(app_state.clone());

    // Bind server
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    println!("Trellis server listening on http://localhost:{}", local_addr.port());
    println!("Data directory: {}", args.data_dir.display());
    println!();
    println!("Available endpoints:");
    println!("  GET  /health                       - Health check");
    println!("  GET  /api/v0/rooms/{{room}}/storage  - Fetch the storage of a room");
    println!("  POST /api/v0/rooms/{{room}}/storage  - Apply a batch of ops");
    println!();
    println!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to set up SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to set up SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
                _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown..."),
            }

            let mut rooms = app_state.rooms.lock().await;
            for (room_id, room) in rooms.iter_mut() {
                if let Err(e) = room.flush().await {
                    tracing::error!(room = %room_id, "Failed to save room: {e}");
                }
            }
        })
        .await?;

    println!("Server shut down");
    Ok(())
}

/// Room ids become file names, so they are restricted to a safe alphabet.
fn validate_room_id(room_id: &str) -> Result<(), ApiError> {
    let valid = !room_id.is_empty()
        && room_id.len() <= 128
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: format!("invalid room id {room_id:?}"),
        })
    }
}

/// The storage of `room_id`, opened from disk on first use.
async fn room<'a>(
    rooms: &'a mut Rooms,
    data_dir: &std::path::Path,
    room_id: &str,
) -> Result<&'a mut RoomStorage<FileDriver>, ApiError> {
    validate_room_id(room_id)?;
    if !rooms.contains_key(room_id) {
        let path = data_dir.join(format!("{room_id}.json"));
        let (driver, report) = FileDriver::open(&path).await?;
        if report.is_clean() {
            tracing::info!(room = room_id, "Opened room");
        } else {
            tracing::warn!(room = room_id, %report, "Opened room after repairing its storage");
        }
        rooms.insert(room_id.to_string(), RoomStorage::new(driver));
    }
    rooms.get_mut(room_id).ok_or_else(|| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: format!("room {room_id} vanished"),
    })
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rooms: usize,
}

/// Handler for GET /health - Health check endpoint
async fn handle_health_endpoint(State(state): State<AppState>) -> axum::Json<HealthResponse> {
    let rooms = state.rooms.lock().await.len();
    axum::Json(HealthResponse {
        status: "healthy",
        rooms,
    })
}

/// Handler for GET /api/v0/rooms/{room}/storage - the initial storage state
async fn handle_fetch_storage(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<axum::Json<Vec<NodeItem>>, ApiError> {
    let mut rooms = state.rooms.lock().await;
    let room = room(&mut rooms, &state.data_dir, &room_id).await?;
    Ok(axum::Json(room.initial_state()))
}

/// Handler for POST /api/v0/rooms/{room}/storage - apply a batch of ops
async fn handle_update_storage(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    ExtractJson(ops): ExtractJson<Vec<Op>>,
) -> Result<axum::Json<Vec<OpResult>>, ApiError> {
    let mut rooms = state.rooms.lock().await;
    let room = room(&mut rooms, &state.data_dir, &room_id).await?;
    let results = room.apply_ops(ops)?;
    room.flush().await?;
    tracing::debug!(
        room = %room_id,
        accepted = results.iter().filter(|result| result.is_accepted()).count(),
        total = results.len(),
        "Applied ops"
    );
    Ok(axum::Json(results))
}
