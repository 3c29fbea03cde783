//! HTTP surface of the broadcast
//!
//! - `GET /` redirects to `/home`
//! - `GET /home`, `GET /controller` serve the embedded pages
//! - `POST /controller` runs `{"command": "..."}`
//! - `GET /stream` is the live audio
//! - `GET /api/spotcast/status` and `/api/spotcast/listeners` report state

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::command::Command;
use crate::controller::{BroadcastController, BroadcastStatus, PlaybackSession, PlaybackState};
use crate::error::Error;
use crate::registry::ListenerInfo;

/// Pages and assets bundled in the binary
#[derive(RustEmbed, Clone)]
#[folder = "public/"]
pub struct PublicAssets;

/// État partagé pour les handlers SpotCast
#[derive(Clone)]
pub struct SpotcastState {
    pub controller: BroadcastController,
}

impl SpotcastState {
    pub fn new(controller: BroadcastController) -> Self {
        Self { controller }
    }
}

/// Engine error carried to an HTTP response
pub struct AppError(pub Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidCommand(_) | Error::InvalidBitrate(_) => StatusCode::BAD_REQUEST,
            Error::SourceNotFound(_) => StatusCode::NOT_FOUND,
            Error::MixerFailure(_) => StatusCode::BAD_GATEWAY,
            Error::SpliceInProgress | Error::NotPlaying | Error::Cancelled => StatusCode::CONFLICT,
            Error::ControllerClosed => StatusCode::SERVICE_UNAVAILABLE,
            Error::SourceUnreadable { .. } | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(serde_json::json!({
            "error": self.0.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ControlRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ControlResponse {
    pub result: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub state: PlaybackState,
    pub session: Option<PlaybackSession>,
    pub listeners: usize,
}

/// Routes for pages, control and stream
pub fn create_router(state: SpotcastState) -> Router {
    Router::new()
        .route("/", get(root_redirect))
        .route("/home", get(home_page))
        .route("/controller", get(controller_page).post(control))
        .route("/stream", get(listen))
        .with_state(state)
}

/// Routes nested under `/api/spotcast`
pub fn create_api_router(state: SpotcastState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/listeners", get(get_listeners))
        .with_state(state)
}

async fn root_redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/home")]).into_response()
}

fn page(name: &str) -> Response {
    match PublicAssets::get(name) {
        Some(file) => Html(file.data.into_owned()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn home_page() -> Response {
    page("home.html")
}

async fn controller_page() -> Response {
    page("controller.html")
}

/// POST /controller
async fn control(
    State(state): State<SpotcastState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let command: Command = request.command.parse()?;
    info!(command = %command, "Control command received");

    state.controller.execute(command).await?;

    Ok(Json(ControlResponse {
        result: "ok".to_string(),
    }))
}

/// GET /stream
async fn listen(State(state): State<SpotcastState>) -> Response {
    let stream = state.controller.connect_listener();
    debug!(listener = %stream.id(), "Streaming to new listener");

    // the listener leaves the registry when axum drops the body
    let body = Body::from_stream(ReaderStream::new(stream));

    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::ACCEPT_RANGES, "bytes"),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        body,
    )
        .into_response()
}

/// GET /api/spotcast/status
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Current broadcast state", body = StatusResponse)
    ),
    tag = "spotcast"
)]
async fn get_status(State(state): State<SpotcastState>) -> Json<StatusResponse> {
    let BroadcastStatus { state: playback, session } = state.controller.status();
    Json(StatusResponse {
        state: playback,
        session,
        listeners: state.controller.registry().len(),
    })
}

/// GET /api/spotcast/listeners
#[utoipa::path(
    get,
    path = "/listeners",
    responses(
        (status = 200, description = "Connected listeners, oldest first", body = [ListenerInfo])
    ),
    tag = "spotcast"
)]
async fn get_listeners(State(state): State<SpotcastState>) -> Json<Vec<ListenerInfo>> {
    Json(state.controller.registry().listeners())
}

/// API OpenAPI de SpotCast
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(get_status, get_listeners),
    components(schemas(StatusResponse, PlaybackState, PlaybackSession, ListenerInfo)),
    tags(
        (name = "spotcast", description = "Live broadcast state")
    )
)]
pub struct SpotcastApiDoc;
