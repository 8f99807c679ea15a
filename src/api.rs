use crate::AppState;
use crate::watch::{self, DownloadRecord, WatchRequest};
use crate::workflow::{self, DEFAULT_DOWNLOAD_TYPE, DOWNLOAD_TYPES};
use axum::extract::{Extension, Path as AxumPath};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Directory the download workflows write their result metadata into.
const DOWNLOADS_DIR: &str = "downloads";

const PAGE: &str = include_str!("page.html");

/// One form submission.
///
/// Every field defaults to empty so a missing field fails validation with a
/// readable message instead of a deserialization error.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_download_type")]
    pub download_type: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
}

fn default_download_type() -> String {
    DEFAULT_DOWNLOAD_TYPE.to_string()
}

#[derive(Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Placeholder for the completed-downloads listing. The workflows drop
/// download metadata JSON into the repository's `downloads/` directory; this
/// service only points the page at that directory and stamps when the set
/// last changed.
#[derive(Serialize, Deserialize)]
pub struct DownloadsListing {
    pub entries: Vec<serde_json::Value>,
    pub downloads_path: String,
    pub refreshed_at: Option<String>,
}

/// Check the submission before anything touches the network.
fn validate(request: &DownloadRequest) -> Result<(), String> {
    if request.video_url.trim().is_empty() {
        return Err("Video URL is required".to_string());
    }
    if request.token.trim().is_empty() {
        return Err("GitHub token is required".to_string());
    }
    if request.owner.trim().is_empty() {
        return Err("Repository owner is required".to_string());
    }
    if request.repo.trim().is_empty() {
        return Err("Repository name is required".to_string());
    }
    if !DOWNLOAD_TYPES.contains(&request.download_type.as_str()) {
        return Err(format!(
            "Download type must be one of: {}",
            DOWNLOAD_TYPES.join(", ")
        ));
    }
    if !workflow::is_supported(&request.video_url) {
        return Err("Only YouTube and TikTok URLs are supported".to_string());
    }

    Ok(())
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
}

/// The form page, embedded so the binary is self-contained.
#[axum::debug_handler]
pub async fn index() -> Html<&'static str> {
    Html(PAGE)
}

/// Accept a submission: validate, remember the repository, then hand the
/// dispatch-locate-poll sequence to a spawned watch task and answer 202 with
/// the id the page polls.
#[axum::debug_handler]
pub async fn submit_download(
    Extension(state): Extension<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Response {
    if let Err(message) = validate(&request) {
        return bad_request(message);
    }

    state
        .settings
        .remember_repository(&request.owner, &request.repo)
        .await;

    let trigger = workflow::classify(&request.video_url);
    let id = Uuid::new_v4();
    info!(%id, trigger, video_url = %request.video_url, "Accepted download request");

    state
        .watch_manager
        .insert(DownloadRecord::new(
            id,
            &request.video_url,
            &request.download_type,
            trigger,
        ))
        .await;

    let watch_request = WatchRequest {
        owner: request.owner,
        repo: request.repo,
        token: request.token,
        trigger,
        video_url: request.video_url,
        download_type: request.download_type,
    };
    let handle = tokio::spawn(watch::watch_download(state.clone(), id, watch_request));
    state.watch_manager.begin_watch(id, handle).await;

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id,
            message: "Download workflow dispatching".to_string(),
        }),
    )
        .into_response()
}

/// Snapshot of one submission's record.
#[axum::debug_handler]
pub async fn download_status(
    Extension(state): Extension<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.watch_manager.get(&id).await {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                message: format!("Unknown download id {id}"),
            }),
        )
            .into_response(),
    }
}

/// The remembered owner/repo pair, used by the page to prefill the form.
#[axum::debug_handler]
pub async fn get_settings(Extension(state): Extension<AppState>) -> Response {
    (StatusCode::OK, Json(state.settings.current().await)).into_response()
}

/// The completed-downloads listing stub. `refreshed_at` moves whenever a
/// watch task sees its run succeed, which is the page's cue to refetch.
#[axum::debug_handler]
pub async fn list_downloads(Extension(state): Extension<AppState>) -> Response {
    let listing = DownloadsListing {
        entries: Vec::new(),
        downloads_path: DOWNLOADS_DIR.to_string(),
        refreshed_at: state.downloads_refreshed_at().await,
    };

    (StatusCode::OK, Json(listing)).into_response()
}
