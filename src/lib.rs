pub mod api;
pub mod app_state;
pub mod config;
pub mod github;
pub mod middleware;
pub mod settings;
pub mod watch;
pub mod workflow;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;

//
// Re-export
//
pub use api::{DownloadRequest, DownloadsListing, ErrorResponse, SubmitResponse};
pub use app_state::AppState;
pub use config::Config;
pub use github::{ClientPayload, GithubClient, GithubError, WorkflowRun};
pub use middleware::log_request_errors;
pub use settings::{Settings, SettingsStore};
pub use watch::{DownloadPhase, DownloadRecord, WatchManager, WatchRequest};
pub use workflow::{GENERIC_TRIGGER, TIKTOK_TRIGGER, YOUTUBE_TRIGGER, classify};

pub async fn run(config: Config) {
    // Ensure we're in a proper async context by yielding once
    tokio::task::yield_now().await;

    let listen_on_port = config.listen_on_port;
    let workspace = Path::new(&config.workspace);

    let state = AppState::new(workspace, &config.api_base, config.poll_config())
        .expect("Failed to create app state");

    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(api::index))
        .route(
            "/api/downloads",
            post(api::submit_download).get(api::list_downloads),
        )
        .route("/api/downloads/{id}", get(api::download_status))
        .route("/api/settings", get(api::get_settings))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(cors)
        .layer(Extension(state));

    let addr = format!("0.0.0.0:{listen_on_port}");
    info!("Listening on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");

    axum::serve(listener, app).await.expect("Server error");
}
