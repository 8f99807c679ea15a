use axum::Router;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use video_dispatch::Config;

const RUN_ID: u64 = 4242;

/// Scripted stand-in for the GitHub REST API.
struct MockGithub {
    /// Every request that reached the mock, any endpoint.
    hits: AtomicU32,
    /// Bodies of received dispatch events.
    dispatches: Mutex<Vec<Value>>,
    /// Status and body the dispatch endpoint answers with.
    dispatch_reply: Mutex<(u16, String)>,
    /// Body the run-listing endpoint answers with.
    run_listing: Mutex<Value>,
    /// Scripted per-tick answers of the run-status endpoint; the last entry
    /// repeats once the script is exhausted.
    statuses: Mutex<Vec<(u16, Value)>>,
    status_fetches: AtomicU32,
}

impl MockGithub {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicU32::new(0),
            dispatches: Mutex::new(Vec::new()),
            dispatch_reply: Mutex::new((204, String::new())),
            run_listing: Mutex::new(json!({
                "total_count": 1,
                "workflow_runs": [{
                    "id": RUN_ID,
                    "status": "queued",
                    "conclusion": null,
                    "html_url": format!("https://github.com/octo/video-archive/actions/runs/{RUN_ID}"),
                }]
            })),
            statuses: Mutex::new(Vec::new()),
            status_fetches: AtomicU32::new(0),
        })
    }

    fn reply_to_dispatch(&self, status: u16, body: &str) {
        *self.dispatch_reply.lock().unwrap() = (status, body.to_string());
    }

    fn list_no_runs(&self) {
        *self.run_listing.lock().unwrap() = json!({"total_count": 0, "workflow_runs": []});
    }

    fn script_statuses(&self, script: Vec<(u16, Value)>) {
        *self.statuses.lock().unwrap() = script;
    }
}

fn in_progress() -> (u16, Value) {
    (
        200,
        json!({"id": RUN_ID, "status": "in_progress", "conclusion": null}),
    )
}

fn completed(conclusion: &str) -> (u16, Value) {
    (
        200,
        json!({"id": RUN_ID, "status": "completed", "conclusion": conclusion}),
    )
}

async fn mock_dispatches(
    Extension(mock): Extension<Arc<MockGithub>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    mock.dispatches.lock().unwrap().push(body);

    let (status, body) = mock.dispatch_reply.lock().unwrap().clone();
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn mock_run_listing(Extension(mock): Extension<Arc<MockGithub>>) -> impl IntoResponse {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    Json(mock.run_listing.lock().unwrap().clone())
}

async fn mock_run_status(
    Extension(mock): Extension<Arc<MockGithub>>,
    AxumPath((_owner, _repo, _run_id)): AxumPath<(String, String, u64)>,
) -> impl IntoResponse {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    let tick = mock.status_fetches.fetch_add(1, Ordering::SeqCst) as usize;

    let statuses = mock.statuses.lock().unwrap();
    let (status, body) = statuses
        .get(tick)
        .or_else(|| statuses.last())
        .cloned()
        .unwrap_or_else(in_progress);

    (StatusCode::from_u16(status).unwrap(), Json(body))
}

async fn start_mock(mock: Arc<MockGithub>) -> (String, JoinHandle<()>) {
    let app = Router::new()
        .route("/repos/{owner}/{repo}/dispatches", post(mock_dispatches))
        .route("/repos/{owner}/{repo}/actions/runs", get(mock_run_listing))
        .route(
            "/repos/{owner}/{repo}/actions/runs/{run_id}",
            get(mock_run_status),
        )
        .layer(Extension(mock));

    let port = portpicker::pick_unused_port().expect("No available port");
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}"))
        .await
        .unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), handle)
}

/// Test harness that manages the service and its mock GitHub.
struct TestServer {
    handle: JoinHandle<()>,
    mock_handle: JoinHandle<()>,
    mock: Arc<MockGithub>,
    port: u16,
    workspace: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with_budget(30).await
    }

    async fn start_with_budget(poll_max_attempts: u32) -> Self {
        let test_id = uuid::Uuid::new_v4().to_string();
        let workspace = format!("/tmp/test-workspace-{test_id}");
        Self::start_in(&workspace, poll_max_attempts).await
    }

    /// Start the service against a fresh mock, pointed at `workspace`.
    /// Watch knobs are shrunk so a full poll loop finishes in milliseconds.
    async fn start_in(workspace: &str, poll_max_attempts: u32) -> Self {
        let mock = MockGithub::new();
        let (mock_url, mock_handle) = start_mock(mock.clone()).await;

        let port = portpicker::pick_unused_port().expect("No available port");
        let config = Config {
            listen_on_port: port,
            workspace: workspace.to_string(),
            api_base: mock_url,
            locate_delay_ms: 10,
            poll_interval_ms: 20,
            poll_max_attempts,
            ..Default::default()
        };

        let handle = tokio::spawn(async move {
            video_dispatch::run(config).await;
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        sleep(Duration::from_millis(1)).await;
        // Poll until server is ready
        for _ in 0..50 {
            if let Ok(response) = client
                .get(format!("http://127.0.0.1:{port}/api/settings"))
                .send()
                .await
                && response.status().is_success()
            {
                break;
            }

            sleep(Duration::from_millis(10)).await;
        }

        TestServer {
            handle,
            mock_handle,
            mock,
            port,
            workspace: workspace.to_string(),
            client,
        }
    }

    fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    async fn submit(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/api/downloads", self.url()))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Submit a well-formed request and return the accepted submission id.
    async fn submit_ok(&self) -> String {
        let response = self.submit(valid_request()).await;
        assert_eq!(response.status(), 202);

        let body: Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    async fn record(&self, id: &str) -> Value {
        self.client
            .get(format!("{}/api/downloads/{id}", self.url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll the record until the watch loop reaches a terminal phase.
    async fn wait_for_terminal(&self, id: &str) -> Value {
        for _ in 0..400 {
            let record = self.record(id).await;
            if record["phase"] != "polling" {
                return record;
            }
            sleep(Duration::from_millis(10)).await;
        }

        panic!("watch loop never reached a terminal phase");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.mock_handle.abort();
        std::fs::remove_dir_all(&self.workspace).ok();
    }
}

fn valid_request() -> Value {
    json!({
        "video_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "token": "ghp_testtoken",
        "download_type": "video",
        "owner": "octo",
        "repo": "video-archive",
    })
}

#[tokio::test]
async fn test_server_serves_the_form_page() {
    let server = TestServer::start().await;

    let response = server.client.get(server.url()).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    assert!(body.contains("video_url"));
    assert!(body.contains("Start download"));
}

#[tokio::test]
async fn test_missing_fields_never_reach_github() {
    let server = TestServer::start().await;

    for missing in ["video_url", "token", "owner", "repo"] {
        let mut request = valid_request();
        request[missing] = json!("");

        let response = server.submit(request).await;
        assert_eq!(response.status(), 400, "{missing} should be required");
    }

    // Unsupported host fails validation too
    let mut request = valid_request();
    request["video_url"] = json!("https://vimeo.com/12345");
    let response = server.submit(request).await;
    assert_eq!(response.status(), 400);

    assert_eq!(server.mock.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dispatch_carries_the_event_payload() {
    let server = TestServer::start().await;
    server
        .mock
        .script_statuses(vec![completed("success")]);

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;
    assert_eq!(record["phase"], "succeeded");

    let dispatches = server.mock.dispatches.lock().unwrap();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0]["event_type"], "youtube-download");
    assert_eq!(
        dispatches[0]["client_payload"]["video_url"],
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
    );
    assert_eq!(dispatches[0]["client_payload"]["download_type"], "video");
    assert!(dispatches[0]["client_payload"]["timestamp"].is_string());
}

#[tokio::test]
async fn test_dispatch_422_surfaces_the_server_message_verbatim() {
    let server = TestServer::start().await;
    server
        .mock
        .reply_to_dispatch(422, r#"{"message":"Bad request"}"#);

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;

    assert_eq!(record["phase"], "error");
    assert_eq!(record["status_text"], "Bad request");
}

#[tokio::test]
async fn test_dispatch_500_without_message_reports_the_status() {
    let server = TestServer::start().await;
    server.mock.reply_to_dispatch(500, "boom");

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;

    assert_eq!(record["phase"], "error");
    assert!(record["status_text"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn test_progress_then_success_refreshes_the_listing() {
    let server = TestServer::start().await;
    server.mock.script_statuses(vec![
        in_progress(),
        in_progress(),
        completed("success"),
    ]);

    // The listing starts unstamped
    let listing: Value = server
        .client
        .get(format!("{}/api/downloads", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listing["refreshed_at"].is_null());

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;

    assert_eq!(record["phase"], "succeeded");
    assert_eq!(record["attempts"], 3);
    assert_eq!(record["run_id"], RUN_ID);
    assert!(
        record["run_url"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/runs/{RUN_ID}"))
    );
    assert_eq!(server.mock.status_fetches.load(Ordering::SeqCst), 3);

    let listing: Value = server
        .client
        .get(format!("{}/api/downloads", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listing["refreshed_at"].is_string());
    assert_eq!(listing["entries"], json!([]));
}

#[tokio::test]
async fn test_failed_run_reports_failure() {
    let server = TestServer::start().await;
    server
        .mock
        .script_statuses(vec![in_progress(), completed("failure")]);

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;

    assert_eq!(record["phase"], "failed");
    assert_eq!(record["attempts"], 2);
}

#[tokio::test]
async fn test_timeout_consumes_exactly_the_attempt_budget() {
    let server = TestServer::start_with_budget(3).await;
    // The default script never concludes

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;
    assert_eq!(record["phase"], "timed_out");

    // No tick beyond the budget, even after more intervals pass
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.mock.status_fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_transient_fetch_error_does_not_end_the_loop() {
    let server = TestServer::start().await;
    server.mock.script_statuses(vec![
        (500, json!({"message": "flaky"})),
        completed("success"),
    ]);

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;

    assert_eq!(record["phase"], "succeeded");
    assert_eq!(record["attempts"], 2);
}

#[tokio::test]
async fn test_empty_run_listing_skips_polling() {
    let server = TestServer::start().await;
    server.mock.list_no_runs();

    let id = server.submit_ok().await;
    let record = server.wait_for_terminal(&id).await;

    assert_eq!(record["phase"], "error");
    assert!(
        record["status_text"]
            .as_str()
            .unwrap()
            .contains("No workflow run found")
    );
    assert_eq!(server.mock.status_fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_submission_supersedes_the_first() {
    let server = TestServer::start().await;
    // First loop would poll forever on the default script

    let first = server.submit_ok().await;
    sleep(Duration::from_millis(50)).await;

    // Supersession happens before the second 202 is sent
    let second = server.submit_ok().await;
    let superseded = server.record(&first).await;
    assert_eq!(superseded["phase"], "superseded");

    server.mock.script_statuses(vec![completed("success")]);
    let record = server.wait_for_terminal(&second).await;
    assert_eq!(record["phase"], "succeeded");
}

#[tokio::test]
async fn test_owner_repo_prefill_survives_a_restart() {
    let test_id = uuid::Uuid::new_v4().to_string();
    let workspace = format!("/tmp/test-workspace-{test_id}");

    {
        let server = TestServer::start_in(&workspace, 30).await;
        server.mock.script_statuses(vec![completed("success")]);
        let id = server.submit_ok().await;
        server.wait_for_terminal(&id).await;

        // Keep the workspace for the second server
        server.handle.abort();
        server.mock_handle.abort();
        std::mem::forget(server);
    }

    let server = TestServer::start_in(&workspace, 30).await;
    let settings: Value = server
        .client
        .get(format!("{}/api/settings", server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(settings["github_owner"], "octo");
    assert_eq!(settings["github_repo"], "video-archive");
}

#[tokio::test]
async fn test_unknown_download_id_is_404() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(format!(
            "{}/api/downloads/{}",
            server.url(),
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}
