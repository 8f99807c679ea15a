use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
/// GitHub rejects requests without a User-Agent header.
const USER_AGENT_VALUE: &str = "video-dispatch";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from talking to the GitHub REST API.
#[derive(Debug, Error)]
pub enum GithubError {
    /// Non-2xx response. `message` carries the server's own wording when the
    /// body parses, so the status surface can show it verbatim.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// `client_payload` of a repository_dispatch event, read by the workflows.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientPayload {
    pub video_url: String,
    pub download_type: String,
    pub timestamp: String,
}

#[derive(Serialize)]
struct DispatchBody<'a> {
    event_type: &'a str,
    client_payload: &'a ClientPayload,
}

#[derive(Debug, Deserialize)]
struct RunListing {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

/// The subset of a workflow run the poller reads.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

/// Build the error for a non-2xx response body.
fn api_error(status: u16, body: &str) -> GithubError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|parsed| parsed.message)
        .unwrap_or_else(|_| format!("GitHub API returned status {status}"));

    GithubError::Api { status, message }
}

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(api_base: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// `POST /repos/{owner}/{repo}/dispatches`. GitHub answers 204 with an
    /// empty body on success and never returns a run id here.
    pub async fn dispatch_event(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        event_type: &str,
        payload: &ClientPayload,
    ) -> Result<(), GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/dispatches", self.api_base);
        debug!(%url, event_type, "Dispatching repository event");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("token {token}"))
            .header(ACCEPT, GITHUB_ACCEPT)
            .json(&DispatchBody {
                event_type,
                client_payload: payload,
            })
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// List recent runs and return the newest one, if any.
    pub async fn latest_run(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Option<WorkflowRun>, GithubError> {
        let url = format!("{}/repos/{owner}/{repo}/actions/runs", self.api_base);
        let response = self.get(&url, token).await?;

        let listing: RunListing = Self::check(response).await?.json().await?;
        Ok(listing.workflow_runs.into_iter().next())
    }

    /// Fetch the current status and conclusion of one run.
    pub async fn run_status(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
        run_id: u64,
    ) -> Result<WorkflowRun, GithubError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/runs/{run_id}",
            self.api_base
        );
        let response = self.get(&url, token).await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn get(&self, url: &str, token: &str) -> Result<reqwest::Response, GithubError> {
        Ok(self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("token {token}"))
            .header(ACCEPT, GITHUB_ACCEPT)
            .send()
            .await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GithubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }
}
