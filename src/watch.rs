use crate::app_state::AppState;
use crate::github::ClientPayload;
use crate::workflow::TriggerKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fixed polling knobs, taken from `Config` at startup.
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub locate_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Lifecycle of one submission's watch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPhase {
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Error,
    Superseded,
}

impl DownloadPhase {
    /// Everything except an active poll loop is final.
    pub fn is_terminal(self) -> bool {
        self != DownloadPhase::Polling
    }
}

/// Snapshot of one submission, read back by the page while the loop runs.
#[derive(Clone, Debug, Serialize)]
pub struct DownloadRecord {
    pub id: Uuid,
    pub video_url: String,
    pub download_type: String,
    pub trigger: TriggerKind,
    pub phase: DownloadPhase,
    pub status_text: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_url: Option<String>,
    pub created_at: String,
}

impl DownloadRecord {
    pub fn new(id: Uuid, video_url: &str, download_type: &str, trigger: TriggerKind) -> Self {
        Self {
            id,
            video_url: video_url.to_string(),
            download_type: download_type.to_string(),
            trigger,
            phase: DownloadPhase::Polling,
            status_text: "Dispatching workflow".to_string(),
            attempts: 0,
            run_id: None,
            run_url: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

struct ActiveWatch {
    id: Uuid,
    handle: JoinHandle<()>,
}

/// Keeps every submission's record plus the handle of the one live watch
/// task, so a newer submission can stop the previous loop.
#[derive(Clone, Default)]
pub struct WatchManager {
    records: Arc<TokioMutex<HashMap<Uuid, DownloadRecord>>>,
    active: Arc<TokioMutex<Option<ActiveWatch>>>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: DownloadRecord) {
        self.records.lock().await.insert(record.id, record);
    }

    pub async fn get(&self, id: &Uuid) -> Option<DownloadRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// Apply a mutation to one record under the lock.
    pub async fn update(&self, id: &Uuid, apply: impl FnOnce(&mut DownloadRecord)) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            apply(record);
        }
    }

    /// Track `handle` as the live watch task, aborting the previous one.
    /// The superseded record keeps its last snapshot.
    pub async fn begin_watch(&self, id: Uuid, handle: JoinHandle<()>) {
        let previous = self.active.lock().await.replace(ActiveWatch { id, handle });

        if let Some(previous) = previous {
            previous.handle.abort();
            self.update(&previous.id, |record| {
                if !record.phase.is_terminal() {
                    info!(id = %record.id, "Watch superseded by a newer submission");
                    record.phase = DownloadPhase::Superseded;
                    record.status_text = "Superseded by a newer submission".to_string();
                }
            })
            .await;
        }
    }
}

/// Everything the watch task needs to drive one submission. The credential
/// lives here and never lands on the record.
#[derive(Clone)]
pub struct WatchRequest {
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub trigger: TriggerKind,
    pub video_url: String,
    pub download_type: String,
}

/// Dispatch the workflow, locate its run, then poll the run to a terminal
/// state. Runs as one spawned task per submission.
///
/// Run lookup is best effort: dispatching returns no run id, so after a short
/// delay the newest listed run is assumed to be ours. A busy repository or a
/// slow scheduler can hand back an unrelated run, or none at all.
pub async fn watch_download(state: AppState, id: Uuid, request: WatchRequest) {
    let payload = ClientPayload {
        video_url: request.video_url.clone(),
        download_type: request.download_type.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    info!(%id, trigger = request.trigger, "Dispatching download workflow");
    if let Err(error) = state
        .github
        .dispatch_event(
            &request.owner,
            &request.repo,
            &request.token,
            request.trigger,
            &payload,
        )
        .await
    {
        error!(%id, %error, "Workflow dispatch failed");
        state
            .watch_manager
            .update(&id, |record| {
                record.phase = DownloadPhase::Error;
                record.status_text = error.to_string();
            })
            .await;
        return;
    }

    state
        .watch_manager
        .update(&id, |record| {
            record.status_text = "Workflow dispatched, locating run".to_string();
        })
        .await;

    tokio::time::sleep(state.poll.locate_delay).await;

    let run = match state
        .github
        .latest_run(&request.owner, &request.repo, &request.token)
        .await
    {
        Ok(Some(run)) => run,
        Ok(None) => {
            warn!(%id, "No workflow runs listed after dispatch");
            state
                .watch_manager
                .update(&id, |record| {
                    record.phase = DownloadPhase::Error;
                    record.status_text =
                        "No workflow run found, check the repository's Actions page".to_string();
                })
                .await;
            return;
        }
        Err(error) => {
            error!(%id, %error, "Failed to list workflow runs");
            state
                .watch_manager
                .update(&id, |record| {
                    record.phase = DownloadPhase::Error;
                    record.status_text = error.to_string();
                })
                .await;
            return;
        }
    };

    info!(%id, run_id = run.id, "Tracking workflow run");
    state
        .watch_manager
        .update(&id, |record| {
            record.run_id = Some(run.id);
            record.run_url = run.html_url.clone();
            record.status_text = format!("Tracking run {}", run.id);
        })
        .await;

    let max_attempts = state.poll.max_attempts;
    for attempt in 1..=max_attempts {
        match state
            .github
            .run_status(&request.owner, &request.repo, &request.token, run.id)
            .await
        {
            Ok(status) => match status.conclusion.as_deref() {
                Some("success") => {
                    info!(%id, run_id = run.id, attempt, "Workflow run succeeded");
                    state
                        .watch_manager
                        .update(&id, |record| {
                            record.phase = DownloadPhase::Succeeded;
                            record.attempts = attempt;
                            record.status_text =
                                "Download workflow completed successfully".to_string();
                        })
                        .await;
                    state.mark_downloads_refreshed().await;
                    return;
                }
                Some("failure") => {
                    warn!(%id, run_id = run.id, attempt, "Workflow run failed");
                    state
                        .watch_manager
                        .update(&id, |record| {
                            record.phase = DownloadPhase::Failed;
                            record.attempts = attempt;
                            record.status_text = "Download workflow failed".to_string();
                        })
                        .await;
                    return;
                }
                _ => {
                    state
                        .watch_manager
                        .update(&id, |record| {
                            record.attempts = attempt;
                            record.status_text =
                                format!("Run {} ({attempt}/{max_attempts})", status.status);
                        })
                        .await;
                }
            },
            Err(error) => {
                // A failed fetch still consumes an attempt, only the
                // exhausted budget ends a non-terminal loop.
                warn!(%id, run_id = run.id, attempt, %error, "Run status fetch failed");
                state
                    .watch_manager
                    .update(&id, |record| {
                        record.attempts = attempt;
                        record.status_text =
                            format!("Status check failed ({attempt}/{max_attempts})");
                    })
                    .await;
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(state.poll.interval).await;
        }
    }

    warn!(%id, run_id = run.id, "Poll budget exhausted before the run finished");
    state
        .watch_manager
        .update(&id, |record| {
            record.phase = DownloadPhase::TimedOut;
            record.status_text =
                "Timed out waiting for the run, check the repository's Actions page".to_string();
        })
        .await;
}
