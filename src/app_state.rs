use crate::github::GithubClient;
use crate::settings::SettingsStore;
use crate::watch::{PollConfig, WatchManager};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

fn init_workspace(workspace: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(workspace)
}

/// Shared state behind every handler and watch task.
#[derive(Clone)]
pub struct AppState {
    pub github: GithubClient,
    pub watch_manager: WatchManager,
    pub settings: SettingsStore,
    pub poll: PollConfig,

    downloads_refreshed_at: Arc<TokioMutex<Option<String>>>,
}

impl AppState {
    pub fn new(workspace: &Path, api_base: &str, poll: PollConfig) -> anyhow::Result<Self> {
        init_workspace(workspace)?;

        let settings = SettingsStore::new(workspace)?;
        let github = GithubClient::new(api_base)?;

        Ok(Self {
            github,
            watch_manager: WatchManager::new(),
            settings,
            poll,
            downloads_refreshed_at: Arc::new(TokioMutex::new(None)),
        })
    }

    /// Stamp the completed-downloads listing as freshly changed. The page
    /// refetches the listing when it sees a new stamp.
    pub async fn mark_downloads_refreshed(&self) {
        let mut refreshed_at = self.downloads_refreshed_at.lock().await;
        *refreshed_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub async fn downloads_refreshed_at(&self) -> Option<String> {
        self.downloads_refreshed_at.lock().await.clone()
    }
}
