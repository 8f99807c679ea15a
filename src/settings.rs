use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{error, info, warn};

const SETTINGS_FILE: &str = "settings.json";

/// The two form fields that survive restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_repo: Option<String>,
}

/// Persists the remembered form fields as JSON in the workspace.
/// Last write wins, the whole file is rewritten on every save.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Arc<TokioMutex<Settings>>,
}

impl SettingsStore {
    /// Load persisted settings from the workspace, an absent file is empty.
    pub fn new(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(SETTINGS_FILE);
        let settings = if path.exists() {
            let content = fs::read_to_string(&path)?;

            serde_json::from_str(&content)
                .inspect_err(|error| {
                    warn!(?error, ?path, "Failed to parse settings file, starting empty");
                })
                .unwrap_or_default()
        } else {
            Settings::default()
        };

        info!(file = %path.display(), "Initialize settings store");

        Ok(Self {
            path,
            settings: Arc::new(TokioMutex::new(settings)),
        })
    }

    pub async fn current(&self) -> Settings {
        self.settings.lock().await.clone()
    }

    /// Overwrite the remembered owner/repo pair and persist the change.
    pub async fn remember_repository(&self, owner: &str, repo: &str) {
        let mut settings = self.settings.lock().await;
        settings.github_owner = Some(owner.to_string());
        settings.github_repo = Some(repo.to_string());

        if let Err(error) = self.save(&settings).await {
            error!(?error, "Failed to save settings file");
        }
    }

    async fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        Ok(tokio::fs::write(&self.path, content).await?)
    }
}
