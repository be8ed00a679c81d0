use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collab::StaticIdentity;
use crate::machine::{SessionSettings, DEFAULT_SESSION_SECS};
use crate::model::UserId;
use crate::policy::{AbandonPolicy, AnswerPolicy, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub user_id: String,
    pub session_secs: u64,
    pub question_set: String,
    pub question_count: usize,
    pub shuffle: bool,
    pub answer_policy: AnswerPolicy,
    pub abandon_policy: AbandonPolicy,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            session_secs: DEFAULT_SESSION_SECS,
            question_set: "software_engineer".to_string(),
            question_count: 4,
            shuffle: false,
            answer_policy: AnswerPolicy::Overwrite,
            abandon_policy: AbandonPolicy::Forfeit,
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

impl Config {
    pub fn identity(&self) -> StaticIdentity {
        StaticIdentity(UserId::new(self.user_id.clone()))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            duration_secs: self.session_secs,
            answer_policy: self.answer_policy,
            abandon_policy: self.abandon_policy,
            retry: RetryPolicy::new(
                Duration::from_millis(self.retry_initial_ms),
                Duration::from_millis(self.retry_max_ms.max(self.retry_initial_ms)),
            ),
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "mockprep") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("mockprep_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "ignoring unreadable config")
                }
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}
