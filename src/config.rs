//! Runtime configuration, read from `quest.toml`

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

/// Environment variable that overrides `data_dir`
pub const DATA_DIR_ENV: &str = "QUEST_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuestConfig {
    /// Directory holding `quests/` and `scripts/`
    pub data_dir: PathBuf,
    /// Watch the data directory and reload on change
    pub hot_reload: bool,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            // Dev builds reload by default
            hot_reload: cfg!(debug_assertions),
        }
    }
}

impl QuestConfig {
    /// Read the config file, falling back to defaults when it does not exist,
    /// then apply the environment override
    pub fn load(path: &Path) -> Result<Self, String> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
            Self::from_toml(&content).map_err(|e| format!("{:?}: {}", path, e))?
        } else {
            info!("No config at {:?}, using defaults", path);
            Self::default()
        };

        Ok(config.with_data_dir_override(std::env::var(DATA_DIR_ENV).ok()))
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    fn with_data_dir_override(mut self, data_dir: Option<String>) -> Self {
        if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }
}
