//! Script Library
//!
//! Loads and caches quest definitions (TOML) and their Lua script sources.
//! Supports hot-reloading during development.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::definition::QuestDefinition;
use super::registry::BehaviorFactory;
use super::runner::lua_factory;

/// Quest definitions and script sources loaded from a data directory
pub struct ScriptLibrary {
    /// Result of the last load pass
    loaded: RwLock<Loaded>,
    /// Base directory for quest definitions
    quests_dir: PathBuf,
    /// Base directory for scripts
    scripts_dir: PathBuf,
}

/// Contents of one load pass, swapped in as a whole
#[derive(Default)]
struct Loaded {
    /// Loaded quest definitions
    quests: HashMap<String, Arc<QuestDefinition>>,
    /// Lua script sources (script_path -> source code)
    scripts: HashMap<String, String>,
}

impl ScriptLibrary {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            loaded: RwLock::new(Loaded::default()),
            quests_dir: data_dir.join("quests"),
            scripts_dir: data_dir.join("scripts"),
        }
    }

    pub fn quests_dir(&self) -> &Path {
        &self.quests_dir
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Load all quest definitions and the scripts they reference.
    /// Replaces whatever was loaded before.
    pub async fn load_all(&self) -> Result<usize, String> {
        info!("Loading quests from {:?}", self.quests_dir);

        if !self.quests_dir.exists() {
            warn!("Quest directory does not exist: {:?}", self.quests_dir);
            return Ok(0);
        }

        // Collect all TOML files first (sync), then load them
        let mut paths = Vec::new();
        collect_toml_files(&self.quests_dir, &mut paths)?;
        paths.sort();

        let mut loaded = Loaded::default();
        for path in paths {
            if let Err(e) = self.load_quest_file(&path, &mut loaded) {
                warn!("Failed to load quest {:?}: {}", path, e);
            }
        }

        let count = loaded.quests.len();
        *self.loaded.write().await = loaded;

        info!("Loaded {} quest definitions", count);
        Ok(count)
    }

    /// Load a single quest file and its script
    fn load_quest_file(&self, path: &Path, loaded: &mut Loaded) -> Result<(), String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

        let quest = QuestDefinition::from_toml(&content)
            .map_err(|e| format!("{:?}: {}", path, e))?;

        if loaded.quests.contains_key(&quest.id) {
            return Err(format!("Duplicate quest ID '{}'", quest.id));
        }

        if let Some(ref script_path) = quest.script {
            if !loaded.scripts.contains_key(script_path) {
                let source = self.read_script(script_path)?;
                loaded.scripts.insert(script_path.clone(), source);
                info!("Loaded script: {}", script_path);
            }
        }

        info!("Loaded quest: {} ({})", quest.name, quest.id);
        loaded.quests.insert(quest.id.clone(), Arc::new(quest));
        Ok(())
    }

    fn read_script(&self, script_path: &str) -> Result<String, String> {
        let full_path = self.scripts_dir.join(script_path);
        if !full_path.exists() {
            return Err(format!("Script not found: {:?}", full_path));
        }

        std::fs::read_to_string(&full_path)
            .map_err(|e| format!("Failed to read script {:?}: {}", full_path, e))
    }

    /// Get a quest definition by ID
    pub async fn get(&self, quest_id: &str) -> Option<Arc<QuestDefinition>> {
        self.loaded.read().await.quests.get(quest_id).cloned()
    }

    /// Get all quest definitions, sorted by ID
    pub async fn definitions(&self) -> Vec<Arc<QuestDefinition>> {
        let mut definitions: Vec<_> = self.loaded.read().await.quests.values().cloned().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// Get Lua script source by path
    pub async fn get_script(&self, script_path: &str) -> Option<String> {
        self.loaded.read().await.scripts.get(script_path).cloned()
    }

    /// Behavior factories for every quest backed by a script
    pub async fn script_factories(&self) -> Vec<(String, BehaviorFactory)> {
        let loaded = self.loaded.read().await;

        let mut factories = Vec::new();
        for quest in loaded.quests.values() {
            let Some(ref script_path) = quest.script else {
                continue;
            };
            match loaded.scripts.get(script_path) {
                Some(source) => factories.push((
                    quest.id.clone(),
                    lua_factory(script_path.clone(), source.clone()),
                )),
                None => warn!("Quest '{}' has no loaded script '{}'", quest.id, script_path),
            }
        }
        factories.sort_by(|a, b| a.0.cmp(&b.0));
        factories
    }

    /// Get count of loaded quests
    pub async fn count(&self) -> usize {
        self.loaded.read().await.quests.len()
    }

    /// Start file watcher for hot-reload.
    /// Must be called from within a tokio runtime. Returns a channel receiver
    /// that signals when reloads occur.
    pub fn start_file_watcher(
        self: &Arc<Self>,
    ) -> Result<tokio::sync::mpsc::Receiver<HotReloadEvent>, String> {
        use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("File watcher needs a tokio runtime: {}", e))?;

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let library = Arc::clone(self);

        let quests_dir = self.quests_dir.clone();
        let scripts_dir = self.scripts_dir.clone();

        // notify is sync, so the watcher lives on its own thread
        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                },
                Config::default().with_poll_interval(Duration::from_secs(1)),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

            for dir in [&quests_dir, &scripts_dir] {
                if dir.exists() {
                    if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
                        error!("Failed to watch {:?}: {}", dir, e);
                    }
                }
            }

            info!("Quest hot-reload watcher started for {:?} and {:?}", quests_dir, scripts_dir);

            // Ends when the watcher's sender is dropped
            while let Ok(event) = notify_rx.recv() {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                let Some(path) = event.paths.iter().find(|p| is_watched_file(p)).cloned() else {
                    continue;
                };

                info!("Detected change in {:?}, triggering reload", path);
                let reload_library = Arc::clone(&library);
                let reload_tx = tx.clone();

                rt.spawn(async move {
                    let event = match reload_library.load_all().await {
                        Ok(_) => {
                            info!("Hot-reload completed successfully");
                            HotReloadEvent::Reloaded(path.to_string_lossy().to_string())
                        }
                        Err(e) => {
                            error!("Hot-reload failed: {}", e);
                            HotReloadEvent::Error(e)
                        }
                    };
                    let _ = reload_tx.send(event).await;
                });

                // Nobody listens for reloads anymore
                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// Recursively collect quest files (non-async to avoid boxing)
fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to read directory {:?}: {}", dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
        let path = entry.path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

fn is_watched_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("lua")
    )
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// A file was reloaded successfully
    Reloaded(String),
    /// An error occurred during reload
    Error(String),
}
